//! Stream Event Types
//!
//! One frame of a chat response stream decodes into exactly one
//! [`StreamEvent`]. The `type` field selects the variant; discriminators this
//! client does not know about land in [`StreamEvent::Unknown`] and are
//! skipped by the consumer.

use serde::{Deserialize, Serialize};

use crate::jobs::JobRequest;
use crate::messages::AssetItem;

/// A typed event from a chat response stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental response text
    Token {
        /// The token text
        text: String,
    },

    /// Assets that belong to the response
    #[serde(rename = "assets")]
    AssetBatch {
        /// Asset references in arrival order
        items: Vec<AssetItem>,
    },

    /// Entities were created or changed server-side
    #[serde(rename = "entities")]
    EntityChange,

    /// Progress text for the in-flight request ("searching...", "drafting...")
    Status {
        /// Status text
        text: String,
    },

    /// Background generation jobs were queued
    GenerationStart {
        /// The announced jobs
        jobs: Vec<JobRequest>,
    },

    /// Background generation finished within the request
    GenerationComplete,

    /// The backend reported a failure
    Error {
        /// Error text, shown verbatim
        message: String,
    },

    /// Discriminator this client does not understand
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Whether this event puts content into the assistant message
    ///
    /// The assistant message is created lazily on the first such event.
    #[must_use]
    pub fn is_content_bearing(&self) -> bool {
        matches!(self, Self::Token { .. } | Self::AssetBatch { .. })
    }

    /// Short name for logging
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::AssetBatch { .. } => "assets",
            Self::EntityChange => "entities",
            Self::Status { .. } => "status",
            Self::GenerationStart { .. } => "generation_start",
            Self::GenerationComplete => "generation_complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobKind;
    use crate::messages::AssetKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_token_ignores_extra_fields() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"token","text":"Hi","seq":4}"#).unwrap();
        assert_eq!(event, StreamEvent::Token { text: "Hi".into() });
    }

    #[test]
    fn test_unknown_discriminator() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"telemetry","cpu":0.3}"#).unwrap();
        assert_eq!(event, StreamEvent::Unknown);
    }

    #[test]
    fn test_generation_start() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"generation_start","jobs":[{"type":"video","prompt":"waves","duration":5}]}"#,
        )
        .unwrap();

        match event {
            StreamEvent::GenerationStart { jobs } => {
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].kind, JobKind::Video);
                assert_eq!(jobs[0].prompt.as_deref(), Some("waves"));
                assert_eq!(jobs[0].duration, Some(5.0));
            }
            other => panic!("Expected GenerationStart, got {other:?}"),
        }
    }

    #[test]
    fn test_asset_batch() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"assets","items":[{"url":"https://cdn/x.png","kind":"image"}]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::AssetBatch {
                items: vec![AssetItem {
                    url: "https://cdn/x.png".into(),
                    kind: AssetKind::Image,
                }]
            }
        );
        assert!(event.is_content_bearing());
    }

    #[test]
    fn test_unit_variants() {
        let entities: StreamEvent = serde_json::from_str(r#"{"type":"entities"}"#).unwrap();
        assert_eq!(entities, StreamEvent::EntityChange);

        let done: StreamEvent =
            serde_json::from_str(r#"{"type":"generation_complete"}"#).unwrap();
        assert_eq!(done, StreamEvent::GenerationComplete);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let result = serde_json::from_str::<StreamEvent>(r#"{"type":"token"}"#);
        assert!(result.is_err());
    }
}
