//! Progress Frames
//!
//! The progress socket carries two kinds of text message: the literal
//! `"pong"` answering our keep-alive, and JSON objects tagged by `type`.
//!
//! ```text
//! {"type":"progress","message":"Rendering","progress":0.4,"duration":5}
//! {"type":"error","message":"GPU quota exceeded"}
//! {"type":"complete","result":{"messageId":"m_12","content":"Done","videoUrl":"..."}}
//! ```

use serde::{Deserialize, Serialize};

use crate::messages::{MediaRefs, MessageId};

/// Keep-alive sent by the client
pub const PING: &str = "ping";

/// Keep-alive answer sent by the server
pub const PONG: &str = "pong";

/// Payload of a `complete` frame
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteResult {
    /// Server-side id of the message carrying the result
    #[serde(default, alias = "messageId", alias = "id")]
    pub message_id: Option<String>,
    /// Message text
    #[serde(default)]
    pub content: Option<String>,
    /// Primary image
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
    /// All images
    #[serde(default, alias = "imageUrls")]
    pub image_urls: Vec<String>,
    /// Generated video
    #[serde(default, alias = "videoUrl")]
    pub video_url: Option<String>,
    /// Generated audio
    #[serde(default, alias = "audioUrl")]
    pub audio_url: Option<String>,
    /// Label for the audio
    #[serde(default, alias = "audioLabel")]
    pub audio_label: Option<String>,
}

impl CompleteResult {
    /// Media carried by the result
    #[must_use]
    pub fn media(&self) -> MediaRefs {
        MediaRefs {
            image_url: self.image_url.clone(),
            image_urls: self.image_urls.clone(),
            video_url: self.video_url.clone(),
            audio_url: self.audio_url.clone(),
            audio_label: self.audio_label.clone(),
        }
    }

    /// Server message id, if the backend supplied one
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(MessageId::from_server)
    }
}

/// A decoded frame from the progress socket
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressFrame {
    /// Keep-alive answer; never produced by JSON decoding
    #[serde(skip)]
    Pong,

    /// A background job made progress
    Progress {
        /// Human-readable step
        #[serde(default)]
        message: Option<String>,
        /// Completion fraction in 0..1
        #[serde(default)]
        progress: f64,
        /// Clip length in seconds, when known
        #[serde(default)]
        duration: Option<f64>,
    },

    /// A background job failed
    Error {
        /// Failure text, shown verbatim
        #[serde(default)]
        message: String,
    },

    /// A background job finished
    Complete {
        /// What the job produced
        #[serde(default)]
        result: CompleteResult,
    },

    /// Anything else
    #[serde(other)]
    Unknown,
}

/// Decode one text message from the progress socket
///
/// `"pong"` is recognised before any JSON parsing happens.
///
/// # Errors
///
/// Returns the JSON error for text that is neither `"pong"` nor a frame.
pub fn parse_progress_frame(text: &str) -> Result<ProgressFrame, serde_json::Error> {
    let trimmed = text.trim();
    if trimmed == PONG {
        return Ok(ProgressFrame::Pong);
    }
    serde_json::from_str(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pong_is_not_json() {
        assert_eq!(parse_progress_frame("pong").unwrap(), ProgressFrame::Pong);
        assert_eq!(parse_progress_frame(" pong\n").unwrap(), ProgressFrame::Pong);
    }

    #[test]
    fn test_progress_frame() {
        let frame =
            parse_progress_frame(r#"{"type":"progress","message":"Rendering","progress":0.4,"duration":5}"#)
                .unwrap();
        assert_eq!(
            frame,
            ProgressFrame::Progress {
                message: Some("Rendering".into()),
                progress: 0.4,
                duration: Some(5.0),
            }
        );
    }

    #[test]
    fn test_complete_accepts_camel_case() {
        let frame = parse_progress_frame(
            r#"{"type":"complete","result":{"messageId":"m_1","content":"Done","videoUrl":"https://cdn/v.mp4"}}"#,
        )
        .unwrap();

        let ProgressFrame::Complete { result } = frame else {
            panic!("Expected complete frame");
        };
        assert_eq!(result.message_id(), Some(MessageId::from_server("m_1")));
        assert_eq!(result.content.as_deref(), Some("Done"));
        assert_eq!(result.media().video_url.as_deref(), Some("https://cdn/v.mp4"));
    }

    #[test]
    fn test_empty_message_id_is_absent() {
        let result = CompleteResult {
            message_id: Some(String::new()),
            ..CompleteResult::default()
        };
        assert!(result.message_id().is_none());
    }

    #[test]
    fn test_unknown_and_garbage() {
        assert_eq!(
            parse_progress_frame(r#"{"type":"queued","position":3}"#).unwrap(),
            ProgressFrame::Unknown
        );
        assert!(parse_progress_frame("not json").is_err());
    }
}
