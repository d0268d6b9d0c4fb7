//! Conversation Messages
//!
//! The message model shared by the request pipeline, the progress channel and
//! the surface. A [`Message`] is created when the user submits a request or
//! when the first content-bearing event of a response arrives; after that it
//! is only ever mutated in place. Deleting messages belongs to the REST layer,
//! not to this crate.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique message identifier
///
/// Client-side messages get a `msg_{n}` id. Messages delivered by the
/// progress channel carry the server's id verbatim so later `complete`
/// frames for the same message can find it again.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// Wrap an identifier assigned by the server
    pub fn from_server(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session (conversation) identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human user
    User,
    /// The AI backend
    Assistant,
}

/// Kind of a generated asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Audio clip
    Audio,
}

/// A single asset reference delivered inside an `assets` frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetItem {
    /// Where the asset can be fetched
    pub url: String,
    /// What kind of asset it is
    pub kind: AssetKind,
}

/// Media attached to a message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRefs {
    /// Primary image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Additional images, in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    /// Video clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Audio clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Display label for the audio clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_label: Option<String>,
}

impl MediaRefs {
    /// Whether no media is attached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image_url.is_none()
            && self.image_urls.is_empty()
            && self.video_url.is_none()
            && self.audio_url.is_none()
    }

    /// Every distinct URL, images first
    #[must_use]
    pub fn urls(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let all = self
            .image_url
            .iter()
            .chain(&self.image_urls)
            .chain(&self.video_url)
            .chain(&self.audio_url);
        for url in all {
            if !out.contains(&url.as_str()) {
                out.push(url);
            }
        }
        out
    }

    /// Attach one asset, routing it to the right slot by kind
    pub fn attach(&mut self, item: &AssetItem) {
        match item.kind {
            AssetKind::Image => {
                if self.image_url.is_none() {
                    self.image_url = Some(item.url.clone());
                }
                if !self.image_urls.contains(&item.url) {
                    self.image_urls.push(item.url.clone());
                }
            }
            AssetKind::Video => self.video_url = Some(item.url.clone()),
            AssetKind::Audio => self.audio_url = Some(item.url.clone()),
        }
    }

    /// Patch fields that are set in `other`, leaving the rest untouched
    ///
    /// A `None` in `other` never clears an existing value.
    pub fn merge(&mut self, other: &MediaRefs) {
        if other.image_url.is_some() {
            self.image_url.clone_from(&other.image_url);
        }
        for url in &other.image_urls {
            if !self.image_urls.contains(url) {
                self.image_urls.push(url.clone());
            }
        }
        if other.video_url.is_some() {
            self.video_url.clone_from(&other.video_url);
        }
        if other.audio_url.is_some() {
            self.audio_url.clone_from(&other.audio_url);
        }
        if other.audio_label.is_some() {
            self.audio_label.clone_from(&other.audio_label);
        }
    }
}

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Attached media
    #[serde(default)]
    pub media: MediaRefs,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
    /// Whether the drip renderer still owns the content
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    /// Create a complete message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            media: MediaRefs::default(),
            timestamp: now_ms(),
            streaming: false,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an empty assistant message whose content will be streamed in
    #[must_use]
    pub fn streaming(id: MessageId) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            content: String::new(),
            media: MediaRefs::default(),
            timestamp: now_ms(),
            streaming: true,
        }
    }

    /// Attach media
    #[must_use]
    pub fn with_media(mut self, media: MediaRefs) -> Self {
        self.media = media;
        self
    }

    /// Use a specific ID
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }
}

/// Current wall-clock time in Unix milliseconds
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("msg_"));
    }

    #[test]
    fn test_attach_routes_by_kind() {
        let mut media = MediaRefs::default();
        media.attach(&AssetItem {
            url: "https://cdn/a.png".into(),
            kind: AssetKind::Image,
        });
        media.attach(&AssetItem {
            url: "https://cdn/b.png".into(),
            kind: AssetKind::Image,
        });
        media.attach(&AssetItem {
            url: "https://cdn/c.mp4".into(),
            kind: AssetKind::Video,
        });

        assert_eq!(media.image_url.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(media.image_urls.len(), 2);
        assert_eq!(media.video_url.as_deref(), Some("https://cdn/c.mp4"));
        assert!(media.audio_url.is_none());
    }

    #[test]
    fn test_merge_never_clears() {
        let mut media = MediaRefs {
            video_url: Some("v1".into()),
            audio_label: Some("theme".into()),
            ..Default::default()
        };
        media.merge(&MediaRefs {
            image_url: Some("i1".into()),
            ..Default::default()
        });

        assert_eq!(media.video_url.as_deref(), Some("v1"));
        assert_eq!(media.image_url.as_deref(), Some("i1"));
        assert_eq!(media.audio_label.as_deref(), Some("theme"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_urls_are_deduplicated() {
        let media = MediaRefs {
            image_url: Some("a.png".into()),
            image_urls: vec!["a.png".into(), "b.png".into()],
            video_url: Some("v.mp4".into()),
            ..MediaRefs::default()
        };
        assert_eq!(media.urls(), vec!["a.png", "b.png", "v.mp4"]);
    }
}
