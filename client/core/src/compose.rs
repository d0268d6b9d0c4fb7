//! Compose State
//!
//! Each session has its own half-written message: draft text plus optional
//! video and audio references. Switching sessions snapshots the outgoing
//! state and restores the incoming one in a single synchronous call, so
//! there is never a moment where two compose states are live.
//!
//! Image attachments are raw bytes picked by the user and are deliberately
//! not part of the snapshot: they are dropped on every switch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::messages::SessionId;
use crate::offline::join_draft;

/// The persistable part of a session's compose area
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeState {
    /// Text typed so far
    pub draft_text: String,
    /// Referenced video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
    /// Referenced audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    /// Label shown for the audio reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_label: Option<String>,
}

impl ComposeState {
    /// Whether there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draft_text.trim().is_empty() && self.video_ref.is_none() && self.audio_ref.is_none()
    }
}

/// A binary image picked for upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    /// File name sent in the multipart form
    pub name: String,
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `image/png`
    pub mime: String,
}

impl ImageAttachment {
    /// Create an attachment, guessing the MIME type from the file extension
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime = mime_for(&name).to_string();
        Self { name, bytes, mime }
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Everything taken out of the compose area when a message is sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingCompose {
    /// The compose fields at send time
    pub state: ComposeState,
    /// Images to upload
    pub images: Vec<ImageAttachment>,
}

/// Owns the compose state of the active session and the snapshots of all
/// others
#[derive(Debug, Default)]
pub struct ComposeStateMultiplexer {
    active: Option<SessionId>,
    input: ComposeState,
    images: Vec<ImageAttachment>,
    saved: HashMap<SessionId, ComposeState>,
}

impl ComposeStateMultiplexer {
    /// Create an empty multiplexer with no active session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active session, if any
    #[must_use]
    pub fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// Compose state of the active session
    #[must_use]
    pub fn current(&self) -> &ComposeState {
        &self.input
    }

    /// Images attached in the active session
    #[must_use]
    pub fn images(&self) -> &[ImageAttachment] {
        &self.images
    }

    /// Make `session` active
    ///
    /// The outgoing state is saved, images are dropped, and the incoming
    /// session's snapshot is restored (or the input reset when there is
    /// none). Returns whether a snapshot was found. Switching to the session
    /// that is already active changes nothing.
    pub fn switch_to(&mut self, session: &SessionId) -> bool {
        if self.active.as_ref() == Some(session) {
            return true;
        }

        if let Some(outgoing) = self.active.take() {
            let snapshot = std::mem::take(&mut self.input);
            self.saved.insert(outgoing, snapshot);
        }
        self.images.clear();

        let restored = match self.saved.get(session) {
            Some(snapshot) => {
                self.input = snapshot.clone();
                true
            }
            None => {
                self.input = ComposeState::default();
                false
            }
        };
        self.active = Some(session.clone());
        restored
    }

    /// Replace the draft text
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.input.draft_text = text.into();
    }

    /// Fill the draft only if it is still empty; returns whether it was applied
    pub fn fill_empty_draft(&mut self, session: &SessionId, text: &str) -> bool {
        if self.active.as_ref() != Some(session) || !self.input.draft_text.is_empty() {
            return false;
        }
        self.input.draft_text = text.to_string();
        true
    }

    /// Set or clear the video reference
    pub fn set_video(&mut self, video: Option<String>) {
        self.input.video_ref = video;
    }

    /// Set or clear the audio reference and its label
    pub fn set_audio(&mut self, audio: Option<String>, label: Option<String>) {
        self.input.audio_ref = audio;
        self.input.audio_label = label;
    }

    /// Attach an image to the active session
    pub fn attach_image(&mut self, image: ImageAttachment) {
        self.images.push(image);
    }

    /// Remove and return everything to send, leaving the compose area empty
    pub fn take_for_send(&mut self) -> OutgoingCompose {
        OutgoingCompose {
            state: std::mem::take(&mut self.input),
            images: std::mem::take(&mut self.images),
        }
    }

    /// Put `text` back into the draft of `session`, after whatever is there
    ///
    /// Goes into the live input when `session` is active, otherwise into its
    /// snapshot (created if missing) so the next switch restores it. Returns
    /// the merged draft.
    pub fn restore_text(&mut self, session: &SessionId, text: &str) -> String {
        let state = if self.active.as_ref() == Some(session) {
            &mut self.input
        } else {
            self.saved.entry(session.clone()).or_default()
        };
        state.draft_text = join_draft(&state.draft_text, [text]);
        state.draft_text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_switch_round_trip_restores_draft_and_drops_images() {
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        let mut compose = ComposeStateMultiplexer::new();

        compose.switch_to(&a);
        compose.set_draft("hello");
        compose.set_audio(Some("clip.mp3".into()), Some("Clip".into()));
        compose.attach_image(ImageAttachment::new("cat.png", vec![1, 2, 3]));

        assert!(!compose.switch_to(&b));
        assert_eq!(compose.current(), &ComposeState::default());
        assert!(compose.images().is_empty());

        assert!(compose.switch_to(&a));
        assert_eq!(compose.current().draft_text, "hello");
        assert_eq!(compose.current().audio_ref.as_deref(), Some("clip.mp3"));
        assert!(compose.images().is_empty());
    }

    #[test]
    fn test_switch_to_active_is_a_noop() {
        let a = SessionId::from("a");
        let mut compose = ComposeStateMultiplexer::new();
        compose.switch_to(&a);
        compose.set_draft("keep");
        compose.attach_image(ImageAttachment::new("x.jpg", vec![0]));

        compose.switch_to(&a);
        assert_eq!(compose.current().draft_text, "keep");
        assert_eq!(compose.images().len(), 1);
    }

    #[test]
    fn test_take_for_send_empties_input() {
        let a = SessionId::from("a");
        let mut compose = ComposeStateMultiplexer::new();
        compose.switch_to(&a);
        compose.set_draft("draw a cat");
        compose.attach_image(ImageAttachment::new("ref.webp", vec![9]));

        let outgoing = compose.take_for_send();
        assert_eq!(outgoing.state.draft_text, "draw a cat");
        assert_eq!(outgoing.images[0].mime, "image/webp");
        assert!(compose.current().is_empty());
        assert!(compose.images().is_empty());
    }

    #[test]
    fn test_fill_empty_draft_only_for_active_and_empty() {
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        let mut compose = ComposeStateMultiplexer::new();
        compose.switch_to(&a);

        assert!(!compose.fill_empty_draft(&b, "stale"));
        assert!(compose.fill_empty_draft(&a, "restored"));
        assert!(!compose.fill_empty_draft(&a, "again"));
        assert_eq!(compose.current().draft_text, "restored");
    }

    #[test]
    fn test_restore_text_reaches_inactive_session_snapshot() {
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        let mut compose = ComposeStateMultiplexer::new();
        compose.switch_to(&a);
        compose.set_draft("typed");

        assert_eq!(compose.restore_text(&a, "sent"), "typed\n\nsent");
        assert_eq!(compose.restore_text(&b, "elsewhere"), "elsewhere");
        assert_eq!(compose.current().draft_text, "typed\n\nsent");

        assert!(compose.switch_to(&b));
        assert_eq!(compose.current().draft_text, "elsewhere");
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(ImageAttachment::new("A.JPEG", vec![]).mime, "image/jpeg");
        assert_eq!(
            ImageAttachment::new("noext", vec![]).mime,
            "application/octet-stream"
        );
    }
}
