//! Chat State
//!
//! The transcript and job board of the active session, plus the update
//! feed the surface renders from.
//!
//! # Epochs
//!
//! Every session activation bumps an epoch. Writers hold a [`ScopedChat`]
//! stamped with the epoch they were created in; once the user has switched
//! away, every write through that handle is a silent no-op. A response
//! still trickling in for session A can therefore never land in session B.
//!
//! Each mutation happens inside one lock scope and its [`UiUpdate`] is
//! emitted before the lock is released, so the feed order matches the
//! mutation order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::drip::strip_asset_marker;
use crate::jobs::{GenerationJob, JobBoard, JobRequest};
use crate::messages::{AssetItem, MediaRefs, Message, MessageId, MessageRole, SessionId};
use crate::progress::ChannelState;

/// Short user-facing notices
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Message stored for later; `pending` messages are now queued
    Queued {
        /// Queue length after this message
        pending: usize,
    },
    /// A response is still streaming; the submit was ignored
    Busy,
    /// Queued messages were moved back into the draft
    Restored {
        /// How many messages were restored
        count: usize,
    },
}

/// Everything the surface needs to stay in sync
#[derive(Clone, Debug, PartialEq)]
pub enum UiUpdate {
    /// A session became active; transient state was cleared
    SessionActivated {
        /// The new session
        session: SessionId,
        /// Whether its compose state came from an in-memory snapshot
        restored: bool,
    },
    /// A message was appended
    MessageAdded(Message),
    /// One character was rendered into a streaming message
    CharAppended {
        /// Target message
        id: MessageId,
        /// The character
        ch: char,
    },
    /// A message's content or media changed; carries the full message
    MessagePatched(Message),
    /// A streaming message is final
    MessageCompleted {
        /// Message id
        id: MessageId,
        /// Final content
        content: String,
    },
    /// The job board changed
    JobsChanged(Vec<GenerationJob>),
    /// Status line
    Status(Option<String>),
    /// Error banner
    ErrorBanner(Option<String>),
    /// Loading indicator
    Loading(bool),
    /// A notice
    Notice(Notice),
    /// Assets should be refreshed
    AssetsChanged,
    /// Entities should be refreshed
    EntitiesChanged,
    /// Draft text was filled from durable storage or the offline queue
    DraftRestored(String),
    /// The progress channel moved
    ChannelState(ChannelState),
}

/// Transient state of the active session
#[derive(Debug, Default)]
pub struct ChatState {
    session: Option<SessionId>,
    epoch: u64,
    messages: Vec<Message>,
    jobs: JobBoard,
    status: Option<String>,
    error_banner: Option<String>,
    loading: bool,
}

impl ChatState {
    fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

/// Read-only copy of [`ChatState`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatSnapshot {
    /// Active session
    pub session: Option<SessionId>,
    /// Transcript
    pub messages: Vec<Message>,
    /// Visible jobs
    pub jobs: Vec<GenerationJob>,
    /// Status line
    pub status: Option<String>,
    /// Error banner
    pub error_banner: Option<String>,
    /// Loading indicator
    pub loading: bool,
}

/// Shared chat state and its update feed
#[derive(Clone, Debug)]
pub struct ChatHub {
    state: Arc<Mutex<ChatState>>,
    updates: mpsc::UnboundedSender<UiUpdate>,
}

impl ChatHub {
    /// Create a hub publishing to `updates`
    pub fn new(updates: mpsc::UnboundedSender<UiUpdate>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChatState::default())),
            updates,
        }
    }

    /// Make `session` active, clearing all transient state
    ///
    /// Handles from earlier activations go stale.
    pub fn activate(&self, session: &SessionId) -> ScopedChat {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.session = Some(session.clone());
        state.messages.clear();
        state.jobs.clear();
        state.status = None;
        state.error_banner = None;
        state.loading = false;
        ScopedChat {
            hub: self.clone(),
            epoch: state.epoch,
            session: session.clone(),
        }
    }

    /// Handle for the currently active session
    #[must_use]
    pub fn current(&self) -> Option<ScopedChat> {
        let state = self.state.lock();
        state.session.clone().map(|session| ScopedChat {
            hub: self.clone(),
            epoch: state.epoch,
            session,
        })
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.state.lock();
        ChatSnapshot {
            session: state.session.clone(),
            messages: state.messages.clone(),
            jobs: state.jobs.jobs().to_vec(),
            status: state.status.clone(),
            error_banner: state.error_banner.clone(),
            loading: state.loading,
        }
    }

    /// Publish an update that does not touch chat state
    pub fn publish(&self, update: UiUpdate) {
        let _ = self.updates.send(update);
    }
}

/// Write handle bound to one session activation
#[derive(Clone, Debug)]
pub struct ScopedChat {
    hub: ChatHub,
    epoch: u64,
    session: SessionId,
}

impl ScopedChat {
    /// Session this handle writes to
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Whether writes still land
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.hub.state.lock().epoch == self.epoch
    }

    /// Run `f` under the lock if this handle is current; returns whether it ran
    fn with_state<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ChatState, &mpsc::UnboundedSender<UiUpdate>),
    {
        let mut state = self.hub.state.lock();
        if state.epoch != self.epoch {
            return false;
        }
        f(&mut state, &self.hub.updates);
        true
    }

    /// Append a message
    pub fn push_message(&self, message: Message) -> bool {
        self.with_state(|state, updates| {
            let _ = updates.send(UiUpdate::MessageAdded(message.clone()));
            state.messages.push(message);
        })
    }

    /// Create the streaming assistant message `id` unless it already exists
    pub fn ensure_streaming(&self, id: &MessageId) -> bool {
        self.with_state(|state, updates| {
            if state.find_mut(id).is_none() {
                let message = Message::streaming(id.clone());
                let _ = updates.send(UiUpdate::MessageAdded(message.clone()));
                state.messages.push(message);
            }
        })
    }

    /// Render one character into message `id`
    pub fn append_char(&self, id: &MessageId, ch: char) -> bool {
        self.with_state(|state, updates| {
            if let Some(message) = state.find_mut(id) {
                message.content.push(ch);
                let _ = updates.send(UiUpdate::CharAppended { id: id.clone(), ch });
            }
        })
    }

    /// Attach streamed assets to message `id`
    pub fn attach_assets(&self, id: &MessageId, items: &[AssetItem]) -> bool {
        self.with_state(|state, updates| {
            if let Some(message) = state.find_mut(id) {
                for item in items {
                    message.media.attach(item);
                }
                let _ = updates.send(UiUpdate::MessagePatched(message.clone()));
            }
        })
    }

    /// Insert or patch an assistant message by id
    ///
    /// An existing message keeps its content when `content` is `None`, and
    /// its media is merged rather than replaced.
    pub fn upsert_message(&self, id: &MessageId, content: Option<String>, media: &MediaRefs) -> bool {
        self.with_state(|state, updates| {
            if let Some(message) = state.find_mut(id) {
                if let Some(content) = content {
                    message.content = content;
                }
                message.media.merge(media);
                message.streaming = false;
                let _ = updates.send(UiUpdate::MessagePatched(message.clone()));
            } else {
                let message = Message::new(MessageRole::Assistant, content.unwrap_or_default())
                    .with_id(id.clone())
                    .with_media(media.clone());
                let _ = updates.send(UiUpdate::MessageAdded(message.clone()));
                state.messages.push(message);
            }
        })
    }

    /// Finish a streaming message: strip the asset marker once and hand
    /// ownership of the content back
    pub fn complete_message(&self, id: &MessageId) -> bool {
        self.with_state(|state, updates| {
            if let Some(message) = state.find_mut(id) {
                message.content = strip_asset_marker(&message.content);
                message.streaming = false;
                let _ = updates.send(UiUpdate::MessageCompleted {
                    id: id.clone(),
                    content: message.content.clone(),
                });
            }
        })
    }

    /// Content of message `id`
    #[must_use]
    pub fn content_of(&self, id: &MessageId) -> Option<String> {
        let state = self.hub.state.lock();
        state
            .messages
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.content.clone())
    }

    /// Replace the job board with newly announced jobs
    pub fn start_jobs(&self, requests: &[JobRequest]) -> bool {
        self.with_state(|state, updates| {
            state.jobs.start(requests);
            let _ = updates.send(UiUpdate::JobsChanged(state.jobs.jobs().to_vec()));
        })
    }

    /// Apply a progress frame to the job board
    pub fn apply_progress(&self, fraction: f64, detail: Option<&str>, duration: Option<f64>) -> bool {
        self.with_state(|state, updates| {
            state.jobs.apply_progress(fraction, detail, duration);
            let _ = updates.send(UiUpdate::JobsChanged(state.jobs.jobs().to_vec()));
        })
    }

    /// Remove all visible jobs
    pub fn clear_jobs(&self) -> bool {
        self.with_state(|state, updates| {
            if !state.jobs.is_empty() {
                state.jobs.clear();
                let _ = updates.send(UiUpdate::JobsChanged(Vec::new()));
            }
        })
    }

    /// Set or clear the status line
    pub fn set_status(&self, status: Option<String>) -> bool {
        self.with_state(|state, updates| {
            if state.status != status {
                state.status.clone_from(&status);
                let _ = updates.send(UiUpdate::Status(status));
            }
        })
    }

    /// Set or clear the error banner
    pub fn set_error(&self, error: Option<String>) -> bool {
        self.with_state(|state, updates| {
            if state.error_banner != error {
                state.error_banner.clone_from(&error);
                let _ = updates.send(UiUpdate::ErrorBanner(error));
            }
        })
    }

    /// Set the loading indicator
    pub fn set_loading(&self, loading: bool) -> bool {
        self.with_state(|state, updates| {
            if state.loading != loading {
                state.loading = loading;
                let _ = updates.send(UiUpdate::Loading(loading));
            }
        })
    }

    /// Publish an update if this handle is current
    pub fn notify(&self, update: UiUpdate) -> bool {
        self.with_state(|_, updates| {
            let _ = updates.send(update);
        })
    }
}
