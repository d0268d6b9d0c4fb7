//! Session Controller
//!
//! The context object that owns everything belonging to the active
//! session: compose state, chat state, the in-flight request, the progress
//! channel and the durable draft mirror.
//!
//! # Lifecycle
//!
//! ```text
//! activate_session(B)
//!   ├─ cancel A's request          (its late writes hit a stale epoch)
//!   ├─ snapshot A, restore B       (one synchronous step)
//!   ├─ clear transcript / jobs / banner / loading
//!   ├─ close A's progress channel  (awaited, no timer survives)
//!   ├─ open B's progress channel
//!   ├─ if B had no snapshot: read draft:B in the background and apply it
//!      only if B is still active with an empty draft
//!   └─ first activation only, when online: wait for that read, then move
//!      any offline queue left by an earlier run into B's draft
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatBackend, ChatRequest};
use crate::chat::{ChatHub, ChatSnapshot, Notice, UiUpdate};
use crate::compose::{ComposeState, ComposeStateMultiplexer, ImageAttachment};
use crate::drip::DripPacing;
use crate::messages::{Message, MessageId, SessionId};
use crate::network::NetworkMonitor;
use crate::offline::{restore_into_draft, OfflineQueue};
use crate::progress::{
    progress_url, ProgressChannel, ProgressConnector, ProgressEvent, ProgressFrame,
    ProgressNotice, ProgressSettings,
};
use crate::storage::{DraftMirror, DurableStore, StorageError};
use crate::submitter::{RequestSubmitter, SubmitError, SubmitOutcome};

/// Tunables for a controller
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// HTTP base URL; the progress socket address is derived from it
    pub api_url: String,
    /// Progress channel timing
    pub progress: ProgressSettings,
    /// Drip pacing
    pub drip: DripPacing,
    /// Draft mirroring debounce
    pub draft_debounce: Duration,
}

/// Collaborators a controller is built from
pub struct EngineParts {
    /// Chat endpoint
    pub backend: Arc<dyn ChatBackend>,
    /// Progress socket opener
    pub connector: Arc<dyn ProgressConnector>,
    /// Durable key/value storage
    pub store: Arc<dyn DurableStore>,
    /// Shared online flag
    pub monitor: NetworkMonitor,
    /// Tunables
    pub settings: EngineSettings,
}

/// Receivers the surface drains
pub struct ControllerFeeds {
    /// Rendering updates
    pub updates: mpsc::UnboundedReceiver<UiUpdate>,
    /// Progress notices, to be passed back to
    /// [`SessionController::handle_progress_notice`]
    pub notices: mpsc::UnboundedReceiver<ProgressNotice>,
}

struct ActiveRequest {
    cancel: CancellationToken,
    handle: JoinHandle<SubmitOutcome>,
}

/// Owns the active session and everything tied to it
pub struct SessionController {
    hub: ChatHub,
    compose: Arc<Mutex<ComposeStateMultiplexer>>,
    drafts: Arc<DraftMirror>,
    queue: OfflineQueue,
    monitor: NetworkMonitor,
    submitter: RequestSubmitter,
    connector: Arc<dyn ProgressConnector>,
    settings: EngineSettings,
    notices_tx: mpsc::UnboundedSender<ProgressNotice>,
    channel: Option<ProgressChannel>,
    request: Option<ActiveRequest>,
    draft_load: Option<JoinHandle<()>>,
    queue_checked: bool,
}

impl SessionController {
    /// Build a controller and the feeds it publishes to
    pub fn new(parts: EngineParts) -> (Self, ControllerFeeds) {
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();

        let drafts = Arc::new(DraftMirror::new(
            Arc::clone(&parts.store),
            parts.settings.draft_debounce,
        ));
        let queue = OfflineQueue::new(Arc::clone(&parts.store));
        let compose = Arc::new(Mutex::new(ComposeStateMultiplexer::new()));
        let submitter = RequestSubmitter::new(
            parts.backend,
            parts.monitor.clone(),
            queue.clone(),
            Arc::clone(&drafts),
            Arc::clone(&compose),
            parts.settings.drip.clone(),
        );

        let controller = Self {
            hub: ChatHub::new(updates_tx),
            compose,
            drafts,
            queue,
            monitor: parts.monitor,
            submitter,
            connector: parts.connector,
            settings: parts.settings,
            notices_tx,
            channel: None,
            request: None,
            draft_load: None,
            queue_checked: false,
        };
        (controller, ControllerFeeds { updates, notices })
    }

    /// The active session
    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        self.compose.lock().active().cloned()
    }

    /// Compose state of the active session
    #[must_use]
    pub fn compose(&self) -> ComposeState {
        self.compose.lock().current().clone()
    }

    /// Number of images attached in the active session
    #[must_use]
    pub fn attached_images(&self) -> usize {
        self.compose.lock().images().len()
    }

    /// Copy of the chat state
    #[must_use]
    pub fn chat(&self) -> ChatSnapshot {
        self.hub.snapshot()
    }

    /// Shared online flag
    #[must_use]
    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    /// Whether a response is still in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.request
            .as_ref()
            .is_some_and(|request| !request.handle.is_finished())
    }

    /// Switch to `session`
    pub async fn activate_session(&mut self, session: SessionId) {
        if self.active_session().as_ref() == Some(&session) {
            return;
        }

        if let Some(request) = self.request.take() {
            request.cancel.cancel();
        }
        if let Some(load) = self.draft_load.take() {
            load.abort();
        }

        let (restored, draft) = {
            let mut compose = self.compose.lock();
            let restored = compose.switch_to(&session);
            (restored, compose.current().draft_text.clone())
        };
        self.hub.activate(&session);
        self.hub.publish(UiUpdate::SessionActivated {
            session: session.clone(),
            restored,
        });
        if restored && !draft.is_empty() {
            self.hub.publish(UiUpdate::DraftRestored(draft));
        }
        tracing::info!(session = %session, restored, "Session activated");

        if let Some(previous) = self.channel.take() {
            previous.close().await;
        }
        match progress_url(&self.settings.api_url, &session) {
            Ok(url) => {
                self.channel = Some(ProgressChannel::spawn(
                    session.clone(),
                    url,
                    Arc::clone(&self.connector),
                    self.settings.progress.clone(),
                    self.notices_tx.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Progress channel disabled");
            }
        }

        if !restored {
            self.draft_load = Some(self.spawn_draft_load(session));
        }

        if !self.queue_checked {
            self.queue_checked = true;
            self.restore_queue_at_startup().await;
        }
    }

    /// Messages queued by an earlier run that went offline come back as soon
    /// as there is a session to put them in, provided we are online.
    async fn restore_queue_at_startup(&mut self) {
        if !self.monitor.is_online() {
            return;
        }
        // Let the durable draft land first so the queue appends to it
        if let Some(load) = self.draft_load.take() {
            if let Err(e) = load.await {
                tracing::warn!(error = %e, "Draft load task failed");
            }
        }
        if let Err(e) = self.restore_offline_queue().await {
            tracing::warn!(error = %e, "Failed to restore offline queue at startup");
        }
    }

    fn spawn_draft_load(&self, session: SessionId) -> JoinHandle<()> {
        let drafts = Arc::clone(&self.drafts);
        let compose = Arc::clone(&self.compose);
        let hub = self.hub.clone();

        tokio::spawn(async move {
            let text = match drafts.load(&session).await {
                Ok(Some(text)) if !text.is_empty() => text,
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "Failed to read durable draft");
                    return;
                }
            };
            let applied = compose.lock().fill_empty_draft(&session, &text);
            if applied {
                tracing::debug!(session = %session, "Draft restored from storage");
                hub.publish(UiUpdate::DraftRestored(text));
            }
        })
    }

    /// Replace the draft text; mirrored to storage after the debounce
    pub fn set_draft(&mut self, text: impl Into<String>) {
        let text = text.into();
        let mut compose = self.compose.lock();
        let Some(session) = compose.active().cloned() else {
            return;
        };
        compose.set_draft(text.clone());
        self.drafts.schedule(&session, &text);
    }

    /// Set or clear the video reference
    pub fn set_video(&mut self, video: Option<String>) {
        self.compose.lock().set_video(video);
    }

    /// Set or clear the audio reference
    pub fn set_audio(&mut self, audio: Option<String>, label: Option<String>) {
        self.compose.lock().set_audio(audio, label);
    }

    /// Attach an image to the next message
    pub fn attach_image(&mut self, image: ImageAttachment) {
        self.compose.lock().attach_image(image);
    }

    /// Send the compose area's contents
    ///
    /// # Errors
    ///
    /// - [`SubmitError::NoSession`] when no session is active
    /// - [`SubmitError::Busy`] while a response is still in flight; the
    ///   draft is left untouched
    /// - [`SubmitError::EmptyDraft`] when there is nothing to send
    pub fn submit(&mut self) -> Result<(), SubmitError> {
        let Some(chat) = self.hub.current() else {
            return Err(SubmitError::NoSession);
        };
        if self.is_busy() {
            chat.notify(UiUpdate::Notice(Notice::Busy));
            return Err(SubmitError::Busy);
        }

        let outgoing = {
            let mut compose = self.compose.lock();
            if compose.current().is_empty() && compose.images().is_empty() {
                return Err(SubmitError::EmptyDraft);
            }
            compose.take_for_send()
        };
        let request = ChatRequest::from_compose(chat.session().clone(), outgoing);

        let cancel = CancellationToken::new();
        let submitter = self.submitter.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { submitter.run(chat, request, token).await });
        self.request = Some(ActiveRequest { cancel, handle });
        Ok(())
    }

    /// Stop the in-flight response, keeping what has rendered so far
    pub fn stop(&mut self) {
        if let Some(ref request) = self.request {
            tracing::debug!("Stopping active request");
            request.cancel.cancel();
        }
    }

    /// Wait for the in-flight request, if any, and return how it ended
    pub async fn wait_idle(&mut self) -> Option<SubmitOutcome> {
        let request = self.request.take()?;
        match request.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "Request task failed");
                None
            }
        }
    }

    /// Apply a notice from a progress channel
    ///
    /// Notices from a session that is no longer active are dropped.
    pub fn handle_progress_notice(&mut self, notice: ProgressNotice) {
        let Some(chat) = self.hub.current() else {
            return;
        };
        if chat.session() != &notice.session {
            tracing::trace!(session = %notice.session, "Dropping notice for inactive session");
            return;
        }

        match notice.event {
            ProgressEvent::State(state) => {
                chat.notify(UiUpdate::ChannelState(state));
            }
            ProgressEvent::Frame(ProgressFrame::Progress {
                message,
                progress,
                duration,
            }) => {
                chat.apply_progress(progress, message.as_deref(), duration);
            }
            ProgressEvent::Frame(ProgressFrame::Error { message }) => {
                chat.push_message(Message::assistant(message));
                chat.clear_jobs();
            }
            ProgressEvent::Frame(ProgressFrame::Complete { result }) => {
                let id = result.message_id().unwrap_or_else(MessageId::new);
                chat.upsert_message(&id, result.content.clone(), &result.media());
                chat.clear_jobs();
                chat.notify(UiUpdate::AssetsChanged);
            }
            ProgressEvent::Frame(ProgressFrame::Pong | ProgressFrame::Unknown) => {}
        }
    }

    /// Record a connectivity change
    ///
    /// Going online moves everything in the offline queue back into the
    /// active draft. Nothing is sent automatically. Returns how many queued
    /// messages were restored.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the queue could not be read or cleared.
    pub async fn set_online(&mut self, online: bool) -> Result<usize, StorageError> {
        self.monitor.set_online(online);
        if !online {
            return Ok(0);
        }
        self.restore_offline_queue().await
    }

    async fn restore_offline_queue(&mut self) -> Result<usize, StorageError> {
        let Some(session) = self.active_session() else {
            return Ok(0);
        };
        let items = self.queue.take_all().await?;
        if items.is_empty() {
            return Ok(0);
        }

        let draft = {
            let mut compose = self.compose.lock();
            let merged = restore_into_draft(&compose.current().draft_text, &items);
            compose.set_draft(merged.clone());
            merged
        };
        self.drafts.schedule(&session, &draft);
        self.hub.publish(UiUpdate::DraftRestored(draft));
        self.hub.publish(UiUpdate::Notice(Notice::Restored { count: items.len() }));
        tracing::info!(session = %session, count = items.len(), "Restored offline queue into draft");
        Ok(items.len())
    }

    /// Cancel everything and close the progress channel
    pub async fn shutdown(mut self) {
        if let Some(request) = self.request.take() {
            request.cancel.cancel();
            let _ = request.handle.await;
        }
        if let Some(load) = self.draft_load.take() {
            load.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}
