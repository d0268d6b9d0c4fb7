//! Request Submission
//!
//! Takes one outgoing message from the compose area to a finished (or
//! failed, or queued) exchange.
//!
//! # Flow
//!
//! ```text
//! offline? ──yes──► offline queue + Queued notice              (never transmitted)
//!    │no
//!    ▼
//! clear durable draft, show user message, loading on
//!    │
//!    ▼
//! backend.send ─── envelope ──► upsert assistant message
//!    │ stream
//!    ▼
//! EventDemuxer ──tokens──► DripRenderer ──chars──► assistant message
//!    │ other events ──► status / jobs / assets / refresh signals
//!    ▼
//! outcome: Completed | Cancelled | TransportFailed | RemoteFailed
//! ```
//!
//! A transport failure observed while the network monitor reports offline
//! is handled as the offline condition instead. Otherwise the text goes back
//! into the in-memory compose state of its session and the durable slot in
//! one step, so the next keystroke builds on it. A backend error is shown
//! verbatim as an assistant message and in the error banner; the text is not
//! restored because the request did arrive.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatBackend, ChatEnvelope, ChatReply, ChatRequest, ByteStream};
use crate::chat::{Notice, ScopedChat, UiUpdate};
use crate::compose::ComposeStateMultiplexer;
use crate::drip::{strip_asset_marker, DrainOutcome, DripPacing, DripRenderer};
use crate::messages::{MediaRefs, Message, MessageId};
use crate::network::NetworkMonitor;
use crate::offline::{OfflineQueue, OfflineQueueItem};
use crate::storage::{DraftMirror, StorageError};
use crate::stream::{EventDemuxer, StreamEvent, StreamInterruption};

/// Text of the assistant message shown when a request fails in transit
pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't reach the studio just now. Your message was saved to the draft so you can resend it.";

/// Why a submit was refused before anything happened
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A response is still streaming in this session
    #[error("A response is still in progress")]
    Busy,

    /// Nothing to send
    #[error("Nothing to send")]
    EmptyDraft,

    /// No session is active
    #[error("No active session")]
    NoSession,

    /// Durable storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How a request ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The response arrived in full
    Completed,
    /// Offline; the message went to the offline queue
    Queued,
    /// The user stopped the response
    Cancelled,
    /// The request failed in transit; the text is back in the draft slot
    TransportFailed(String),
    /// The backend reported an error, shown verbatim
    RemoteFailed(String),
}

enum StreamEnd {
    Finished,
    Remote(String),
    Interrupted(StreamInterruption),
}

/// Sends requests and classifies how they end
#[derive(Clone)]
pub struct RequestSubmitter {
    backend: Arc<dyn ChatBackend>,
    monitor: NetworkMonitor,
    queue: OfflineQueue,
    drafts: Arc<DraftMirror>,
    compose: Arc<Mutex<ComposeStateMultiplexer>>,
    pacing: DripPacing,
}

impl RequestSubmitter {
    /// Create a submitter
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        monitor: NetworkMonitor,
        queue: OfflineQueue,
        drafts: Arc<DraftMirror>,
        compose: Arc<Mutex<ComposeStateMultiplexer>>,
        pacing: DripPacing,
    ) -> Self {
        Self {
            backend,
            monitor,
            queue,
            drafts,
            compose,
            pacing,
        }
    }

    /// Run one request to completion
    ///
    /// Writes only through `chat`, so a request that outlives its session
    /// changes nothing visible.
    pub async fn run(
        &self,
        chat: ScopedChat,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> SubmitOutcome {
        let session = request.session.clone();

        if let Err(e) = self.drafts.clear_now(&session).await {
            tracing::warn!(session = %session, error = %e, "Failed to clear durable draft");
        }

        if !self.monitor.is_online() {
            return self.queue_offline(&chat, &request.message).await;
        }

        chat.push_message(Message::user(request.message.clone()).with_media(MediaRefs {
            video_url: request.video_ref.clone(),
            audio_url: request.audio_ref.clone(),
            audio_label: request.audio_label.clone(),
            ..MediaRefs::default()
        }));
        chat.set_error(None);
        chat.set_loading(true);

        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            reply = self.backend.send(&request) => Some(reply),
        };

        let outcome = match reply {
            None => SubmitOutcome::Cancelled,
            Some(Ok(ChatReply::Envelope(envelope))) => Self::apply_envelope(&chat, envelope),
            Some(Ok(ChatReply::Stream(body))) => self.stream(&chat, body, &cancel).await,
            Some(Err(e)) => SubmitOutcome::TransportFailed(e.to_string()),
        };

        chat.set_status(None);
        chat.set_loading(false);

        let outcome = match outcome {
            SubmitOutcome::TransportFailed(reason) => {
                self.recover(&chat, &request.message, reason).await
            }
            SubmitOutcome::RemoteFailed(message) => {
                chat.set_error(Some(message.clone()));
                SubmitOutcome::RemoteFailed(message)
            }
            other => other,
        };

        tracing::info!(session = %session, outcome = ?outcome, "Chat request finished");
        outcome
    }

    async fn queue_offline(&self, chat: &ScopedChat, text: &str) -> SubmitOutcome {
        match self.queue.enqueue(OfflineQueueItem::new(text)).await {
            Ok(pending) => {
                tracing::info!(session = %chat.session(), pending, "Offline; message queued");
                chat.notify(UiUpdate::Notice(Notice::Queued { pending }));
            }
            Err(e) => {
                // Keep the words somewhere even if the queue is unwritable
                tracing::warn!(error = %e, "Offline queue write failed; keeping text as draft");
                if let Err(e) = self.drafts.write_now(chat.session(), text).await {
                    tracing::warn!(error = %e, "Draft write failed too");
                }
                chat.notify(UiUpdate::Notice(Notice::Queued { pending: 0 }));
            }
        }
        SubmitOutcome::Queued
    }

    async fn recover(&self, chat: &ScopedChat, text: &str, reason: String) -> SubmitOutcome {
        if !self.monitor.is_online() {
            return self.queue_offline(chat, text).await;
        }

        tracing::warn!(session = %chat.session(), error = %reason, "Chat request failed");
        let merged = self.compose.lock().restore_text(chat.session(), text);
        if let Err(e) = self.drafts.write_now(chat.session(), &merged).await {
            tracing::warn!(session = %chat.session(), error = %e, "Failed to save draft after error");
        }
        chat.notify(UiUpdate::DraftRestored(merged));
        chat.push_message(Message::assistant(FALLBACK_REPLY));
        SubmitOutcome::TransportFailed(reason)
    }

    fn apply_envelope(chat: &ScopedChat, envelope: ChatEnvelope) -> SubmitOutcome {
        if let Some(error) = envelope.error {
            chat.push_message(Message::assistant(error.clone()));
            return SubmitOutcome::RemoteFailed(error);
        }
        let id = envelope.message_id().unwrap_or_default();
        chat.upsert_message(
            &id,
            Some(strip_asset_marker(&envelope.content)),
            &envelope.media,
        );
        if !envelope.jobs.is_empty() {
            chat.start_jobs(&envelope.jobs);
        }
        SubmitOutcome::Completed
    }

    async fn stream(
        &self,
        chat: &ScopedChat,
        body: ByteStream,
        cancel: &CancellationToken,
    ) -> SubmitOutcome {
        let drip = DripRenderer::new(self.pacing.clone());
        let assistant_id = MessageId::new();
        let mut demuxer = EventDemuxer::new(body, cancel.clone());

        let pump = async {
            let mut created = false;
            let end = loop {
                let event = match demuxer.next().await {
                    None => break StreamEnd::Finished,
                    Some(Err(interruption)) => break StreamEnd::Interrupted(interruption),
                    Some(Ok(event)) => event,
                };
                tracing::trace!(kind = event.kind_name(), "Stream event");

                if event.is_content_bearing() && !created {
                    chat.ensure_streaming(&assistant_id);
                    created = true;
                }

                match event {
                    StreamEvent::Token { text } => drip.push_token(&text),
                    StreamEvent::AssetBatch { items } => {
                        chat.attach_assets(&assistant_id, &items);
                    }
                    StreamEvent::EntityChange => {
                        chat.notify(UiUpdate::EntitiesChanged);
                    }
                    StreamEvent::Status { text } => {
                        chat.set_status(Some(text));
                    }
                    StreamEvent::GenerationStart { jobs } => {
                        chat.start_jobs(&jobs);
                    }
                    StreamEvent::GenerationComplete => {
                        chat.clear_jobs();
                        chat.notify(UiUpdate::AssetsChanged);
                    }
                    StreamEvent::Error { message } => break StreamEnd::Remote(message),
                    StreamEvent::Unknown => {}
                }
            };
            drip.close();
            tracing::debug!(
                chunks = demuxer.stats().chunks,
                events = demuxer.stats().events,
                "Response stream drained"
            );
            (end, created)
        };

        let drain = drip.drain(cancel, |ch| {
            chat.append_char(&assistant_id, ch);
        });

        let ((end, created), drained) = tokio::join!(pump, drain);

        if created {
            chat.complete_message(&assistant_id);
        }

        if let StreamEnd::Remote(message) = &end {
            // Reuse the lazily created reply only if nothing was dripped into it
            let blank = created
                && chat
                    .content_of(&assistant_id)
                    .is_some_and(|content| content.is_empty());
            if blank {
                chat.upsert_message(&assistant_id, Some(message.clone()), &MediaRefs::default());
            } else {
                chat.push_message(Message::assistant(message.clone()));
            }
        }

        match end {
            StreamEnd::Interrupted(StreamInterruption::Cancelled) => SubmitOutcome::Cancelled,
            _ if drained == DrainOutcome::Cancelled => SubmitOutcome::Cancelled,
            StreamEnd::Interrupted(StreamInterruption::Transport(reason)) => {
                SubmitOutcome::TransportFailed(reason)
            }
            StreamEnd::Remote(message) => SubmitOutcome::RemoteFailed(message),
            StreamEnd::Finished => SubmitOutcome::Completed,
        }
    }
}
