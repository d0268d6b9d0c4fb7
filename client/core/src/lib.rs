//! Atelier Core - Client Streaming Engine
//!
//! The client side of a conversation with a generative backend that answers
//! on two channels at once: an ordered event stream for the in-flight
//! request, and a reconnecting side-channel for background jobs (image and
//! video synthesis) that can outlive the request. This crate consumes both,
//! paces rendering, survives network loss, and keeps each session's compose
//! state isolated when the user switches between conversations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Surface (CLI, ...)                        │
//! │        commands ▼                          ▲ UiUpdate feed        │
//! └─────────────────┼──────────────────────────┼─────────────────────┘
//!                   │                          │
//! ┌─────────────────┼──────────────────────────┼─────────────────────┐
//! │                 ▼    SessionController     │                     │
//! │  ┌──────────────────┐  ┌────────────────┐  ┌──────────────────┐  │
//! │  │ ComposeState     │  │ ChatHub        │  │ ProgressChannel  │  │
//! │  │ Multiplexer      │  │ (epoch-scoped) │  │ (per session)    │  │
//! │  └────────┬─────────┘  └───────▲────────┘  └────────▲─────────┘  │
//! │           │ take_for_send      │ writes             │ socket     │
//! │  ┌────────▼─────────────────────┴───────┐           │            │
//! │  │ RequestSubmitter                      │  ┌────────┴─────────┐  │
//! │  │  EventDemuxer ─► DripRenderer         │  │ ProgressConnector│  │
//! │  │  offline? ─► OfflineQueue             │  └──────────────────┘  │
//! │  └────────┬──────────────────────────────┘                        │
//! │           │ ChatBackend                   DurableStore            │
//! └───────────┼───────────────────────────────────────────────────────┘
//!             ▼
//!        HTTP backend
//! ```
//!
//! # Key Types
//!
//! - [`SessionController`]: owns the active session and everything tied to it
//! - [`EventDemuxer`]: typed events from a raw response body
//! - [`DripRenderer`]: paced, single-consumer character rendering
//! - [`ProgressChannel`]: reconnecting socket for job progress
//! - [`ComposeStateMultiplexer`]: per-session drafts and attachments
//! - [`RequestSubmitter`]: one request from compose area to outcome
//!
//! # No UI Dependencies
//!
//! Nothing here draws. Surfaces render the [`UiUpdate`] feed however they
//! like.

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chat;
pub mod compose;
pub mod config;
pub mod controller;
pub mod drip;
pub mod jobs;
pub mod messages;
pub mod network;
pub mod offline;
pub mod progress;
pub mod storage;
pub mod stream;
pub mod submitter;

// Re-exports for convenience
pub use backend::{BackendError, ChatBackend, ChatEnvelope, ChatReply, ChatRequest, HttpChatBackend};
pub use chat::{ChatHub, ChatSnapshot, Notice, ScopedChat, UiUpdate};
pub use compose::{ComposeState, ComposeStateMultiplexer, ImageAttachment, OutgoingCompose};
pub use controller::{ControllerFeeds, EngineParts, EngineSettings, SessionController};
pub use drip::{strip_asset_marker, DrainOutcome, DripPacing, DripRenderer};
pub use jobs::{GenerationJob, JobBoard, JobKind, JobRequest, JobStatus};
pub use messages::{AssetItem, AssetKind, MediaRefs, Message, MessageId, MessageRole, SessionId};
pub use network::NetworkMonitor;
pub use offline::{OfflineQueue, OfflineQueueItem};
pub use progress::{
    Backoff, ChannelState, ProgressChannel, ProgressConnector, ProgressError, ProgressEvent,
    ProgressFrame, ProgressLink, ProgressNotice, ProgressSettings, WebSocketConnector,
};
pub use storage::{DraftMirror, DurableStore, FileStore, MemoryStore, StorageError};
pub use stream::{EventDemuxer, ProtocolError, StreamEvent, StreamInterruption};
pub use submitter::{RequestSubmitter, SubmitError, SubmitOutcome};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
