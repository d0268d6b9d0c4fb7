//! Background Job Progress
//!
//! A durable side-channel for long-running generation jobs. Jobs may outlive
//! the chat request that started them, so their progress arrives over a
//! separate reconnecting socket rather than the response stream.

mod backoff;
mod channel;
mod connector;
mod frame;

pub use backoff::{Backoff, DEFAULT_BASE, DEFAULT_CAP};
pub use channel::{ChannelState, ProgressChannel, ProgressEvent, ProgressNotice, ProgressSettings};
pub use connector::{progress_url, ProgressConnector, ProgressError, ProgressLink, WebSocketConnector};
pub use frame::{parse_progress_frame, CompleteResult, ProgressFrame, PING, PONG};
