//! Response Stream Infrastructure
//!
//! Decoding of the chat endpoint's event stream.
//!
//! # Architecture
//!
//! ```text
//!  reqwest bytes_stream()
//!          │  chunks (arbitrary boundaries)
//!          ▼
//!  ┌───────────────┐   lines    ┌─────────────────┐   StreamEvent
//!  │ FrameDecoder  │ ─────────► │  EventDemuxer   │ ─────────────► consumer
//!  │ (buffering)   │            │ (cancel-aware)  │
//!  └───────────────┘            └─────────────────┘
//! ```
//!
//! - [`FrameDecoder`] is synchronous and knows nothing about I/O
//! - [`EventDemuxer`] pulls chunks, drops malformed frames and reports
//!   cancellation separately from transport failure

mod demux;
mod event;
mod frame;

pub use demux::{DemuxStats, EventDemuxer, StreamInterruption};
pub use event::StreamEvent;
pub use frame::{decode_line, Decoded, FrameDecoder, ProtocolError, MAX_FRAME_SIZE};
