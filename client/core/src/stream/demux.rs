//! Event Demultiplexer
//!
//! Turns the raw byte stream of one chat request into a lazy, finite
//! sequence of [`StreamEvent`]s. The demuxer is a pure transform: it decodes
//! what the transport hands it, drops frames it cannot parse, skips
//! discriminators it does not know and never reorders anything.
//!
//! The sequence ends in one of three ways:
//!
//! - the body ends: `next()` returns `None`
//! - the transport fails: one `Err(StreamInterruption::Transport)`, then `None`
//! - the shared cancellation token fires: one `Err(StreamInterruption::Cancelled)`,
//!   then `None`
//!
//! A finished demuxer cannot be restarted.

use std::collections::VecDeque;
use std::fmt;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::event::StreamEvent;
use super::frame::{Decoded, FrameDecoder};

/// Why the event sequence stopped early
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamInterruption {
    /// The user cancelled the request; not an error
    Cancelled,
    /// The underlying transport failed before the stream ended
    Transport(String),
}

impl fmt::Display for StreamInterruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Stream cancelled"),
            Self::Transport(msg) => write!(f, "Stream transport failed: {msg}"),
        }
    }
}

/// Counters for one demuxed stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Chunks received from the transport
    pub chunks: u64,
    /// Events handed to the consumer
    pub events: u64,
    /// Frames dropped because they could not be parsed
    pub malformed: u64,
    /// Events skipped because their discriminator is unknown
    pub unknown: u64,
}

/// Demultiplexes one response body into typed events
pub struct EventDemuxer<S> {
    inner: S,
    decoder: FrameDecoder,
    cancel: CancellationToken,
    ready: VecDeque<StreamEvent>,
    body_ended: bool,
    finished: bool,
    stats: DemuxStats,
}

impl<S, B, E> EventDemuxer<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    /// Wrap a byte stream, observing `cancel` for user aborts
    pub fn new(inner: S, cancel: CancellationToken) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            cancel,
            ready: VecDeque::new(),
            body_ended: false,
            finished: false,
            stats: DemuxStats::default(),
        }
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }

    /// Whether the sequence is exhausted
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next event in arrival order
    pub async fn next(&mut self) -> Option<Result<StreamEvent, StreamInterruption>> {
        loop {
            if self.finished {
                return None;
            }

            // Cancellation wins over anything already buffered
            if self.cancel.is_cancelled() {
                return Some(Err(self.interrupt(StreamInterruption::Cancelled)));
            }

            if let Some(event) = self.ready.pop_front() {
                self.stats.events += 1;
                return Some(Ok(event));
            }

            if self.body_ended {
                self.finished = true;
                tracing::debug!(
                    chunks = self.stats.chunks,
                    events = self.stats.events,
                    malformed = self.stats.malformed,
                    unknown = self.stats.unknown,
                    "Response stream ended"
                );
                return None;
            }

            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Some(Err(self.interrupt(StreamInterruption::Cancelled)));
                }
                chunk = self.inner.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    self.stats.chunks += 1;
                    self.decoder.push(bytes.as_ref());
                    while let Some(decoded) = self.decoder.decode() {
                        self.accept(decoded);
                    }
                }
                Some(Err(e)) => {
                    return Some(Err(
                        self.interrupt(StreamInterruption::Transport(e.to_string()))
                    ));
                }
                None => {
                    if let Some(decoded) = self.decoder.finish() {
                        self.accept(decoded);
                    }
                    self.body_ended = true;
                }
            }
        }
    }

    fn accept(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Event(StreamEvent::Unknown) => {
                self.stats.unknown += 1;
            }
            Decoded::Event(event) => self.ready.push_back(event),
            Decoded::Skip => {}
            Decoded::Malformed(e) => {
                self.stats.malformed += 1;
                tracing::debug!(error = %e, "Dropping malformed frame");
            }
        }
    }

    fn interrupt(&mut self, reason: StreamInterruption) -> StreamInterruption {
        self.finished = true;
        self.ready.clear();
        if let StreamInterruption::Transport(ref msg) = reason {
            tracing::warn!(error = %msg, "Response stream interrupted");
        }
        reason
    }
}
