//! Drip Rendering
//!
//! Streams arrive in bursts. The drip renderer smooths them into something
//! that reads like typing: tokens are split into characters, queued, and a
//! single drain loop appends them to the target message one at a time.
//!
//! # Pacing
//!
//! The per-character delay shrinks as the backlog grows so a long answer
//! never falls far behind the network:
//!
//! | backlog            | delay                 |
//! |--------------------|-----------------------|
//! | `< small_backlog`  | `slow` + 0..`jitter`  |
//! | `< large_backlog`  | `medium`              |
//! | otherwise          | `fast`                |
//!
//! # Completion
//!
//! A drain completes only when the queue is empty AND the upstream has been
//! closed. The generated-assets marker is stripped once, after that, by
//! [`strip_asset_marker`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Opening of the marker the backend appends to tie assets to a message
pub const ASSET_MARKER_OPEN: &str = "[generated_assets:";

/// Pacing configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DripPacing {
    /// Backlog below which the slow tier applies
    pub small_backlog: usize,
    /// Backlog at or above which the fast tier applies
    pub large_backlog: usize,
    /// Base delay of the slow tier
    pub slow: Duration,
    /// Maximum random extra delay added in the slow tier
    pub jitter: Duration,
    /// Delay of the medium tier
    pub medium: Duration,
    /// Delay of the fast tier
    pub fast: Duration,
}

impl Default for DripPacing {
    fn default() -> Self {
        Self {
            small_backlog: 50,
            large_backlog: 200,
            slow: Duration::from_millis(25),
            jitter: Duration::from_millis(5),
            medium: Duration::from_millis(15),
            fast: Duration::from_millis(8),
        }
    }
}

impl DripPacing {
    /// Pacing that renders everything without waiting (tests, piping)
    #[must_use]
    pub fn instant() -> Self {
        Self {
            slow: Duration::ZERO,
            jitter: Duration::ZERO,
            medium: Duration::ZERO,
            fast: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to wait after rendering a character with `backlog` still queued
    #[must_use]
    pub fn delay_for(&self, backlog: usize) -> Duration {
        if backlog < self.small_backlog {
            let jitter_ms = self.jitter.as_millis() as u64;
            let extra = if jitter_ms == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=jitter_ms)
            };
            self.slow + Duration::from_millis(extra)
        } else if backlog < self.large_backlog {
            self.medium
        } else {
            self.fast
        }
    }
}

/// How a drain ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue empty and upstream closed
    Completed,
    /// The cancellation token fired
    Cancelled,
    /// Another drain was already running; this call did nothing
    AlreadyDraining,
}

#[derive(Debug, Default)]
struct DripQueue {
    chars: VecDeque<char>,
    upstream_closed: bool,
    draining: bool,
    rendered: usize,
}

enum Step {
    Render(char, usize),
    Done,
    Wait,
}

/// Character queue with a single paced consumer
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Debug)]
pub struct DripRenderer {
    queue: Arc<Mutex<DripQueue>>,
    wake: Arc<Notify>,
    pacing: DripPacing,
}

impl DripRenderer {
    /// Create an empty renderer
    #[must_use]
    pub fn new(pacing: DripPacing) -> Self {
        Self {
            queue: Arc::new(Mutex::new(DripQueue::default())),
            wake: Arc::new(Notify::new()),
            pacing,
        }
    }

    /// Queue the characters of one token, preserving order
    pub fn push_token(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.queue.lock().chars.extend(text.chars());
        self.wake.notify_one();
    }

    /// Mark the upstream as finished; the drain completes once the queue empties
    pub fn close(&self) {
        self.queue.lock().upstream_closed = true;
        self.wake.notify_one();
    }

    /// Characters waiting to be rendered
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.queue.lock().chars.len()
    }

    /// Characters rendered so far
    #[must_use]
    pub fn rendered(&self) -> usize {
        self.queue.lock().rendered
    }

    /// Whether a drain loop currently owns the queue
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.queue.lock().draining
    }

    /// Drain the queue into `sink`, one character per tick
    ///
    /// Only one drain runs at a time; a second call while one is active
    /// returns [`DrainOutcome::AlreadyDraining`] immediately. On cancellation
    /// the loop stops at once and whatever is still queued is discarded.
    pub async fn drain<F>(&self, cancel: &CancellationToken, mut sink: F) -> DrainOutcome
    where
        F: FnMut(char),
    {
        {
            let mut queue = self.queue.lock();
            if queue.draining {
                return DrainOutcome::AlreadyDraining;
            }
            queue.draining = true;
        }
        let _guard = DrainGuard(&self.queue);

        loop {
            let step = {
                let mut queue = self.queue.lock();
                match queue.chars.pop_front() {
                    Some(ch) => {
                        queue.rendered += 1;
                        Step::Render(ch, queue.chars.len())
                    }
                    None if queue.upstream_closed => Step::Done,
                    None => Step::Wait,
                }
            };

            match step {
                Step::Render(ch, backlog) => {
                    sink(ch);
                    let delay = self.pacing.delay_for(backlog);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return self.abandon(),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Done => return DrainOutcome::Completed,
                Step::Wait => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return self.abandon(),
                        () = self.wake.notified() => {}
                    }
                }
            }
        }
    }

    fn abandon(&self) -> DrainOutcome {
        let mut queue = self.queue.lock();
        let discarded = queue.chars.len();
        queue.chars.clear();
        tracing::debug!(discarded, rendered = queue.rendered, "Drip drain cancelled");
        DrainOutcome::Cancelled
    }
}

/// Clears the draining flag however the drain loop exits
struct DrainGuard<'a>(&'a Mutex<DripQueue>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().draining = false;
    }
}

/// Remove every `[generated_assets: ...]` annotation from rendered content
///
/// Applying this twice gives the same result as applying it once. An opening
/// without a closing bracket is left untouched.
#[must_use]
pub fn strip_asset_marker(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    let mut stripped = false;

    while let Some(start) = rest.find(ASSET_MARKER_OPEN) {
        let Some(len) = rest[start..].find(']') else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &rest[start + len + 1..];
        stripped = true;
    }
    out.push_str(rest);

    if stripped {
        out.truncate(out.trim_end().len());
    }
    out
}
