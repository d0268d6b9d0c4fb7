//! Reconnect Backoff
//!
//! Delay before reconnect attempt `n` is `min(base * 2^n, cap)`. With the
//! default 1s base and 10s cap the sequence is 1, 2, 4, 8, 10, 10, ...
//! A successful open resets the attempt counter.

use std::time::Duration;

/// Default delay before the first reconnect
pub const DEFAULT_BASE: Duration = Duration::from_secs(1);

/// Default ceiling for any single delay
pub const DEFAULT_CAP: Duration = Duration::from_secs(10);

/// Exponential reconnect backoff
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP)
    }
}

impl Backoff {
    /// Create a backoff with explicit base and cap
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Attempts made since the last reset
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt; advances the counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Called after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(delays: &[Duration]) -> Vec<u64> {
        delays.iter().map(Duration::as_secs).collect()
    }

    #[test]
    fn test_sequence_caps_at_ten_seconds() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(secs(&delays), vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_reset_after_open() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = Backoff::default();
        for _ in 0..100 {
            assert!(backoff.next_delay() <= DEFAULT_CAP);
        }
    }
}
