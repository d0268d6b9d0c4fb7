//! Network Status
//!
//! A single online/offline flag shared by everything that needs to know
//! whether sending is worth attempting. Writers call [`NetworkMonitor::set_online`];
//! readers either sample it or subscribe to transitions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::ChatBackend;

/// Shared online/offline flag
#[derive(Clone, Debug)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Start in the given state
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Whether the network is currently considered reachable
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state; returns true when it changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network status changed");
        }
        changed
    }

    /// Receiver that observes every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Periodically probe the backend and feed the result into `monitor`
///
/// Runs until `cancel` fires. The first probe happens immediately.
pub async fn probe_health(
    backend: Arc<dyn ChatBackend>,
    monitor: NetworkMonitor,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let healthy = backend.health_check().await;
                tracing::trace!(backend = backend.name(), healthy, "Health probe");
                monitor.set_online(healthy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observed() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());

        let clone = monitor.clone();
        assert!(clone.set_online(true));
        assert!(monitor.is_online());
    }
}
