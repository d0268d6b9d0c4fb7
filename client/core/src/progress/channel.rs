//! Progress Channel
//!
//! One reconnecting socket per active session, run as a spawned task.
//!
//! # State Machine
//!
//! ```text
//!            connect ok                 close / error
//! Connecting ──────────► Open ─────────────────────────► Backoff
//!     ▲  │                │ every ping_interval: "ping"     │
//!     │  └── connect err ─┼────────────────────────────────►│
//!     │                   │                                 │ wait min(base*2^n, cap)
//!     └───────────────────┼─────────────────────────────────┘
//!                         │
//!        teardown (any state) ──► Closed
//! ```
//!
//! The task owns the ping interval and the reconnect timer, so cancelling
//! the task's token is enough to guarantee no timer outlives the channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::connector::{ProgressConnector, ProgressLink};
use super::frame::{parse_progress_frame, ProgressFrame, PING};
use crate::messages::SessionId;

/// Timing for a progress channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressSettings {
    /// Keep-alive period while open
    pub ping_interval: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Longest reconnect delay
    pub backoff_cap: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            backoff_base: super::backoff::DEFAULT_BASE,
            backoff_cap: super::backoff::DEFAULT_CAP,
        }
    }
}

/// Where the channel is in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Dialling
    Connecting,
    /// Socket open, pinging
    Open,
    /// Waiting before the next dial
    Backoff {
        /// Attempts since the last successful open
        attempt: u32,
        /// How long this wait is
        delay: Duration,
    },
    /// Torn down; terminal
    Closed,
}

/// What a channel reports to its owner
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// The state machine moved
    State(ChannelState),
    /// A frame worth acting on (pongs and unknown frames are not reported)
    Frame(ProgressFrame),
}

/// A [`ProgressEvent`] tagged with the session whose channel produced it
///
/// The owner drops notices for sessions that are no longer active.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressNotice {
    /// Originating session
    pub session: SessionId,
    /// What happened
    pub event: ProgressEvent,
}

/// Handle to a running progress channel
///
/// Dropping the handle cancels the task; [`ProgressChannel::close`] also
/// waits for it to finish.
pub struct ProgressChannel {
    session: SessionId,
    cancel: CancellationToken,
    state: watch::Receiver<ChannelState>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressChannel {
    /// Spawn the channel task for `session`
    pub fn spawn(
        session: SessionId,
        url: String,
        connector: Arc<dyn ProgressConnector>,
        settings: ProgressSettings,
        notices: mpsc::UnboundedSender<ProgressNotice>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let worker = ChannelWorker {
            session: session.clone(),
            url,
            connector,
            settings,
            notices,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            session,
            cancel,
            state: state_rx,
            handle: Some(handle),
        }
    }

    /// Session this channel serves
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Latest state
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Tear down and wait for the task to stop
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(session = %self.session, error = %e, "Progress task ended abnormally");
            }
        }
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum OpenExit {
    Teardown,
    Lost(String),
}

struct ChannelWorker {
    session: SessionId,
    url: String,
    connector: Arc<dyn ProgressConnector>,
    settings: ProgressSettings,
    notices: mpsc::UnboundedSender<ProgressNotice>,
    state: watch::Sender<ChannelState>,
    cancel: CancellationToken,
}

impl ChannelWorker {
    async fn run(self) {
        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_cap);

        loop {
            self.publish(ChannelState::Connecting);

            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(mut link) => {
                    backoff.reset();
                    self.publish(ChannelState::Open);
                    tracing::debug!(session = %self.session, "Progress channel open");

                    match self.pump(link.as_mut()).await {
                        OpenExit::Teardown => {
                            link.close().await;
                            break;
                        }
                        OpenExit::Lost(reason) => {
                            tracing::debug!(session = %self.session, reason = %reason, "Progress channel lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %self.session, error = %e, "Progress connect failed");
                }
            }

            let delay = backoff.next_delay();
            self.publish(ChannelState::Backoff {
                attempt: backoff.attempt(),
                delay,
            });
            tracing::debug!(
                session = %self.session,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Progress channel backing off"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(ChannelState::Closed);
        tracing::debug!(session = %self.session, "Progress channel closed");
    }

    async fn pump(&self, link: &mut dyn ProgressLink) -> OpenExit {
        let period = self.settings.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return OpenExit::Teardown,
                _ = ping.tick() => {
                    if let Err(e) = link.send_text(PING).await {
                        return OpenExit::Lost(e.to_string());
                    }
                }
                message = link.recv_text() => match message {
                    None => return OpenExit::Lost("closed by server".to_string()),
                    Some(Err(e)) => return OpenExit::Lost(e.to_string()),
                    Some(Ok(text)) => {
                        if !self.accept(&text) {
                            return OpenExit::Teardown;
                        }
                    }
                },
            }
        }
    }

    /// Returns false once nobody is listening any more
    fn accept(&self, text: &str) -> bool {
        match parse_progress_frame(text) {
            Ok(ProgressFrame::Pong) => true,
            Ok(ProgressFrame::Unknown) => {
                tracing::debug!(session = %self.session, "Ignoring unknown progress frame");
                true
            }
            Ok(frame) => self.emit(ProgressEvent::Frame(frame)),
            Err(e) => {
                tracing::debug!(session = %self.session, error = %e, "Dropping unparseable progress frame");
                true
            }
        }
    }

    fn publish(&self, state: ChannelState) {
        self.state.send_replace(state.clone());
        self.emit(ProgressEvent::State(state));
    }

    fn emit(&self, event: ProgressEvent) -> bool {
        self.notices
            .send(ProgressNotice {
                session: self.session.clone(),
                event,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::connector::ProgressError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Link driven by the test through channels
    struct ScriptedLink {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProgressLink for ScriptedLink {
        async fn send_text(&mut self, text: &str) -> Result<(), ProgressError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn recv_text(&mut self) -> Option<Result<String, ProgressError>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }

    /// Connector that fails a fixed number of times, then hands out one link
    struct ScriptedConnector {
        failures: Mutex<u32>,
        link: Mutex<Option<ScriptedLink>>,
        dials: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl ProgressConnector for ScriptedConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn ProgressLink>, ProgressError> {
            self.dials.lock().push(Instant::now());
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ProgressError::ConnectFailed {
                        url: url.to_string(),
                        reason: "refused".into(),
                    });
                }
            }
            match self.link.lock().take() {
                Some(link) => Ok(Box::new(link)),
                None => Err(ProgressError::ConnectFailed {
                    url: url.to_string(),
                    reason: "no more links".into(),
                }),
            }
        }
    }

    fn scripted(
        failures: u32,
    ) -> (
        Arc<ScriptedConnector>,
        mpsc::UnboundedSender<String>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(ScriptedConnector {
            failures: Mutex::new(failures),
            link: Mutex::new(Some(ScriptedLink {
                incoming: rx,
                sent: Arc::clone(&sent),
            })),
            dials: Mutex::new(Vec::new()),
        });
        (connector, tx, sent)
    }

    fn frames(notices: &mut mpsc::UnboundedReceiver<ProgressNotice>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            out.push(notice.event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_follow_backoff() {
        let (connector, _tx, _sent) = scripted(5);
        let (notice_tx, mut notices) = mpsc::unbounded_channel();

        let channel = ProgressChannel::spawn(
            SessionId::from("s1"),
            "ws://test/progress/s1".into(),
            connector.clone(),
            ProgressSettings::default(),
            notice_tx,
        );

        tokio::time::sleep(Duration::from_secs(60)).await;

        let delays: Vec<u64> = frames(&mut notices)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::State(ChannelState::Backoff { delay, .. }) => Some(delay.as_secs()),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10]);
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(connector.dials.lock().len(), 6);

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_forwarded_and_pong_swallowed() {
        let (connector, tx, _sent) = scripted(0);
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let channel = ProgressChannel::spawn(
            SessionId::from("s1"),
            "ws://test".into(),
            connector,
            ProgressSettings::default(),
            notice_tx,
        );

        tx.send("pong".into()).unwrap();
        tx.send(r#"{"type":"progress","progress":0.5}"#.into()).unwrap();
        tx.send("garbage".into()).unwrap();
        tx.send(r#"{"type":"error","message":"quota"}"#.into()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = frames(&mut notices);
        assert_eq!(
            events,
            vec![
                ProgressEvent::State(ChannelState::Connecting),
                ProgressEvent::State(ChannelState::Open),
                ProgressEvent::Frame(ProgressFrame::Progress {
                    message: None,
                    progress: 0.5,
                    duration: None,
                }),
                ProgressEvent::Frame(ProgressFrame::Error {
                    message: "quota".into()
                }),
            ]
        );

        channel.close().await;
        assert_eq!(
            frames(&mut notices),
            vec![ProgressEvent::State(ChannelState::Closed)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_every_interval_while_open() {
        let (connector, _tx, sent) = scripted(0);
        let (notice_tx, _notices) = mpsc::unbounded_channel();
        let channel = ProgressChannel::spawn(
            SessionId::from("s1"),
            "ws://test".into(),
            connector,
            ProgressSettings::default(),
            notice_tx,
        );

        tokio::time::sleep(Duration::from_secs(24)).await;
        assert!(sent.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(52)).await;
        assert_eq!(*sent.lock(), vec!["ping", "ping", "ping"]);

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_goes_to_backoff_then_reconnects() {
        let (connector, tx, _sent) = scripted(0);
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let channel = ProgressChannel::spawn(
            SessionId::from("s1"),
            "ws://test".into(),
            connector.clone(),
            ProgressSettings::default(),
            notice_tx,
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        drop(tx);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let states: Vec<_> = frames(&mut notices)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::State(state) => Some(state),
                ProgressEvent::Frame(_) => None,
            })
            .collect();
        assert_eq!(
            &states[..3],
            &[
                ChannelState::Connecting,
                ChannelState::Open,
                ChannelState::Backoff {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
            ]
        );
        assert_eq!(states[3], ChannelState::Connecting);
        assert_eq!(connector.dials.lock().len(), 2);

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff_stops_timers() {
        let (connector, _tx, _sent) = scripted(100);
        let (notice_tx, _notices) = mpsc::unbounded_channel();
        let channel = ProgressChannel::spawn(
            SessionId::from("s1"),
            "ws://test".into(),
            connector.clone(),
            ProgressSettings::default(),
            notice_tx,
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        channel.close().await;

        let dials = connector.dials.lock().len();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.dials.lock().len(), dials);
    }
}
