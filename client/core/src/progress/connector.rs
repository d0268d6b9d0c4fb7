//! Progress Socket Connector
//!
//! The channel state machine only needs three things from a socket: send a
//! text message, receive the next text message, and close. [`ProgressLink`]
//! captures that, [`ProgressConnector`] opens links, and
//! [`WebSocketConnector`] is the production implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::messages::SessionId;

/// Errors on the progress socket
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The socket could not be opened
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed {
        /// Address that was dialled
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// A message could not be sent
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The socket failed while reading
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// No socket address can be derived from the base URL
    #[error("Invalid progress URL {url}: {reason}")]
    InvalidUrl {
        /// Base URL that was given
        url: String,
        /// What is wrong with it
        reason: String,
    },
}

/// One open progress socket
#[async_trait]
pub trait ProgressLink: Send {
    /// Send a text message
    async fn send_text(&mut self, text: &str) -> Result<(), ProgressError>;

    /// Next text message; `None` once the peer has closed
    ///
    /// Must be cancel-safe: it is raced against the ping timer.
    async fn recv_text(&mut self) -> Option<Result<String, ProgressError>>;

    /// Close the socket, ignoring errors
    async fn close(&mut self);
}

/// Opens progress sockets
#[async_trait]
pub trait ProgressConnector: Send + Sync {
    /// Open a link to `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressLink>, ProgressError>;
}

/// Derive the progress socket address from the HTTP base URL
///
/// `http` becomes `ws` and `https` becomes `wss`; `/progress/{session}` is
/// appended to the base path with the session id percent-encoded as a single
/// segment.
///
/// # Errors
///
/// Returns [`ProgressError::InvalidUrl`] if `base_url` does not parse or
/// uses a scheme other than http(s) or ws(s).
pub fn progress_url(base_url: &str, session: &SessionId) -> Result<String, ProgressError> {
    let invalid = |reason: String| ProgressError::InvalidUrl {
        url: base_url.to_string(),
        reason,
    };

    let mut url = reqwest::Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(["progress", session.as_str()]);
    Ok(url.to_string())
}

/// Production connector over `tokio-tungstenite`
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProgressConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressLink>, ProgressError> {
        let (stream, response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            ProgressError::ConnectFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        tracing::debug!(url = %url, status = %response.status(), "Progress socket open");
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ProgressLink for WebSocketLink {
    async fn send_text(&mut self, text: &str) -> Result<(), ProgressError> {
        self.stream
            .send(WsMessage::Text(text.to_string()))
            .await
            .map_err(|e| ProgressError::SendFailed(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, ProgressError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!("Dropping non-UTF-8 binary progress message"),
                },
                Ok(WsMessage::Close(_)) => return None,
                // Control frames are answered by tungstenite itself
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
                Err(e) => return Some(Err(ProgressError::ReceiveFailed(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "Progress socket close failed");
        }
    }
}
