//! Chat Backend
//!
//! The seam between the engine and the backend's chat endpoint. The engine
//! only sees [`ChatBackend`]; [`HttpChatBackend`] is the reqwest
//! implementation.
//!
//! # Endpoints
//!
//! - `POST {base}/api/sessions/{id}/chat/stream`: JSON body, event stream reply
//! - `POST {base}/api/sessions/{id}/chat`: multipart body with images, JSON envelope reply
//! - `GET {base}/api/health`: reachability probe

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compose::{ImageAttachment, OutgoingCompose};
use crate::jobs::JobRequest;
use crate::messages::{MediaRefs, MessageId, SessionId};

/// Errors talking to the chat endpoint
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection, TLS or body transfer failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The reply could not be decoded
    #[error("Invalid backend reply: {0}")]
    Decode(String),

    /// The base URL cannot carry a path
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Raw response body chunks
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, BackendError>>;

/// One chat request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    /// Target session
    pub session: SessionId,
    /// Message text
    pub message: String,
    /// Referenced video
    pub video_ref: Option<String>,
    /// Referenced audio
    pub audio_ref: Option<String>,
    /// Label for the audio reference
    pub audio_label: Option<String>,
    /// Images to upload; a non-empty list selects the multipart endpoint
    pub images: Vec<ImageAttachment>,
}

impl ChatRequest {
    /// Build a request from what the compose area handed over
    #[must_use]
    pub fn from_compose(session: SessionId, outgoing: OutgoingCompose) -> Self {
        Self {
            session,
            message: outgoing.state.draft_text,
            video_ref: outgoing.state.video_ref,
            audio_ref: outgoing.state.audio_ref,
            audio_label: outgoing.state.audio_label,
            images: outgoing.images,
        }
    }

    /// Whether the multipart endpoint must be used
    #[must_use]
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_label: Option<&'a str>,
}

impl<'a> From<&'a ChatRequest> for ChatBody<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            message: &request.message,
            video_ref: request.video_ref.as_deref(),
            audio_ref: request.audio_ref.as_deref(),
            audio_label: request.audio_label.as_deref(),
        }
    }
}

/// JSON reply of the non-streaming endpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Server id of the assistant message
    #[serde(default, alias = "messageId")]
    pub message_id: Option<String>,
    /// Assistant text
    #[serde(default, alias = "response")]
    pub content: String,
    /// Media attached to the reply
    #[serde(flatten)]
    pub media: MediaRefs,
    /// Background jobs the request started
    #[serde(default)]
    pub jobs: Vec<JobRequest>,
    /// Backend-reported failure, shown verbatim
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatEnvelope {
    /// Server message id, if present and non-empty
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(MessageId::from_server)
    }
}

/// How the backend answered
pub enum ChatReply {
    /// Event stream to demultiplex
    Stream(ByteStream),
    /// Complete JSON reply
    Envelope(ChatEnvelope),
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("ChatReply::Stream(..)"),
            Self::Envelope(envelope) => f.debug_tuple("ChatReply::Envelope").field(envelope).finish(),
        }
    }
}

/// Chat endpoint abstraction
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    /// Send one request
    ///
    /// Returns once the reply has started; a streamed body is read by the
    /// caller.
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, BackendError>;
}

/// Chat backend over HTTP
#[derive(Clone, Debug)]
pub struct HttpChatBackend {
    base_url: reqwest::Url,
    request_timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpChatBackend {
    /// Create a backend rooted at `base_url`
    ///
    /// `request_timeout` bounds connecting and the whole envelope request;
    /// streamed bodies are not subject to it.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        let http_client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url,
            request_timeout,
            http_client,
        })
    }

    /// Base URL with `segments` appended, each one percent-encoded
    ///
    /// Session ids are opaque, so a `/` or `?` inside one must not change
    /// which endpoint is hit.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn stream_url(&self, session: &SessionId) -> Result<reqwest::Url, BackendError> {
        self.endpoint(&["api", "sessions", session.as_str(), "chat", "stream"])
    }

    fn envelope_url(&self, session: &SessionId) -> Result<reqwest::Url, BackendError> {
        self.endpoint(&["api", "sessions", session.as_str(), "chat"])
    }

    fn health_url(&self) -> Result<reqwest::Url, BackendError> {
        self.endpoint(&["api", "health"])
    }

    fn multipart_form(request: &ChatRequest) -> Result<reqwest::multipart::Form, BackendError> {
        let mut form = reqwest::multipart::Form::new().text("message", request.message.clone());
        if let Some(ref video) = request.video_ref {
            form = form.text("video_ref", video.clone());
        }
        if let Some(ref audio) = request.audio_ref {
            form = form.text("audio_ref", audio.clone());
        }
        if let Some(ref label) = request.audio_label {
            form = form.text("audio_label", label.clone());
        }
        for image in &request.images {
            let part = reqwest::multipart::Part::bytes(image.bytes.clone())
                .file_name(image.name.clone())
                .mime_str(&image.mime)?;
            form = form.part("images", part);
        }
        Ok(form)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.health_url() else {
            return false;
        };
        match self
            .http_client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, BackendError> {
        if request.has_images() {
            tracing::debug!(
                session = %request.session,
                images = request.images.len(),
                "Sending multipart chat request"
            );
            let response = self
                .http_client
                .post(self.envelope_url(&request.session)?)
                .timeout(self.request_timeout)
                .multipart(Self::multipart_form(request)?)
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            let envelope = response
                .json::<ChatEnvelope>()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            return Ok(ChatReply::Envelope(envelope));
        }

        tracing::debug!(session = %request.session, "Opening chat stream");
        let response = self
            .http_client
            .post(self.stream_url(&request.session)?)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&ChatBody::from(request))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BackendError::from))
            .boxed();
        Ok(ChatReply::Stream(body))
    }
}
