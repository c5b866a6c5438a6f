//! Contract with the detection backend and its HTTP implementation.

use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Body returned by the liveness endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReply {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HealthReply {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// The backend operations the client depends on.
///
/// Implementations only report what the backend said; deciding what an
/// answer means for the Session is left to the health monitor and the stream
/// controller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /health`. Any non-200 status is an error.
    async fn check_health(&self) -> Result<HealthReply, BackendError>;

    /// `POST /start_video_feed`. Any non-200 status is an error.
    async fn start_video_feed(&self) -> Result<(), BackendError>;

    /// `POST /stop_video_feed`. Any non-200 status is an error.
    async fn stop_video_feed(&self) -> Result<(), BackendError>;

    /// Locator of the annotated video stream, unique per call so a renderer
    /// never reuses a cached response.
    fn stream_locator(&self) -> String;
}

/// [`Backend`] over HTTP using `reqwest`.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Scheme, host and port of the backend, e.g. `http://127.0.0.1:8000`.
    /// * `timeout` - Upper bound applied to every request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Reports request timeouts as [`BackendError::Timeout`].
    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(e)
        }
    }

    async fn post_expecting_ok(&self, path: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        ensure_ok(response.status())
    }
}

fn ensure_ok(status: StatusCode) -> Result<(), BackendError> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(BackendError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn check_health(&self) -> Result<HealthReply, BackendError> {
        let response = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        ensure_ok(response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| BackendError::InvalidBody(e.to_string()))
    }

    async fn start_video_feed(&self) -> Result<(), BackendError> {
        self.post_expecting_ok("start_video_feed").await
    }

    async fn stop_video_feed(&self) -> Result<(), BackendError> {
        self.post_expecting_ok("stop_video_feed").await
    }

    fn stream_locator(&self) -> String {
        format!(
            "{}?_={}",
            self.url("video_feed"),
            chrono::Utc::now().timestamp_millis()
        )
    }
}
