//! HTTP client for the livetail ingestion API.
//!
//! Uses reqwest to open sessions, push chunks, end sessions, and publish the
//! countdown schedule. Every call carries the shared secret as a bearer token.

use std::time::Duration;

use livetail_core::SessionStatus;
use livetail_core::config::ProducerConfig;
use livetail_core::protocol::{
    CountdownRequest, ErrorResponse, PushChunkRequest, SessionRequest, StartSessionResponse,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::ChunkSink;

/// Base delay before the first push retry; doubles per attempt.
pub const PUSH_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Ingestion client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Transport failures and 5xx responses are worth another attempt;
    /// 4xx rejections are not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Config(_) => false,
        }
    }
}

/// Client for the ingestion and session-lifecycle endpoints.
#[derive(Debug, Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    push_retries: u32,
    retry_delay: Duration,
}

impl SessionClient {
    /// Create a client from producer configuration.
    pub fn new(config: &ProducerConfig) -> Result<Self, ClientError> {
        if config.server_url.is_empty() {
            return Err(ClientError::Config("server_url is empty".into()));
        }
        let secret = config
            .shared_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClientError::Config("shared secret is not set".into()))?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {secret}"))
            .map_err(|_| ClientError::Config("Invalid shared secret format".into()))?;
        headers.insert(AUTHORIZATION, auth);

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            push_retries: config.push_retries,
            retry_delay: PUSH_RETRY_BASE_DELAY,
        })
    }

    /// Override the base retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success responses to [`ClientError::Api`], keeping the
    /// server's `{"error": ...}` message when there is one.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let fallback = status.canonical_reason().unwrap_or("Unknown").to_string();
        let message = match resp.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => fallback,
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ClientError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::check_status(resp).await
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Open a session. Returns its id.
    pub async fn start_session(&self, producer_ref: i64) -> Result<String, ClientError> {
        let resp = self
            .post("/session", &SessionRequest::Start { producer_ref })
            .await?;
        let body: StartSessionResponse = resp.json().await?;
        info!(session_id = %body.session_id, producer_ref, "Streaming session opened");
        Ok(body.session_id)
    }

    /// Mark a session terminal.
    pub async fn end_session(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), ClientError> {
        self.post(
            "/session",
            &SessionRequest::End {
                session_id: session_id.to_string(),
                status,
            },
        )
        .await?;
        info!(session_id, %status, "Streaming session closed");
        Ok(())
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    /// Push one encoded chunk, retrying transport failures and 5xx responses.
    pub async fn push_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        content: String,
    ) -> Result<(), ClientError> {
        let body = PushChunkRequest {
            session_id: session_id.to_string(),
            sequence,
            content,
        };

        let mut attempt = 0;
        loop {
            match self.post("/push", &body).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.push_retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    debug!(
                        sequence,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying chunk push"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Schedule
    // =========================================================================

    /// Publish (or clear with `None`) the next-check timestamp.
    pub async fn set_next_check(&self, next_check_at: Option<i64>) -> Result<(), ClientError> {
        self.post("/countdown", &CountdownRequest { next_check_at })
            .await?;
        Ok(())
    }
}

/// [`ChunkSink`] that pushes to one session through a [`SessionClient`].
#[derive(Debug, Clone)]
pub struct SessionSink {
    client: SessionClient,
    session_id: String,
}

impl SessionSink {
    pub const fn new(client: SessionClient, session_id: String) -> Self {
        Self { client, session_id }
    }
}

impl ChunkSink for SessionSink {
    type Error = ClientError;

    async fn push(&self, sequence: u64, content: String) -> Result<(), ClientError> {
        self.client
            .push_chunk(&self.session_id, sequence, content)
            .await
    }
}
