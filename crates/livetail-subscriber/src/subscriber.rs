//! Stream subscriber.
//!
//! [`StreamTracker`] applies decoded stream events to the local view (sequence
//! tracking, UTF-8 reassembly, transcript) and decides what the connection
//! does next. [`Subscriber`] owns the HTTP connection, reconnects according to
//! its [`ReconnectPolicy`], and publishes updates and state to the caller.

use std::time::Duration;

use livetail_core::codec::decode_chunk;
use livetail_core::config::SubscriberConfig;
use livetail_core::protocol::StreamQuery;
use livetail_core::{Session, SessionStatus, StreamEvent};
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderValue};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::{ReconnectPolicy, ReconnectReason};
use crate::sse::SseStreamParser;
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transcript::{Transcript, Utf8Decoder};

/// Longest silence tolerated on an open stream. The server sends a heartbeat
/// every 30 s.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscriber errors. Every variant except `RetriesExhausted` and `Url`
/// triggers a reconnect.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream request rejected with status {0}")]
    Status(u16),

    #[error("Malformed stream event: {0}")]
    Event(#[from] livetail_core::Error),

    #[error("Server reported an error: {0}")]
    Server(String),

    #[error("Stream ended without a timeout or replay_complete event")]
    StreamEnded,

    #[error("No data received for {0:?}")]
    Idle(Duration),

    #[error("Invalid server URL: {0}")]
    Url(String),

    #[error("Gave up after {0} failed connection attempts")]
    RetriesExhausted(u32),
}

/// What the caller sees, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberUpdate {
    /// A different session is now followed; earlier output was discarded.
    SessionStarted(Session),
    /// Decoded output text.
    Output { session_id: String, text: String },
    SessionEnded {
        session_id: String,
        status: SessionStatus,
    },
    ReplayComplete {
        session_id: String,
        total_chunks: u64,
    },
    NoSession,
    /// Next scheduled producer run, `None` when cleared.
    Countdown(Option<i64>),
}

/// Connection directive after applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The server closed at its maximum duration; reconnect and resume.
    Reconnect,
    /// Replay finished; the subscriber is done.
    Finished,
}

// =========================================================================
// Event application
// =========================================================================

/// Local view of the followed session.
#[derive(Debug)]
pub struct StreamTracker {
    session: Option<Session>,
    last_sequence: Option<i64>,
    ended: Option<SessionStatus>,
    next_check_at: Option<i64>,
    decoder: Utf8Decoder,
    transcript: Transcript,
}

impl StreamTracker {
    pub fn new(max_transcript_lines: usize) -> Self {
        Self {
            session: None,
            last_sequence: None,
            ended: None,
            next_check_at: None,
            decoder: Utf8Decoder::default(),
            transcript: Transcript::new(max_transcript_lines),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub const fn last_sequence(&self) -> Option<i64> {
        self.last_sequence
    }

    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Query for the next connection: resume after the last applied
    /// sequence of the followed session.
    pub fn resume_query(&self, session_id: Option<&str>, replay: bool) -> StreamQuery {
        let resume_session_id = self
            .last_sequence
            .and_then(|_| self.session_id())
            .map(str::to_string);
        StreamQuery {
            session_id: session_id.map(str::to_string),
            from_sequence: self.last_sequence,
            replay: replay.then_some(true),
            resume_session_id,
        }
    }

    /// Apply one event, appending caller-visible updates to `updates`.
    pub fn apply(
        &mut self,
        event: StreamEvent,
        updates: &mut Vec<SubscriberUpdate>,
    ) -> Result<Flow, SubscriberError> {
        match event {
            StreamEvent::Session(session) => {
                if self.session_id() == Some(session.id.as_str()) {
                    if session.status.is_terminal() {
                        self.ended = Some(session.status);
                    }
                    self.session = Some(session);
                } else {
                    info!(session_id = %session.id, producer_ref = session.producer_ref, "Following session");
                    self.transcript.clear();
                    self.decoder.reset();
                    self.last_sequence = None;
                    self.ended = session.status.is_terminal().then_some(session.status);
                    self.session = Some(session.clone());
                    updates.push(SubscriberUpdate::SessionStarted(session));
                }
            }
            StreamEvent::Chunk(chunk) => {
                if self.session_id() != Some(chunk.session_id.as_str()) {
                    debug!(session_id = %chunk.session_id, "Chunk for an unfollowed session ignored");
                    return Ok(Flow::Continue);
                }
                if let Some(last) = self.last_sequence {
                    if chunk.sequence <= last {
                        debug!(sequence = chunk.sequence, last, "Duplicate chunk skipped");
                        return Ok(Flow::Continue);
                    }
                    if chunk.sequence > last.saturating_add(1) {
                        warn!(sequence = chunk.sequence, last, "Gap in chunk sequence");
                    }
                }
                let bytes = decode_chunk(&chunk.content).map_err(livetail_core::Error::from)?;
                self.last_sequence = Some(chunk.sequence);
                let text = self.decoder.decode(&bytes);
                self.push_output(chunk.session_id, text, updates);
            }
            StreamEvent::SessionEnd(end) => {
                if self.session_id() == Some(end.session_id.as_str()) {
                    self.flush_decoder(updates);
                    self.ended = Some(end.status);
                }
                info!(session_id = %end.session_id, status = %end.status, "Session ended");
                updates.push(SubscriberUpdate::SessionEnded {
                    session_id: end.session_id,
                    status: end.status,
                });
            }
            StreamEvent::ReplayComplete(done) => {
                self.flush_decoder(updates);
                updates.push(SubscriberUpdate::ReplayComplete {
                    session_id: done.session_id,
                    total_chunks: done.total_chunks,
                });
                return Ok(Flow::Finished);
            }
            StreamEvent::NoSession => updates.push(SubscriberUpdate::NoSession),
            StreamEvent::Heartbeat(_) => {}
            StreamEvent::Countdown(countdown) => {
                self.next_check_at = Some(countdown.next_check_at);
                updates.push(SubscriberUpdate::Countdown(Some(countdown.next_check_at)));
            }
            StreamEvent::CountdownClear => {
                self.next_check_at = None;
                updates.push(SubscriberUpdate::Countdown(None));
            }
            StreamEvent::Timeout(timeout) => {
                debug!(last_sequence = ?timeout.last_sequence, "Server closed stream at max duration");
                return Ok(Flow::Reconnect);
            }
            StreamEvent::Error(error) => return Err(SubscriberError::Server(error.message)),
        }
        Ok(Flow::Continue)
    }

    fn flush_decoder(&mut self, updates: &mut Vec<SubscriberUpdate>) {
        let tail = self.decoder.finish();
        if let Some(session_id) = self.session_id().map(str::to_string) {
            self.push_output(session_id, tail, updates);
        }
    }

    fn push_output(&mut self, session_id: String, text: String, updates: &mut Vec<SubscriberUpdate>) {
        if text.is_empty() {
            return;
        }
        self.transcript.push_text(&text);
        updates.push(SubscriberUpdate::Output { session_id, text });
    }
}

// =========================================================================
// Connection loop
// =========================================================================

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub server_url: String,
    /// Follow this session instead of resolving the current one.
    pub session_id: Option<String>,
    /// Request the replay path even for an active session.
    pub replay: bool,
    pub policy: ReconnectPolicy,
    pub max_transcript_lines: usize,
    pub idle_timeout: Duration,
}

impl From<&SubscriberConfig> for SubscriberOptions {
    fn from(config: &SubscriberConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            session_id: None,
            replay: false,
            policy: ReconnectPolicy::from(config),
            max_transcript_lines: config.max_transcript_lines,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Reconnecting client for `GET /stream`.
pub struct Subscriber {
    http: reqwest::Client,
    stream_url: Url,
    session_id: Option<String>,
    replay: bool,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    failures: u32,
    tracker: StreamTracker,
    updates: mpsc::Sender<SubscriberUpdate>,
    state: watch::Sender<ConnectionState>,
}

impl Subscriber {
    pub fn new(
        options: SubscriberOptions,
        updates: mpsc::Sender<SubscriberUpdate>,
    ) -> Result<Self, SubscriberError> {
        let stream_url = Url::parse(&format!(
            "{}/stream",
            options.server_url.trim_end_matches('/')
        ))
        .map_err(|e| SubscriberError::Url(format!("{}: {e}", options.server_url)))?;

        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let (state, _) = watch::channel(ConnectionState::default());

        Ok(Self {
            http,
            stream_url,
            session_id: options.session_id,
            replay: options.replay,
            policy: options.policy,
            idle_timeout: options.idle_timeout,
            failures: 0,
            tracker: StreamTracker::new(options.max_transcript_lines),
            updates,
            state,
        })
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub const fn tracker(&self) -> &StreamTracker {
        &self.tracker
    }

    pub const fn transcript(&self) -> &Transcript {
        self.tracker.transcript()
    }

    /// URL of the next connection attempt.
    pub fn request_url(&self) -> Url {
        let query = self
            .tracker
            .resume_query(self.session_id.as_deref(), self.replay);
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(id) = query.session_id {
            pairs.push(("sessionId", id));
        }
        if let Some(from) = query.from_sequence {
            pairs.push(("fromSequence", from.to_string()));
        }
        if query.replay == Some(true) {
            pairs.push(("replay", "true".to_string()));
        }
        if let Some(id) = query.resume_session_id {
            pairs.push(("resumeSessionId", id));
        }

        let mut url = self.stream_url.clone();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }

    /// Follow the stream until a replay completes, the retry budget runs out,
    /// the update receiver is dropped, or `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), SubscriberError> {
        loop {
            self.set_status(ConnectionStatus::Connecting, None);

            let outcome = tokio::select! {
                () = shutdown.cancelled() => break,
                outcome = self.connect_once() => outcome,
            };

            let delay = match outcome {
                Ok(Flow::Finished) => {
                    self.set_status(ConnectionStatus::Disconnected, None);
                    return Ok(());
                }
                Ok(_) => self.policy.delay_for(ReconnectReason::Timeout, 0),
                Err(e) => {
                    warn!(error = %e, failures = self.failures, "Stream connection failed");
                    if !self.policy.should_retry(self.failures) {
                        let attempts = self.failures + 1;
                        self.set_status(ConnectionStatus::Error, Some(e.to_string()));
                        return Err(SubscriberError::RetriesExhausted(attempts));
                    }
                    let delay = self.policy.delay_for(ReconnectReason::Error, self.failures);
                    self.failures += 1;
                    self.set_status(ConnectionStatus::Error, Some(e.to_string()));
                    delay
                }
            };

            debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_status(ConnectionStatus::Disconnected, None);
        Ok(())
    }

    /// One connection. Returns [`Flow::Reconnect`] or [`Flow::Finished`].
    async fn connect_once(&mut self) -> Result<Flow, SubscriberError> {
        let url = self.request_url();
        debug!(%url, "Connecting to stream");

        let mut resp = self
            .http
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SubscriberError::Status(resp.status().as_u16()));
        }

        self.failures = 0;
        self.set_status(ConnectionStatus::Connected, None);

        let mut parser = SseStreamParser::default();
        let mut updates = Vec::new();
        loop {
            let Ok(next) = tokio::time::timeout(self.idle_timeout, resp.chunk()).await else {
                return Err(SubscriberError::Idle(self.idle_timeout));
            };
            let Some(bytes) = next? else {
                return Err(SubscriberError::StreamEnded);
            };

            for frame in parser.feed(&bytes) {
                let event = StreamEvent::decode(&frame.event, &frame.data)?;
                let flow = self.tracker.apply(event, &mut updates)?;
                self.sync_state();

                for update in updates.drain(..) {
                    if self.updates.send(update).await.is_err() {
                        debug!("Update receiver dropped, stopping");
                        return Ok(Flow::Finished);
                    }
                }
                if flow != Flow::Continue {
                    return Ok(flow);
                }
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus, error: Option<String>) {
        let failures = self.failures;
        self.state.send_modify(|state| {
            if state.status != status {
                info!(from = %state.status, to = %status, "Connection state changed");
            }
            state.status = status;
            state.attempt = failures;
            if error.is_some() {
                state.last_error = error;
            }
        });
    }

    fn sync_state(&self) {
        let tracker = &self.tracker;
        self.state.send_if_modified(|state| {
            let session_id = tracker.session_id().map(str::to_string);
            let next = ConnectionState {
                session_id,
                last_sequence: tracker.last_sequence,
                session_status: tracker.ended,
                next_check_at: tracker.next_check_at,
                ..state.clone()
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
