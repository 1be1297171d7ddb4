//! Wire protocol shared by the server, the producer client and subscribers.
//!
//! Request and response bodies are JSON with camelCase keys. The stream
//! endpoint emits named Server-Sent Events whose `data:` line is a single
//! JSON object; [`StreamEvent`] is the typed view of one such event.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Session, SessionStatus};

pub const EVENT_SESSION: &str = "session";
pub const EVENT_CHUNK: &str = "chunk";
pub const EVENT_SESSION_END: &str = "session_end";
pub const EVENT_REPLAY_COMPLETE: &str = "replay_complete";
pub const EVENT_NO_SESSION: &str = "no_session";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_COUNTDOWN: &str = "countdown";
pub const EVENT_COUNTDOWN_CLEAR: &str = "countdown_clear";
pub const EVENT_TIMEOUT: &str = "timeout";
pub const EVENT_ERROR: &str = "error";

// =========================================================================
// Ingestion bodies
// =========================================================================

/// Body of `POST /session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SessionRequest {
    Start { producer_ref: i64 },
    End {
        session_id: String,
        status: SessionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Body of `POST /push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushChunkRequest {
    pub session_id: String,
    pub sequence: u64,
    /// Base64 encoded chunk bytes.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushChunkResponse {
    pub received: u64,
    pub session_id: String,
}

/// Body of `POST /countdown`. `None` clears the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownRequest {
    pub next_check_at: Option<i64>,
}

/// JSON body returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Query string of `GET /stream`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_sequence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<bool>,
    /// Session that `from_sequence` refers to. When the stream resolves to a
    /// different session, `from_sequence` is ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
}

// =========================================================================
// Stream events
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    pub session_id: String,
    pub sequence: i64,
    /// Base64 encoded chunk bytes.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndEvent {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayCompleteEvent {
    pub session_id: String,
    pub total_chunks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownEvent {
    pub next_check_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutEvent {
    pub last_sequence: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// One named event on the broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Session(Session),
    Chunk(ChunkEvent),
    SessionEnd(SessionEndEvent),
    ReplayComplete(ReplayCompleteEvent),
    NoSession,
    Heartbeat(HeartbeatEvent),
    Countdown(CountdownEvent),
    CountdownClear,
    Timeout(TimeoutEvent),
    Error(ErrorEvent),
}

impl StreamEvent {
    /// SSE `event:` name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Session(_) => EVENT_SESSION,
            Self::Chunk(_) => EVENT_CHUNK,
            Self::SessionEnd(_) => EVENT_SESSION_END,
            Self::ReplayComplete(_) => EVENT_REPLAY_COMPLETE,
            Self::NoSession => EVENT_NO_SESSION,
            Self::Heartbeat(_) => EVENT_HEARTBEAT,
            Self::Countdown(_) => EVENT_COUNTDOWN,
            Self::CountdownClear => EVENT_COUNTDOWN_CLEAR,
            Self::Timeout(_) => EVENT_TIMEOUT,
            Self::Error(_) => EVENT_ERROR,
        }
    }

    /// SSE `data:` payload.
    pub fn data(&self) -> Result<String> {
        let json = match self {
            Self::Session(session) => serde_json::to_string(session)?,
            Self::Chunk(chunk) => serde_json::to_string(chunk)?,
            Self::SessionEnd(end) => serde_json::to_string(end)?,
            Self::ReplayComplete(done) => serde_json::to_string(done)?,
            Self::Heartbeat(beat) => serde_json::to_string(beat)?,
            Self::Countdown(countdown) => serde_json::to_string(countdown)?,
            Self::Timeout(timeout) => serde_json::to_string(timeout)?,
            Self::Error(error) => serde_json::to_string(error)?,
            Self::NoSession | Self::CountdownClear => "{}".to_string(),
        };
        Ok(json)
    }

    /// Rebuild an event from its SSE name and `data:` payload.
    pub fn decode(name: &str, data: &str) -> Result<Self> {
        let event = match name {
            EVENT_SESSION => Self::Session(serde_json::from_str(data)?),
            EVENT_CHUNK => Self::Chunk(serde_json::from_str(data)?),
            EVENT_SESSION_END => Self::SessionEnd(serde_json::from_str(data)?),
            EVENT_REPLAY_COMPLETE => Self::ReplayComplete(serde_json::from_str(data)?),
            EVENT_NO_SESSION => Self::NoSession,
            EVENT_HEARTBEAT => Self::Heartbeat(serde_json::from_str(data)?),
            EVENT_COUNTDOWN => Self::Countdown(serde_json::from_str(data)?),
            EVENT_COUNTDOWN_CLEAR => Self::CountdownClear,
            EVENT_TIMEOUT => Self::Timeout(serde_json::from_str(data)?),
            EVENT_ERROR => Self::Error(serde_json::from_str(data)?),
            other => return Err(Error::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}
