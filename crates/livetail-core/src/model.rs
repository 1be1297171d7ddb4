//! Session and chunk records.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a streamed producer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed are terminal; a session never leaves them.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A status string that does not name a known [`SessionStatus`].
#[derive(Debug, thiserror::Error)]
#[error("unknown session status: {0}")]
pub struct UnknownStatus(pub String);

impl TryFrom<String> for SessionStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownStatus(value))
    }
}

/// One bounded producer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Work item being streamed. `0` is reserved for a non-work sync job.
    pub producer_ref: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
}

impl Session {
    pub const fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Active)
    }
}

/// One sequenced, immutable unit of captured output.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Chunk {
    pub session_id: String,
    pub sequence: i64,
    pub content: Vec<u8>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert!(SessionStatus::try_from("paused".to_string()).is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn session_serializes_camel_case() {
        let session = Session {
            id: "s1".into(),
            producer_ref: 42,
            started_at: 100,
            ended_at: None,
            status: SessionStatus::Active,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["producerRef"], 42);
        assert_eq!(json["startedAt"], 100);
        assert!(json["endedAt"].is_null());
        assert_eq!(json["status"], "active");
    }
}
