//! Observable connection state.

use livetail_core::SessionStatus;

/// Connection lifecycle.
///
/// `Disconnected -> Connecting -> Connected`, then either back to
/// `Connecting` (server timeout), through `Error` and back to `Connecting`,
/// or to `Disconnected` once a replay completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot published on the subscriber's watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub session_id: Option<String>,
    /// Highest sequence applied for `session_id`.
    pub last_sequence: Option<i64>,
    /// Terminal status once the tracked session has ended.
    pub session_status: Option<SessionStatus>,
    pub next_check_at: Option<i64>,
    /// Consecutive failed connection attempts.
    pub attempt: u32,
    pub last_error: Option<String>,
}
