use serde::{Deserialize, Serialize};

/// Authoritative session phase as declared by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Session exists but has not started.
    Waiting,
    /// Gameplay is live. Older servers call this `active`.
    #[serde(alias = "active")]
    Running,
    /// Admin paused the clock.
    Paused,
    /// Session is over. Older servers call this `finished`.
    #[serde(alias = "finished")]
    Ended,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Waiting => "waiting",
            SessionPhase::Running => "running",
            SessionPhase::Paused => "paused",
            SessionPhase::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status carried by polls, push updates and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSessionStatus {
    pub status: SessionPhase,
    #[serde(default)]
    pub remaining_seconds: i64,
    /// Absent when the server has never created a session.
    #[serde(default)]
    pub session_id: Option<i64>,
}

impl ServerSessionStatus {
    pub fn new(status: SessionPhase, remaining_seconds: i64, session_id: Option<i64>) -> Self {
        Self {
            status,
            remaining_seconds,
            session_id,
        }
    }
}

/// Response of the public status endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: ServerSessionStatus,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub name: Option<String>,
}
