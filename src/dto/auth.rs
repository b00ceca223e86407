use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dao::models::Credential,
    dto::status::{ServerSessionStatus, SessionPhase},
};

/// Payload used to join the live session under a username.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 40, message = "username must be 2 to 40 characters"))]
    pub username: String,
}

impl RegisterRequest {
    /// Build a request with surrounding whitespace stripped, as the server does.
    pub fn new(username: &str) -> Self {
        Self {
            username: username.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

/// Server answer to a successful registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub token: String,
    pub session_id: i64,
    pub username: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub remaining_seconds: i64,
    pub status: SessionPhase,
}

/// Server answer to a successful token validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidateTokenResponse {
    pub username: String,
    pub session_id: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub remaining_seconds: i64,
    pub session_status: SessionPhase,
}

/// Credential plus the session status observed while obtaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub credential: Credential,
    pub score: i64,
    pub status: ServerSessionStatus,
}

impl RegisterResponse {
    pub fn into_admission(self) -> Admission {
        Admission {
            status: ServerSessionStatus {
                status: self.status,
                remaining_seconds: self.remaining_seconds,
                session_id: Some(self.session_id),
            },
            credential: Credential {
                username: self.username,
                token: self.token,
                session_id: self.session_id,
            },
            score: self.score,
        }
    }
}

impl ValidateTokenResponse {
    /// The server does not echo the token back, so the caller supplies it.
    pub fn into_admission(self, token: String) -> Admission {
        Admission {
            status: ServerSessionStatus {
                status: self.session_status,
                remaining_seconds: self.remaining_seconds,
                session_id: Some(self.session_id),
            },
            credential: Credential {
                username: self.username,
                token,
                session_id: self.session_id,
            },
            score: self.score,
        }
    }
}
