use std::error::Error as StdError;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::dto::{
    auth::{Admission, RegisterRequest},
    gameplay::{ActivityRequest, AnswerResponse, CodeResponse, LevelContent, SubmitAnswerRequest},
    status::StatusResponse,
};

pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of a single server round-trip, classified for the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure; retry later.
    #[error("server unreachable: {message}")]
    Transport {
        message: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// 401: token rejected, expired or superseded by another login.
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },
    /// 403: banned player, or session not accepting submissions.
    #[error("forbidden: {detail}")]
    Forbidden { detail: String },
    /// 409: username already active on another device.
    #[error("conflict: {detail}")]
    Conflict { detail: String },
    #[error("not found: {detail}")]
    NotFound { detail: String },
    /// Any other non-success status.
    #[error("`{path}` answered {status}: {detail}")]
    Status {
        path: String,
        status: u16,
        detail: String,
    },
    #[error("failed to decode response from `{path}`")]
    Decode {
        path: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// Request rejected locally before being sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ApiError::Transport {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Whether the credential must be discarded after this failure.
    ///
    /// Only meaningful for token validation. During gameplay a 403 means the
    /// session is not accepting submissions and the credential stays valid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. } | ApiError::Forbidden { .. } | ApiError::NotFound { .. }
        )
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport { .. } | ApiError::Decode { .. } => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Server endpoints consumed by the client runtime.
pub trait ServerApi: Send + Sync {
    fn register(&self, request: RegisterRequest) -> BoxFuture<'static, ApiResult<Admission>>;
    fn validate(&self, token: String) -> BoxFuture<'static, ApiResult<Admission>>;
    fn status(&self) -> BoxFuture<'static, ApiResult<StatusResponse>>;
    fn level_content(
        &self,
        level: u32,
        path: Option<String>,
    ) -> BoxFuture<'static, ApiResult<LevelContent>>;
    fn submit_answer(
        &self,
        token: String,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, ApiResult<AnswerResponse>>;
    fn submit_code(&self, token: String, code: String) -> BoxFuture<'static, ApiResult<CodeResponse>>;
    fn heartbeat(&self, token: String) -> BoxFuture<'static, ApiResult<()>>;
    fn log_activity(
        &self,
        token: String,
        request: ActivityRequest,
    ) -> BoxFuture<'static, ApiResult<()>>;
}
