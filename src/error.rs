use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, services::api::ApiError};

/// Errors returned by session controller operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// This tab lost arbitration; every operation is refused.
    #[error("another tab is driving this session")]
    Blocked,
    /// No credential is loaded.
    #[error("not signed in")]
    SignedOut,
    /// Operation does not apply to the current screen.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Invalid input provided by the player.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The server is not accepting gameplay for the current session.
    #[error("session is not running")]
    SessionInactive,
    /// The credential was rejected and has been cleared.
    #[error("credential rejected by the server")]
    Unauthorized,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidationErrors> for SessionError {
    fn from(err: ValidationErrors) -> Self {
        SessionError::InvalidInput(format!("validation failed: {}", err))
    }
}
