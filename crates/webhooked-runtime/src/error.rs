//! Runtime error types

use http::StatusCode;
use webhooked_core::Error as CoreError;

/// Result type for runtime operations
pub type Result<T> = anyhow::Result<T>;

/// Runtime error (re-export anyhow for application-level errors)
pub type Error = anyhow::Error;

/// HTTP status answered for a failed request
pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::SecurityFailed => StatusCode::FORBIDDEN,
        CoreError::SpecNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
