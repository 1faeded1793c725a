//! Typed error taxonomy for the repository engine.
//!
//! Every fallible operation in the core returns [`StoreError`] rather than
//! a bag of strings, so the REST surface can map failures to HTTP status
//! codes without guessing at message contents.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("repository does not exist: {0}")]
    RepoDoesNotExist(String),

    #[error("invalid branch: {0}")]
    InvalidBranch(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("optimistic concurrency check failed")]
    OptimisticConcurrency,

    #[error("another transaction is in progress on this repository")]
    Locked,

    #[error("file exceeds the {0} byte read limit")]
    FileTooLarge(u64),

    #[error("path does not refer to a blob")]
    NotABlob,

    #[error("unsupported config value type for {0:?}")]
    BadConfigValue(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("{0}")]
    Generic(String),
}

impl StoreError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            StoreError::RepoDoesNotExist(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidBranch(_) => StatusCode::NOT_FOUND,
            StoreError::FileNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::RevisionNotFound(_) => StatusCode::BAD_REQUEST,
            StoreError::OptimisticConcurrency => StatusCode::PRECONDITION_FAILED,
            StoreError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            // Not in the documented mapping table: falls through to the
            // "all other errors" 500 case rather than inventing a status.
            StoreError::Locked
            | StoreError::FileTooLarge(_)
            | StoreError::NotABlob
            | StoreError::BadConfigValue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Generic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        log::debug!("mapping {self} to HTTP {status}");
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                status_code: status.as_u16(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Conversion for the rare case a git2 operation fails in a way that doesn't
/// fit a more specific variant (pool exhaustion, object-database corruption
/// etc). Kept last in line, deliberately: callers should prefer mapping git2
/// errors to a specific variant (`InvalidBranch`, `RevisionNotFound`, ...)
/// wherever the error class is known.
impl From<git2::Error> for StoreError {
    fn from(e: git2::Error) -> Self {
        StoreError::Generic(e.message().to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Generic(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
