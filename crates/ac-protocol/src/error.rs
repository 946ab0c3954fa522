//! Shared error taxonomy (§7). Each crate boundary defines its own
//! `thiserror` enum and maps it onto the kinds here where it crosses into
//! the HTTP-facing API (§6) or the runner wire protocol.

use serde::{Deserialize, Serialize};

/// A kind from the taxonomy of §7, independent of where it originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    SessionLimit,
    RunnerLimitExceeded,
    RunnerNotFound,
    RunnerHasActiveSessions,
    UnsupportedProvider,
    InternalError,
}

/// Validation-level errors raised while constructing or checking the data
/// model of §3. Distinct from the richer per-crate error enums so that
/// `ac-protocol` itself stays dependency-free of tokio/axum/git2.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) => ErrorCode::BadRequest,
        }
    }
}
