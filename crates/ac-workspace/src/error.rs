use uuid::Uuid;

/// Errors raised by the Workspace Manager (§7: mostly *Transient*, turned
/// into `WORKSPACE_FAILED` by the session state machine).
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(String),

    #[error("unsupported repo provider for non-local clone")]
    UnsupportedProvider,

    #[error("invalid repo reference: {0}")]
    InvalidRepoRef(String),

    #[error("checkout ref not found, even after fetching from origin: {0}")]
    RefNotFound(String),

    #[error("no workspace found for session {0}")]
    NotFound(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<git2::Error> for WorkspaceError {
    fn from(e: git2::Error) -> Self {
        WorkspaceError::Git(e.to_string())
    }
}
