use uuid::Uuid;

/// Errors raised by the `SessionManager` (§7, §4.2 preconditions).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session manager is not initialized")]
    NotInitialized,

    #[error("session limit reached ({0} active)")]
    SessionLimit(usize),

    #[error("session {0} already exists")]
    AlreadyExists(Uuid),

    #[error("no session found for {0}")]
    NotFound(Uuid),

    #[error("session {0} has no attached provider adapter")]
    NoAdapter(Uuid),

    #[error(transparent)]
    Workspace(#[from] ac_workspace::WorkspaceError),

    #[error(transparent)]
    Pty(#[from] ac_pty::PtyError),

    #[error("provider error: {0}")]
    Provider(String),
}
