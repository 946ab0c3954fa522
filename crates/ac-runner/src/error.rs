use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Session(#[from] ac_session::SessionError),

    #[error(transparent)]
    Pty(#[from] ac_pty::PtyError),

    #[error(transparent)]
    Workspace(#[from] ac_workspace::WorkspaceError),

    #[error("provider {0} has no registered adapter")]
    UnsupportedProvider(String),

    #[error("control plane link error: {0}")]
    Link(String),
}
