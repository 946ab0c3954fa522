use uuid::Uuid;

/// Errors raised by the PTY Manager (§7).
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("pty session {0} already exists")]
    AlreadyExists(Uuid),

    #[error("no pty session found for {0}")]
    NotFound(Uuid),

    #[error("failed to spawn pty process: {0}")]
    Spawn(String),

    #[error("pty io error: {0}")]
    Io(String),
}
