//! The `ProviderAdapter` contract (§4.6). Concrete adapters (Codex, Claude
//! Code) live in the `ac-providers` crate, which depends on this one;
//! keeping the trait here lets `SessionManager` depend on it without
//! depending on any concrete provider.

use std::collections::HashMap;
use std::path::PathBuf;

use ac_protocol::events::ProviderEvent;
use ac_protocol::model::{PolicySpec, ProviderId, Task};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SessionError;

#[derive(Debug, Clone, Default)]
pub struct ProviderDetection {
    pub installed: bool,
    pub version: Option<String>,
}

/// Inputs to [`ProviderAdapter::start_session`]. Owned rather than borrowed
/// so the trait stays object-safe and usable behind `Arc<dyn ProviderAdapter>`
/// from an async actor loop.
#[derive(Debug, Clone)]
pub struct ProviderStartParams {
    pub repo_path: PathBuf,
    pub task: Task,
    pub policy: PolicySpec,
    pub env: HashMap<String, String>,
}

/// A narrow contract any concrete coding-agent harness implements (§4.6).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    async fn detect(&self) -> ProviderDetection;

    /// Launches the provider process (typically under the PTY manager) and
    /// returns its OS pid.
    async fn start_session(&self, params: ProviderStartParams) -> Result<u32, SessionError>;

    /// Writes to the provider's input stream.
    async fn send_input(&self, data: &[u8]) -> Result<(), SessionError>;

    /// Requests graceful shutdown. Must eventually cause a `PtyEvent::Exit`
    /// to appear on [`ProviderAdapter::subscribe_pty`].
    async fn stop(&self) -> Result<(), SessionError>;

    /// High-level, provider-agnostic events (§4.6): thoughts, tool use,
    /// approval requests, diff summaries, info/error.
    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Raw PTY byte chunks and the eventual exit, for `TERMINAL_CHUNK`
    /// forwarding and driving `PROVIDER_EXITED`. `None` until
    /// [`ProviderAdapter::start_session`] has spawned the underlying PTY.
    async fn subscribe_pty(&self) -> Option<broadcast::Receiver<ac_pty::PtyEvent>>;

    /// Drops the underlying PTY session's bookkeeping once the actor has
    /// observed its exit (§4.4 "on exit ... remove the session"). A no-op if
    /// the PTY was never spawned or was already removed.
    async fn release(&self);
}
