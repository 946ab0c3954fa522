//! `RunnerService`: wires `WorkspaceManager`, `PtyManager`, and
//! `SessionManager` together and tracks which provider each locally-running
//! session was started with, so the runner link can build heartbeat
//! telemetry and dispatch `StartSession` to the right `ProviderAdapter`.

use std::collections::HashMap;
use std::sync::Arc;

use ac_protocol::events::RunnerEvent;
use ac_protocol::model::{ApprovalDecision, ProviderId, RunnerLoad, SessionConfig};
use ac_protocol::runner::SessionTelemetry;
use ac_pty::PtyManager;
use ac_session::{SessionManager, SessionManagerConfig};
use ac_workspace::WorkspaceManager;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::providers::build_adapter;

pub struct RunnerService {
    session_manager: Arc<SessionManager>,
    pty: Arc<PtyManager>,
    /// `session_id -> provider_id`, tracked only so heartbeats can report
    /// `{session_id, provider_id, state}` without threading the config
    /// through every call site (§6.1 `Heartbeat`).
    providers_by_session: RwLock<HashMap<Uuid, ProviderId>>,
}

impl RunnerService {
    pub fn new(config: &RunnerConfig) -> Self {
        let workspace = Arc::new(WorkspaceManager::new(config.workspace_manager_config()));
        let session_manager = Arc::new(SessionManager::new(
            SessionManagerConfig { max_sessions: config.max_sessions, ..Default::default() },
            workspace,
        ));
        Self {
            session_manager,
            pty: Arc::new(PtyManager::new()),
            providers_by_session: RwLock::new(HashMap::new()),
        }
    }

    pub async fn initialize(&self) -> Result<(), RunnerError> {
        self.pty.initialize().await?;
        self.session_manager.initialize().await?;
        Ok(())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RunnerEvent> {
        self.session_manager.subscribe()
    }

    /// §4.2 `startSession` plus adapter attachment. A provider this runner
    /// doesn't recognize still creates the session record (so the control
    /// plane can observe the failure) but is stopped immediately.
    pub async fn start_session(&self, config: SessionConfig) -> Result<(), RunnerError> {
        let session_id = config.session_id;
        let provider_id = config.provider_id.clone();
        self.session_manager.start_session(config).await?;
        self.providers_by_session.write().await.insert(session_id, provider_id.clone());

        match build_adapter(&provider_id, self.pty.clone(), session_id) {
            Some(adapter) => {
                self.session_manager.set_provider_adapter(session_id, adapter).await?;
                Ok(())
            }
            None => {
                warn!(%session_id, %provider_id, "unsupported provider, stopping session");
                self.session_manager.stop_session(session_id, false).await?;
                Err(RunnerError::UnsupportedProvider(provider_id.to_string()))
            }
        }
    }

    pub async fn send_input(&self, session_id: Uuid, data: String) -> Result<(), RunnerError> {
        self.session_manager.send_input(session_id, data.into_bytes()).await.map_err(Into::into)
    }

    pub async fn pause(&self, session_id: Uuid) -> Result<(), RunnerError> {
        self.session_manager.pause_session(session_id).await.map_err(Into::into)
    }

    pub async fn resume(&self, session_id: Uuid) -> Result<(), RunnerError> {
        self.session_manager.resume_session(session_id).await.map_err(Into::into)
    }

    pub async fn stop(&self, session_id: Uuid, graceful: bool) -> Result<(), RunnerError> {
        self.session_manager.stop_session(session_id, graceful).await.map_err(Into::into)
    }

    pub async fn resolve_approval(
        &self,
        session_id: Uuid,
        approval_id: String,
        decision: ApprovalDecision,
        note: Option<String>,
    ) -> Result<(), RunnerError> {
        self.session_manager.resolve_approval(session_id, approval_id, decision, note).await.map_err(Into::into)
    }

    /// §4.9 `drain`: stop accepting new sessions is the caller's
    /// responsibility (the link loop checks a flag before dispatching
    /// `StartSession`); existing sessions are left to finish naturally.
    pub async fn shutdown(&self) {
        self.session_manager.shutdown().await;
    }

    /// Builds the `Heartbeat` payload's session telemetry and drops
    /// bookkeeping for any session that has reached a terminal state.
    pub async fn heartbeat_telemetry(&self) -> (RunnerLoad, Vec<SessionTelemetry>) {
        let tracked: Vec<(Uuid, ProviderId)> = {
            let map = self.providers_by_session.read().await;
            map.iter().map(|(id, p)| (*id, p.clone())).collect()
        };

        let mut telemetry = Vec::with_capacity(tracked.len());
        let mut terminal = Vec::new();
        for (session_id, provider_id) in tracked {
            match self.session_manager.get_session_state(session_id).await {
                Ok(state) => {
                    if state.state.is_terminal() {
                        terminal.push(session_id);
                    }
                    telemetry.push(SessionTelemetry {
                        session_id,
                        provider_id: provider_id.to_string(),
                        state: state.state,
                    });
                }
                Err(_) => terminal.push(session_id),
            }
        }

        if !terminal.is_empty() {
            let mut map = self.providers_by_session.write().await;
            for session_id in &terminal {
                map.remove(session_id);
            }
        }

        let load = RunnerLoad {
            active_sessions: telemetry.iter().filter(|t| !t.state.is_terminal()).count() as u32,
            cpu_percent: 0.0,
            mem_percent: 0.0,
            disk_percent: 0.0,
        };
        (load, telemetry)
    }
}

impl std::fmt::Debug for RunnerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerService").finish_non_exhaustive()
    }
}
