//! `SessionManager` (§4.2): drives every local `ActiveSession` through a
//! dedicated per-session actor task, the same "one mpsc lane per session"
//! shape the teacher's `PiSessionManager` uses (command channel in, events
//! broadcast out), generalized from a single Pi process to the full
//! workspace/provider/approval/usage lifecycle of §4.1.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ac_protocol::events::{EventPayload, RunnerEvent, SessionState};
use ac_protocol::model::{
    ApprovalDecision, ApprovalRequest, RepoRef, SessionConfig, UsageDelta, WorkspaceRef,
};
use ac_pty::PtyEvent;
use ac_workspace::{CreateWorkspaceOptions, WorkspaceManager};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{ProviderAdapter, ProviderStartParams};
use crate::error::SessionError;
use crate::machine::{Effect, SessionEvent, SessionMachine};

/// §4.2 `getSessionState` return shape.
#[derive(Debug, Clone)]
pub struct SessionRuntimeState {
    pub session_id: Uuid,
    pub state: SessionState,
    pub workspace: Option<WorkspaceRef>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub provider_pid: Option<u32>,
    pub last_event_seq: u64,
    pub pending_approvals: Vec<ApprovalRequest>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_sessions: usize,
    pub usage_tick_interval: Duration,
    /// Window the manager lets consumers read final state for before the
    /// `ActiveSession` entry is dropped from the map (§4.2).
    pub removal_delay: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            usage_tick_interval: Duration::from_secs(5),
            removal_delay: Duration::from_secs(5),
        }
    }
}

enum ActorCommand {
    AttachAdapter(Arc<dyn ProviderAdapter>),
    Input(Vec<u8>),
    Pause,
    Resume,
    Stop(bool),
    ResolveApproval {
        approval_id: String,
        decision: ApprovalDecision,
        note: Option<String>,
    },
    GetState(oneshot::Sender<SessionRuntimeState>),
}

struct ActiveSession {
    cmd_tx: mpsc::Sender<ActorCommand>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

/// Drives every local session's lifecycle.
pub struct SessionManager {
    config: SessionManagerConfig,
    workspace: Arc<WorkspaceManager>,
    sessions: Arc<RwLock<HashMap<Uuid, ActiveSession>>>,
    event_tx: broadcast::Sender<RunnerEvent>,
    initialized: AtomicBool,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, workspace: Arc<WorkspaceManager>) -> Self {
        let (event_tx, _rx) = broadcast::channel(4096);
        Self {
            config,
            workspace,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            initialized: AtomicBool::new(false),
        }
    }

    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.workspace.initialize().await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Subscribes to the full `RunnerEvent` stream (§4.7) across all
    /// sessions this manager drives.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.event_tx.subscribe()
    }

    /// §4.2 `startSession`.
    pub async fn start_session(&self, config: SessionConfig) -> Result<SessionRuntimeState, SessionError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SessionError::NotInitialized);
        }

        let session_id = config.session_id;
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(&session_id) {
                return Err(SessionError::AlreadyExists(session_id));
            }
            if sessions.len() >= self.config.max_sessions {
                return Err(SessionError::SessionLimit(sessions.len()));
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let workspace = self.workspace.clone();
        let event_tx = self.event_tx.clone();
        let usage_tick_interval = self.config.usage_tick_interval;
        let removal_delay = self.config.removal_delay;
        let sessions_for_removal = self.sessions.clone();

        let actor_config = config.clone();
        let handle = tokio::spawn(async move {
            run_actor(actor_config, workspace, cmd_rx, event_tx, usage_tick_interval).await;
            // §4.2: let any in-flight consumer read final state before the
            // ActiveSession entry disappears from the map.
            tokio::time::sleep(removal_delay).await;
            sessions_for_removal.write().await.remove(&session_id);
        });

        self.sessions
            .write()
            .await
            .insert(session_id, ActiveSession { cmd_tx: cmd_tx.clone(), handle });

        info!(%session_id, "session started");

        let (tx, rx) = oneshot::channel();
        let _ = cmd_tx.send(ActorCommand::GetState(tx)).await;
        rx.await.map_err(|_| SessionError::NotFound(session_id))
    }

    /// §4.2 `setProviderAdapter`.
    pub async fn set_provider_adapter(
        &self,
        session_id: Uuid,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), SessionError> {
        self.send_command(session_id, ActorCommand::AttachAdapter(adapter)).await
    }

    /// §4.2 `sendInput`.
    pub async fn send_input(&self, session_id: Uuid, data: Vec<u8>) -> Result<(), SessionError> {
        self.send_command(session_id, ActorCommand::Input(data)).await
    }

    pub async fn pause_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.send_command(session_id, ActorCommand::Pause).await
    }

    pub async fn resume_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.send_command(session_id, ActorCommand::Resume).await
    }

    pub async fn stop_session(&self, session_id: Uuid, graceful: bool) -> Result<(), SessionError> {
        self.send_command(session_id, ActorCommand::Stop(graceful)).await
    }

    /// §4.2 `resolveApproval`.
    pub async fn resolve_approval(
        &self,
        session_id: Uuid,
        approval_id: String,
        decision: ApprovalDecision,
        note: Option<String>,
    ) -> Result<(), SessionError> {
        self.send_command(
            session_id,
            ActorCommand::ResolveApproval { approval_id, decision, note },
        )
        .await
    }

    /// §4.2 `getSessionState`.
    pub async fn get_session_state(&self, session_id: Uuid) -> Result<SessionRuntimeState, SessionError> {
        let cmd_tx = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&session_id)
                .map(|s| s.cmd_tx.clone())
                .ok_or(SessionError::NotFound(session_id))?
        };
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(ActorCommand::GetState(tx))
            .await
            .map_err(|_| SessionError::NotFound(session_id))?;
        rx.await.map_err(|_| SessionError::NotFound(session_id))
    }

    /// §4.2 `shutdown`: stop every session ungracefully and await each
    /// actor's task exit.
    pub async fn shutdown(&self) {
        let handles: Vec<(Uuid, mpsc::Sender<ActorCommand>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (*id, s.cmd_tx.clone())).collect()
        };
        for (session_id, cmd_tx) in handles {
            if cmd_tx.send(ActorCommand::Stop(false)).await.is_err() {
                debug!(%session_id, "session actor already gone during shutdown");
            }
        }
    }

    async fn send_command(&self, session_id: Uuid, cmd: ActorCommand) -> Result<(), SessionError> {
        let cmd_tx = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&session_id)
                .map(|s| s.cmd_tx.clone())
                .ok_or(SessionError::NotFound(session_id))?
        };
        cmd_tx.send(cmd).await.map_err(|_| SessionError::NotFound(session_id))
    }
}

/// Mutable actor-local bookkeeping, threaded through the select loop.
struct ActorState {
    machine: SessionMachine,
    last_state: SessionState,
    seq: AtomicU64,
    workspace_ref: Option<WorkspaceRef>,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    /// Bytes/commands observed since the last usage tick (§9.1 open question:
    /// usage deltas are real counters, not zero placeholders).
    pending_terminal_bytes: u64,
    pending_commands_run: u64,
}

impl ActorState {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self, session_id: Uuid) -> SessionRuntimeState {
        SessionRuntimeState {
            session_id,
            state: self.machine.state,
            workspace: self.workspace_ref.clone(),
            started_at: self.machine.started_at,
            provider_pid: self.machine.provider_pid,
            last_event_seq: self.seq.load(Ordering::SeqCst),
            pending_approvals: self.machine.pending_approvals.iter().cloned().collect(),
            error_message: self.machine.error_message.clone(),
            exit_code: self.machine.exit_code,
        }
    }
}

fn emit(
    event_tx: &broadcast::Sender<RunnerEvent>,
    state: &ActorState,
    session_id: Uuid,
    org_id: &str,
    repo_ref: &RepoRef,
    payload: EventPayload,
) {
    let event = RunnerEvent {
        session_id,
        org_id: org_id.to_string(),
        repo_ref: repo_ref.clone(),
        ts: Utc::now(),
        seq: state.next_seq(),
        payload,
    };
    // No receivers is not an error: the control-plane link may not be
    // connected yet, or this is a test harness.
    let _ = event_tx.send(event);
}

fn maybe_emit_state_changed(
    event_tx: &broadcast::Sender<RunnerEvent>,
    state: &mut ActorState,
    session_id: Uuid,
    org_id: &str,
    repo_ref: &RepoRef,
) {
    if state.machine.state != state.last_state {
        let previous = state.last_state;
        state.last_state = state.machine.state;
        emit(
            event_tx,
            state,
            session_id,
            org_id,
            repo_ref,
            EventPayload::SessionStateChanged { previous_state: previous, new_state: state.machine.state },
        );
    }
}

/// Applies `event`, reacting to every [`Effect`] the machine returns, in
/// order. This is the only place that calls `machine.apply` so the ordering
/// guarantee in §4.2 ("no interleaving of handlers for the same sessionId")
/// holds: the actor task is single-threaded with respect to its own state.
async fn react(
    event_tx: &broadcast::Sender<RunnerEvent>,
    state: &mut ActorState,
    session_id: Uuid,
    config: &SessionConfig,
    workspace: &Arc<WorkspaceManager>,
    event: SessionEvent,
) {
    let effects = state.machine.apply(event);
    maybe_emit_state_changed(event_tx, state, session_id, &config.org_id, &config.repo_ref);

    for effect in effects {
        match effect {
            Effect::RequestWorkspace => {
                let result = workspace
                    .create_workspace(
                        session_id,
                        config.repo_ref.clone(),
                        config.checkout.clone(),
                        CreateWorkspaceOptions {
                            read_only: false,
                            room_path: config.room_path.clone(),
                            token: None,
                        },
                    )
                    .await;
                match result {
                    Ok(workspace_ref) => {
                        state.workspace_ref = Some(workspace_ref.clone());
                        let sub_effects = state.machine.apply(SessionEvent::WorkspaceReady {
                            workspace_path: workspace_ref.worktree_path.to_string_lossy().to_string(),
                        });
                        maybe_emit_state_changed(event_tx, state, session_id, &config.org_id, &config.repo_ref);
                        for e in sub_effects {
                            react_effect(event_tx, state, session_id, config, workspace, e).await;
                        }
                    }
                    Err(err) => {
                        warn!(%session_id, err = %err, "workspace creation failed");
                        let sub_effects = state
                            .machine
                            .apply(SessionEvent::WorkspaceFailed { error: err.to_string() });
                        maybe_emit_state_changed(event_tx, state, session_id, &config.org_id, &config.repo_ref);
                        for e in sub_effects {
                            react_effect(event_tx, state, session_id, config, workspace, e).await;
                        }
                    }
                }
            }
            other => react_effect(event_tx, state, session_id, config, workspace, other).await,
        }
    }
}

async fn react_effect(
    event_tx: &broadcast::Sender<RunnerEvent>,
    state: &mut ActorState,
    session_id: Uuid,
    config: &SessionConfig,
    workspace: &Arc<WorkspaceManager>,
    effect: Effect,
) {
    match effect {
        Effect::RequestWorkspace => {
            // Only reached via a re-entrant Tick; not expected after the
            // initial request, but handled uniformly in `react` above.
        }
        Effect::RequestProviderTermination => {
            if let Some(adapter) = state.adapter.clone() {
                if let Err(err) = adapter.stop().await {
                    warn!(%session_id, err = %err, "provider stop failed");
                }
            }
        }
        Effect::CleanupWorkspace => {
            workspace.destroy_workspace(session_id).await;
        }
        Effect::EmitSessionEnded => {
            let duration_ms = match (state.machine.started_at, state.machine.ended_at) {
                (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
                _ => 0,
            };
            emit(
                event_tx,
                state,
                session_id,
                &config.org_id,
                &config.repo_ref,
                EventPayload::SessionEnded {
                    final_state: state.machine.state,
                    exit_code: state.machine.exit_code,
                    total_duration_ms: duration_ms,
                    total_usage: state.machine.usage,
                },
            );
        }
    }
}

async fn run_actor(
    config: SessionConfig,
    workspace: Arc<WorkspaceManager>,
    mut cmd_rx: mpsc::Receiver<ActorCommand>,
    event_tx: broadcast::Sender<RunnerEvent>,
    usage_tick_interval: Duration,
) {
    let session_id = config.session_id;
    let mut state = ActorState {
        machine: SessionMachine::new(),
        last_state: SessionState::Created,
        seq: AtomicU64::new(0),
        workspace_ref: None,
        adapter: None,
        pending_terminal_bytes: 0,
        pending_commands_run: 0,
    };

    react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::Tick { now: Utc::now() }).await;

    let mut provider_events: Option<broadcast::Receiver<ac_protocol::events::ProviderEvent>> = None;
    let mut pty_events: Option<broadcast::Receiver<PtyEvent>> = None;
    let mut usage_ticker = tokio::time::interval(usage_tick_interval);
    let mut clock_ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        if state.machine.state.is_terminal() {
            break;
        }

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(ActorCommand::AttachAdapter(adapter)) => {
                        provider_events = Some(adapter.subscribe_events());
                        let params = ProviderStartParams {
                            repo_path: state
                                .workspace_ref
                                .as_ref()
                                .map(|w| w.worktree_path.clone())
                                .unwrap_or_default(),
                            task: config.task.clone(),
                            policy: config.policy.clone(),
                            env: config.env.clone(),
                        };
                        let detection = adapter.detect().await;
                        match adapter.start_session(params).await {
                            Ok(pid) => {
                                pty_events = adapter.subscribe_pty().await;
                                let effects = state.machine.apply(SessionEvent::ProviderStarted {
                                    pid,
                                    version: detection.version,
                                });
                                emit(&event_tx, &state, session_id, &config.org_id, &config.repo_ref, EventPayload::SessionStarted {
                                    provider_id: config.provider_id.to_string(),
                                    provider_version: state.machine.provider_version.clone(),
                                    workspace_path: state
                                        .workspace_ref
                                        .as_ref()
                                        .map(|w| w.worktree_path.to_string_lossy().to_string())
                                        .unwrap_or_default(),
                                    room_path: config.room_path.clone(),
                                });
                                maybe_emit_state_changed(&event_tx, &mut state, session_id, &config.org_id, &config.repo_ref);
                                for e in effects {
                                    react_effect(&event_tx, &mut state, session_id, &config, &workspace, e).await;
                                }
                                state.adapter = Some(adapter);
                            }
                            Err(err) => {
                                warn!(%session_id, err = %err, "provider start failed");
                                react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::ProviderFailed { error: err.to_string() }).await;
                            }
                        }
                    }
                    Some(ActorCommand::Input(data)) => {
                        if let Some(adapter) = &state.adapter {
                            if let Err(err) = adapter.send_input(&data).await {
                                warn!(%session_id, err = %err, "send_input failed");
                            }
                        } else {
                            warn!(%session_id, "input dropped, no adapter attached");
                        }
                    }
                    Some(ActorCommand::Pause) => {
                        react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::Pause).await;
                    }
                    Some(ActorCommand::Resume) => {
                        react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::Resume).await;
                    }
                    Some(ActorCommand::Stop(graceful)) => {
                        react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::Stop { graceful }).await;
                    }
                    Some(ActorCommand::ResolveApproval { approval_id, decision, note }) => {
                        emit(&event_tx, &state, session_id, &config.org_id, &config.repo_ref, EventPayload::ApprovalResolved {
                            approval_id: approval_id.clone(),
                            decision,
                            note,
                        });
                        react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::ApprovalResolved { approval_id, decision }).await;
                    }
                    Some(ActorCommand::GetState(tx)) => {
                        let _ = tx.send(state.snapshot(session_id));
                    }
                }
            }
            Some(event) = recv_opt(&mut provider_events) => {
                handle_provider_event(&event_tx, &mut state, session_id, &config, &workspace, event).await;
            }
            Some(event) = recv_opt(&mut pty_events) => {
                match event {
                    PtyEvent::Data(chunk) => {
                        state.pending_terminal_bytes += chunk.data.len() as u64;
                        emit(&event_tx, &state, session_id, &config.org_id, &config.repo_ref, EventPayload::TerminalChunk {
                            data: String::from_utf8_lossy(&chunk.data).to_string(),
                            stream: ac_protocol::events::TerminalStream::Stdout,
                        });
                    }
                    PtyEvent::Exit(info) => {
                        react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::ProviderExited {
                            exit_code: info.exit_code.unwrap_or(-1),
                        }).await;
                        // §4.4 "on exit ... remove the session": drop the PTY's
                        // bookkeeping now that its exit has been observed and
                        // folded into the state machine.
                        if let Some(adapter) = state.adapter.clone() {
                            adapter.release().await;
                        }
                    }
                }
            }
            _ = usage_ticker.tick() => {
                if state.machine.state == SessionState::Running {
                    let delta = UsageDelta {
                        agent_seconds: usage_tick_interval.as_secs(),
                        terminal_kb: state.pending_terminal_bytes / 1024,
                        files_touched: 0,
                        commands_run: state.pending_commands_run,
                    };
                    state.pending_terminal_bytes = 0;
                    state.pending_commands_run = 0;
                    react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::UsageTick { delta }).await;
                    emit(&event_tx, &state, session_id, &config.org_id, &config.repo_ref, EventPayload::UsageTick {
                        provider_id: config.provider_id.to_string(),
                        units: delta.agent_seconds,
                        interval_ms: usage_tick_interval.as_millis() as u64,
                    });
                }
            }
            _ = clock_ticker.tick() => {
                react(&event_tx, &mut state, session_id, &config, &workspace, SessionEvent::Tick { now: Utc::now() }).await;
            }
        }
    }

    debug!(%session_id, final_state = ?state.machine.state, "session actor exiting");
}

async fn recv_opt<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Option<T> {
    match rx {
        Some(r) => match r.recv().await {
            Ok(v) => Some(v),
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
                None
            }
            Err(broadcast::error::RecvError::Lagged(_)) => None,
        },
        None => std::future::pending().await,
    }
}

async fn handle_provider_event(
    event_tx: &broadcast::Sender<RunnerEvent>,
    state: &mut ActorState,
    session_id: Uuid,
    config: &SessionConfig,
    workspace: &Arc<WorkspaceManager>,
    event: ac_protocol::events::ProviderEvent,
) {
    use ac_protocol::events::ProviderEvent as PE;
    use ac_protocol::model::{ApprovalRisk, ApprovalRequest as AR};

    match event {
        PE::RequestApproval { approval_id, category, summary, context, timeout_secs } => {
            let approval = AR {
                approval_id,
                session_id,
                category,
                summary,
                risk: ApprovalRisk::Medium,
                context,
                requested_at: Utc::now(),
                timeout_at: timeout_secs.map(|s| Utc::now() + chrono::Duration::seconds(s as i64)),
            };
            emit(
                event_tx,
                state,
                session_id,
                &config.org_id,
                &config.repo_ref,
                EventPayload::ApprovalRequested { approval: approval.clone() },
            );
            react(
                event_tx,
                state,
                session_id,
                config,
                workspace,
                SessionEvent::ApprovalRequested { approval },
            )
            .await;
        }
        PE::FileTouched { path, reason } => {
            emit(
                event_tx,
                state,
                session_id,
                &config.org_id,
                &config.repo_ref,
                EventPayload::FileTouched { path, reason, room_path: config.room_path.clone() },
            );
            if state.machine.state == SessionState::Running {
                state.machine.usage.files_touched = state.machine.usage.files_touched.saturating_add(1);
            }
        }
        PE::DiffSummary { files_changed, lines_added, lines_removed, files } => {
            emit(
                event_tx,
                state,
                session_id,
                &config.org_id,
                &config.repo_ref,
                EventPayload::DiffSummary { files_changed, lines_added, lines_removed, files },
            );
        }
        PE::ToolUse { .. } => {
            if state.machine.state == SessionState::Running {
                state.pending_commands_run += 1;
            }
            // Forwarded verbatim as a provider-event-forwarded payload at the
            // control-plane boundary (§4.6 "forwards all others as
            // PROVIDER_EVENT_FORWARDED"); left to ac-providers/ac-control.
        }
        PE::Thought { .. } | PE::Info { .. } | PE::Error { .. } => {
            // Forwarded verbatim as provider-event-forwarded payloads at the
            // control-plane boundary; left to ac-providers/ac-control to
            // wrap (§4.6 "forwards all others as PROVIDER_EVENT_FORWARDED").
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_protocol::model::{CheckoutSpec, ProviderId, RepoRef, Task};
    use ac_workspace::WorkspaceManagerConfig;

    fn test_config(session_id: Uuid, repo_path: std::path::PathBuf) -> SessionConfig {
        SessionConfig {
            session_id,
            org_id: "org1".to_string(),
            user_id: None,
            provider_id: ProviderId::Codex,
            repo_ref: RepoRef::Local { path: repo_path, name: None },
            checkout: CheckoutSpec::Branch { r#ref: "main".to_string() },
            room_path: None,
            task: Task { title: "t".into(), goal: "g".into(), ..Default::default() },
            policy: Default::default(),
            billing: Default::default(),
            env: Default::default(),
            metadata: Default::default(),
        }
    }

    fn init_local_repo(dir: &std::path::Path) -> String {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        repo.head().unwrap().shorthand().unwrap().to_string()
    }

    #[tokio::test]
    async fn start_session_reaches_starting_provider_without_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        let branch = init_local_repo(&repo_dir);

        let workspace = Arc::new(WorkspaceManager::new(WorkspaceManagerConfig {
            base_dir: tmp.path().join("base"),
            cache_dir: tmp.path().join("cache"),
            ..Default::default()
        }));
        let manager = SessionManager::new(SessionManagerConfig::default(), workspace);
        manager.initialize().await.unwrap();

        let session_id = Uuid::new_v4();
        let mut config = test_config(session_id, repo_dir);
        config.checkout = CheckoutSpec::Branch { r#ref: branch };

        let mut events = manager.subscribe();
        let runtime = manager.start_session(config).await.unwrap();
        assert_eq!(runtime.session_id, session_id);

        let mut saw_starting_provider = false;
        for _ in 0..20 {
            if let Ok(ev) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                if let Ok(ev) = ev {
                    if let EventPayload::SessionStateChanged { new_state, .. } = ev.payload {
                        if new_state == SessionState::StartingProvider {
                            saw_starting_provider = true;
                            break;
                        }
                    }
                }
            } else {
                break;
            }
        }
        assert!(saw_starting_provider, "expected workspace creation to reach StartingProvider");

        manager.stop_session(session_id, false).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Arc::new(WorkspaceManager::new(WorkspaceManagerConfig {
            base_dir: tmp.path().join("base"),
            cache_dir: tmp.path().join("cache"),
            ..Default::default()
        }));
        let manager = SessionManager::new(SessionManagerConfig::default(), workspace);
        manager.initialize().await.unwrap();

        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        init_local_repo(&repo_dir);

        let session_id = Uuid::new_v4();
        let config = test_config(session_id, repo_dir);
        manager.start_session(config.clone()).await.unwrap();
        let err = manager.start_session(config).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
        manager.stop_session(session_id, false).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_operations_fail_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Arc::new(WorkspaceManager::new(WorkspaceManagerConfig {
            base_dir: tmp.path().join("base"),
            cache_dir: tmp.path().join("cache"),
            ..Default::default()
        }));
        let manager = SessionManager::new(SessionManagerConfig::default(), workspace);
        manager.initialize().await.unwrap();

        let err = manager.pause_session(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
