//! `SessionMachine` (§4.1): a pure state-transition function. The actor in
//! [`crate::manager`] is the only thing that calls `apply` and is
//! responsible for acting on the returned effects; the machine itself never
//! touches I/O.

use std::collections::VecDeque;

use ac_protocol::events::SessionState;
use ac_protocol::model::{ApprovalDecision, ApprovalRequest, UsageDelta, UsageMetrics};
use chrono::{DateTime, Utc};

/// Inputs that drive a transition (§4.1).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    WorkspaceReady { workspace_path: String },
    WorkspaceFailed { error: String },
    ProviderStarted { pid: u32, version: Option<String> },
    ProviderFailed { error: String },
    ApprovalRequested { approval: ApprovalRequest },
    ApprovalResolved { approval_id: String, decision: ApprovalDecision },
    Pause,
    Resume,
    Stop { graceful: bool },
    ProviderExited { exit_code: i32 },
    Error { error: String },
    UsageTick { delta: UsageDelta },
    /// The zero-delay `CREATED -> PREPARING_WORKSPACE` guard (§4.1) and the
    /// 30s stuck-in-STOPPING timeout are both driven externally by the
    /// actor, through this event, since the pure machine has no clock.
    Tick { now: DateTime<Utc> },
}

/// A side effect the actor must carry out after a transition lands. The
/// machine only ever *describes* these; it never performs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestWorkspace,
    RequestProviderTermination,
    CleanupWorkspace,
    EmitSessionEnded,
}

/// The machine's full internal state (§4.1, §3 `SessionRuntimeState`).
#[derive(Debug, Clone)]
pub struct SessionMachine {
    pub state: SessionState,
    pub workspace_path: Option<String>,
    pub provider_pid: Option<u32>,
    pub provider_version: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub entered_stopping_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub pending_approvals: VecDeque<ApprovalRequest>,
    pub usage: UsageMetrics,
}

/// How long the machine tolerates STOPPING with no `PROVIDER_EXITED` before
/// forcing COMPLETED (§4.1, §4.9).
pub const STOPPING_TIMEOUT_SECS: i64 = 30;

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Created,
            workspace_path: None,
            provider_pid: None,
            provider_version: None,
            started_at: None,
            ended_at: None,
            entered_stopping_at: None,
            exit_code: None,
            error_message: None,
            pending_approvals: VecDeque::new(),
            usage: UsageMetrics::default(),
        }
    }

    /// Applies one event, mutating `self` in place and returning the effects
    /// the actor must now carry out, in order.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::Tick { now } => self.tick(now),
            SessionEvent::WorkspaceReady { workspace_path } => {
                if self.state != SessionState::PreparingWorkspace {
                    return Vec::new();
                }
                self.workspace_path = Some(workspace_path);
                self.state = SessionState::StartingProvider;
                Vec::new()
            }
            SessionEvent::WorkspaceFailed { error } => {
                if self.state != SessionState::PreparingWorkspace {
                    return Vec::new();
                }
                self.fail(error)
            }
            SessionEvent::ProviderStarted { pid, version } => {
                if self.state != SessionState::StartingProvider {
                    return Vec::new();
                }
                self.provider_pid = Some(pid);
                self.provider_version = version;
                self.started_at = Some(Utc::now());
                self.state = SessionState::Running;
                Vec::new()
            }
            SessionEvent::ProviderFailed { error } => {
                if self.state != SessionState::StartingProvider {
                    return Vec::new();
                }
                self.fail(error)
            }
            SessionEvent::ApprovalRequested { approval } => {
                if self.state != SessionState::Running {
                    return Vec::new();
                }
                self.pending_approvals.push_back(approval);
                self.usage.approvals_requested = self.usage.approvals_requested.saturating_add(1);
                self.state = SessionState::WaitingForApproval;
                Vec::new()
            }
            SessionEvent::ApprovalResolved { approval_id, decision } => {
                if self.state != SessionState::WaitingForApproval {
                    return Vec::new();
                }
                let found = self
                    .pending_approvals
                    .iter()
                    .position(|a| a.approval_id == approval_id);
                match (found, decision) {
                    (Some(idx), ApprovalDecision::Allow) => {
                        self.pending_approvals.remove(idx);
                        self.state = SessionState::Running;
                        Vec::new()
                    }
                    (Some(idx), ApprovalDecision::Deny) => {
                        self.pending_approvals.remove(idx);
                        self.error_message = Some("Approval denied by user".to_string());
                        self.entered_stopping_at = Some(Utc::now());
                        self.state = SessionState::Stopping;
                        vec![Effect::RequestProviderTermination]
                    }
                    (None, _) => Vec::new(),
                }
            }
            SessionEvent::Pause => {
                if !matches!(self.state, SessionState::Running | SessionState::WaitingForApproval) {
                    return Vec::new();
                }
                self.state = SessionState::PausedByHuman;
                Vec::new()
            }
            SessionEvent::Resume => {
                if self.state != SessionState::PausedByHuman {
                    return Vec::new();
                }
                self.state = SessionState::Running;
                Vec::new()
            }
            SessionEvent::Stop { graceful: _ } => {
                if !matches!(
                    self.state,
                    SessionState::Created
                        | SessionState::Running
                        | SessionState::WaitingForApproval
                        | SessionState::PausedByHuman
                ) {
                    return Vec::new();
                }
                self.entered_stopping_at = Some(Utc::now());
                self.state = SessionState::Stopping;
                vec![Effect::RequestProviderTermination]
            }
            SessionEvent::ProviderExited { exit_code } => {
                if !matches!(self.state, SessionState::Running | SessionState::Stopping) {
                    return Vec::new();
                }
                self.exit_code = Some(exit_code);
                self.ended_at = Some(Utc::now());
                self.state = SessionState::Completed;
                vec![Effect::CleanupWorkspace, Effect::EmitSessionEnded]
            }
            SessionEvent::Error { error } => {
                if self.state.is_terminal() {
                    return Vec::new();
                }
                self.fail(error)
            }
            SessionEvent::UsageTick { delta } => {
                if self.state != SessionState::Running {
                    return Vec::new();
                }
                self.usage.accumulate(delta);
                Vec::new()
            }
        }
    }

    fn tick(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.state == SessionState::Created {
            self.state = SessionState::PreparingWorkspace;
            return vec![Effect::RequestWorkspace];
        }
        if self.state == SessionState::Stopping {
            if let Some(entered) = self.entered_stopping_at {
                if (now - entered).num_seconds() >= STOPPING_TIMEOUT_SECS {
                    self.exit_code = None;
                    self.ended_at = Some(now);
                    self.state = SessionState::Completed;
                    return vec![Effect::CleanupWorkspace, Effect::EmitSessionEnded];
                }
            }
        }
        Vec::new()
    }

    fn fail(&mut self, error: String) -> Vec<Effect> {
        self.error_message = Some(error);
        self.ended_at = Some(Utc::now());
        self.state = SessionState::Failed;
        vec![Effect::CleanupWorkspace, Effect::EmitSessionEnded]
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ac_protocol::model::{ApprovalCategory, ApprovalRisk};

    fn approval(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            approval_id: id.to_string(),
            session_id: uuid::Uuid::new_v4(),
            category: ApprovalCategory::Merge,
            summary: "merge main".to_string(),
            risk: ApprovalRisk::Medium,
            context: serde_json::Value::Null,
            requested_at: Utc::now(),
            timeout_at: None,
        }
    }

    #[test]
    fn created_advances_to_preparing_workspace_on_tick() {
        let mut m = SessionMachine::new();
        let effects = m.apply(SessionEvent::Tick { now: Utc::now() });
        assert_eq!(m.state, SessionState::PreparingWorkspace);
        assert_eq!(effects, vec![Effect::RequestWorkspace]);
    }

    #[test]
    fn stop_before_first_tick_still_moves_to_stopping() {
        let mut m = SessionMachine::new();
        let effects = m.apply(SessionEvent::Stop { graceful: true });
        assert_eq!(m.state, SessionState::Stopping);
        assert!(effects.contains(&Effect::RequestProviderTermination));
    }

    #[test]
    fn full_happy_path_to_completed() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        assert_eq!(m.state, SessionState::StartingProvider);
        m.apply(SessionEvent::ProviderStarted { pid: 123, version: Some("1.0".into()) });
        assert_eq!(m.state, SessionState::Running);
        let effects = m.apply(SessionEvent::ProviderExited { exit_code: 0 });
        assert_eq!(m.state, SessionState::Completed);
        assert_eq!(m.exit_code, Some(0));
        assert!(effects.contains(&Effect::EmitSessionEnded));
    }

    #[test]
    fn workspace_failure_is_terminal() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        let effects = m.apply(SessionEvent::WorkspaceFailed { error: "clone failed".into() });
        assert_eq!(m.state, SessionState::Failed);
        assert_eq!(m.error_message.as_deref(), Some("clone failed"));
        assert!(effects.contains(&Effect::EmitSessionEnded));
    }

    #[test]
    fn approval_deny_moves_to_stopping_with_message() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        m.apply(SessionEvent::ProviderStarted { pid: 1, version: None });
        m.apply(SessionEvent::ApprovalRequested { approval: approval("a1") });
        assert_eq!(m.state, SessionState::WaitingForApproval);
        let effects = m.apply(SessionEvent::ApprovalResolved {
            approval_id: "a1".into(),
            decision: ApprovalDecision::Deny,
        });
        assert_eq!(m.state, SessionState::Stopping);
        assert_eq!(m.error_message.as_deref(), Some("Approval denied by user"));
        assert!(effects.contains(&Effect::RequestProviderTermination));
    }

    #[test]
    fn approval_allow_returns_to_running_and_drops_pending() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        m.apply(SessionEvent::ProviderStarted { pid: 1, version: None });
        m.apply(SessionEvent::ApprovalRequested { approval: approval("a1") });
        m.apply(SessionEvent::ApprovalResolved {
            approval_id: "a1".into(),
            decision: ApprovalDecision::Allow,
        });
        assert_eq!(m.state, SessionState::Running);
        assert!(m.pending_approvals.is_empty());
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        m.apply(SessionEvent::ProviderStarted { pid: 1, version: None });
        m.apply(SessionEvent::Pause);
        assert_eq!(m.state, SessionState::PausedByHuman);
        m.apply(SessionEvent::Resume);
        assert_eq!(m.state, SessionState::Running);
    }

    #[test]
    fn stopping_stall_forces_completed_after_timeout() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        m.apply(SessionEvent::ProviderStarted { pid: 1, version: None });
        let entered = Utc::now();
        m.apply(SessionEvent::Stop { graceful: true });
        let later = entered + chrono::Duration::seconds(STOPPING_TIMEOUT_SECS + 1);
        let effects = m.apply(SessionEvent::Tick { now: later });
        assert_eq!(m.state, SessionState::Completed);
        assert_eq!(m.exit_code, None);
        assert!(effects.contains(&Effect::EmitSessionEnded));
    }

    #[test]
    fn usage_tick_only_accumulates_while_running() {
        let mut m = SessionMachine::new();
        let delta = UsageDelta { agent_seconds: 5, terminal_kb: 1, files_touched: 2, commands_run: 1 };
        m.apply(SessionEvent::UsageTick { delta });
        assert_eq!(m.usage.agent_seconds, 0);

        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceReady { workspace_path: "/tmp/ws".into() });
        m.apply(SessionEvent::ProviderStarted { pid: 1, version: None });
        m.apply(SessionEvent::UsageTick { delta });
        assert_eq!(m.usage.agent_seconds, 5);
    }

    #[test]
    fn terminal_states_ignore_further_events() {
        let mut m = SessionMachine::new();
        m.apply(SessionEvent::Tick { now: Utc::now() });
        m.apply(SessionEvent::WorkspaceFailed { error: "x".into() });
        assert_eq!(m.state, SessionState::Failed);
        let effects = m.apply(SessionEvent::Pause);
        assert!(effects.is_empty());
        assert_eq!(m.state, SessionState::Failed);
    }
}
