//! `SessionHandler` (§2, §6): the Control Plane's session registry.
//!
//! Unlike `ac_session::SessionManager` (which actually drives a session's
//! PTY/provider/workspace lifecycle on a runner host) this handler only
//! tracks *where* a session lives and its last-known state, forwarding
//! commands to the assigned runner's open link and updating its cached
//! summary as `RunnerEvent`s arrive over that link (§4.7).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use ac_protocol::events::{EventPayload, RunnerEvent, SessionState};
use ac_protocol::model::{ApprovalDecision, ApprovalRequest, SessionConfig};
use ac_protocol::runner::BackendToRunner;

use crate::error::ApiError;
use crate::runner_link::RunnerLinkRegistry;
use crate::runner_registry::RunnerHandler;

/// What `GET /runner/sessions/{id}` returns: the Control Plane's view of a
/// session, reconstructed from the event stream rather than held live (the
/// runner, not the control plane, owns the authoritative `ActiveSession`).
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub runner_id: String,
    pub agent_id: Option<String>,
    pub village_id: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_event_seq: u64,
    pub pending_approvals: Vec<ApprovalRequest>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
}

struct SessionRecord {
    config: SessionConfig,
    runner_id: String,
    summary: SessionSummary,
}

pub struct SessionHandler {
    sessions: DashMap<Uuid, SessionRecord>,
    runners: std::sync::Arc<RunnerHandler>,
    links: std::sync::Arc<RunnerLinkRegistry>,
}

impl SessionHandler {
    pub fn new(runners: std::sync::Arc<RunnerHandler>, links: std::sync::Arc<RunnerLinkRegistry>) -> Self {
        Self { sessions: DashMap::new(), runners, links }
    }

    /// §6 `POST /runner/sessions`: validates, selects a runner, assigns and
    /// forwards a `StartSession` frame. 400/409 map onto `ApiError` per the
    /// caller's HTTP layer.
    pub async fn create_session(&self, config: SessionConfig) -> Result<(Uuid, Option<String>), ApiError> {
        config.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let provider_id = config.provider_id.to_string();
        let runner = self
            .runners
            .select_runner(&provider_id)
            .ok_or_else(|| ApiError::SessionLimit(format!("no runner available for provider {provider_id}")))?;

        let session_id = config.session_id;
        let agent_id = config.agent_id().map(str::to_string);
        let village_id = config.village_id().map(str::to_string);

        self.runners.assign_session(&runner.runner_id, session_id)?;

        let summary = SessionSummary {
            session_id,
            runner_id: runner.runner_id.clone(),
            agent_id: agent_id.clone(),
            village_id,
            state: SessionState::Created,
            created_at: Utc::now(),
            last_event_seq: 0,
            pending_approvals: Vec::new(),
            error_message: None,
            exit_code: None,
        };
        self.sessions.insert(
            session_id,
            SessionRecord { config: config.clone(), runner_id: runner.runner_id.clone(), summary },
        );

        self.links
            .send(&runner.runner_id, BackendToRunner::StartSession { config: Box::new(config) })
            .await?;

        Ok((session_id, agent_id))
    }

    pub fn get_session(&self, session_id: Uuid) -> Result<SessionSummary, ApiError> {
        self.sessions
            .get(&session_id)
            .map(|r| r.summary.clone())
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))
    }

    pub async fn send_input(&self, session_id: Uuid, data: String) -> Result<(), ApiError> {
        let runner_id = self.runner_id_for(session_id)?;
        self.links.send(&runner_id, BackendToRunner::Input { session_id, data }).await
    }

    pub async fn stop_session(&self, session_id: Uuid, graceful: bool) -> Result<(), ApiError> {
        let runner_id = self.runner_id_for(session_id)?;
        self.links.send(&runner_id, BackendToRunner::Stop { session_id, graceful }).await
    }

    pub async fn resolve_approval(
        &self,
        session_id: Uuid,
        approval_id: String,
        decision: ApprovalDecision,
        note: Option<String>,
    ) -> Result<(), ApiError> {
        let runner_id = self.runner_id_for(session_id)?;
        self.links
            .send(&runner_id, BackendToRunner::ResolveApproval { session_id, approval_id, decision, note })
            .await
    }

    fn runner_id_for(&self, session_id: Uuid) -> Result<String, ApiError> {
        self.sessions
            .get(&session_id)
            .map(|r| r.runner_id.clone())
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))
    }

    /// Updates the cached summary from an inbound `RunnerEvent` (§4.7) and
    /// returns `{agent_id, village_id}` so the `EventRouter` can compute fan-out
    /// subjects without re-reading the full `SessionConfig`.
    pub fn observe_event(&self, event: &RunnerEvent) -> (Option<String>, Option<String>) {
        let Some(mut record) = self.sessions.get_mut(&event.session_id) else {
            return (None, None);
        };
        record.summary.last_event_seq = event.seq;
        match &event.payload {
            EventPayload::SessionStateChanged { new_state, .. } => record.summary.state = *new_state,
            EventPayload::ApprovalRequested { approval } => record.summary.pending_approvals.push(approval.clone()),
            EventPayload::ApprovalResolved { approval_id, .. } => {
                record.summary.pending_approvals.retain(|a| &a.approval_id != approval_id)
            }
            EventPayload::SessionEnded { final_state, exit_code, .. } => {
                record.summary.state = *final_state;
                record.summary.exit_code = *exit_code;
            }
            _ => {}
        }
        (record.summary.agent_id.clone(), record.summary.village_id.clone())
    }

    /// Releases the session's claim on its runner once it reaches a terminal
    /// state; the record itself is kept so `get_session` can still answer
    /// after completion (mirrors the runner-local removal delay of §4.2, but
    /// unbounded here since the control plane has no memory pressure from it).
    pub fn release_if_terminal(&self, session_id: Uuid) {
        let Some(record) = self.sessions.get(&session_id) else { return };
        if record.summary.state.is_terminal() {
            let runner_id = record.runner_id.clone();
            drop(record);
            let _ = self.runners.release_session(&runner_id, session_id);
        }
    }

    pub fn configs_by_runner(&self, runner_id: &str) -> Vec<SessionConfig> {
        self.sessions
            .iter()
            .filter(|e| e.runner_id == runner_id)
            .map(|e| e.config.clone())
            .collect()
    }
}
