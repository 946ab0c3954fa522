//! Wire DTOs for the §6 HTTP/JSON API. Kept separate from the domain types
//! in `ac_protocol::model` because the request body's field names
//! (`villageId`, `agentName`, ...) and optionality don't match `SessionConfig`
//! 1:1 — `org_id` in particular is resolved from a header rather than the
//! body since multi-tenant auth is out of scope (spec.md §1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ac_protocol::model::{
    ApprovalDecision, BillingRef, CheckoutSpec, PolicySpec, ProviderId, RepoRef, SessionConfig, Task,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    #[serde(default)]
    pub village_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    pub provider_id: ProviderId,
    pub repo_ref: RepoRef,
    #[serde(default)]
    pub checkout: Option<CheckoutSpec>,
    #[serde(default)]
    pub room_path: Option<String>,
    pub task: Task,
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CreateSessionBody {
    /// Builds the immutable `SessionConfig` the runner will receive. The
    /// `agentId` the response echoes back is the provided `agentName` or,
    /// absent that, the freshly minted `sessionId` (§6: the response always
    /// carries an `agentId`, so one is synthesized when the caller omits it).
    pub fn into_session_config(self, org_id: String) -> SessionConfig {
        let session_id = Uuid::new_v4();
        let agent_id = self.agent_name.clone().unwrap_or_else(|| session_id.to_string());
        let mut metadata = HashMap::new();
        metadata.insert("agent_id".to_string(), agent_id);
        if let Some(village_id) = self.village_id {
            metadata.insert("village_id".to_string(), village_id);
        }
        SessionConfig {
            session_id,
            org_id,
            user_id: None,
            provider_id: self.provider_id,
            repo_ref: self.repo_ref,
            checkout: self.checkout.unwrap_or(CheckoutSpec::Branch { r#ref: "HEAD".to_string() }),
            room_path: self.room_path,
            task: self.task,
            policy: self.policy,
            billing: BillingRef::default(),
            env: self.env,
            metadata,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    pub data: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct StopBody {
    #[serde(default)]
    pub graceful: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalBody {
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl Default for OkResponse {
    fn default() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRuntimeStateBody {
    pub session_id: Uuid,
    pub runner_id: String,
    pub agent_id: Option<String>,
    pub village_id: Option<String>,
    pub state: ac_protocol::events::SessionState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_event_seq: u64,
    pub pending_approvals: Vec<ac_protocol::model::ApprovalRequest>,
    pub exit_code: Option<i32>,
}

impl From<crate::session_registry::SessionSummary> for SessionRuntimeStateBody {
    fn from(s: crate::session_registry::SessionSummary) -> Self {
        Self {
            session_id: s.session_id,
            runner_id: s.runner_id,
            agent_id: s.agent_id,
            village_id: s.village_id,
            state: s.state,
            created_at: s.created_at,
            last_event_seq: s.last_event_seq,
            pending_approvals: s.pending_approvals,
            exit_code: s.exit_code,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRunnerBody {
    pub hostname: String,
    pub capabilities: ac_protocol::model::RunnerCapabilities,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRunnerResponse {
    pub runner_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    #[serde(default)]
    pub active_sessions: Vec<Uuid>,
    #[serde(default)]
    pub load: ac_protocol::model::RunnerLoad,
    #[serde(default)]
    pub runtime_versions: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListRunnersQuery {
    pub status: Option<ac_protocol::model::RunnerStatus>,
    pub provider_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerListResponse {
    pub runners: Vec<crate::runner_registry::StoredRunner>,
}
