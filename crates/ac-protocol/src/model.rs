//! Core data model (§3): the types that describe a session request and its
//! runtime state, shared verbatim between the Control Plane and the
//! Execution Plane.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Which code-hosting provider a [`RepoRef`] resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingProvider {
    Github,
    Gitlab,
    Bitbucket,
    Local,
}

/// A reference to a source repository.
///
/// Either a hosted repo identified by `{provider, owner, name}`, or a local
/// checkout identified by an existing filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum RepoRef {
    Github {
        owner: String,
        name: String,
        #[serde(default)]
        default_branch: Option<String>,
    },
    Gitlab {
        owner: String,
        name: String,
        #[serde(default)]
        default_branch: Option<String>,
    },
    Bitbucket {
        owner: String,
        name: String,
        #[serde(default)]
        default_branch: Option<String>,
    },
    Local {
        path: PathBuf,
        #[serde(default)]
        name: Option<String>,
    },
}

impl RepoRef {
    /// The cache key used by the workspace manager's clone cache:
    /// `{provider}-{owner}-{name}` (§4.3).
    pub fn cache_key(&self) -> String {
        match self {
            RepoRef::Github { owner, name, .. } => format!("github-{owner}-{name}"),
            RepoRef::Gitlab { owner, name, .. } => format!("gitlab-{owner}-{name}"),
            RepoRef::Bitbucket { owner, name, .. } => format!("bitbucket-{owner}-{name}"),
            RepoRef::Local { path, .. } => {
                format!("local-{}", path.to_string_lossy().replace('/', "_"))
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RepoRef::Local { .. })
    }

    /// The hosted provider's declared default branch, when known. `Local`
    /// repos have no notion of a remote default branch.
    pub fn default_branch(&self) -> Option<&str> {
        match self {
            RepoRef::Github { default_branch, .. }
            | RepoRef::Gitlab { default_branch, .. }
            | RepoRef::Bitbucket { default_branch, .. } => default_branch.as_deref(),
            RepoRef::Local { .. } => None,
        }
    }

    /// Validates the invariant that a local repo's path must exist on disk.
    pub fn validate(&self) -> Result<(), Error> {
        if let RepoRef::Local { path, .. } = self {
            if !path.exists() {
                return Err(Error::Validation(format!(
                    "local repo path does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Exactly one checkout target variant (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutSpec {
    Branch { r#ref: String },
    Commit { sha: String },
    Tag { tag: String },
}

impl CheckoutSpec {
    /// The literal git revision this checkout resolves to, for a fresh
    /// clone/fetch (resolved relative to `origin`).
    pub fn revision(&self) -> &str {
        match self {
            CheckoutSpec::Branch { r#ref } => r#ref,
            CheckoutSpec::Commit { sha } => sha,
            CheckoutSpec::Tag { tag } => tag,
        }
    }
}

/// Network egress mode enforced by the [`PolicySpec`] (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    #[default]
    Restricted,
    Open,
}

/// Actions that require human approval before a provider may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalCategory {
    Merge,
    DepsAdd,
    Secrets,
    Deploy,
}

/// Per-session policy gate configuration (§3, §4.5). Immutable once attached
/// to a session, though an operator may update the stored config between
/// sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicySpec {
    #[serde(default)]
    pub shell_allowlist: Vec<String>,
    #[serde(default)]
    pub shell_denylist: Vec<String>,
    #[serde(default)]
    pub requires_approval_for: Vec<ApprovalCategory>,
    #[serde(default)]
    pub network_mode: NetworkMode,
}

impl PolicySpec {
    pub fn requires_approval(&self, category: ApprovalCategory) -> bool {
        self.requires_approval_for.contains(&category)
    }
}

/// Which provider (coding agent harness) a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Codex,
    ClaudeCode,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::Codex => write!(f, "codex"),
            ProviderId::ClaudeCode => write!(f, "claude_code"),
            ProviderId::Other(s) => write!(f, "{s}"),
        }
    }
}

/// The task description a provider is asked to accomplish.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    pub title: String,
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub room_path: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

/// Billing attribution, opaque to the execution subsystem beyond carrying it
/// through to events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BillingRef {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub budget_cents: Option<i64>,
}

/// Immutable configuration for a single agent session (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: Uuid,
    pub org_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub provider_id: ProviderId,
    pub repo_ref: RepoRef,
    pub checkout: CheckoutSpec,
    #[serde(default)]
    pub room_path: Option<String>,
    pub task: Task,
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub billing: BillingRef,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionConfig {
    /// `villageId`/`agentId` are carried as opaque metadata keys (the
    /// village/house/room domain is out of scope; see spec.md §1) but the
    /// Control Plane still needs them to route events (§4.7).
    pub fn village_id(&self) -> Option<&str> {
        self.metadata.get("village_id").map(String::as_str)
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.metadata.get("agent_id").map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.repo_ref.validate()?;
        if self.task.title.trim().is_empty() {
            return Err(Error::Validation("task.title must not be empty".into()));
        }
        if self.task.goal.trim().is_empty() {
            return Err(Error::Validation("task.goal must not be empty".into()));
        }
        Ok(())
    }
}

/// A disposable per-session working copy of a repository (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub workspace_id: String,
    pub repo_ref: RepoRef,
    pub checkout: CheckoutSpec,
    pub worktree_path: PathBuf,
    #[serde(default)]
    pub room_path: Option<String>,
    pub read_only: bool,
    pub created_at: DateTime<Utc>,
}

/// The risk tier a provider attaches to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRisk {
    Low,
    Medium,
    High,
}

/// A human-in-the-loop gate raised by a provider (§3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub session_id: Uuid,
    pub category: ApprovalCategory,
    pub summary: String,
    pub risk: ApprovalRisk,
    #[serde(default)]
    pub context: serde_json::Value,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub timeout_at: Option<DateTime<Utc>>,
}

/// The human (or auto-timeout) decision on an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Allow,
    Deny,
}

/// Monotonically-accumulating per-session usage counters (§3, open question
/// §9: derived from real counters rather than left as zero deltas).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct UsageMetrics {
    pub agent_seconds: u64,
    pub terminal_kb: u64,
    pub files_touched: u64,
    pub commands_run: u64,
    pub approvals_requested: u64,
}

impl UsageMetrics {
    pub fn accumulate(&mut self, delta: UsageDelta) {
        self.agent_seconds = self.agent_seconds.saturating_add(delta.agent_seconds);
        self.terminal_kb = self.terminal_kb.saturating_add(delta.terminal_kb);
        self.files_touched = self.files_touched.saturating_add(delta.files_touched);
        self.commands_run = self.commands_run.saturating_add(delta.commands_run);
    }
}

/// A single usage tick's worth of deltas (§4.1 `USAGE_TICK`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct UsageDelta {
    pub agent_seconds: u64,
    pub terminal_kb: u64,
    pub files_touched: u64,
    pub commands_run: u64,
}

/// Fleet capabilities a runner advertises at registration time (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerCapabilities {
    pub providers: Vec<String>,
    pub max_concurrent_sessions: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Runner health/load snapshot (§3, §4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct RunnerLoad {
    pub active_sessions: u32,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub disk_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Online,
    Draining,
    Offline,
}
