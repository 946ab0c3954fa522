//! Canonical event envelope and payloads (§4.7).
//!
//! Events are the only thing that crosses from the Execution Plane to the
//! Control Plane once a session is running; the Control Plane re-publishes
//! them verbatim to subscribers (§6 realtime fan-out). The envelope carries
//! the routing fields every consumer needs; the payload is the
//! session-lifecycle-specific content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    ApprovalCategory, ApprovalDecision, ApprovalRequest, RepoRef, UsageMetrics,
};

/// The session state machine's states (§4.1). `Completed`/`Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    PreparingWorkspace,
    StartingProvider,
    Running,
    WaitingForApproval,
    PausedByHuman,
    Stopping,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// One file touched by the provider, with the reason it was touched (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTouchReason {
    Read,
    Write,
    Delete,
}

/// A single file's contribution to a [`EventPayload::DiffSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    pub lines_added: u32,
    pub lines_removed: u32,
}

/// Which PTY stream a [`EventPayload::TerminalChunk`] came from. The PTY
/// merges stdout/stderr at the wire level (§4.4); this field exists for
/// future differentiation and is always `Stdout` today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStream {
    Stdout,
    Stderr,
}

/// All outbound event kinds (§4.7), tagged by `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStarted {
        provider_id: String,
        provider_version: Option<String>,
        workspace_path: String,
        #[serde(default)]
        room_path: Option<String>,
    },
    SessionStateChanged {
        previous_state: SessionState,
        new_state: SessionState,
    },
    TerminalChunk {
        data: String,
        stream: TerminalStream,
    },
    FileTouched {
        path: String,
        reason: FileTouchReason,
        #[serde(default)]
        room_path: Option<String>,
    },
    DiffSummary {
        files_changed: u32,
        lines_added: u32,
        lines_removed: u32,
        files: Vec<DiffFile>,
    },
    ApprovalRequested {
        approval: ApprovalRequest,
    },
    ApprovalResolved {
        approval_id: String,
        decision: ApprovalDecision,
        #[serde(default)]
        note: Option<String>,
    },
    UsageTick {
        provider_id: String,
        units: u64,
        interval_ms: u64,
    },
    SessionEnded {
        final_state: SessionState,
        #[serde(default)]
        exit_code: Option<i32>,
        total_duration_ms: u64,
        total_usage: UsageMetrics,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::SessionStarted { .. } => "session_started",
            EventPayload::SessionStateChanged { .. } => "session_state_changed",
            EventPayload::TerminalChunk { .. } => "terminal_chunk",
            EventPayload::FileTouched { .. } => "file_touched",
            EventPayload::DiffSummary { .. } => "diff_summary",
            EventPayload::ApprovalRequested { .. } => "approval_requested",
            EventPayload::ApprovalResolved { .. } => "approval_resolved",
            EventPayload::UsageTick { .. } => "usage_tick",
            EventPayload::SessionEnded { .. } => "session_ended",
        }
    }

    /// `SESSION_ENDED` must be the last event emitted for a session (§4.2,
    /// §8).
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::SessionEnded { .. })
    }
}

/// A fully-addressed outbound event (§3 `RunnerEvent`, §4.7 envelope).
///
/// `seq` is assigned synchronously from a per-session counter at
/// enqueue-to-emit time (§4.2) and is strictly increasing without gaps,
/// starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerEvent {
    pub session_id: Uuid,
    pub org_id: String,
    pub repo_ref: RepoRef,
    pub ts: DateTime<Utc>,
    pub seq: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// The three subjects the Control Plane fans an event out to (§6). `agent_id`
/// and `village_id` are opaque metadata keys carried on [`crate::model::SessionConfig`];
/// a subject is only published when its key is present.
#[derive(Debug, Clone)]
pub struct FanoutSubjects {
    pub agent: Option<String>,
    pub session: String,
    pub village: Option<String>,
}

impl FanoutSubjects {
    pub fn new(session_id: &Uuid, agent_id: Option<&str>, village_id: Option<&str>) -> Self {
        Self {
            agent: agent_id.map(|a| format!("agent:{a}")),
            session: format!("session:{session_id}"),
            village: village_id.map(|v| format!("village:{v}")),
        }
    }

    pub fn all(&self) -> Vec<String> {
        let mut subjects = vec![self.session.clone()];
        if let Some(a) = &self.agent {
            subjects.push(a.clone());
        }
        if let Some(v) = &self.village {
            subjects.push(v.clone());
        }
        subjects
    }
}

/// Native-agent-agnostic events emitted by a [`crate::runner::ProviderAdapter`]
/// impl (§4.6). The `SessionManager` interprets `RequestApproval` specially
/// and forwards everything else as `PROVIDER_EVENT_FORWARDED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Thought {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    FileTouched {
        path: String,
        reason: FileTouchReason,
    },
    RequestApproval {
        approval_id: String,
        category: ApprovalCategory,
        summary: String,
        #[serde(default)]
        context: serde_json::Value,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    DiffSummary {
        files_changed: u32,
        lines_added: u32,
        lines_removed: u32,
        files: Vec<DiffFile>,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}
