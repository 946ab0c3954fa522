//! Runner fleet wire protocol (§6.1, §4.8).
//!
//! Messages exchanged between the Control Plane and a runner daemon over a
//! persistent WebSocket connection, as newline-delimited JSON frames.
//! Grounded on the teacher's `oqto-protocol::runner` module: a `Hello`/
//! `Welcome` handshake followed by tagged `BackendToRunner`/`RunnerToBackend`
//! enums.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::RunnerEvent;
use crate::model::{ApprovalDecision, RunnerCapabilities, RunnerLoad};

/// Sent by a runner daemon immediately after connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerHello {
    pub hostname: String,
    pub capabilities: RunnerCapabilities,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

/// Control Plane's acknowledgment, echoing the assigned `runner_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerWelcome {
    pub runner_id: String,
}

/// Per-session telemetry carried in a [`RunnerToBackend::Heartbeat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTelemetry {
    pub session_id: Uuid,
    pub provider_id: String,
    pub state: crate::events::SessionState,
}

/// Control Plane -> runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendToRunner {
    Welcome(RunnerWelcome),
    StartSession {
        config: Box<crate::model::SessionConfig>,
    },
    Input {
        session_id: Uuid,
        data: String,
    },
    Pause {
        session_id: Uuid,
    },
    Resume {
        session_id: Uuid,
    },
    Stop {
        session_id: Uuid,
        graceful: bool,
    },
    ResolveApproval {
        session_id: Uuid,
        approval_id: String,
        decision: ApprovalDecision,
        #[serde(default)]
        note: Option<String>,
    },
    Drain,
}

/// Runner -> Control Plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerToBackend {
    Hello(RunnerHello),
    Event(Box<RunnerEvent>),
    Heartbeat {
        load: RunnerLoad,
        sessions: Vec<SessionTelemetry>,
        #[serde(default)]
        runtime_versions: std::collections::HashMap<String, String>,
    },
}
