//! Per-connection command channel to a live runner daemon.
//!
//! The HTTP handlers never touch a runner's WebSocket directly; they go
//! through this registry, which is just the `BackendToRunner` half of the
//! teacher's `WsHub::send_to_user` (a `DashMap<id, Sender>` with a
//! best-effort "not connected" error path).

use dashmap::DashMap;
use tokio::sync::mpsc;

use ac_protocol::runner::BackendToRunner;

use crate::error::ApiError;

pub type RunnerLinkSender = mpsc::Sender<BackendToRunner>;

#[derive(Default)]
pub struct RunnerLinkRegistry {
    links: DashMap<String, RunnerLinkSender>,
}

impl RunnerLinkRegistry {
    pub fn new() -> Self {
        Self { links: DashMap::new() }
    }

    pub fn register(&self, runner_id: String, tx: RunnerLinkSender) {
        self.links.insert(runner_id, tx);
    }

    pub fn unregister(&self, runner_id: &str) {
        self.links.remove(runner_id);
    }

    pub async fn send(&self, runner_id: &str, message: BackendToRunner) -> Result<(), ApiError> {
        let tx = self
            .links
            .get(runner_id)
            .map(|e| e.clone())
            .ok_or_else(|| ApiError::RunnerNotFound(runner_id.to_string()))?;
        tx.send(message)
            .await
            .map_err(|_| ApiError::RunnerNotFound(format!("runner {runner_id} link closed")))
    }

    pub fn is_connected(&self, runner_id: &str) -> bool {
        self.links.contains_key(runner_id)
    }
}
