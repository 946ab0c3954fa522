//! `EventRouter` (§6, §9.1): fans `RunnerEvent`s out to the three subjects of
//! [`ac_protocol::events::FanoutSubjects`]. At-least-once, non-durable:
//! subscribers that reconnect get nothing retroactively and must dedupe on
//! `(session_id, seq)` themselves, the same contract the teacher's
//! `WsHub::subscribe_events` broadcast channel gives its own consumers.

use tokio::sync::broadcast;

use ac_protocol::events::{FanoutSubjects, RunnerEvent};

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub subjects: Vec<String>,
    pub event: RunnerEvent,
}

impl RoutedEvent {
    pub fn matches(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }
}

pub struct EventRouter {
    tx: broadcast::Sender<RoutedEvent>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.tx.subscribe()
    }

    /// Computes subjects from `agent_id`/`village_id` (looked up by the
    /// caller, usually via `SessionHandler::observe_event`) and publishes.
    /// Silently drops if there are no subscribers, matching broadcast
    /// channel semantics elsewhere in this codebase (§4.2 `emit`).
    pub fn route(&self, event: RunnerEvent, agent_id: Option<String>, village_id: Option<String>) {
        let subjects = FanoutSubjects::new(&event.session_id, agent_id.as_deref(), village_id.as_deref()).all();
        let _ = self.tx.send(RoutedEvent { subjects, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_protocol::events::EventPayload;
    use ac_protocol::model::RepoRef;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(session_id: Uuid) -> RunnerEvent {
        RunnerEvent {
            session_id,
            org_id: "org-1".into(),
            repo_ref: RepoRef::Local { path: "/tmp".into(), name: None },
            ts: Utc::now(),
            seq: 1,
            payload: EventPayload::SessionStarted {
                provider_id: "codex".into(),
                provider_version: None,
                workspace_path: "/tmp/ws".into(),
                room_path: None,
            },
        }
    }

    #[tokio::test]
    async fn routed_event_carries_all_three_subjects_when_present() {
        let router = EventRouter::new();
        let mut rx = router.subscribe();
        let session_id = Uuid::new_v4();
        router.route(sample_event(session_id), Some("agent-1".into()), Some("village-1".into()));

        let routed = rx.recv().await.unwrap();
        assert!(routed.matches(&format!("session:{session_id}")));
        assert!(routed.matches("agent:agent-1"));
        assert!(routed.matches("village:village-1"));
    }

    #[tokio::test]
    async fn routed_event_omits_absent_subjects() {
        let router = EventRouter::new();
        let mut rx = router.subscribe();
        let session_id = Uuid::new_v4();
        router.route(sample_event(session_id), None, None);

        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.subjects, vec![format!("session:{session_id}")]);
    }
}
