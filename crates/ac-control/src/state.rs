//! `AppState` (§6): shared handles every axum handler and the runner-link
//! WebSocket task extract via axum's `State` extractor. Grounded on the
//! teacher's `api::state::AppState` builder shape, trimmed to this plane's
//! three registries.

use std::sync::Arc;

use crate::event_router::EventRouter;
use crate::runner_link::RunnerLinkRegistry;
use crate::runner_registry::{RunnerHandler, RunnerRegistryConfig};
use crate::session_registry::SessionHandler;

#[derive(Clone)]
pub struct AppState {
    pub runners: Arc<RunnerHandler>,
    pub sessions: Arc<SessionHandler>,
    pub events: Arc<EventRouter>,
    pub runner_links: Arc<RunnerLinkRegistry>,
}

impl AppState {
    pub fn new(runner_config: RunnerRegistryConfig) -> Self {
        let runners = Arc::new(RunnerHandler::new(runner_config));
        let runner_links = Arc::new(RunnerLinkRegistry::new());
        let sessions = Arc::new(SessionHandler::new(runners.clone(), runner_links.clone()));
        let events = Arc::new(EventRouter::new());
        Self { runners, sessions, events, runner_links }
    }
}
