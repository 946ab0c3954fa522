//! Maps a [`ProviderId`] to the concrete [`ProviderAdapter`] that should
//! drive it, keeping `ac-runner` the only crate that needs to know every
//! adapter `ac-providers` exports.

use std::sync::Arc;

use ac_protocol::model::ProviderId;
use ac_providers::{ClaudeCodeAdapter, CodexAdapter};
use ac_pty::PtyManager;
use ac_session::ProviderAdapter;
use uuid::Uuid;

pub fn build_adapter(
    provider_id: &ProviderId,
    pty: Arc<PtyManager>,
    session_id: Uuid,
) -> Option<Arc<dyn ProviderAdapter>> {
    match provider_id {
        ProviderId::Codex => Some(Arc::new(CodexAdapter::new(pty, session_id))),
        ProviderId::ClaudeCode => Some(Arc::new(ClaudeCodeAdapter::new(pty, session_id))),
        ProviderId::Other(_) => None,
    }
}
