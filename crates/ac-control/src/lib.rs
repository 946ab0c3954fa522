//! Control Plane (§2, §4.8, §6): runner fleet registry, session registry,
//! event fan-out, and the HTTP/WebSocket surface that fronts them.

pub mod config;
pub mod dto;
pub mod error;
pub mod event_router;
pub mod handlers;
pub mod runner_link;
pub mod runner_registry;
pub mod runner_ws;
pub mod routes;
pub mod session_registry;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use event_router::{EventRouter, RoutedEvent};
pub use runner_link::RunnerLinkRegistry;
pub use runner_registry::{RunnerFleetEvent, RunnerHandler, RunnerRegistryConfig};
pub use session_registry::{SessionHandler, SessionSummary};
pub use state::AppState;
