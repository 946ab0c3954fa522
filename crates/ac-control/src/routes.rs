//! Router composition (§6). Grounded on the teacher's `api::routes::create_router`
//! shape: one `Router<AppState>` per resource group, merged, then wrapped in
//! CORS and tracing layers.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::runner_ws::runner_ws_handler;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/runner/sessions", post(handlers::create_session))
        .route("/runner/sessions/{id}", get(handlers::get_session))
        .route("/runner/sessions/{id}/input", post(handlers::send_input))
        .route("/runner/sessions/{id}/stop", post(handlers::stop_session))
        .route("/runner/sessions/{id}/approvals/{approval_id}", post(handlers::resolve_approval));

    let fleet_routes = Router::new()
        .route("/runners/register", post(handlers::register_runner))
        .route("/runners/{id}/heartbeat", post(handlers::heartbeat))
        .route("/runners/{id}/drain", post(handlers::drain_runner))
        .route("/runners/{id}", delete(handlers::remove_runner))
        .route("/runners", get(handlers::list_runners))
        .route("/runners/ws", get(runner_ws_handler));

    Router::new()
        .merge(session_routes)
        .merge(fleet_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
