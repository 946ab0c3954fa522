//! §6 HTTP handlers, one function per endpoint. Grounded on the teacher's
//! `api/handlers/*` module-per-resource split: thin functions that deserialize
//! the body, call into a registry, and map the result through `ApiError`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::dto::{
    ApprovalBody, CreateSessionBody, CreateSessionResponse, HeartbeatBody, InputBody, ListRunnersQuery, OkResponse,
    RegisterRunnerBody, RegisterRunnerResponse, RunnerListResponse, SessionRuntimeStateBody, StopBody,
};
use crate::error::ApiResult;
use crate::runner_registry::{HeartbeatRequest, Pagination, RegisterRunnerRequest, RunnerListFilters};
use crate::state::AppState;

const DEFAULT_ORG_ID: &str = "default";

/// §1: multi-tenant auth is an opaque external collaborator. Until one is
/// wired in, the caller-supplied `x-org-id` header (or a fixed default)
/// stands in for it.
fn org_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-org-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_ORG_ID.to_string())
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let org_id = org_id_from_headers(&headers);
    let config = body.into_session_config(org_id);
    let (session_id, agent_id) = state.sessions.create_session(config).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id, agent_id })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionRuntimeStateBody>> {
    let summary = state.sessions.get_session(session_id)?;
    Ok(Json(summary.into()))
}

pub async fn send_input(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<InputBody>,
) -> ApiResult<Json<OkResponse>> {
    state.sessions.send_input(session_id, body.data).await?;
    Ok(Json(OkResponse::default()))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<StopBody>,
) -> ApiResult<Json<OkResponse>> {
    state.sessions.stop_session(session_id, body.graceful.unwrap_or(true)).await?;
    Ok(Json(OkResponse::default()))
}

pub async fn resolve_approval(
    State(state): State<AppState>,
    Path((session_id, approval_id)): Path<(Uuid, String)>,
    Json(body): Json<ApprovalBody>,
) -> ApiResult<Json<OkResponse>> {
    state.sessions.resolve_approval(session_id, approval_id, body.decision, body.note).await?;
    Ok(Json(OkResponse::default()))
}

pub async fn register_runner(
    State(state): State<AppState>,
    Json(body): Json<RegisterRunnerBody>,
) -> ApiResult<(StatusCode, Json<RegisterRunnerResponse>)> {
    let runner = state.runners.register_runner(RegisterRunnerRequest {
        hostname: body.hostname,
        capabilities: body.capabilities,
        metadata: body.metadata,
    })?;
    Ok((StatusCode::CREATED, Json(RegisterRunnerResponse { runner_id: runner.runner_id })))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(runner_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<Json<OkResponse>> {
    state.runners.process_heartbeat(HeartbeatRequest {
        runner_id,
        timestamp: chrono::Utc::now(),
        active_sessions: body.active_sessions.into_iter().collect(),
        load: body.load,
        runtime_versions: body.runtime_versions,
    })?;
    Ok(Json(OkResponse::default()))
}

pub async fn drain_runner(State(state): State<AppState>, Path(runner_id): Path<String>) -> ApiResult<Json<OkResponse>> {
    state.runners.drain_runner(&runner_id)?;
    Ok(Json(OkResponse::default()))
}

pub async fn remove_runner(State(state): State<AppState>, Path(runner_id): Path<String>) -> ApiResult<StatusCode> {
    state.runners.remove_runner(&runner_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_runners(
    State(state): State<AppState>,
    Query(query): Query<ListRunnersQuery>,
) -> ApiResult<Json<RunnerListResponse>> {
    let pagination = Pagination { page: query.page.unwrap_or(1), page_size: query.page_size.unwrap_or(50) };
    let filters = RunnerListFilters { status: query.status, provider_id: query.provider_id };
    let runners = state.runners.list_runners(pagination, filters);
    Ok(Json(RunnerListResponse { runners }))
}
