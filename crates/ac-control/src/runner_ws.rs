//! The runner-facing WebSocket endpoint (§6.1): a runner daemon connects
//! once, says `RunnerHello`, and then exchanges newline-delimited JSON
//! `RunnerToBackend`/`BackendToRunner` frames for as long as the link is
//! open. Grounded on the teacher's `ws::handler::handle_ws_connection`
//! split-socket + `tokio::select!` shape, adapted from one-frame-per-
//! `WsEvent` client framing to the runner wire protocol's own enums.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ac_protocol::runner::{BackendToRunner, RunnerToBackend, RunnerWelcome};

use crate::runner_registry::{HeartbeatRequest, RegisterRunnerRequest};
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const COMMAND_CHANNEL_CAPACITY: usize = 256;

pub async fn runner_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_runner_connection(socket, state))
}

async fn handle_runner_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let hello = match await_hello(&mut receiver).await {
        Some(hello) => hello,
        None => {
            warn!("runner connection closed before sending hello");
            return;
        }
    };

    let runner = match state.runners.register_runner(RegisterRunnerRequest {
        hostname: hello.hostname.clone(),
        capabilities: hello.capabilities,
        metadata: hello.metadata,
    }) {
        Ok(runner) => runner,
        Err(err) => {
            warn!(hostname = %hello.hostname, error = %err, "runner registration refused");
            let _ = sender
                .send(Message::Close(None))
                .await;
            return;
        }
    };
    let runner_id = runner.runner_id.clone();
    info!(runner_id = %runner_id, hostname = %hello.hostname, "runner connected");

    if send_frame(&mut sender, &BackendToRunner::Welcome(RunnerWelcome { runner_id: runner_id.clone() })).await.is_err() {
        return;
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    state.runner_links.register(runner_id.clone(), cmd_tx);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    if send_frame(&mut sender, &cmd).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => handle_inbound_frame(&state, &runner_id, &text).await,
            Ok(Message::Close(_)) => {
                info!(runner_id = %runner_id, "runner closed connection");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
            Err(err) => {
                warn!(runner_id = %runner_id, error = %err, "websocket error");
                break;
            }
        }
    }

    send_task.abort();
    state.runner_links.unregister(&runner_id);
    info!(runner_id = %runner_id, "runner link closed");
}

async fn await_hello(receiver: &mut futures::stream::SplitStream<WebSocket>) -> Option<ac_protocol::runner::RunnerHello> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<RunnerToBackend>(&text) {
            Ok(RunnerToBackend::Hello(hello)) => return Some(hello),
            Ok(_) => warn!("expected hello as first frame, ignoring"),
            Err(err) => warn!(error = %err, "malformed first frame from runner"),
        }
    }
    None
}

async fn handle_inbound_frame(state: &AppState, runner_id: &str, text: &str) {
    let frame = match serde_json::from_str::<RunnerToBackend>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(runner_id = %runner_id, error = %err, "malformed frame from runner, ignoring");
            return;
        }
    };
    match frame {
        RunnerToBackend::Hello(_) => debug!(runner_id = %runner_id, "duplicate hello ignored"),
        RunnerToBackend::Event(event) => {
            let (agent_id, village_id) = state.sessions.observe_event(&event);
            let session_id = event.session_id;
            state.events.route((*event).clone(), agent_id, village_id);
            state.sessions.release_if_terminal(session_id);
        }
        RunnerToBackend::Heartbeat { load, sessions, runtime_versions } => {
            let active_sessions = sessions.iter().map(|s| s.session_id).collect();
            let result = state.runners.process_heartbeat(HeartbeatRequest {
                runner_id: runner_id.to_string(),
                timestamp: chrono::Utc::now(),
                active_sessions,
                load,
                runtime_versions,
            });
            if let Err(err) = result {
                warn!(runner_id = %runner_id, error = %err, "heartbeat rejected");
            }
        }
    }
}

async fn send_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &BackendToRunner,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).expect("BackendToRunner always serializes");
    sender.send(Message::Text(json.into())).await
}
