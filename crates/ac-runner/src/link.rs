//! The runner-side half of the §6.1 wire protocol: connects once to the
//! control plane, says `Hello`, then keeps three things going concurrently
//! on the same socket — inbound `BackendToRunner` commands, outbound
//! `RunnerEvent`s forwarded from `SessionManager::subscribe`, and a
//! heartbeat ticker. Grounded on the same split-socket + `tokio::select!`
//! shape as `ac_control::runner_ws`, mirrored from the other end.

use std::sync::Arc;

use ac_protocol::model::RunnerCapabilities;
use ac_protocol::runner::{BackendToRunner, RunnerHello, RunnerToBackend};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::service::RunnerService;

/// Connects and runs the link until the connection drops or the control
/// plane sends `Drain`. Callers reconnect (with backoff) on return.
pub async fn run(config: &RunnerConfig, service: Arc<RunnerService>) -> Result<(), RunnerError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(&config.control_plane_url)
        .await
        .map_err(|e| RunnerError::Link(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    let hostname = config.hostname_override.clone().unwrap_or_else(default_hostname);
    let hello = RunnerHello {
        hostname,
        capabilities: RunnerCapabilities {
            providers: config.providers.clone(),
            max_concurrent_sessions: config.max_sessions as u32,
            features: Vec::new(),
        },
        metadata: Default::default(),
    };
    send_frame(&mut sink, &RunnerToBackend::Hello(hello)).await.map_err(|e| RunnerError::Link(e.to_string()))?;

    let runner_id = match stream.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<BackendToRunner>(&text) {
            Ok(BackendToRunner::Welcome(welcome)) => welcome.runner_id,
            _ => return Err(RunnerError::Link("expected Welcome as first frame".to_string())),
        },
        _ => return Err(RunnerError::Link("control plane closed before welcoming".to_string())),
    };
    info!(%runner_id, "connected to control plane");

    let mut events = service.subscribe_events();
    let mut heartbeat_ticker = tokio::time::interval(config.heartbeat_interval());

    loop {
        tokio::select! {
            Some(msg) = stream.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(err) = handle_command(&service, &text).await {
                            warn!(error = %err, "command handling failed");
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("control plane closed the link");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "runner link read error");
                        return Err(RunnerError::Link(err.to_string()));
                    }
                }
            }
            Ok(event) = events.recv() => {
                if send_frame(&mut sink, &RunnerToBackend::Event(Box::new(event))).await.is_err() {
                    return Err(RunnerError::Link("failed to forward event".to_string()));
                }
            }
            _ = heartbeat_ticker.tick() => {
                let (load, sessions) = service.heartbeat_telemetry().await;
                let frame = RunnerToBackend::Heartbeat { load, sessions, runtime_versions: Default::default() };
                if send_frame(&mut sink, &frame).await.is_err() {
                    return Err(RunnerError::Link("failed to send heartbeat".to_string()));
                }
            }
        }
    }
}

async fn handle_command(service: &Arc<RunnerService>, text: &str) -> Result<(), RunnerError> {
    let command = serde_json::from_str::<BackendToRunner>(text)
        .map_err(|e| RunnerError::Link(format!("malformed command: {e}")))?;
    match command {
        BackendToRunner::Welcome(_) => debug!("duplicate welcome ignored"),
        BackendToRunner::StartSession { config } => {
            service.start_session(*config).await?;
        }
        BackendToRunner::Input { session_id, data } => service.send_input(session_id, data).await?,
        BackendToRunner::Pause { session_id } => service.pause(session_id).await?,
        BackendToRunner::Resume { session_id } => service.resume(session_id).await?,
        BackendToRunner::Stop { session_id, graceful } => service.stop(session_id, graceful).await?,
        BackendToRunner::ResolveApproval { session_id, approval_id, decision, note } => {
            service.resolve_approval(session_id, approval_id, decision, note).await?
        }
        BackendToRunner::Drain => {
            info!("control plane requested drain");
            service.shutdown().await;
        }
    }
    Ok(())
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    frame: &RunnerToBackend,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame).expect("RunnerToBackend always serializes");
    sink.send(Message::Text(json.into())).await
}

fn default_hostname() -> String {
    let mut buf = [0u8; 256];
    match nix::unistd::gethostname(&mut buf) {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => format!("runner-{}", uuid::Uuid::new_v4()),
    }
}
