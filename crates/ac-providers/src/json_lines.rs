//! Newline-delimited JSON framing over a PTY's raw byte stream.
//!
//! The teacher's `stdout_reader_task` (`pi_manager.rs`) gets a line-buffered
//! reader for free because it owns a `tokio::process::ChildStdout` directly.
//! Our provider processes run under `ac_pty::PtyManager` instead, which only
//! hands out broadcast chunks of raw bytes, so framing has to be done by
//! hand: buffer bytes until a `\n` shows up, then try to parse everything
//! before it as one JSON value.

use tokio::sync::broadcast;
use tracing::debug;

use ac_pty::PtyEvent;

/// Reads `pty_rx` until the PTY exits, splitting on newlines and handing each
/// parsed JSON line to `translate`. Lines that aren't valid JSON (provider
/// banners, partial output before the process finds its stride) are logged
/// and skipped rather than killing the stream.
pub fn spawn_json_line_reader<F>(
    mut pty_rx: broadcast::Receiver<PtyEvent>,
    event_tx: broadcast::Sender<ac_protocol::events::ProviderEvent>,
    mut translate: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(serde_json::Value) -> Vec<ac_protocol::events::ProviderEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match pty_rx.recv().await {
                Ok(PtyEvent::Data(chunk)) => {
                    buf.extend_from_slice(&chunk.data);
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        let line = &line[..line.len().saturating_sub(1)];
                        let line = trim_cr(line);
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_slice::<serde_json::Value>(line) {
                            Ok(value) => {
                                for event in translate(value) {
                                    let _ = event_tx.send(event);
                                }
                            }
                            Err(err) => {
                                debug!(err = %err, "skipping non-json provider output line");
                            }
                        }
                    }
                }
                Ok(PtyEvent::Exit(_)) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_pty::{DataChunk, ExitInfo, PtyStream};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[tokio::test]
    async fn splits_partial_lines_across_chunks() {
        let (pty_tx, pty_rx) = broadcast::channel(16);
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_translate = seen.clone();

        let handle = spawn_json_line_reader(pty_rx, event_tx, move |value| {
            seen_for_translate.lock().unwrap().push(value);
            Vec::new()
        });

        let session_id = Uuid::new_v4();
        let send = |data: &str| {
            pty_tx
                .send(PtyEvent::Data(DataChunk {
                    session_id,
                    data: data.as_bytes().to_vec(),
                    stream: PtyStream::Stdout,
                    timestamp: Utc::now(),
                }))
                .unwrap();
        };
        send("{\"type\":\"a");
        send("gent_message\",\"message\":\"hi\"}\n{\"type\":\"token");
        send("_count\"}\n");
        pty_tx
            .send(PtyEvent::Exit(ExitInfo {
                session_id,
                exit_code: Some(0),
                signal: None,
                timestamp: Utc::now(),
            }))
            .unwrap();

        handle.await.unwrap();
        assert!(event_rx.try_recv().is_err());
        let lines = seen.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "agent_message");
        assert_eq!(lines[1]["type"], "token_count");
    }
}
