//! The PTY Manager (§4.4): spawns provider processes under a pseudo-terminal,
//! streams combined stdout/stderr chunks to subscribers, and surfaces exit.
//!
//! `portable-pty` has no async API — every blocking read/wait is pushed onto
//! a dedicated OS thread, the same shape the teacher's `pi_manager.rs` uses
//! for its stdin/stdout plumbing around `tokio::process::Child`, adapted here
//! to a real pseudoterminal (grounded on `opencloudtool-agentty`'s use of
//! `portable-pty` for its own agent-process supervision).

mod error;

pub use error::PtyError;

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Max number of chunks retained per session's ring buffer (§4.4, §5).
const MAX_BUFFERED_CHUNKS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtyStream {
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataChunk {
    pub session_id: Uuid,
    pub data: Vec<u8>,
    pub stream: PtyStream,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitInfo {
    pub session_id: Uuid,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

/// Events a PTY session's subscribers observe (§4.4).
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data(DataChunk),
    Exit(ExitInfo),
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub shell: Option<String>,
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            env: HashMap::new(),
            cols: 120,
            rows: 40,
            shell: None,
        }
    }
}

struct PtySessionState {
    pid: u32,
    master: Box<dyn MasterPty + Send>,
    writer: Mutex<Box<dyn Write + Send>>,
    buffer: Mutex<VecDeque<DataChunk>>,
    event_tx: broadcast::Sender<PtyEvent>,
}

/// Spawns provider processes under a pseudoterminal and multiplexes their
/// output.
pub struct PtyManager {
    sessions: RwLock<HashMap<Uuid, Arc<PtySessionState>>>,
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Binds the underlying PTY library. A no-op for `portable-pty` (the
    /// native PTY system is looked up lazily per spawn) but kept as an
    /// explicit lifecycle step per §4.4 so callers establish ordering with
    /// the rest of the runner's startup sequence.
    pub async fn initialize(&self) -> Result<(), PtyError> {
        Ok(())
    }

    /// §4.4 `spawn`. Rejects a duplicate `sessionId`.
    pub async fn spawn(&self, session_id: Uuid, request: SpawnRequest) -> Result<u32, PtyError> {
        if self.sessions.read().await.contains_key(&session_id) {
            return Err(PtyError::AlreadyExists(session_id));
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let mut cmd = if let Some(shell) = &request.shell {
            let mut full = request.command.clone();
            for arg in &request.args {
                full.push(' ');
                full.push_str(arg);
            }
            let mut builder = CommandBuilder::new(shell);
            builder.arg("-c");
            builder.arg(full);
            builder
        } else {
            let mut builder = CommandBuilder::new(&request.command);
            for arg in &request.args {
                builder.arg(arg);
            }
            builder
        };
        cmd.cwd(&request.cwd);
        for (k, v) in &request.env {
            cmd.env(k, v);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let pid = child.process_id().ok_or_else(|| {
            PtyError::Spawn("spawned child reported no process id".to_string())
        })?;
        // The slave end must be dropped in this process once the child owns
        // it, or reads on the master never see EOF at exit.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let (event_tx, _rx) = broadcast::channel(1024);
        let state = Arc::new(PtySessionState {
            pid,
            master: pair.master,
            writer: Mutex::new(writer),
            buffer: Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_CHUNKS)),
            event_tx,
        });

        self.sessions.write().await.insert(session_id, state.clone());

        spawn_reader_thread(session_id, reader, state.clone());
        spawn_waiter_thread(session_id, child, state);

        info!(%session_id, pid, "pty spawned");
        Ok(pid)
    }

    /// §4.4 `write`.
    pub async fn write(&self, session_id: Uuid, data: &[u8]) -> Result<(), PtyError> {
        let sessions = self.sessions.read().await;
        let state = sessions.get(&session_id).ok_or(PtyError::NotFound(session_id))?;
        let mut writer = state.writer.lock().expect("pty writer mutex poisoned");
        writer.write_all(data).map_err(|e| PtyError::Io(e.to_string()))
    }

    /// §4.4 `resize`.
    pub async fn resize(&self, session_id: Uuid, cols: u16, rows: u16) -> Result<(), PtyError> {
        let sessions = self.sessions.read().await;
        let state = sessions.get(&session_id).ok_or(PtyError::NotFound(session_id))?;
        state
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Io(e.to_string()))
    }

    /// §4.4 `kill`. A no-op on an unknown session.
    pub async fn kill(&self, session_id: Uuid, escalate: bool) {
        let pid = {
            let sessions = self.sessions.read().await;
            sessions.get(&session_id).map(|s| s.pid)
        };
        let Some(pid) = pid else {
            return;
        };
        send_signal(pid, escalate);
    }

    pub async fn get_buffer(&self, session_id: Uuid) -> Vec<DataChunk> {
        let sessions = self.sessions.read().await;
        match sessions.get(&session_id) {
            Some(state) => state.buffer.lock().expect("pty buffer mutex poisoned").iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Subscribes to data/exit events for a session. Returns `None` if the
    /// session is unknown.
    pub async fn subscribe(&self, session_id: Uuid) -> Option<broadcast::Receiver<PtyEvent>> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).map(|s| s.event_tx.subscribe())
    }

    /// §4.4 `cleanup`: sends forceful termination to all sessions, waits for
    /// each exit (bounded by the reader/waiter threads naturally observing
    /// EOF), then clears the map.
    pub async fn cleanup(&self) {
        let session_ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for session_id in session_ids {
            self.kill(session_id, true).await;
        }
        self.sessions.write().await.clear();
    }

    /// §4.4 "on exit: ... remove the session." Called once a caller has
    /// observed `PtyEvent::Exit` and no longer needs `write`/`resize`/`kill`
    /// to target this session. A no-op if already removed.
    pub async fn remove(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
    }
}

fn send_signal(pid: u32, escalate: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let signal = if escalate { Signal::SIGKILL } else { Signal::SIGTERM };
        let _ = kill(Pid::from_raw(pid as i32), signal);
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, escalate);
    }
}

fn spawn_reader_thread(
    session_id: Uuid,
    mut reader: Box<dyn Read + Send>,
    state: Arc<PtySessionState>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = DataChunk {
                        session_id,
                        data: buf[..n].to_vec(),
                        stream: PtyStream::Stdout,
                        timestamp: Utc::now(),
                    };
                    {
                        let mut buffer = state.buffer.lock().expect("pty buffer mutex poisoned");
                        if buffer.len() >= MAX_BUFFERED_CHUNKS {
                            buffer.pop_front();
                        }
                        buffer.push_back(chunk.clone());
                    }
                    let _ = state.event_tx.send(PtyEvent::Data(chunk));
                }
                Err(e) => {
                    warn!(%session_id, err = %e, "pty read error");
                    break;
                }
            }
        }
        debug!(%session_id, "pty reader thread exiting");
    });
}

fn spawn_waiter_thread(session_id: Uuid, mut child: Box<dyn Child + Send + Sync>, state: Arc<PtySessionState>) {
    std::thread::spawn(move || {
        let status = child.wait();
        let exit_code = status.ok().map(|s| s.exit_code() as i32);
        let info = ExitInfo {
            session_id,
            exit_code,
            signal: None,
            timestamp: Utc::now(),
        };
        let _ = state.event_tx.send(PtyEvent::Exit(info));
        debug!(%session_id, "pty waiter thread exiting");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_write_and_exit_roundtrip() {
        let manager = PtyManager::new();
        manager.initialize().await.unwrap();
        let session_id = Uuid::new_v4();

        let request = SpawnRequest {
            command: "/bin/sh".to_string(),
            args: vec![],
            cwd: std::env::temp_dir(),
            env: HashMap::new(),
            cols: 80,
            rows: 24,
            shell: None,
        };

        let mut rx = {
            let pid = manager.spawn(session_id, request).await.unwrap();
            assert!(pid > 0);
            manager.subscribe(session_id).await.unwrap()
        };

        manager.write(session_id, b"echo hello\nexit\n").await.unwrap();

        let mut saw_exit = false;
        for _ in 0..200 {
            match tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await {
                Ok(Ok(PtyEvent::Exit(_))) => {
                    saw_exit = true;
                    break;
                }
                Ok(Ok(PtyEvent::Data(_))) => continue,
                _ => continue,
            }
        }
        assert!(saw_exit, "expected to observe a pty exit event");
        manager.remove(session_id).await;
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let manager = PtyManager::new();
        let session_id = Uuid::new_v4();
        let request = SpawnRequest {
            command: "/bin/sh".to_string(),
            cwd: std::env::temp_dir(),
            ..Default::default()
        };
        manager.spawn(session_id, request.clone()).await.unwrap();
        let err = manager.spawn(session_id, request).await.unwrap_err();
        assert!(matches!(err, PtyError::AlreadyExists(_)));
        manager.kill(session_id, true).await;
    }
}
