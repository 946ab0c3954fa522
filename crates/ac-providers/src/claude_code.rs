//! `ProviderAdapter` for Claude Code (`claude --print --output-format
//! stream-json`), §4.6.
//!
//! Claude Code's stream-json transcript nests tool calls inside
//! `assistant`/`user` message blocks rather than emitting one event per
//! tool the way Codex does, so the translator tracks in-flight `tool_use`
//! ids to know what a later `tool_result` block refers to.

use std::collections::HashMap;
use std::sync::Mutex;

use ac_protocol::events::{FileTouchReason, ProviderEvent};
use ac_protocol::model::{PolicySpec, ProviderId};
use ac_policy::PolicyEnforcer;
use ac_pty::{PtyManager, SpawnRequest};
use ac_session::{ProviderAdapter, ProviderDetection, ProviderStartParams, SessionError};
use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::classify::classify_command;
use crate::json_lines::spawn_json_line_reader;

const DEFAULT_BINARY: &str = "claude";

const FILE_WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const FILE_READ_TOOLS: &[&str] = &["Read", "NotebookRead", "Glob", "Grep"];

struct ClaudeTranslator {
    enforcer: PolicyEnforcer,
    /// `tool_use` id -> tool name, so a later `tool_result` block can be
    /// attributed without re-deriving it.
    pending_tools: HashMap<String, String>,
}

impl ClaudeTranslator {
    fn new(policy: PolicySpec) -> Self {
        Self { enforcer: PolicyEnforcer::new(policy), pending_tools: HashMap::new() }
    }

    fn translate(&mut self, value: serde_json::Value) -> Vec<ProviderEvent> {
        match value.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "assistant" => self.translate_assistant(&value),
            "control_request" => self.translate_control_request(&value),
            "result" => {
                let message = value.get("result").and_then(|v| v.as_str()).unwrap_or("").to_string();
                if message.is_empty() {
                    Vec::new()
                } else {
                    vec![ProviderEvent::Info { message }]
                }
            }
            _ => Vec::new(),
        }
    }

    fn translate_assistant(&mut self, value: &serde_json::Value) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        let Some(blocks) = value.pointer("/message/content").and_then(|v| v.as_array()) else {
            return events;
        };
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                "text" => {
                    let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    if !text.is_empty() {
                        events.push(ProviderEvent::Thought { text });
                    }
                }
                "tool_use" => {
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let input = block.get("input").cloned().unwrap_or(serde_json::Value::Null);
                    self.pending_tools.insert(id, name.clone());
                    events.extend(self.translate_tool_use(&name, input));
                }
                _ => {}
            }
        }
        events
    }

    fn translate_tool_use(&self, name: &str, input: serde_json::Value) -> Vec<ProviderEvent> {
        if name == "Bash" {
            let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let decision = self.enforcer.check_command(&command);
            if !decision.allowed {
                let detail = decision
                    .violations
                    .first()
                    .map(|v| v.detail.clone())
                    .unwrap_or_else(|| "blocked by policy".to_string());
                return vec![ProviderEvent::Error { message: format!("command blocked by policy: {detail}") }];
            }
            if let Some(category) = classify_command(&command) {
                if self.enforcer.requires_approval(category) {
                    return vec![ProviderEvent::RequestApproval {
                        approval_id: Uuid::new_v4().to_string(),
                        category,
                        summary: command,
                        context: serde_json::json!({ "tool": "Bash" }),
                        timeout_secs: Some(300),
                    }];
                }
            }
            return vec![ProviderEvent::ToolUse { name: name.to_string(), input: serde_json::json!({ "command": command }) }];
        }

        if FILE_WRITE_TOOLS.contains(&name) {
            if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                return vec![ProviderEvent::FileTouched { path: path.to_string(), reason: FileTouchReason::Write }];
            }
        }
        if FILE_READ_TOOLS.contains(&name) {
            if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                return vec![ProviderEvent::FileTouched { path: path.to_string(), reason: FileTouchReason::Read }];
            }
        }

        vec![ProviderEvent::ToolUse { name: name.to_string(), input }]
    }

    /// Claude Code's non-interactive permission prompt: a `control_request`
    /// with subtype `can_use_tool` pauses the transcript until answered.
    fn translate_control_request(&mut self, value: &serde_json::Value) -> Vec<ProviderEvent> {
        if value.pointer("/request/subtype").and_then(|v| v.as_str()) != Some("can_use_tool") {
            return Vec::new();
        }
        let tool_name = value
            .pointer("/request/tool_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown tool")
            .to_string();
        let input = value.pointer("/request/input").cloned().unwrap_or(serde_json::Value::Null);
        let summary = if tool_name == "Bash" {
            input.get("command").and_then(|v| v.as_str()).unwrap_or(&tool_name).to_string()
        } else {
            tool_name.clone()
        };
        let category = classify_command(&summary).unwrap_or(ac_protocol::model::ApprovalCategory::Merge);
        vec![ProviderEvent::RequestApproval {
            approval_id: value
                .pointer("/request_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            category,
            summary,
            context: serde_json::json!({ "tool": tool_name, "input": input }),
            timeout_secs: Some(300),
        }]
    }
}

pub struct ClaudeCodeAdapter {
    pty: std::sync::Arc<PtyManager>,
    session_id: Uuid,
    binary: String,
    event_tx: broadcast::Sender<ProviderEvent>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClaudeCodeAdapter {
    pub fn new(pty: std::sync::Arc<PtyManager>, session_id: Uuid) -> Self {
        Self::with_binary(pty, session_id, DEFAULT_BINARY.to_string())
    }

    pub fn with_binary(pty: std::sync::Arc<PtyManager>, session_id: Uuid, binary: String) -> Self {
        let (event_tx, _rx) = broadcast::channel(1024);
        Self {
            pty,
            session_id,
            binary,
            event_tx,
            reader_handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeCodeAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::ClaudeCode
    }

    async fn detect(&self) -> ProviderDetection {
        match tokio::process::Command::new(&self.binary).arg("--version").output().await {
            Ok(output) if output.status.success() => ProviderDetection {
                installed: true,
                version: Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            },
            _ => ProviderDetection { installed: false, version: None },
        }
    }

    async fn start_session(&self, params: ProviderStartParams) -> Result<u32, SessionError> {
        let request = SpawnRequest {
            command: self.binary.clone(),
            args: vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                params.task.goal.clone(),
            ],
            cwd: params.repo_path,
            env: params.env,
            cols: 120,
            rows: 40,
            shell: None,
        };
        let pid = self.pty.spawn(self.session_id, request).await?;

        let pty_rx = self.pty.subscribe(self.session_id).await.ok_or_else(|| {
            SessionError::Provider("pty session vanished immediately after spawn".to_string())
        })?;
        let mut translator = ClaudeTranslator::new(params.policy);
        let handle = spawn_json_line_reader(pty_rx, self.event_tx.clone(), move |value| {
            translator.translate(value)
        });
        *self.reader_handle.lock().expect("reader handle mutex poisoned") = Some(handle);

        Ok(pid)
    }

    async fn send_input(&self, data: &[u8]) -> Result<(), SessionError> {
        self.pty.write(self.session_id, data).await.map_err(SessionError::from)
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.pty.kill(self.session_id, false).await;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.event_tx.subscribe()
    }

    async fn subscribe_pty(&self) -> Option<broadcast::Receiver<ac_pty::PtyEvent>> {
        self.pty.subscribe(self.session_id).await
    }

    async fn release(&self) {
        self.pty.remove(self.session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_becomes_thought() {
        let mut translator = ClaudeTranslator::new(PolicySpec::default());
        let events = translator.translate(serde_json::json!({
            "type": "assistant",
            "message": { "content": [{ "type": "text", "text": "looking at the failing test" }] }
        }));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProviderEvent::Thought { .. }));
    }

    #[test]
    fn write_tool_use_becomes_file_touched() {
        let mut translator = ClaudeTranslator::new(PolicySpec::default());
        let events = translator.translate(serde_json::json!({
            "type": "assistant",
            "message": { "content": [{
                "type": "tool_use", "id": "t1", "name": "Write",
                "input": { "file_path": "src/lib.rs", "content": "..." }
            }] }
        }));
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProviderEvent::FileTouched { path, reason } => {
                assert_eq!(path, "src/lib.rs");
                assert!(matches!(reason, FileTouchReason::Write));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn dangerous_bash_tool_use_is_blocked() {
        let mut translator = ClaudeTranslator::new(PolicySpec::default());
        let events = translator.translate(serde_json::json!({
            "type": "assistant",
            "message": { "content": [{
                "type": "tool_use", "id": "t1", "name": "Bash",
                "input": { "command": "rm -rf /" }
            }] }
        }));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProviderEvent::Error { .. }));
    }

    #[test]
    fn permission_control_request_becomes_approval() {
        let mut translator = ClaudeTranslator::new(PolicySpec::default());
        let events = translator.translate(serde_json::json!({
            "type": "control_request",
            "request_id": "req-1",
            "request": { "subtype": "can_use_tool", "tool_name": "Bash", "input": { "command": "git push origin main" } }
        }));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProviderEvent::RequestApproval { .. }));
    }
}
