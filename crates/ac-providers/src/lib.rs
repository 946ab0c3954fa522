//! Concrete coding-agent harnesses (§4.6): Codex and Claude Code, each a
//! thin `ProviderAdapter` around `ac_pty::PtyManager` plus a stateful
//! native-JSON-to-canonical-event translator.

mod classify;
mod claude_code;
mod codex;
mod json_lines;

pub use claude_code::ClaudeCodeAdapter;
pub use codex::CodexAdapter;
