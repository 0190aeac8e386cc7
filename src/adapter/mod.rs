//! Adapter framework (§4.1): a capability set implemented once per agent and
//! registered in a mapping keyed by `AgentId`, per the Design Note
//! "Polymorphism across seven formats" — adapters compose shared primitives
//! from `util` rather than inheriting from a base type.

pub mod claude_code;
pub mod codex;
pub mod copilot;
pub mod cursor;
pub mod droid;
pub mod gemini;
pub mod opencode;
mod shared;

use std::path::PathBuf;

use crate::ast::{AgentId, CapturedSession, SessionInfo};
use crate::error::{BraindumpError, Result};

/// The four operations every agent adapter exposes.
pub trait Adapter {
    fn agent_id(&self) -> AgentId;

    /// True when this agent's storage root exists and contains at least one
    /// recognizable session artifact.
    fn detect(&self) -> bool;

    /// All discoverable sessions, last-active-at descending, optionally
    /// filtered to a project path.
    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>>;

    /// Reads and normalizes one session by id.
    fn capture(&self, session_id: &str) -> Result<CapturedSession>;

    /// `list_sessions` then `capture` on the most recent entry.
    fn capture_latest(&self, project_path: Option<&str>) -> Result<CapturedSession> {
        let sessions = self.list_sessions(project_path)?;
        let latest = sessions.first().ok_or_else(|| BraindumpError::NoSessions { agent: self.agent_id() })?;
        self.capture(&latest.id)
    }
}

/// Builds the adapter for a given agent identifier.
pub fn for_agent(id: AgentId) -> Box<dyn Adapter> {
    match id {
        AgentId::ClaudeCode => Box::new(claude_code::ClaudeCodeAdapter::default()),
        AgentId::Codex => Box::new(codex::CodexAdapter::default()),
        AgentId::Cursor => Box::new(cursor::CursorAdapter::default()),
        AgentId::Copilot => Box::new(copilot::CopilotAdapter::default()),
        AgentId::Gemini => Box::new(gemini::GeminiAdapter::default()),
        AgentId::OpenCode => Box::new(opencode::OpenCodeAdapter::default()),
        AgentId::Droid => Box::new(droid::DroidAdapter::default()),
    }
}

/// Builds the adapter for a given agent, honoring a config-file storage
/// path override (`[sources]` in `~/.config/braindump/config.toml`) when one
/// is present; falls back to the registry default otherwise.
pub fn for_agent_with_root(id: AgentId, storage_root: Option<PathBuf>) -> Box<dyn Adapter> {
    let Some(root) = storage_root else { return for_agent(id) };
    match id {
        AgentId::ClaudeCode => Box::new(claude_code::ClaudeCodeAdapter::with_storage_root(root)),
        AgentId::Codex => Box::new(codex::CodexAdapter::with_storage_root(root)),
        AgentId::Cursor => Box::new(cursor::CursorAdapter::with_storage_root(root)),
        AgentId::Copilot => Box::new(copilot::CopilotAdapter::with_storage_root(root)),
        AgentId::Gemini => Box::new(gemini::GeminiAdapter::with_storage_root(root)),
        AgentId::OpenCode => Box::new(opencode::OpenCodeAdapter::with_storage_root(root)),
        AgentId::Droid => Box::new(droid::DroidAdapter::with_storage_root(root)),
    }
}

/// All seven adapters, in `AgentId::ALL` order.
pub fn all_adapters() -> Vec<Box<dyn Adapter>> {
    AgentId::ALL.into_iter().map(for_agent).collect()
}

/// The first agent (in `AgentId::ALL` order) whose `detect` returns true.
pub fn detect_any() -> Option<AgentId> {
    AgentId::ALL.into_iter().find(|id| for_agent(*id).detect())
}
