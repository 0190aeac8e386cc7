//! Agent registry: for each of the seven identifiers, the display name,
//! per-platform storage path, nominal context window, usable-token budget,
//! and memory-file names (§3 "Agent registry entry").
//!
//! Per the open question in §9, platform base paths are resolved as a pure
//! function of the platform name and environment, computed once when an
//! adapter is constructed and never re-read mid-process.

use std::path::PathBuf;

use crate::ast::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    MacOs,
    Windows,
}

/// Reads `std::env::consts::OS` once; callers that need a specific platform
/// for testing can call `base_storage_path_for` directly instead.
pub fn current_platform() -> Platform {
    match std::env::consts::OS {
        "macos" => Platform::MacOs,
        "windows" => Platform::Windows,
        _ => Platform::Unix,
    }
}

#[derive(Debug, Clone)]
pub struct AgentRegistryEntry {
    pub id: AgentId,
    pub display_name: &'static str,
    /// Nominal context window, in tokens, advertised by the agent.
    pub context_window: u64,
    /// Conservative usable-token budget reserved for the handoff document.
    pub usable_tokens: u64,
    pub memory_file_names: &'static [&'static str],
}

pub fn registry_entry(id: AgentId) -> AgentRegistryEntry {
    match id {
        AgentId::ClaudeCode => AgentRegistryEntry {
            id,
            display_name: "Claude Code",
            context_window: 200_000,
            usable_tokens: 45_000,
            memory_file_names: &["CLAUDE.md"],
        },
        AgentId::Cursor => AgentRegistryEntry {
            id,
            display_name: "Cursor",
            context_window: 200_000,
            usable_tokens: 40_000,
            memory_file_names: &[".cursorrules"],
        },
        AgentId::Codex => AgentRegistryEntry {
            id,
            display_name: "Codex CLI",
            context_window: 128_000,
            usable_tokens: 28_000,
            memory_file_names: &["AGENTS.md"],
        },
        AgentId::Copilot => AgentRegistryEntry {
            id,
            display_name: "GitHub Copilot",
            context_window: 128_000,
            usable_tokens: 28_000,
            memory_file_names: &[".github/copilot-instructions.md"],
        },
        AgentId::Gemini => AgentRegistryEntry {
            id,
            display_name: "Gemini CLI",
            context_window: 1_000_000,
            usable_tokens: 60_000,
            memory_file_names: &["GEMINI.md"],
        },
        AgentId::OpenCode => AgentRegistryEntry {
            id,
            display_name: "OpenCode",
            context_window: 200_000,
            usable_tokens: 45_000,
            memory_file_names: &["AGENTS.md"],
        },
        AgentId::Droid => AgentRegistryEntry {
            id,
            display_name: "Factory Droid",
            context_window: 200_000,
            usable_tokens: 45_000,
            memory_file_names: &["AGENTS.md"],
        },
    }
}

/// The storage root each adapter should search under, resolved for the
/// given platform and environment. Returns `None` only when the relevant
/// environment variable or home directory can't be resolved at all.
pub fn base_storage_path_for(
    id: AgentId,
    platform: Platform,
    home: Option<PathBuf>,
    local_app_data: Option<PathBuf>,
) -> Option<PathBuf> {
    match id {
        AgentId::ClaudeCode => Some(home?.join(".claude").join("projects")),
        AgentId::Codex => Some(home?.join(".codex").join("sessions")),
        AgentId::Copilot => Some(home?.join(".copilot").join("session-state")),
        AgentId::Gemini => Some(home?.join(".gemini").join("tmp")),
        AgentId::OpenCode => Some(home?.join(".local").join("share").join("opencode")),
        AgentId::Droid => Some(home?.join(".factory").join("sessions")),
        AgentId::Cursor => match platform {
            Platform::MacOs => {
                Some(home?.join("Library/Application Support/Cursor/User"))
            }
            Platform::Windows => Some(local_app_data?.join("Cursor").join("User")),
            Platform::Unix => Some(home?.join(".config").join("Cursor").join("User")),
        },
    }
}

/// Convenience wrapper over `base_storage_path_for` that reads the real
/// platform and environment.
pub fn base_storage_path(id: AgentId) -> Option<PathBuf> {
    base_storage_path_for(
        id,
        current_platform(),
        dirs::home_dir(),
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_agent_has_a_registry_entry() {
        for id in AgentId::ALL {
            let entry = registry_entry(id);
            assert!(entry.usable_tokens > 0);
            assert!(entry.usable_tokens < entry.context_window);
        }
    }

    #[test]
    fn cursor_path_differs_per_platform() {
        let home = Some(PathBuf::from("/home/dev"));
        let lad = Some(PathBuf::from("C:/Users/dev/AppData/Local"));
        let unix = base_storage_path_for(AgentId::Cursor, Platform::Unix, home.clone(), None).unwrap();
        let mac = base_storage_path_for(AgentId::Cursor, Platform::MacOs, home.clone(), None).unwrap();
        let win = base_storage_path_for(AgentId::Cursor, Platform::Windows, home, lad).unwrap();
        assert!(unix.to_string_lossy().contains(".config"));
        assert!(mac.to_string_lossy().contains("Library"));
        assert!(win.to_string_lossy().contains("AppData"));
    }

    #[test]
    fn non_cursor_agents_are_platform_independent() {
        let home = Some(PathBuf::from("/home/dev"));
        let a = base_storage_path_for(AgentId::ClaudeCode, Platform::Unix, home.clone(), None);
        let b = base_storage_path_for(AgentId::ClaudeCode, Platform::MacOs, home, None);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_home_yields_none() {
        assert!(base_storage_path_for(AgentId::ClaudeCode, Platform::Unix, None, None).is_none());
    }
}
