//! GitHub Copilot CLI adapter (§4.1): one directory per session under
//! `~/.copilot/session-state/<id>/`, containing `workspace.yaml` (a
//! lightweight structured-text file: scalar `key: value` lines plus an
//! optional multi-line `summary: |` block) and `events.jsonl` (`session.start`,
//! `user.message`, `assistant.message`, the latter optionally carrying
//! `toolRequests`). `workspace.yaml` is parsed with a flat line scan rather
//! than pulling in a YAML crate — the file never nests beyond one level.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};

#[derive(Default)]
pub struct CopilotAdapter {
    storage_root: Option<PathBuf>,
}

impl CopilotAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        CopilotAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::Copilot))
    }

    fn session_dirs(&self) -> Vec<PathBuf> {
        let Some(root) = self.root() else { return Vec::new() };
        let Ok(entries) = std::fs::read_dir(&root) else { return Vec::new() };
        entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect()
    }
}

#[derive(Debug, Default)]
struct Workspace {
    fields: HashMap<String, String>,
    summary: Option<String>,
}

/// Flat line scan: `key: value` scalars, and a `key: |` block that
/// continues consuming indented lines into one multi-line string.
fn parse_workspace_yaml(content: &str) -> Workspace {
    let mut fields = HashMap::new();
    let mut summary = None;
    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        let Some((key, rest)) = trimmed.split_once(':') else { continue };
        let key = key.trim().to_string();
        let value = rest.trim();
        if value == "|" || value == ">" {
            let mut block = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with(' ') || next.starts_with('\t') {
                    block.push(lines.next().unwrap().trim_start().to_string());
                } else {
                    break;
                }
            }
            let joined = block.join("\n");
            if key == "summary" {
                summary = Some(joined);
            } else {
                fields.insert(key, joined);
            }
        } else {
            fields.insert(key, value.trim_matches('"').to_string());
        }
    }
    Workspace { fields, summary }
}

#[derive(Deserialize)]
struct CopilotEvent {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: Option<String>,
    text: Option<String>,
    #[serde(rename = "toolRequests")]
    tool_requests: Option<Vec<ToolRequest>>,
}

#[derive(Deserialize)]
struct ToolRequest {
    name: Option<String>,
    arguments: Option<Value>,
}

fn read_workspace(session_dir: &PathBuf) -> Workspace {
    std::fs::read_to_string(session_dir.join("workspace.yaml")).map(|c| parse_workspace_yaml(&c)).unwrap_or_default()
}

fn read_events(session_dir: &PathBuf) -> Vec<CopilotEvent> {
    let Ok(content) = std::fs::read_to_string(session_dir.join("events.jsonl")) else { return Vec::new() };
    content.lines().filter(|l| !l.trim().is_empty()).filter_map(|line| serde_json::from_str(line).ok()).collect()
}

impl Adapter for CopilotAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::Copilot
    }

    fn detect(&self) -> bool {
        !self.session_dirs().is_empty()
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for dir in self.session_dirs() {
            let id = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let workspace = read_workspace(&dir);
            let ws_path = workspace.fields.get("workspace").or_else(|| workspace.fields.get("directory")).cloned();
            if let Some(filter) = project_path {
                if !ws_path.as_deref().is_some_and(|p| paths_equal(p, filter)) {
                    continue;
                }
            }
            let events = read_events(&dir);
            let started_at = events.first().and_then(|e| e.timestamp.as_deref()).and_then(util::parse_timestamp);
            let last_active_at = events.last().and_then(|e| e.timestamp.as_deref()).and_then(util::parse_timestamp);
            sessions.push(SessionInfo {
                id,
                started_at,
                last_active_at,
                message_count: Some(events.len() as u64),
                project_path: ws_path,
                preview: workspace.summary.as_deref().map(|s| util::truncate(s, 200)),
            });
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let dir = self
            .session_dirs()
            .into_iter()
            .find(|d| d.file_name().map(|n| n.to_string_lossy() == session_id).unwrap_or(false))
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;

        let workspace = read_workspace(&dir);
        let project_path = workspace
            .fields
            .get("workspace")
            .or_else(|| workspace.fields.get("directory"))
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();
        let mut started_at = None;

        for event in read_events(&dir) {
            let ts = event.timestamp.as_deref().and_then(util::parse_timestamp);
            match event.event_type.as_str() {
                "session.start" => {
                    started_at.get_or_insert(ts.unwrap_or_else(chrono::Utc::now));
                }
                "user.message" => {
                    if let Some(text) = &event.text {
                        messages.push(ConversationMessage { role: Role::User, content: text.clone(), tool_name: None, timestamp: ts });
                    }
                }
                "assistant.message" => {
                    if let Some(text) = &event.text {
                        if !text.trim().is_empty() {
                            messages.push(ConversationMessage { role: Role::Assistant, content: text.clone(), tool_name: None, timestamp: ts });
                        }
                    }
                    for req in event.tool_requests.into_iter().flatten() {
                        let tool_name = req.name.unwrap_or_else(|| "unknown".to_string());
                        let class = util::classify_tool(&tool_name);
                        if let Some(args) = &req.arguments {
                            if let Some(path) = args.get("path").or_else(|| args.get("file")).and_then(Value::as_str) {
                                util::upsert_file_change(
                                    &mut file_changes,
                                    &mut file_change_index,
                                    path.to_string(),
                                    util::infer_change_type(&tool_name),
                                    None,
                                );
                            }
                        }
                        let sample = util::truncate(&serde_json::to_string(&req.arguments).unwrap_or_default(), 150);
                        tool_activity.record(class, sample.clone());
                        messages.push(ConversationMessage { role: Role::Tool, content: sample, tool_name: Some(tool_name), timestamp: ts });
                    }
                }
                _ => {}
            }
        }

        let extra_decisions = workspace.summary.into_iter().collect();

        crate::adapter::shared::assemble(
            AgentId::Copilot,
            session_id.to_string(),
            started_at,
            &project_path,
            messages,
            file_changes,
            tool_activity,
            extra_decisions,
            0,
            TaskOverrides::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_session(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("braindump-copilot-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let session_dir = root.join("sess-9");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(
            session_dir.join("workspace.yaml"),
            "workspace: /repo\nsummary: |\n  Refactored the retry logic\n  Added backoff\n",
        )
        .unwrap();
        let events = [
            serde_json::json!({"type": "session.start", "timestamp": "2026-01-01T00:00:00Z"}),
            serde_json::json!({"type": "user.message", "timestamp": "2026-01-01T00:00:01Z", "text": "add retry logic"}),
            serde_json::json!({
                "type": "assistant.message",
                "timestamp": "2026-01-01T00:00:02Z",
                "text": "Adding retries now.",
                "toolRequests": [{"name": "write_file", "arguments": {"path": "src/retry.rs"}}]
            }),
        ];
        let jsonl = events.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(session_dir.join("events.jsonl"), jsonl).unwrap();
        root
    }

    #[test]
    fn capture_reads_yaml_and_events() {
        let root = scratch_session("basic");
        let adapter = CopilotAdapter { storage_root: Some(root) };
        let captured = adapter.capture("sess-9").unwrap();
        assert_eq!(captured.project.path, "/repo");
        assert!(captured.file_changes.iter().any(|f| f.path == "src/retry.rs"));
        assert!(captured.decisions.iter().any(|d| d.contains("Refactored the retry logic")));
        captured.validate().unwrap();
    }

    #[test]
    fn parse_workspace_yaml_reads_block_scalar() {
        let ws = parse_workspace_yaml("workspace: /a/b\nsummary: |\n  line one\n  line two\n");
        assert_eq!(ws.fields.get("workspace"), Some(&"/a/b".to_string()));
        assert_eq!(ws.summary.as_deref(), Some("line one\nline two"));
    }
}
