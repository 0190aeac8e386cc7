//! Factory Droid adapter (§4.1): line-delimited JSON at
//! `~/.factory/sessions/<workspaceSlug>/<uuid>.jsonl`, with an optional
//! companion `<uuid>.settings.json`. Event types: `session_start`, `message`
//! (blocks `text`, `thinking`, `tool_use`, `tool_result`), `todo_state` (a
//! free-text numbered list the agent maintains itself rather than leaving
//! to lexical analysis), and `compaction_state`. The external session
//! identifier is the composite `"<slug>:<uuid>"` since the uuid alone isn't
//! unique across workspaces.

use std::collections::HashMap;
use std::path::PathBuf;

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};

#[derive(Default)]
pub struct DroidAdapter {
    storage_root: Option<PathBuf>,
}

impl DroidAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        DroidAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::Droid))
    }

    /// `slug:uuid` -> the jsonl path, or `None` if the composite id is malformed
    /// or the file doesn't exist.
    fn session_path(&self, composite_id: &str) -> Option<PathBuf> {
        let (slug, uuid) = composite_id.split_once(':')?;
        let path = self.root()?.join(slug).join(format!("{uuid}.jsonl"));
        path.exists().then_some(path)
    }

    fn all_sessions(&self) -> Vec<(String, PathBuf)> {
        let Some(root) = self.root() else { return Vec::new() };
        let Ok(slug_dirs) = std::fs::read_dir(&root) else { return Vec::new() };
        let mut out = Vec::new();
        for slug_dir in slug_dirs.filter_map(|e| e.ok()) {
            let slug = slug_dir.file_name().to_string_lossy().to_string();
            let Ok(files) = std::fs::read_dir(slug_dir.path()) else { continue };
            for f in files.filter_map(|e| e.ok()) {
                if f.path().extension().is_some_and(|e| e == "jsonl") {
                    let uuid = f.path().file_stem().unwrap().to_string_lossy().to_string();
                    out.push((format!("{slug}:{uuid}"), f.path()));
                }
            }
        }
        out
    }
}

#[derive(Deserialize)]
struct DroidRecord {
    #[serde(rename = "type")]
    record_type: String,
    timestamp: Option<String>,
    cwd: Option<String>,
    role: Option<String>,
    blocks: Option<Vec<DroidBlock>>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct DroidBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
    name: Option<String>,
    input: Option<Value>,
    output: Option<Value>,
    #[serde(rename = "isError")]
    is_error: Option<bool>,
}

#[derive(Deserialize, Default)]
struct DroidSettings {
    #[serde(rename = "workspaceSlug")]
    workspace_slug: Option<String>,
}

fn read_records(path: &PathBuf) -> Result<Vec<DroidRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| BraindumpError::ParseFailure { path: path.clone(), reason: e.to_string() })?;
    Ok(content.lines().filter(|l| !l.trim().is_empty()).filter_map(|line| serde_json::from_str(line).ok()).collect())
}

fn todo_line_re() -> &'static Regex {
    static TODO_LINE: OnceLock<Regex> = OnceLock::new();
    TODO_LINE.get_or_init(|| Regex::new(r"^\s*\d+\.\s*\[([a-zA-Z_-]+)\]\s*(.+)$").unwrap())
}

struct TodoParse {
    completed: Vec<String>,
    remaining: Vec<String>,
    in_progress: Option<String>,
}

/// Parses droid's free-text `todo_state` numbered list (scenario 2). A
/// `remaining` step also includes whichever item is in progress, so
/// `task.remaining` is a superset of `{in-progress item, pending items}`.
fn parse_todo_state(text: &str) -> TodoParse {
    let mut completed = Vec::new();
    let mut remaining = Vec::new();
    let mut in_progress = None;
    for line in text.lines() {
        let Some(caps) = todo_line_re().captures(line) else { continue };
        let status = caps[1].to_lowercase();
        let item = caps[2].trim().to_string();
        match status.as_str() {
            "completed" | "done" => completed.push(item),
            "in_progress" | "in-progress" => {
                in_progress = Some(item.clone());
                remaining.push(item);
            }
            "pending" => remaining.push(item),
            _ => {}
        }
    }
    TodoParse { completed, remaining, in_progress }
}

impl Adapter for DroidAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::Droid
    }

    fn detect(&self) -> bool {
        !self.all_sessions().is_empty()
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for (id, path) in self.all_sessions() {
            let Ok(records) = read_records(&path) else { continue };
            let cwd = records.iter().find_map(|r| r.cwd.clone());
            if let Some(filter) = project_path {
                if !cwd.as_deref().is_some_and(|p| paths_equal(p, filter)) {
                    continue;
                }
            }
            let started_at = records.first().and_then(|r| r.timestamp.as_deref()).and_then(util::parse_timestamp);
            let last_active_at = records.last().and_then(|r| r.timestamp.as_deref()).and_then(util::parse_timestamp);
            let message_count = records.iter().filter(|r| r.record_type == "message").count() as u64;
            sessions.push(SessionInfo {
                id,
                started_at,
                last_active_at,
                message_count: Some(message_count),
                project_path: cwd,
                preview: None,
            });
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let path = self.session_path(session_id).ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;
        let records = read_records(&path)?;

        let (_, uuid) = session_id.split_once(':').unwrap_or(("", session_id));
        let settings_path = path.with_file_name(format!("{uuid}.settings.json"));
        let _settings: DroidSettings =
            std::fs::read_to_string(&settings_path).ok().and_then(|c| serde_json::from_str(&c).ok()).unwrap_or_default();

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();
        let mut extra_decisions = Vec::new();
        let mut started_at = None;
        let mut project_path = None;
        let mut overrides = TaskOverrides::default();

        for record in records {
            let ts = record.timestamp.as_deref().and_then(util::parse_timestamp);
            match record.record_type.as_str() {
                "session_start" => {
                    started_at.get_or_insert(ts.unwrap_or_else(chrono::Utc::now));
                    project_path = record.cwd.clone().or(project_path);
                }
                "message" => {
                    let role = util::normalize_role(record.role.as_deref().unwrap_or(""));
                    for block in record.blocks.into_iter().flatten() {
                        match block.block_type.as_str() {
                            "text" => {
                                if let Some(text) = &block.text {
                                    let trimmed = text.trim();
                                    if !trimmed.is_empty() {
                                        messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: ts });
                                    }
                                }
                            }
                            "thinking" => {
                                if let Some(text) = &block.text {
                                    if !text.trim().is_empty() {
                                        extra_decisions.push(text.trim().to_string());
                                    }
                                }
                            }
                            "tool_use" => {
                                let tool_name = block.name.clone().unwrap_or_else(|| "unknown".to_string());
                                let class = util::classify_tool(&tool_name);
                                if let Some(input) = &block.input {
                                    if let Some(path) = input.get("file_path").or_else(|| input.get("path")).and_then(Value::as_str) {
                                        util::upsert_file_change(
                                            &mut file_changes,
                                            &mut file_change_index,
                                            path.to_string(),
                                            util::infer_change_type(&tool_name),
                                            None,
                                        );
                                    }
                                }
                                let sample = util::truncate(&serde_json::to_string(&block.input).unwrap_or_default(), 150);
                                tool_activity.record(class, sample.clone());
                                messages.push(ConversationMessage { role: Role::Tool, content: sample, tool_name: Some(tool_name), timestamp: ts });
                            }
                            "tool_result" => {
                                let is_error = block.is_error.unwrap_or(false);
                                let body = block
                                    .output
                                    .as_ref()
                                    .map(|o| util::truncate(&serde_json::to_string(o).unwrap_or_default(), 150))
                                    .unwrap_or_default();
                                let prefix = if is_error { "error: " } else { "" };
                                messages.push(ConversationMessage {
                                    role: Role::Tool,
                                    content: format!("{prefix}{body}"),
                                    tool_name: None,
                                    timestamp: ts,
                                });
                            }
                            _ => {}
                        }
                    }
                }
                "todo_state" => {
                    if let Some(text) = &record.text {
                        let parse = parse_todo_state(text);
                        overrides.extra_completed.extend(parse.completed);
                        overrides.remaining = parse.remaining;
                        overrides.in_progress = parse.in_progress.or(overrides.in_progress);
                    }
                }
                _ => {}
            }
        }

        let project_dir = project_path.map(PathBuf::from).unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        crate::adapter::shared::assemble(
            AgentId::Droid,
            session_id.to_string(),
            started_at,
            &project_dir,
            messages,
            file_changes,
            tool_activity,
            extra_decisions,
            0,
            overrides,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_session(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("braindump-droid-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("my-workspace")).unwrap();
        root
    }

    fn write_jsonl(root: &PathBuf, slug: &str, uuid: &str, lines: &[Value]) {
        let dir = root.join(slug);
        std::fs::create_dir_all(&dir).unwrap();
        let body = lines.iter().map(|l| l.to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(dir.join(format!("{uuid}.jsonl")), body).unwrap();
    }

    #[test]
    fn todo_state_scenario_matches_spec_example() {
        let input = "1. [in_progress] Fix auth bug\n2. [pending] Add tests\n3. [completed] Setup project";
        let parsed = parse_todo_state(input);
        assert_eq!(parsed.in_progress.as_deref(), Some("Fix auth bug"));
        assert!(parsed.remaining.contains(&"Fix auth bug".to_string()));
        assert!(parsed.remaining.contains(&"Add tests".to_string()));
        assert!(parsed.completed.contains(&"Setup project".to_string()));
    }

    #[test]
    fn capture_applies_todo_overrides_to_task_state() {
        let root = scratch_session("capture");
        write_jsonl(
            &root,
            "my-workspace",
            "abc",
            &[
                serde_json::json!({"type": "session_start", "timestamp": "2026-01-01T00:00:00Z", "cwd": "/repo"}),
                serde_json::json!({
                    "type": "message", "role": "user", "timestamp": "2026-01-01T00:00:01Z",
                    "blocks": [{"type": "text", "text": "fix the auth bug and add tests"}]
                }),
                serde_json::json!({
                    "type": "todo_state",
                    "text": "1. [in_progress] Fix auth bug\n2. [pending] Add tests\n3. [completed] Setup project"
                }),
            ],
        );
        let adapter = DroidAdapter { storage_root: Some(root) };
        let captured = adapter.capture("my-workspace:abc").unwrap();
        assert_eq!(captured.task.in_progress.as_deref(), Some("Fix auth bug"));
        assert!(captured.task.remaining.contains(&"Add tests".to_string()));
        assert!(captured.task.completed.contains(&"Setup project".to_string()));
        captured.validate().unwrap();
    }
}
