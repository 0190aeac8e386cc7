//! claude-code adapter (§4.1): one directory per project under
//! `~/.claude/projects/<projectHash>/`, each session a line-delimited JSON
//! file `<sessionId>.jsonl`.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::shared::{ToolActivityBuilder, TaskOverrides};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};

#[derive(Default)]
pub struct ClaudeCodeAdapter {
    storage_root: Option<PathBuf>,
}

impl ClaudeCodeAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        ClaudeCodeAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::ClaudeCode))
    }

    fn session_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root() else { return Vec::new() };
        let mut files = Vec::new();
        let Ok(project_dirs) = std::fs::read_dir(&root) else { return files };
        for project_dir in project_dirs.filter_map(|e| e.ok()) {
            let Ok(entries) = std::fs::read_dir(project_dir.path()) else { continue };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    files.push(path);
                }
            }
        }
        files
    }
}

#[derive(Deserialize)]
struct SessionRecord {
    #[serde(rename = "type")]
    record_type: String,
    #[serde(rename = "sessionId")]
    session_id: String,
    timestamp: Option<String>,
    cwd: Option<String>,
    #[serde(rename = "isMeta")]
    is_meta: Option<bool>,
    message: Value,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .map_err(|e| BraindumpError::ParseFailure { path: path.to_path_buf(), reason: e.to_string() })?;
    let reader = std::io::BufReader::new(file);
    Ok(reader.lines().map_while(std::result::Result::ok).collect())
}

fn scan_for_info(path: &Path) -> Option<SessionInfo> {
    let lines = read_lines(path).ok()?;
    let mut session_id = path.file_stem()?.to_string_lossy().to_string();
    let mut started_at = None;
    let mut last_active_at = None;
    let mut message_count = 0u64;
    let mut project_path = None;
    let mut preview = None;

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<SessionRecord>(trimmed) else { continue };
        if !record.session_id.is_empty() {
            session_id = record.session_id.clone();
        }
        if let Some(cwd) = &record.cwd {
            project_path.get_or_insert_with(|| cwd.clone());
        }
        let ts = record.timestamp.as_deref().and_then(util::parse_timestamp);
        if ts.is_some() {
            started_at.get_or_insert(ts.unwrap());
            last_active_at = ts;
        }
        if record.record_type == "user" || record.record_type == "assistant" {
            message_count += 1;
        }
        if preview.is_none() && record.record_type == "user" && !record.is_meta.unwrap_or(false) {
            if let Some(text) = record.message.get("content").and_then(Value::as_str) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    preview = Some(util::truncate(trimmed, 200));
                }
            }
        }
    }

    Some(SessionInfo { id: session_id, started_at, last_active_at, message_count: Some(message_count), project_path, preview })
}

impl Adapter for ClaudeCodeAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::ClaudeCode
    }

    fn detect(&self) -> bool {
        self.root().is_some_and(|root| root.exists()) && !self.session_files().is_empty()
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions: Vec<SessionInfo> = self.session_files().iter().filter_map(|p| scan_for_info(p)).collect();
        if let Some(filter) = project_path {
            sessions.retain(|s| s.project_path.as_deref().is_some_and(|p| paths_equal(p, filter)));
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let path = self
            .session_files()
            .into_iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(session_id))
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;

        let lines = read_lines(&path)?;

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();
        let mut extra_decisions = Vec::new();
        let mut pending_tools: HashMap<String, (String, Value)> = HashMap::new();
        let mut usage_tokens = 0u64;
        let mut session_started_at = None;
        let mut project_path: Option<String> = None;
        let mut resolved_session_id = session_id.to_string();

        for line in &lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<SessionRecord>(trimmed) else { continue };

            if !record.session_id.is_empty() {
                resolved_session_id = record.session_id.clone();
            }
            if let Some(cwd) = &record.cwd {
                project_path.get_or_insert_with(|| cwd.clone());
            }
            let ts = record.timestamp.as_deref().and_then(util::parse_timestamp);
            session_started_at.get_or_insert(ts.unwrap_or_else(Utc::now));

            match record.record_type.as_str() {
                "user" => {
                    if record.is_meta.unwrap_or(false) {
                        continue;
                    }
                    parse_user_message(&record.message, ts, &mut messages, &mut pending_tools, &mut tool_activity);
                }
                "assistant" => {
                    parse_assistant_message(
                        &record.message,
                        ts,
                        &mut messages,
                        &mut pending_tools,
                        &mut tool_activity,
                        &mut file_changes,
                        &mut file_change_index,
                        &mut extra_decisions,
                        &mut usage_tokens,
                    );
                }
                _ => {}
            }
        }

        let project_dir = project_path.map(PathBuf::from).unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        crate::adapter::shared::assemble(
            AgentId::ClaudeCode,
            resolved_session_id,
            session_started_at,
            &project_dir,
            messages,
            file_changes,
            tool_activity,
            extra_decisions,
            usage_tokens,
            TaskOverrides::default(),
        )
    }
}

fn parse_user_message(
    message: &Value,
    ts: Option<DateTime<Utc>>,
    messages: &mut Vec<ConversationMessage>,
    pending_tools: &mut HashMap<String, (String, Value)>,
    tool_activity: &mut ToolActivityBuilder,
) {
    let content = &message["content"];
    if let Some(text) = content.as_str() {
        push_text(messages, Role::User, text, ts);
        return;
    }
    let Some(arr) = content.as_array() else { return };
    for block in arr {
        match block.get("type").and_then(Value::as_str).unwrap_or("") {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    push_text(messages, Role::User, text, ts);
                }
            }
            "tool_result" => {
                let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or("").to_string();
                if let Some((name, _input)) = pending_tools.remove(&tool_use_id) {
                    let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                    let summary = summarize_tool_result(block, is_error);
                    tool_activity.record(util::classify_tool(&name), summary.clone());
                    messages.push(ConversationMessage {
                        role: Role::Tool,
                        content: summary,
                        tool_name: Some(name),
                        timestamp: ts,
                    });
                }
            }
            _ => {}
        }
    }
}

fn summarize_tool_result(block: &Value, is_error: bool) -> String {
    if is_error {
        return "error".to_string();
    }
    match block.get("content") {
        Some(Value::String(s)) => util::truncate(s.trim(), 150),
        _ => "ok".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_assistant_message(
    message: &Value,
    ts: Option<DateTime<Utc>>,
    messages: &mut Vec<ConversationMessage>,
    pending_tools: &mut HashMap<String, (String, Value)>,
    tool_activity: &mut ToolActivityBuilder,
    file_changes: &mut Vec<FileChange>,
    file_change_index: &mut HashMap<String, usize>,
    extra_decisions: &mut Vec<String>,
    usage_tokens: &mut u64,
) {
    if let Some(usage) = message.get("usage") {
        *usage_tokens += usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        *usage_tokens += usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        *usage_tokens += usage.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0);
    }

    let Some(content_arr) = message.get("content").and_then(Value::as_array) else { return };
    for block in content_arr {
        match block.get("type").and_then(Value::as_str).unwrap_or("") {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    push_text(messages, Role::Assistant, text, ts);
                }
            }
            "thinking" => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        extra_decisions.push(text.trim().to_string());
                    }
                }
            }
            "tool_use" => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                pending_tools.insert(id, (name.clone(), input.clone()));

                let class = util::classify_tool(&name);
                let args = serde_json::to_string(&input).unwrap_or_default();
                tool_activity.record(class, util::truncate(&args, 150));

                if let Some(file_path) = input.get("file_path").and_then(Value::as_str) {
                    util::upsert_file_change(
                        file_changes,
                        file_change_index,
                        file_path.to_string(),
                        util::infer_change_type(&name),
                        None,
                    );
                }

                messages.push(ConversationMessage {
                    role: Role::Tool,
                    content: args,
                    tool_name: Some(name),
                    timestamp: ts,
                });
            }
            _ => {}
        }
    }
}

fn push_text(messages: &mut Vec<ConversationMessage>, role: Role, text: &str, ts: Option<DateTime<Utc>>) {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        return;
    }
    messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: ts });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path, session_id: &str, lines: &[&str]) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{session_id}.jsonl"));
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("braindump-claude-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rec(kind: &str, session_id: &str, cwd: &str, ts: &str, message: Value) -> String {
        serde_json::json!({
            "type": kind,
            "sessionId": session_id,
            "timestamp": ts,
            "cwd": cwd,
            "message": message,
        })
        .to_string()
    }

    #[test]
    fn capture_flattens_tool_use_and_skips_malformed_lines() {
        let root = scratch_dir("capture");
        let project_dir = root.join("proj-hash");
        let lines = vec![
            rec(
                "user",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:00Z",
                serde_json::json!({"role": "user", "content": "Set up an Express REST API with a /health endpoint"}),
            ),
            rec(
                "assistant",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:01Z",
                serde_json::json!({
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": "I'll create the server file."},
                        {"type": "tool_use", "id": "tu1", "name": "Write", "input": {"file_path": "src/index.ts"}},
                    ],
                    "usage": {"input_tokens": 100, "output_tokens": 50},
                }),
            ),
            "not valid json at all".to_string(),
            rec(
                "user",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:02Z",
                serde_json::json!({
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": "tu1", "content": "wrote file"}],
                }),
            ),
            rec(
                "assistant",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:03Z",
                serde_json::json!({
                    "role": "assistant",
                    "content": [{"type": "tool_use", "id": "tu2", "name": "Write", "input": {"file_path": "src/routes/users.ts"}}],
                }),
            ),
            rec(
                "user",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:04Z",
                serde_json::json!({
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": "tu2", "content": "wrote file"}],
                }),
            ),
            rec(
                "assistant",
                "sess-1",
                "/repo",
                "2026-01-01T00:00:05Z",
                serde_json::json!({"role": "assistant", "content": [{"type": "text", "text": "Done with the migration"}]}),
            ),
        ];
        let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_fixture(&project_dir, "sess-1", &line_refs);

        let adapter = ClaudeCodeAdapter { storage_root: Some(root.clone()) };
        let captured = adapter.capture("sess-1").unwrap();

        assert_eq!(captured.task.description, "Set up an Express REST API with a /health endpoint");
        assert_eq!(captured.file_changes.len(), 2);
        assert!(captured.file_changes.iter().all(|fc| fc.change_type == FileChangeType::Created));
        assert!(captured.file_changes.iter().any(|fc| fc.path == "src/index.ts" && fc.language.as_deref() == Some("ts")));
        assert!(captured.file_changes.iter().any(|fc| fc.path == "src/routes/users.ts"));
        assert_eq!(captured.conversation.estimated_tokens, 150);
        assert_eq!(captured.conversation.message_count, captured.conversation.messages.len() as u64);
        captured.validate().unwrap();
    }

    #[test]
    fn list_sessions_filters_by_project_path() {
        let root = scratch_dir("list");
        let dir = root.join("proj-hash");
        let lines = vec![rec(
            "user",
            "sess-a",
            "/repo/one",
            "2026-01-01T00:00:00Z",
            serde_json::json!({"role": "user", "content": "hello"}),
        )];
        let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        write_fixture(&dir, "sess-a", &line_refs);

        let adapter = ClaudeCodeAdapter { storage_root: Some(root) };
        assert_eq!(adapter.list_sessions(Some("/repo/one")).unwrap().len(), 1);
        assert_eq!(adapter.list_sessions(Some("/repo/other")).unwrap().len(), 0);
    }

    #[test]
    fn capture_missing_session_id_is_session_not_found() {
        let root = scratch_dir("missing");
        std::fs::create_dir_all(&root).unwrap();
        let adapter = ClaudeCodeAdapter { storage_root: Some(root) };
        assert!(matches!(adapter.capture("nope"), Err(BraindumpError::SessionNotFound(_))));
    }
}
