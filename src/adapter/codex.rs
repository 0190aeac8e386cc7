//! codex adapter (§4.1): line-delimited JSON under `~/.codex/sessions/`,
//! a uniform `{timestamp, type, payload}` envelope with `session_meta`,
//! `event_msg`, `response_item`, and `turn_context` record types.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};

#[derive(Default)]
pub struct CodexAdapter {
    storage_root: Option<PathBuf>,
}

impl CodexAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        CodexAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::Codex))
    }

    fn session_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root() else { return Vec::new() };
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

#[derive(Deserialize)]
struct CodexRecord {
    timestamp: String,
    #[serde(rename = "type")]
    record_type: String,
    payload: Value,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .map_err(|e| BraindumpError::ParseFailure { path: path.to_path_buf(), reason: e.to_string() })?;
    Ok(std::io::BufReader::new(file).lines().map_while(std::result::Result::ok).collect())
}

fn clean_user_text(raw: &str) -> String {
    let mut text = raw.to_string();
    while let Some(start) = text.find("<context ref=\"") {
        if let Some(end) = text[start..].find("</context>") {
            text = format!("{}{}", &text[..start], &text[start + end + "</context>".len()..]);
        } else {
            break;
        }
    }
    while let Some(start) = text.find("[@") {
        if let Some(paren_end) = text[start..].find(')') {
            text = format!("{}{}", &text[..start], text[start + paren_end + 1..].trim_start());
        } else {
            break;
        }
    }
    text.trim().to_string()
}

fn format_function(name: &str, args: &Value) -> String {
    match name {
        "shell" => {
            let cmd = args
                .get("command")
                .map(|c| match c.as_array() {
                    Some(arr) => arr.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" "),
                    None => c.as_str().unwrap_or("").to_string(),
                })
                .unwrap_or_default();
            util::truncate(&cmd.replace('\n', " "), 200)
        }
        "read_file" | "write_file" => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("");
            format!("file=\"{path}\"")
        }
        _ => util::truncate(&serde_json::to_string(args).unwrap_or_default(), 150),
    }
}

struct ScanResult {
    session_id: String,
    project_path: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_active_at: Option<DateTime<Utc>>,
    message_count: u64,
    preview: Option<String>,
}

fn scan(path: &Path) -> Option<ScanResult> {
    let lines = read_lines(path).ok()?;
    let mut session_id = None;
    let mut project_path = None;
    let mut started_at = None;
    let mut last_active_at = None;
    let mut message_count = 0u64;
    let mut preview = None;

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<CodexRecord>(trimmed) else { continue };
        let ts = record.timestamp.parse::<DateTime<Utc>>().ok();
        if ts.is_some() {
            started_at.get_or_insert(ts.unwrap());
            last_active_at = ts;
        }
        match record.record_type.as_str() {
            "session_meta" => {
                session_id = record.payload.get("id").and_then(Value::as_str).map(str::to_string);
                project_path = record.payload.get("cwd").and_then(Value::as_str).map(str::to_string);
            }
            "event_msg" if record.payload.get("type").and_then(Value::as_str) == Some("user_message") => {
                message_count += 1;
                if preview.is_none() {
                    if let Some(msg) = record.payload.get("message").and_then(Value::as_str) {
                        let cleaned = clean_user_text(msg);
                        if !cleaned.is_empty() {
                            preview = Some(util::truncate(&cleaned, 200));
                        }
                    }
                }
            }
            "response_item" if record.payload.get("type").and_then(Value::as_str) == Some("message") => {
                if record.payload.get("role").and_then(Value::as_str) == Some("assistant") {
                    message_count += 1;
                }
            }
            _ => {}
        }
    }

    Some(ScanResult {
        session_id: session_id.unwrap_or_else(|| path.file_stem().unwrap().to_string_lossy().to_string()),
        project_path,
        started_at,
        last_active_at,
        message_count,
        preview,
    })
}

impl Adapter for CodexAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::Codex
    }

    fn detect(&self) -> bool {
        self.root().is_some_and(|r| r.exists()) && !self.session_files().is_empty()
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions: Vec<SessionInfo> = self
            .session_files()
            .iter()
            .filter_map(|p| scan(p))
            .map(|r| SessionInfo {
                id: r.session_id,
                started_at: r.started_at,
                last_active_at: r.last_active_at,
                message_count: Some(r.message_count),
                project_path: r.project_path,
                preview: r.preview,
            })
            .collect();
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
            .find(|p| scan(p).is_some_and(|r| r.session_id == session_id))
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;

        let lines = read_lines(&path)?;

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();
        let mut pending_functions: HashMap<String, (String, Value)> = HashMap::new();
        let mut session_started_at = None;
        let mut project_path = None;
        let mut resolved_session_id = session_id.to_string();

        for line in &lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<CodexRecord>(trimmed) else { continue };
            let ts = record.timestamp.parse::<DateTime<Utc>>().ok();

            match record.record_type.as_str() {
                "session_meta" => {
                    if let Some(id) = record.payload.get("id").and_then(Value::as_str) {
                        resolved_session_id = id.to_string();
                    }
                    project_path = record.payload.get("cwd").and_then(Value::as_str).map(str::to_string);
                    session_started_at = ts;
                }
                "event_msg" if record.payload.get("type").and_then(Value::as_str) == Some("user_message") => {
                    if let Some(msg) = record.payload.get("message").and_then(Value::as_str) {
                        let cleaned = clean_user_text(msg);
                        if !cleaned.is_empty() {
                            messages.push(ConversationMessage { role: Role::User, content: cleaned, tool_name: None, timestamp: ts });
                        }
                    }
                }
                "response_item" => {
                    let payload_type = record.payload.get("type").and_then(Value::as_str).unwrap_or("");
                    match payload_type {
                        "message" if record.payload.get("role").and_then(Value::as_str) == Some("assistant") => {
                            if let Some(content) = record.payload.get("content").and_then(Value::as_array) {
                                for block in content {
                                    if block.get("type").and_then(Value::as_str) == Some("output_text") {
                                        let text = block.get("text").and_then(Value::as_str).unwrap_or("").trim();
                                        if !text.is_empty() {
                                            messages.push(ConversationMessage {
                                                role: Role::Assistant,
                                                content: text.to_string(),
                                                tool_name: None,
                                                timestamp: ts,
                                            });
                                        }
                                    }
                                }
                            }
                        }
                        "function_call" => {
                            let call_id = record.payload.get("call_id").and_then(Value::as_str).unwrap_or("").to_string();
                            let name = record.payload.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                            let args: Value = record
                                .payload
                                .get("arguments")
                                .and_then(Value::as_str)
                                .and_then(|s| serde_json::from_str(s).ok())
                                .unwrap_or(Value::Object(Default::default()));
                            if !call_id.is_empty() {
                                pending_functions.insert(call_id, (name, args));
                            }
                        }
                        "function_call_output" => {
                            let call_id = record.payload.get("call_id").and_then(Value::as_str).unwrap_or("");
                            if let Some((name, args)) = pending_functions.remove(call_id) {
                                let output = record.payload.get("output").and_then(Value::as_str).unwrap_or("");
                                let is_error = serde_json::from_str::<Value>(output)
                                    .ok()
                                    .and_then(|v| v.get("exit_code")?.as_i64())
                                    .is_some_and(|code| code != 0);

                                let class = util::classify_tool(&name);
                                let summary = format_function(&name, &args);
                                tool_activity.record(class, summary.clone());

                                if name == "write_file" || name == "read_file" {
                                    if let Some(path_str) = args.get("path").and_then(Value::as_str) {
                                        if !is_error && name == "write_file" {
                                            util::upsert_file_change(
                                                &mut file_changes,
                                                &mut file_change_index,
                                                path_str.to_string(),
                                                FileChangeType::Modified,
                                                None,
                                            );
                                        }
                                    }
                                }

                                messages.push(ConversationMessage {
                                    role: Role::Tool,
                                    content: if is_error { format!("error: {summary}") } else { summary },
                                    tool_name: Some(name),
                                    timestamp: ts,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        let project_dir = project_path.map(PathBuf::from).unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        crate::adapter::shared::assemble(
            AgentId::Codex,
            resolved_session_id,
            session_started_at,
            &project_dir,
            messages,
            file_changes,
            tool_activity,
            Vec::new(),
            0,
            TaskOverrides::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("braindump-codex-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rec(ty: &str, ts: &str, payload: Value) -> String {
        serde_json::json!({"type": ty, "timestamp": ts, "payload": payload}).to_string()
    }

    #[test]
    fn capture_reconstructs_function_call_and_cleans_user_text() {
        let root = scratch_dir("capture");
        let lines = [
            rec("session_meta", "2026-01-01T00:00:00Z", serde_json::json!({"id": "s1", "cwd": "/proj"})),
            rec(
                "event_msg",
                "2026-01-01T00:00:01Z",
                serde_json::json!({"type": "user_message", "message": "fix <context ref=\"a\">junk</context> the bug"}),
            ),
            rec(
                "response_item",
                "2026-01-01T00:00:02Z",
                serde_json::json!({"type": "function_call", "call_id": "c1", "name": "shell", "arguments": "{\"command\":\"ls\"}"}),
            ),
            rec(
                "response_item",
                "2026-01-01T00:00:03Z",
                serde_json::json!({"type": "function_call_output", "call_id": "c1", "output": "{\"exit_code\":0}"}),
            ),
        ];
        std::fs::write(root.join("rollout-s1.jsonl"), lines.join("\n")).unwrap();

        let adapter = CodexAdapter { storage_root: Some(root) };
        let captured = adapter.capture("s1").unwrap();
        assert!(captured.conversation.messages.iter().any(|m| m.content.contains("fix") && !m.content.contains("<context")));
        assert!(captured.conversation.messages.iter().any(|m| m.tool_name.as_deref() == Some("shell")));
        captured.validate().unwrap();
    }
}
