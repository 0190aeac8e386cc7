//! Gemini CLI adapter (§4.1): one JSON document per session at
//! `~/.gemini/tmp/<projectHash>/chats/session-*.json`, holding `messages[]`
//! with `parts[]`, `toolCalls[]` (whose `resultDisplay.diffStat` becomes a
//! `+X -Y` diff summary), and `thoughts[]`. Role `model` normalizes to
//! `assistant`. `projectHash` is a sha256 of the absolute project path
//! (Gemini CLI's own scheme), tried first as a direct lookup; a directory
//! scan over every hash bucket is the fallback when the caller's path
//! doesn't hash the same way Gemini CLI computed it (e.g. a symlinked or
//! differently-cased path).

use std::collections::HashMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};
use serde::Deserialize;
use serde_json::Value;

#[derive(Default)]
pub struct GeminiAdapter {
    storage_root: Option<PathBuf>,
}

impl GeminiAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        GeminiAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::Gemini))
    }

    fn project_hash(project_path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(project_path.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn chat_file_for_hash(&self, hash: &str, session_id: &str) -> Option<PathBuf> {
        let candidate = self.root()?.join(hash).join("chats").join(format!("session-{session_id}.json"));
        candidate.exists().then_some(candidate)
    }

    fn all_chat_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root() else { return Vec::new() };
        let Ok(hash_dirs) = std::fs::read_dir(&root) else { return Vec::new() };
        let mut out = Vec::new();
        for hash_dir in hash_dirs.filter_map(|e| e.ok()) {
            let chats = hash_dir.path().join("chats");
            let Ok(files) = std::fs::read_dir(&chats) else { continue };
            for f in files.filter_map(|e| e.ok()) {
                if f.path().extension().is_some_and(|e| e == "json") {
                    out.push(f.path());
                }
            }
        }
        out
    }

    fn find_chat_file(&self, session_id: &str, project_path: Option<&str>) -> Option<PathBuf> {
        if let Some(project_path) = project_path {
            let hash = Self::project_hash(project_path);
            if let Some(found) = self.chat_file_for_hash(&hash, session_id) {
                return Some(found);
            }
        }
        self.all_chat_files()
            .into_iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(&format!("session-{session_id}")))
    }
}

#[derive(Deserialize)]
struct GeminiSession {
    #[serde(rename = "projectPath")]
    project_path: Option<String>,
    #[serde(rename = "startedAt")]
    started_at: Option<String>,
    messages: Option<Vec<GeminiMessage>>,
}

#[derive(Deserialize)]
struct GeminiMessage {
    role: Option<String>,
    timestamp: Option<String>,
    parts: Option<Vec<GeminiPart>>,
    #[serde(rename = "toolCalls")]
    tool_calls: Option<Vec<GeminiToolCall>>,
    thoughts: Option<Vec<GeminiThought>>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiThought {
    subject: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct GeminiToolCall {
    name: Option<String>,
    args: Option<Value>,
    #[serde(rename = "resultDisplay")]
    result_display: Option<GeminiResultDisplay>,
}

#[derive(Deserialize)]
struct GeminiResultDisplay {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    #[serde(rename = "diffStat")]
    diff_stat: Option<GeminiDiffStat>,
    summary: Option<String>,
}

#[derive(Deserialize)]
struct GeminiDiffStat {
    model_added_lines: Option<i64>,
    model_removed_lines: Option<i64>,
}

fn diff_summary(stat: &GeminiDiffStat) -> String {
    format!("+{} -{}", stat.model_added_lines.unwrap_or(0), stat.model_removed_lines.unwrap_or(0))
}

impl Adapter for GeminiAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::Gemini
    }

    fn detect(&self) -> bool {
        self.root().is_some_and(|r| r.exists())
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for path in self.all_chat_files() {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            let Ok(session) = serde_json::from_str::<GeminiSession>(&content) else { continue };
            if let Some(filter) = project_path {
                if !session.project_path.as_deref().is_some_and(|p| paths_equal(p, filter)) {
                    continue;
                }
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.trim_start_matches("session-").to_string())
                .unwrap_or_default();
            let messages = session.messages.unwrap_or_default();
            let last_active_at = messages.last().and_then(|m| m.timestamp.as_deref()).and_then(util::parse_timestamp);
            sessions.push(SessionInfo {
                id,
                started_at: session.started_at.as_deref().and_then(util::parse_timestamp),
                last_active_at,
                message_count: Some(messages.len() as u64),
                project_path: session.project_path,
                preview: None,
            });
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let path = self
            .find_chat_file(session_id, None)
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;
        let content = std::fs::read_to_string(&path).map_err(|e| BraindumpError::ParseFailure { path: path.clone(), reason: e.to_string() })?;
        let session: GeminiSession = serde_json::from_str(&content)
            .map_err(|e| BraindumpError::ParseFailure { path: path.clone(), reason: e.to_string() })?;

        let project_path = session
            .project_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();
        let mut extra_decisions = Vec::new();
        let mut started_at = session.started_at.as_deref().and_then(util::parse_timestamp);

        for msg in session.messages.unwrap_or_default() {
            let role = util::normalize_role(msg.role.as_deref().unwrap_or(""));
            let ts = msg.timestamp.as_deref().and_then(util::parse_timestamp);
            started_at.get_or_insert(ts.unwrap_or_else(chrono::Utc::now));

            for part in msg.parts.into_iter().flatten() {
                if let Some(text) = &part.text {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: ts });
                    }
                }
            }

            for thought in msg.thoughts.into_iter().flatten() {
                let combined = [thought.subject, thought.description].into_iter().flatten().collect::<Vec<_>>().join(": ");
                if !combined.trim().is_empty() {
                    extra_decisions.push(combined);
                }
            }

            for call in msg.tool_calls.into_iter().flatten() {
                let tool_name = call.name.unwrap_or_else(|| "unknown".to_string());
                let class = util::classify_tool(&tool_name);
                let mut diff = None;
                if let Some(display) = &call.result_display {
                    if let Some(stat) = &display.diff_stat {
                        diff = Some(diff_summary(stat));
                    }
                    if let Some(file_name) = &display.file_name {
                        util::upsert_file_change(
                            &mut file_changes,
                            &mut file_change_index,
                            file_name.clone(),
                            util::infer_change_type(&tool_name),
                            diff.clone(),
                        );
                    }
                }
                let sample = call
                    .result_display
                    .as_ref()
                    .and_then(|d| d.summary.clone())
                    .unwrap_or_else(|| util::truncate(&serde_json::to_string(&call.args).unwrap_or_default(), 150));
                tool_activity.record(class, sample.clone());
                messages.push(ConversationMessage { role: Role::Tool, content: sample, tool_name: Some(tool_name), timestamp: ts });
            }
        }

        crate::adapter::shared::assemble(
            AgentId::Gemini,
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

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("braindump-gemini-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_session(root: &PathBuf, hash: &str, session_id: &str, body: &Value) {
        let chats = root.join(hash).join("chats");
        std::fs::create_dir_all(&chats).unwrap();
        std::fs::write(chats.join(format!("session-{session_id}.json")), body.to_string()).unwrap();
    }

    #[test]
    fn capture_converts_diff_stat_to_plus_minus_summary() {
        let root = scratch_dir("diffstat");
        let body = serde_json::json!({
            "projectPath": "/repo",
            "startedAt": "2026-01-01T00:00:00Z",
            "messages": [{
                "role": "model",
                "timestamp": "2026-01-01T00:00:05Z",
                "parts": [{"text": "Updated the file."}],
                "toolCalls": [{
                    "name": "write_file",
                    "args": {"path": "src/lib.rs"},
                    "resultDisplay": {
                        "fileName": "src/lib.rs",
                        "diffStat": {"model_added_lines": 5, "model_removed_lines": 2}
                    }
                }]
            }]
        });
        write_session(&root, "abc123", "sess-7", &body);

        let adapter = GeminiAdapter { storage_root: Some(root) };
        let captured = adapter.capture("sess-7").unwrap();
        let fc = captured.file_changes.iter().find(|f| f.path == "src/lib.rs").unwrap();
        assert_eq!(fc.diff.as_deref(), Some("+5 -2"));
        captured.validate().unwrap();
    }

    #[test]
    fn model_role_normalizes_to_assistant() {
        let root = scratch_dir("role");
        let body = serde_json::json!({
            "projectPath": "/repo",
            "messages": [{"role": "model", "timestamp": "2026-01-01T00:00:00Z", "parts": [{"text": "hi"}]}]
        });
        write_session(&root, "h1", "sess-1", &body);
        let adapter = GeminiAdapter { storage_root: Some(root) };
        let captured = adapter.capture("sess-1").unwrap();
        assert_eq!(captured.conversation.messages[0].role, Role::Assistant);
    }
}
