//! opencode adapter (§4.1): primary is the relational store `opencode.db`
//! (tables `session`, `project`, `message`, `part`, with `part.data` JSON
//! payloads for part types `text` and `tool-invocation`); when the database
//! fails to open or returns nothing, a directory-tree fallback under
//! `storage/{session,project,message,part}/…/*.json` is consulted instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal, timestamp_from_millis};

#[derive(Default)]
pub struct OpenCodeAdapter {
    storage_root: Option<PathBuf>,
}

impl OpenCodeAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        OpenCodeAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::OpenCode))
    }

    fn db_path(&self) -> Option<PathBuf> {
        self.root().map(|r| r.join("opencode.db"))
    }

    fn fallback_storage_dir(&self) -> Option<PathBuf> {
        self.root().map(|r| r.join("storage"))
    }

    fn open_db(&self) -> Option<Connection> {
        let path = self.db_path()?;
        Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()
    }
}

struct DbSession {
    id: String,
    directory: Option<String>,
    created_ms: Option<i64>,
    updated_ms: Option<i64>,
}

struct DbMessage {
    id: String,
    role: String,
    created_ms: Option<i64>,
    tokens_input: u64,
    tokens_output: u64,
    tokens_cache_read: u64,
    tokens_cache_write: u64,
}

fn list_db_sessions(conn: &Connection) -> rusqlite::Result<Vec<DbSession>> {
    let mut stmt = conn.prepare("SELECT id, directory, time_created, time_updated FROM session ORDER BY time_updated DESC")?;
    let rows = stmt.query_map([], |row| {
        Ok(DbSession {
            id: row.get(0)?,
            directory: row.get(1)?,
            created_ms: row.get(2)?,
            updated_ms: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn message_count_for(conn: &Connection, session_id: &str) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM message WHERE session_id = ?1", [session_id], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
}

fn load_messages(conn: &Connection, session_id: &str) -> rusqlite::Result<Vec<DbMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, time_created, tokens_input, tokens_output, tokens_cache_read, tokens_cache_write \
         FROM message WHERE session_id = ?1 ORDER BY time_created",
    )?;
    let rows = stmt.query_map([session_id], |row| {
        Ok(DbMessage {
            id: row.get(0)?,
            role: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            created_ms: row.get(2)?,
            tokens_input: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
            tokens_output: row.get::<_, Option<i64>>(4)?.unwrap_or(0).max(0) as u64,
            tokens_cache_read: row.get::<_, Option<i64>>(5)?.unwrap_or(0).max(0) as u64,
            tokens_cache_write: row.get::<_, Option<i64>>(6)?.unwrap_or(0).max(0) as u64,
        })
    })?;
    rows.collect()
}

fn load_parts(conn: &Connection, message_id: &str) -> rusqlite::Result<Vec<(String, Value)>> {
    let mut stmt = conn.prepare("SELECT type, data FROM part WHERE message_id = ?1")?;
    let rows = stmt.query_map([message_id], |row| {
        let part_type: String = row.get(0)?;
        let data_str: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
        Ok((part_type, data_str))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (part_type, data_str) = row?;
        let data = serde_json::from_str(&data_str).unwrap_or(Value::Null);
        out.push((part_type, data));
    }
    Ok(out)
}

fn capture_from_db(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<CaptureParts>> {
    let directory: Option<String> =
        conn.query_row("SELECT directory FROM session WHERE id = ?1", [session_id], |row| row.get(0)).ok();
    let db_messages = load_messages(conn, session_id)?;
    if db_messages.is_empty() {
        return Ok(None);
    }

    let mut messages = Vec::new();
    let mut file_changes = Vec::new();
    let mut file_change_index = HashMap::new();
    let mut tool_activity = ToolActivityBuilder::default();
    let mut usage_tokens = 0u64;
    let mut started_at = None;

    for msg in &db_messages {
        let ts = msg.created_ms.and_then(timestamp_from_millis);
        started_at.get_or_insert(ts.unwrap_or_else(Utc::now));
        usage_tokens += msg.tokens_input + msg.tokens_output + msg.tokens_cache_write;

        let parts = load_parts(conn, &msg.id).unwrap_or_default();
        let role = util::normalize_role(&msg.role);

        for (part_type, data) in parts {
            match part_type.as_str() {
                "text" => {
                    if let Some(text) = data.get("text").and_then(Value::as_str) {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: ts });
                        }
                    }
                }
                "tool-invocation" => {
                    let tool_name = data.get("tool").and_then(Value::as_str).unwrap_or("unknown").to_string();
                    let class = util::classify_tool(&tool_name);
                    if let Some(file_path) = data.get("input").and_then(|i| i.get("filePath")).and_then(Value::as_str) {
                        util::upsert_file_change(
                            &mut file_changes,
                            &mut file_change_index,
                            file_path.to_string(),
                            util::infer_change_type(&tool_name),
                            None,
                        );
                    }
                    let summary = util::truncate(&serde_json::to_string(&data).unwrap_or_default(), 150);
                    tool_activity.record(class, summary.clone());
                    messages.push(ConversationMessage { role: Role::Tool, content: summary, tool_name: Some(tool_name), timestamp: ts });
                }
                _ => {}
            }
        }
    }

    Ok(Some(CaptureParts { directory, started_at, messages, file_changes, tool_activity, usage_tokens }))
}

struct CaptureParts {
    directory: Option<String>,
    started_at: Option<DateTime<Utc>>,
    messages: Vec<ConversationMessage>,
    file_changes: Vec<FileChange>,
    tool_activity: ToolActivityBuilder,
    usage_tokens: u64,
}

// ---- Fallback: directory-tree storage ----

#[derive(Deserialize)]
struct FsSession {
    directory: Option<String>,
    time: Option<FsTime>,
}

#[derive(Deserialize)]
struct FsTime {
    created: Option<f64>,
}

#[derive(Deserialize)]
struct FsMessage {
    id: String,
    role: Option<String>,
    time: Option<FsMsgTime>,
    tokens: Option<FsTokens>,
}

#[derive(Deserialize)]
struct FsMsgTime {
    created: Option<f64>,
    completed: Option<f64>,
}

#[derive(Deserialize)]
struct FsTokens {
    input: Option<u64>,
    output: Option<u64>,
    cache: Option<FsCache>,
}

#[derive(Deserialize)]
struct FsCache {
    write: Option<u64>,
}

#[derive(Deserialize)]
struct FsPart {
    #[serde(rename = "type")]
    part_type: Option<String>,
    text: Option<String>,
    tool: Option<String>,
    state: Option<Value>,
}

fn find_fs_session(storage_dir: &Path, session_id: &str) -> Option<FsSession> {
    let session_root = storage_dir.join("session");
    for entry in std::fs::read_dir(&session_root).ok()?.filter_map(|e| e.ok()) {
        let candidate = entry.path().join(format!("{session_id}.json"));
        if candidate.exists() {
            let content = std::fs::read_to_string(candidate).ok()?;
            return serde_json::from_str(&content).ok();
        }
    }
    None
}

fn load_fs_messages(storage_dir: &Path, session_id: &str) -> Vec<FsMessage> {
    let dir = storage_dir.join("message").join(session_id);
    let Ok(entries) = std::fs::read_dir(&dir) else { return Vec::new() };
    let mut messages: Vec<FsMessage> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| std::fs::read_to_string(e.path()).ok())
        .filter_map(|content| serde_json::from_str(&content).ok())
        .collect();
    messages.sort_by(|a: &FsMessage, b: &FsMessage| {
        let ta = a.time.as_ref().and_then(|t| t.created).unwrap_or(0.0);
        let tb = b.time.as_ref().and_then(|t| t.created).unwrap_or(0.0);
        ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
    });
    messages
}

fn load_fs_parts(storage_dir: &Path, message_id: &str) -> Vec<FsPart> {
    let dir = storage_dir.join("part").join(message_id);
    let Ok(entries) = std::fs::read_dir(&dir) else { return Vec::new() };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| std::fs::read_to_string(e.path()).ok())
        .filter_map(|content| serde_json::from_str(&content).ok())
        .collect()
}

fn capture_from_fs(storage_dir: &Path, session_id: &str) -> Option<CaptureParts> {
    let session = find_fs_session(storage_dir, session_id);
    let fs_messages = load_fs_messages(storage_dir, session_id);
    if fs_messages.is_empty() {
        return None;
    }

    let mut messages = Vec::new();
    let mut file_changes = Vec::new();
    let mut file_change_index = HashMap::new();
    let mut tool_activity = ToolActivityBuilder::default();
    let mut usage_tokens = 0u64;
    let mut started_at = None;

    for msg in &fs_messages {
        let ts = msg.time.as_ref().and_then(|t| t.completed.or(t.created)).and_then(|ms| timestamp_from_millis(ms as i64));
        started_at.get_or_insert(ts.unwrap_or_else(Utc::now));
        if let Some(tokens) = &msg.tokens {
            usage_tokens += tokens.input.unwrap_or(0) + tokens.output.unwrap_or(0);
            usage_tokens += tokens.cache.as_ref().and_then(|c| c.write).unwrap_or(0);
        }

        let role = util::normalize_role(msg.role.as_deref().unwrap_or(""));
        for part in load_fs_parts(storage_dir, &msg.id) {
            match part.part_type.as_deref().unwrap_or("") {
                "text" => {
                    if let Some(text) = &part.text {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() && !trimmed.starts_with("<file>") {
                            messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: ts });
                        }
                    }
                }
                "tool" => {
                    let tool_name = part.tool.clone().unwrap_or_else(|| "unknown".to_string());
                    let class = util::classify_tool(&tool_name);
                    if let Some(file_path) =
                        part.state.as_ref().and_then(|s| s.get("input")).and_then(|i| i.get("filePath")).and_then(Value::as_str)
                    {
                        util::upsert_file_change(
                            &mut file_changes,
                            &mut file_change_index,
                            file_path.to_string(),
                            util::infer_change_type(&tool_name),
                            None,
                        );
                    }
                    let desc = part
                        .state
                        .as_ref()
                        .and_then(|s| s.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    let summary = util::truncate(desc, 150);
                    tool_activity.record(class, summary.clone());
                    messages.push(ConversationMessage { role: Role::Tool, content: summary, tool_name: Some(tool_name), timestamp: ts });
                }
                _ => {}
            }
        }
    }

    Some(CaptureParts {
        directory: session.and_then(|s| s.directory),
        started_at,
        messages,
        file_changes,
        tool_activity,
        usage_tokens,
    })
}

impl Adapter for OpenCodeAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::OpenCode
    }

    fn detect(&self) -> bool {
        self.db_path().is_some_and(|p| p.exists()) || self.fallback_storage_dir().is_some_and(|p| p.exists())
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        if let Some(conn) = self.open_db() {
            if let Ok(db_sessions) = list_db_sessions(&conn) {
                for s in db_sessions {
                    let message_count = message_count_for(&conn, &s.id).ok();
                    sessions.push(SessionInfo {
                        id: s.id,
                        started_at: s.created_ms.and_then(timestamp_from_millis),
                        last_active_at: s.updated_ms.and_then(timestamp_from_millis),
                        message_count,
                        project_path: s.directory,
                        preview: None,
                    });
                }
            }
        }
        if sessions.is_empty() {
            if let Some(storage_dir) = self.fallback_storage_dir() {
                let session_root = storage_dir.join("session");
                if let Ok(project_dirs) = std::fs::read_dir(&session_root) {
                    for project_dir in project_dirs.filter_map(|e| e.ok()) {
                        let Ok(files) = std::fs::read_dir(project_dir.path()) else { continue };
                        for file in files.filter_map(|e| e.ok()) {
                            let path = file.path();
                            if path.extension().is_some_and(|e| e == "json") {
                                let id = path.file_stem().unwrap().to_string_lossy().to_string();
                                if let Ok(content) = std::fs::read_to_string(&path) {
                                    if let Ok(session) = serde_json::from_str::<FsSession>(&content) {
                                        sessions.push(SessionInfo {
                                            id,
                                            started_at: session.time.as_ref().and_then(|t| t.created).and_then(|ms| timestamp_from_millis(ms as i64)),
                                            last_active_at: None,
                                            message_count: None,
                                            project_path: session.directory,
                                            preview: None,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        if let Some(filter) = project_path {
            sessions.retain(|s| s.project_path.as_deref().is_some_and(|p| paths_equal(p, filter)));
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let parts = self
            .open_db()
            .and_then(|conn| capture_from_db(&conn, session_id).ok().flatten())
            .or_else(|| self.fallback_storage_dir().and_then(|dir| capture_from_fs(&dir, session_id)))
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;

        let project_dir = parts.directory.map(PathBuf::from).unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        crate::adapter::shared::assemble(
            AgentId::OpenCode,
            session_id.to_string(),
            parts.started_at,
            &project_dir,
            parts.messages,
            parts.file_changes,
            parts.tool_activity,
            Vec::new(),
            parts.usage_tokens,
            TaskOverrides::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("braindump-opencode-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn falls_back_to_directory_tree_when_db_is_corrupt() {
        let root = scratch_dir("fallback");
        std::fs::write(root.join("opencode.db"), b"not a sqlite file").unwrap();

        let storage = root.join("storage");
        std::fs::create_dir_all(storage.join("session/proj1")).unwrap();
        std::fs::write(
            storage.join("session/proj1/json-fallback.json"),
            serde_json::json!({"directory": "/repo", "time": {"created": 1000.0}}).to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(storage.join("message/json-fallback")).unwrap();
        std::fs::write(
            storage.join("message/json-fallback/m1.json"),
            serde_json::json!({"id": "m1", "role": "assistant", "time": {"created": 1000.0}}).to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(storage.join("part/m1")).unwrap();
        std::fs::write(
            storage.join("part/m1/p1.json"),
            serde_json::json!({"type": "text", "text": "stored assistant reply"}).to_string(),
        )
        .unwrap();

        let adapter = OpenCodeAdapter { storage_root: Some(root) };
        let captured = adapter.capture("json-fallback").unwrap();
        assert!(captured.conversation.messages.iter().any(|m| m.content.contains("stored assistant reply")));
        captured.validate().unwrap();
    }

    #[test]
    fn capture_unknown_session_fails() {
        let root = scratch_dir("missing");
        std::fs::create_dir_all(&root).unwrap();
        let adapter = OpenCodeAdapter { storage_root: Some(root) };
        assert!(matches!(adapter.capture("nope"), Err(BraindumpError::SessionNotFound(_))));
    }
}
