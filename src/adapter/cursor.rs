//! Cursor adapter (§4.1): "a relational store under a platform-specific
//! `workspaceStorage/` directory plus a global database; messages are
//! stored as rows with JSON blobs." Each workspace gets its own
//! `state.vscdb` (a key-value `ItemTable`) holding the chat/composer data
//! under a handful of well-known keys; a `global` database alongside the
//! per-workspace ones tracks which workspace folder each one belongs to.

use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::shared::{TaskOverrides, ToolActivityBuilder};
use crate::adapter::Adapter;
use crate::ast::*;
use crate::error::{BraindumpError, Result};
use crate::registry;
use crate::util::{self, paths_equal};

const COMPOSER_DATA_KEY: &str = "composer.composerData";
const BUBBLE_KEY_PREFIX: &str = "bubbleId";

#[derive(Default)]
pub struct CursorAdapter {
    storage_root: Option<PathBuf>,
}

impl CursorAdapter {
    pub fn with_storage_root(root: PathBuf) -> Self {
        CursorAdapter { storage_root: Some(root) }
    }

    fn root(&self) -> Option<PathBuf> {
        self.storage_root.clone().or_else(|| registry::base_storage_path(AgentId::Cursor))
    }

    fn workspace_storage_dir(&self) -> Option<PathBuf> {
        self.root().map(|r| r.join("workspaceStorage"))
    }

    fn each_workspace_db(&self) -> Vec<PathBuf> {
        let Some(dir) = self.workspace_storage_dir() else { return Vec::new() };
        let Ok(entries) = std::fs::read_dir(&dir) else { return Vec::new() };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().join("state.vscdb"))
            .filter(|p| p.exists())
            .collect()
    }

    fn open(&self, path: &PathBuf) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn find_db_for_session(&self, session_id: &str) -> Option<PathBuf> {
        for db in self.each_workspace_db() {
            if let Ok(conn) = self.open(&db) {
                if composer_exists(&conn, session_id) {
                    return Some(db);
                }
            }
        }
        None
    }
}

fn get_item(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM ItemTable WHERE key = ?1", [key], |row| row.get(0)).ok()
}

#[derive(Deserialize, Default)]
struct ComposerDataStore {
    #[serde(rename = "allComposers")]
    all_composers: Vec<ComposerEntry>,
}

#[derive(Deserialize)]
struct ComposerEntry {
    #[serde(rename = "composerId")]
    composer_id: String,
    name: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<i64>,
    #[serde(rename = "lastUpdatedAt")]
    last_updated_at: Option<i64>,
}

fn composer_store(conn: &Connection) -> ComposerDataStore {
    get_item(conn, COMPOSER_DATA_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn composer_exists(conn: &Connection, session_id: &str) -> bool {
    composer_store(conn).all_composers.iter().any(|c| c.composer_id == session_id)
}

#[derive(Deserialize)]
struct Bubble {
    #[serde(rename = "type")]
    bubble_type: Option<i64>,
    text: Option<String>,
    #[serde(rename = "toolFormerData")]
    tool_data: Option<ToolFormerData>,
}

#[derive(Deserialize)]
struct ToolFormerData {
    name: Option<String>,
    #[serde(rename = "rawArgs")]
    raw_args: Option<Value>,
    result: Option<Value>,
}

fn load_bubbles(conn: &Connection, composer_id: &str) -> Vec<Bubble> {
    let prefix = format!("{BUBBLE_KEY_PREFIX}:{composer_id}:%");
    let mut stmt = match conn.prepare("SELECT key, value FROM ItemTable WHERE key LIKE ?1") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let rows = stmt.query_map([&prefix], |row| {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok((key, value))
    });
    let Ok(rows) = rows else { return Vec::new() };
    let mut keyed: Vec<(String, Bubble)> = Vec::new();
    for row in rows.flatten() {
        let (key, value) = row;
        if let Ok(bubble) = serde_json::from_str::<Bubble>(&value) {
            keyed.push((key, bubble));
        }
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, b)| b).collect()
}

/// Cursor's bubble `type`: 1 = user, 2 = assistant.
fn role_from_bubble_type(bubble_type: Option<i64>) -> Role {
    match bubble_type {
        Some(1) => Role::User,
        _ => Role::Assistant,
    }
}

impl Adapter for CursorAdapter {
    fn agent_id(&self) -> AgentId {
        AgentId::Cursor
    }

    fn detect(&self) -> bool {
        !self.each_workspace_db().is_empty()
    }

    fn list_sessions(&self, project_path: Option<&str>) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for db in self.each_workspace_db() {
            let Ok(conn) = self.open(&db) else { continue };
            let workspace_path = get_item(&conn, "debug.workspaceFolder")
                .or_else(|| get_item(&conn, "workbench.rootPath"));
            for composer in composer_store(&conn).all_composers {
                if let Some(filter) = project_path {
                    if !workspace_path.as_deref().is_some_and(|p| paths_equal(p, filter)) {
                        continue;
                    }
                }
                let message_count = load_bubbles(&conn, &composer.composer_id).len() as u64;
                sessions.push(SessionInfo {
                    id: composer.composer_id,
                    started_at: composer.created_at.and_then(util::timestamp_from_millis),
                    last_active_at: composer.last_updated_at.and_then(util::timestamp_from_millis),
                    message_count: Some(message_count),
                    project_path: workspace_path.clone(),
                    preview: composer.name.map(|n| util::truncate(&n, 200)),
                });
            }
        }
        sort_sessions_by_recency(&mut sessions);
        Ok(sessions)
    }

    fn capture(&self, session_id: &str) -> Result<CapturedSession> {
        let db_path = self
            .find_db_for_session(session_id)
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;
        let conn = self.open(&db_path)?;

        let project_path = get_item(&conn, "debug.workspaceFolder")
            .or_else(|| get_item(&conn, "workbench.rootPath"))
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let composer = composer_store(&conn)
            .all_composers
            .into_iter()
            .find(|c| c.composer_id == session_id)
            .ok_or_else(|| BraindumpError::SessionNotFound(session_id.to_string()))?;

        let mut messages = Vec::new();
        let mut file_changes = Vec::new();
        let mut file_change_index = HashMap::new();
        let mut tool_activity = ToolActivityBuilder::default();

        for bubble in load_bubbles(&conn, session_id) {
            let role = role_from_bubble_type(bubble.bubble_type);
            if let Some(text) = &bubble.text {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    messages.push(ConversationMessage { role, content: trimmed.to_string(), tool_name: None, timestamp: None });
                }
            }
            if let Some(tool) = &bubble.tool_data {
                let tool_name = tool.name.clone().unwrap_or_else(|| "unknown".to_string());
                let class = util::classify_tool(&tool_name);
                if let Some(args) = &tool.raw_args {
                    if let Some(path) = args.get("path").or_else(|| args.get("file_path")).and_then(Value::as_str) {
                        util::upsert_file_change(
                            &mut file_changes,
                            &mut file_change_index,
                            path.to_string(),
                            util::infer_change_type(&tool_name),
                            None,
                        );
                    }
                }
                let sample = util::truncate(&serde_json::to_string(&tool.raw_args).unwrap_or_default(), 150);
                tool_activity.record(class, sample.clone());
                messages.push(ConversationMessage { role: Role::Tool, content: sample, tool_name: Some(tool_name.clone()), timestamp: None });
                if let Some(result) = &tool.result {
                    let summary = util::truncate(&serde_json::to_string(result).unwrap_or_default(), 150);
                    messages.push(ConversationMessage { role: Role::Tool, content: summary, tool_name: Some(tool_name), timestamp: None });
                }
            }
        }

        crate::adapter::shared::assemble(
            AgentId::Cursor,
            session_id.to_string(),
            composer.created_at.and_then(util::timestamp_from_millis),
            &project_path,
            messages,
            file_changes,
            tool_activity,
            Vec::new(),
            0,
            TaskOverrides::default(),
        )
    }
}
