use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BraindumpError;

/// The closed enumeration of seven agents braindump can capture a session
/// from. Serialized as the kebab-case identifiers used throughout the
/// storage paths and the CLI's `--source`/`--target` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentId {
    ClaudeCode,
    Cursor,
    Codex,
    Copilot,
    Gemini,
    #[serde(rename = "opencode")]
    OpenCode,
    Droid,
}

impl AgentId {
    pub const ALL: [AgentId; 7] = [
        AgentId::ClaudeCode,
        AgentId::Cursor,
        AgentId::Codex,
        AgentId::Copilot,
        AgentId::Gemini,
        AgentId::OpenCode,
        AgentId::Droid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::ClaudeCode => "claude-code",
            AgentId::Cursor => "cursor",
            AgentId::Codex => "codex",
            AgentId::Copilot => "copilot",
            AgentId::Gemini => "gemini",
            AgentId::OpenCode => "opencode",
            AgentId::Droid => "droid",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = BraindumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" => Ok(AgentId::ClaudeCode),
            "cursor" => Ok(AgentId::Cursor),
            "codex" => Ok(AgentId::Codex),
            "copilot" => Ok(AgentId::Copilot),
            "gemini" => Ok(AgentId::Gemini),
            "opencode" => Ok(AgentId::OpenCode),
            "droid" => Ok(AgentId::Droid),
            other => Err(BraindumpError::Other(format!("unknown agent identifier: {other}"))),
        }
    }
}

/// The closed set of conversation roles. Unrecognized source-role strings
/// never construct this type directly; callers go through
/// `util::normalize_role` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeType {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: FileChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Canonical tool class name. Adapters map a raw tool/function name (e.g.
/// Claude's `Edit`, Codex's `shell`) onto one of these five buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolClass {
    Edit,
    Read,
    Bash,
    #[serde(rename = "MCP")]
    Mcp,
    Tool,
}

impl fmt::Display for ToolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolClass::Edit => "Edit",
            ToolClass::Read => "Read",
            ToolClass::Bash => "Bash",
            ToolClass::Mcp => "MCP",
            ToolClass::Tool => "Tool",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolActivitySummary {
    pub tool_class: ToolClass,
    pub count: u32,
    pub samples: Vec<String>,
}

/// One entry of an adapter's `listSessions` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Sort a session list by `lastActiveAt` descending, ties broken by
/// `startedAt` descending, missing values sorting last.
pub fn sort_sessions_by_recency(sessions: &mut [SessionInfo]) {
    use std::cmp::Reverse;
    sessions.sort_by_key(|s| Reverse((s.last_active_at, s.started_at)));
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_log: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_tree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub description: String,
    pub completed: Vec<String>,
    pub remaining: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<String>,
    pub blockers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationBlock {
    pub message_count: u64,
    pub estimated_tokens: u64,
    pub messages: Vec<ConversationMessage>,
}

pub const SCHEMA_VERSION: &str = "1.0";

/// The canonical record every adapter's `capture` produces, schema version
/// `"1.0"`. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedSession {
    pub schema_version: String,
    pub source: AgentId,
    pub captured_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    pub project: ProjectContext,
    pub conversation: ConversationBlock,
    pub file_changes: Vec<FileChange>,
    pub decisions: Vec<String>,
    pub blockers: Vec<String>,
    pub task: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_activity: Option<Vec<ToolActivitySummary>>,
}

impl CapturedSession {
    /// Enforces the §3 invariants. Called immediately after an adapter
    /// produces a record; downstream consumers never see an unvalidated one.
    pub fn validate(&self) -> Result<(), BraindumpError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(BraindumpError::SchemaInvalid(format!(
                "unsupported schema version: {}",
                self.schema_version
            )));
        }
        if self.conversation.message_count != self.conversation.messages.len() as u64 {
            return Err(BraindumpError::SchemaInvalid(
                "conversation.messageCount does not match messages.len()".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(self.file_changes.len());
        for fc in &self.file_changes {
            if !seen.insert(fc.path.as_str()) {
                return Err(BraindumpError::SchemaInvalid(format!(
                    "duplicate file-change path: {}",
                    fc.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> CapturedSession {
        CapturedSession {
            schema_version: SCHEMA_VERSION.to_string(),
            source: AgentId::ClaudeCode,
            captured_at: DateTime::from_timestamp(0, 0).unwrap(),
            session_id: "sess-1".to_string(),
            session_started_at: None,
            project: ProjectContext {
                path: "/tmp/project".to_string(),
                ..Default::default()
            },
            conversation: ConversationBlock {
                message_count: 1,
                estimated_tokens: 3,
                messages: vec![ConversationMessage {
                    role: Role::User,
                    content: "hi".to_string(),
                    tool_name: None,
                    timestamp: None,
                }],
            },
            file_changes: vec![],
            decisions: vec![],
            blockers: vec![],
            task: TaskState::default(),
            tool_activity: None,
        }
    }

    #[test]
    fn agent_id_round_trips_through_str() {
        for agent in AgentId::ALL {
            let parsed: AgentId = agent.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), agent.as_str());
        }
    }

    #[test]
    fn agent_id_rejects_unknown() {
        assert!("not-an-agent".parse::<AgentId>().is_err());
    }

    #[test]
    fn agent_id_serializes_to_canonical_identifier() {
        for agent in AgentId::ALL {
            let json = serde_json::to_string(&agent).unwrap();
            assert_eq!(json, format!("\"{}\"", agent.as_str()));
            let back: AgentId = serde_json::from_str(&json).unwrap();
            assert_eq!(back, agent);
        }
    }

    #[test]
    fn validate_accepts_well_formed_session() {
        assert!(sample_session().validate().is_ok());
    }

    #[test]
    fn validate_rejects_message_count_mismatch() {
        let mut s = sample_session();
        s.conversation.message_count = 5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_wrong_schema_version() {
        let mut s = sample_session();
        s.schema_version = "0.9".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_file_change_paths() {
        let mut s = sample_session();
        s.file_changes.push(FileChange {
            path: "src/a.ts".to_string(),
            change_type: FileChangeType::Created,
            diff: None,
            language: Some("ts".to_string()),
        });
        s.file_changes.push(FileChange {
            path: "src/a.ts".to_string(),
            change_type: FileChangeType::Modified,
            diff: None,
            language: Some("ts".to_string()),
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn sort_sessions_orders_by_last_active_descending_missing_last() {
        let mut sessions = vec![
            SessionInfo {
                id: "a".to_string(),
                started_at: None,
                last_active_at: None,
                message_count: None,
                project_path: None,
                preview: None,
            },
            SessionInfo {
                id: "b".to_string(),
                started_at: None,
                last_active_at: DateTime::from_timestamp(200, 0),
                message_count: None,
                project_path: None,
                preview: None,
            },
            SessionInfo {
                id: "c".to_string(),
                started_at: None,
                last_active_at: DateTime::from_timestamp(100, 0),
                message_count: None,
                project_path: None,
                preview: None,
            },
        ];
        sort_sessions_by_recency(&mut sessions);
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn captured_session_serializes_with_serde() {
        let s = sample_session();
        let json = serde_json::to_string(&s).unwrap();
        let back: CapturedSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, s.session_id);
        assert_eq!(back.conversation.messages.len(), 1);
    }
}
