use std::path::PathBuf;

use crate::ast::AgentId;

/// Error taxonomy per the error-handling design: each variant is a trigger
/// condition, not a wrapper around a single library's error type. Variants
/// marked "surfaced" propagate to the CLI; the rest are caught at their call
/// site and degrade to an empty field, a log line, or a warning.
#[derive(Debug, thiserror::Error)]
pub enum BraindumpError {
    #[error("no agent detected any session storage")]
    NotDetected,

    #[error("no sessions found for {agent}")]
    NoSessions { agent: AgentId },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("failed to parse session artifact at {path}: {reason}")]
    ParseFailure { path: PathBuf, reason: String },

    #[error("captured session failed schema validation: {0}")]
    SchemaInvalid(String),

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("adapter tick failed for {agent}: {reason}")]
    AdapterTick { agent: AgentId, reason: String },

    #[error("enrichment step failed: {0}")]
    EnrichmentFailure(String),

    #[error("clipboard unavailable: {0}")]
    ClipboardUnavailable(String),

    #[error("failed to launch target tool: {0}")]
    LaunchFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BraindumpError>;
