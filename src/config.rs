//! Configuration loading and management for braindump.
//!
//! Configuration lives in `~/.config/braindump/config.toml` and is purely
//! optional. When absent, every option falls back to a sensible default so
//! that braindump works out of the box with zero setup.
//!
//! Config values flow into the rest of the system through two paths:
//! 1. **`Config::load()`** — used at CLI startup to fill in defaults before
//!    a source/target is resolved.
//! 2. **`get_value` / `set_value` / `unset_value`** — used by the
//!    `braindump get/set/unset` subcommands to read and write individual
//!    keys from the live file.
//!
//! `toml_edit` is used instead of plain `toml` for the mutation helpers
//! because it preserves comments and formatting in the user's config file.

use std::path::PathBuf;

use serde::Deserialize;
use toml_edit::DocumentMut;

use crate::ast::AgentId;
use crate::error::BraindumpError;

/// Per-agent storage path overrides from `[sources]`. Each field is
/// `Option<String>` so an absent key means "use the registry default".
#[derive(Debug, Default, Deserialize)]
pub struct SourcesConfig {
    pub claude_code: Option<String>,
    pub cursor: Option<String>,
    pub codex: Option<String>,
    pub copilot: Option<String>,
    pub gemini: Option<String>,
    pub opencode: Option<String>,
    pub droid: Option<String>,
}

impl SourcesConfig {
    pub fn path_for(&self, agent: AgentId) -> Option<PathBuf> {
        let raw = match agent {
            AgentId::ClaudeCode => &self.claude_code,
            AgentId::Cursor => &self.cursor,
            AgentId::Codex => &self.codex,
            AgentId::Copilot => &self.copilot,
            AgentId::Gemini => &self.gemini,
            AgentId::OpenCode => &self.opencode,
            AgentId::Droid => &self.droid,
        };
        raw.as_deref().map(expand_tilde)
    }
}

/// Top-level config deserialized from `~/.config/braindump/config.toml`.
/// All fields are optional; a config file with a single key is valid.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Default output directory for `.handoff/` artifacts.
    pub output: Option<String>,
    /// Default handoff output format: `"markdown"` or `"json"`.
    pub format: Option<String>,
    /// Default watcher polling interval, in milliseconds.
    pub watch_interval_ms: Option<u64>,
    /// Default token budget override for the compression engine.
    pub token_budget: Option<u64>,
    pub sources: Option<SourcesConfig>,
}

impl Config {
    /// Load config from `~/.config/braindump/config.toml`. Returns
    /// `Config::default()` silently when the file is absent or malformed —
    /// braindump is designed to be zero-config, so this never errors.
    pub fn load() -> Config {
        let Some(home) = dirs::home_dir() else {
            return Config::default();
        };
        let path = home.join(".config/braindump/config.toml");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// Resolve the configured output path, expanding a leading `~`.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output.as_deref().map(expand_tilde)
    }

    pub fn source_path_for(&self, agent: AgentId) -> Option<PathBuf> {
        self.sources.as_ref().and_then(|s| s.path_for(agent))
    }
}

/// Print a config value by dotted key (e.g. `"sources.cursor"` or `"output"`).
pub fn get_value(key: &str) -> Result<(), BraindumpError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| BraindumpError::Other(format!("Failed to parse config: {e}")))?;

    match resolve_key(&doc, key) {
        Some(item) => {
            println!("{}", format_item(item));
            Ok(())
        }
        None => Err(BraindumpError::Other(format!("Key not found: {key}"))),
    }
}

/// Write a config value by dotted key (e.g. `braindump set watch_interval_ms 5000`).
/// Values are type-inferred from their string representation.
pub fn set_value(key: &str, value: &str) -> Result<(), BraindumpError> {
    let content = read_config_file().unwrap_or_default();
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| BraindumpError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        if !table.contains_key(segment) {
            table.insert(segment, toml_edit::Item::Table(toml_edit::Table::new()));
        }
        table = table[segment]
            .as_table_mut()
            .ok_or_else(|| BraindumpError::Other(format!("'{segment}' is not a table")))?;
    }

    let toml_value = infer_value(value);
    table.insert(&field, toml_edit::Item::Value(toml_value));

    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Remove a config value by dotted key. Errors if the key does not exist.
pub fn unset_value(key: &str) -> Result<(), BraindumpError> {
    let content = read_config_file()?;
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| BraindumpError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        table = table
            .get_mut(segment)
            .and_then(|item| item.as_table_mut())
            .ok_or_else(|| BraindumpError::Other(format!("Key not found: {key}")))?;
    }

    if table.remove(&field).is_none() {
        return Err(BraindumpError::Other(format!("Key not found: {key}")));
    }

    write_config_file(&doc.to_string())?;
    Ok(())
}

/// Print all config values in `key = value` format.
pub fn list_values() -> Result<(), BraindumpError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| BraindumpError::Other(format!("Failed to parse config: {e}")))?;

    let mut entries = Vec::new();
    collect_entries(doc.as_table(), "", &mut entries);

    if entries.is_empty() {
        eprintln!("No config values set.");
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

/// Write the default config template. Errors if the file already exists.
pub fn init() -> Result<(), BraindumpError> {
    let path = config_path()?;
    if path.exists() {
        return Err(BraindumpError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    let template = r#"# braindump configuration
# See: braindump info

# Default output directory for .handoff/ artifacts
# output = "~/.handoff"

# Default handoff output format: "markdown" or "json"
# format = "markdown"

# Default watcher polling interval, in milliseconds
# watch_interval_ms = 30000

# Default token budget override for the compression engine
# token_budget = 45000

[sources]
# Override default storage paths (leave commented to use registry defaults)
# claude_code = "~/.claude/projects"
# cursor = "~/.config/Cursor/User"
# codex = "~/.codex/sessions"
# copilot = "~/.copilot/session-state"
# gemini = "~/.gemini/tmp"
# opencode = "~/.local/share/opencode"
# droid = "~/.factory/sessions"
"#;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template)?;

    eprintln!("Created config file: {}", path.display());
    eprintln!();
    eprintln!("Edit it directly, or use:");
    eprintln!("  braindump set watch_interval_ms 5000");
    eprintln!("  braindump get");

    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────

fn config_path() -> Result<PathBuf, BraindumpError> {
    let home = dirs::home_dir()
        .ok_or_else(|| BraindumpError::Other("Cannot determine home directory".into()))?;
    Ok(home.join(".config/braindump/config.toml"))
}

fn read_config_file() -> Result<String, BraindumpError> {
    let path = config_path()?;
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BraindumpError::Other(format!("Config file not found: {}", path.display()))
        } else {
            BraindumpError::Io(e)
        }
    })
}

fn write_config_file(content: &str) -> Result<(), BraindumpError> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(())
}

/// Parse a dotted key into a table path and a leaf field name.
/// `"sources.cursor"` -> `(["sources"], "cursor")`; `"output"` -> `([], "output")`.
fn split_key(key: &str) -> Result<(Vec<String>, String), BraindumpError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(BraindumpError::Other(format!("Invalid key: {key}")));
    }
    let field = parts.last().unwrap().to_string();
    let table_path = parts[..parts.len() - 1].iter().map(|s| s.to_string()).collect();
    Ok((table_path, field))
}

fn resolve_key<'a>(doc: &'a DocumentMut, key: &str) -> Option<&'a toml_edit::Item> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current: &toml_edit::Item = doc.as_item();
    for part in &parts {
        current = current.as_table_like()?.get(part)?;
    }
    Some(current)
}

fn format_item(item: &toml_edit::Item) -> String {
    match item {
        toml_edit::Item::Value(v) => match v {
            toml_edit::Value::String(s) => s.value().clone(),
            toml_edit::Value::Integer(i) => i.value().to_string(),
            toml_edit::Value::Float(f) => f.value().to_string(),
            toml_edit::Value::Boolean(b) => b.value().to_string(),
            other => other.to_string(),
        },
        toml_edit::Item::Table(t) => {
            let mut entries = Vec::new();
            collect_entries(t, "", &mut entries);
            entries.iter().map(|(k, v)| format!("{k} = {v}")).collect::<Vec<_>>().join("\n")
        }
        other => other.to_string(),
    }
}

fn collect_entries(table: &toml_edit::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, item) in table.iter() {
        let full_key = if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") };
        match item {
            toml_edit::Item::Value(v) => out.push((full_key, format_value(v))),
            toml_edit::Item::Table(t) => collect_entries(t, &full_key, out),
            _ => {}
        }
    }
}

fn format_value(v: &toml_edit::Value) -> String {
    match v {
        toml_edit::Value::String(s) => format!("\"{}\"", s.value()),
        toml_edit::Value::Integer(i) => i.value().to_string(),
        toml_edit::Value::Float(f) => f.value().to_string(),
        toml_edit::Value::Boolean(b) => b.value().to_string(),
        other => other.to_string(),
    }
}

/// Infer a TOML value type from a CLI string argument.
/// Precedence: boolean -> integer -> float (only with a `.`) -> string.
fn infer_value(s: &str) -> toml_edit::Value {
    if s == "true" {
        return toml_edit::Value::from(true);
    }
    if s == "false" {
        return toml_edit::Value::from(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml_edit::Value::from(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        if s.contains('.') {
            return toml_edit::Value::from(f);
        }
    }
    toml_edit::Value::from(s)
}

/// Expand a leading `~` or `~/` prefix to the user's home directory. A bare
/// `"~"` expands to the home directory itself; paths without a leading `~`
/// are returned unchanged.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_simple() {
        let (table, field) = split_key("output").unwrap();
        assert!(table.is_empty());
        assert_eq!(field, "output");
    }

    #[test]
    fn test_split_key_dotted() {
        let (table, field) = split_key("sources.cursor").unwrap();
        assert_eq!(table, vec!["sources"]);
        assert_eq!(field, "cursor");
    }

    #[test]
    fn test_split_key_empty_segment_errors() {
        assert!(split_key("a..b").is_err());
        assert!(split_key(".a").is_err());
        assert!(split_key("a.").is_err());
    }

    #[test]
    fn test_infer_value_true() {
        assert_eq!(infer_value("true").as_bool(), Some(true));
    }

    #[test]
    fn test_infer_value_integer() {
        assert_eq!(infer_value("42").as_integer(), Some(42));
    }

    #[test]
    fn test_infer_value_float() {
        let f = infer_value("3.14").as_float().unwrap();
        assert!((f - 3.14).abs() < 0.001);
    }

    #[test]
    fn test_infer_value_string() {
        assert_eq!(infer_value("hello world").as_str(), Some("hello world"));
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let result = expand_tilde("~/projects");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("projects"));
    }

    #[test]
    fn test_expand_tilde_absolute_unchanged() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
output = "~/.handoff"
format = "markdown"
watch_interval_ms = 5000

[sources]
cursor = "~/.config/Cursor/User"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.output.as_deref(), Some("~/.handoff"));
        assert_eq!(config.watch_interval_ms, Some(5000));
        assert_eq!(
            config.sources.as_ref().unwrap().cursor.as_deref(),
            Some("~/.config/Cursor/User")
        );
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.output.is_none());
        assert!(config.source_path_for(AgentId::Cursor).is_none());
    }

    #[test]
    fn test_resolve_key_nested() {
        let doc: toml_edit::DocumentMut = "[sources]\ncursor = \"x\"".parse().unwrap();
        assert!(resolve_key(&doc, "sources.cursor").is_some());
    }

    #[test]
    fn test_resolve_key_missing() {
        let doc: toml_edit::DocumentMut = "output = \"test\"".parse().unwrap();
        assert!(resolve_key(&doc, "nonexistent").is_none());
    }
}
