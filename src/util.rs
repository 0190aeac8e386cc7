//! Shared primitives used by every adapter, per Design Note "Polymorphism
//! across seven formats": path normalization, timestamp normalization,
//! JSON-or-string extraction, file-change derivation, tool-class mapping,
//! and order-preserving deduplication all live here rather than being
//! reinvented per adapter.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::ast::{FileChange, FileChangeType, Role, ToolClass};

/// Centralizes the role mapping from Design Note "Role normalization":
/// `model -> assistant`, `human -> user`, `tool -> tool`, `system -> system`,
/// anything else -> `assistant` as a safe default.
pub fn normalize_role(raw: &str) -> Role {
    match raw {
        "model" => Role::Assistant,
        "human" => Role::User,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        "system" => Role::System,
        _ => Role::Assistant,
    }
}

/// Normalizes a path for the `listSessions(projectPath?)` equality check:
/// backslashes to forward slashes, resolved to absolute form where
/// possible, compared case-insensitively by the caller.
pub fn normalize_path_for_comparison(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let absolute = if Path::new(&slashed).is_absolute() {
        slashed
    } else {
        match std::env::current_dir() {
            Ok(cwd) => format!("{}/{slashed}", cwd.to_string_lossy().replace('\\', "/")),
            Err(_) => slashed,
        }
    };
    absolute.trim_end_matches('/').to_lowercase()
}

pub fn paths_equal(a: &str, b: &str) -> bool {
    normalize_path_for_comparison(a) == normalize_path_for_comparison(b)
}

/// Parses an RFC3339 timestamp, tolerating a trailing `Z` or an offset.
/// Returns `None` on any malformed input rather than failing the whole
/// parse — timestamps are best-effort throughout the adapters.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Converts Unix-epoch milliseconds (as used by OpenCode and Gemini) to a
/// `DateTime<Utc>`, handling negative values via Euclidean division so a
/// millisecond value before the epoch never panics.
pub fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000)) as u32 * 1_000_000;
    Utc.timestamp_opt(secs, nanos).single()
}

/// First non-empty string found at any of the given JSON-pointer-style
/// field names on `value` (a JSON object). Tolerates heterogeneous schemas
/// across the agents without requiring a fixed struct shape up front.
pub fn first_non_empty_string(value: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        if let Some(s) = value.get(field).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

pub fn to_number(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Best-effort JSON object parse from either a `Value` already shaped as an
/// object, or a string containing JSON text (as Codex's `function_call`
/// arguments and `function_call_output`'s `output` field are encoded).
pub fn parse_json_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s).ok(),
        _ => None,
    }
}

/// Maps a raw tool/function name onto the closed `ToolClass` set.
pub fn classify_tool(name: &str) -> ToolClass {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "edit" | "write" | "write_file" | "update_plan" | "apply_patch" => ToolClass::Edit,
        "read" | "read_file" | "glob" | "grep" => ToolClass::Read,
        "bash" | "shell" | "run_terminal_cmd" | "exec" => ToolClass::Bash,
        _ if lower.starts_with("mcp__") || lower.starts_with("mcp_") => ToolClass::Mcp,
        _ => ToolClass::Tool,
    }
}

/// Change type inferred from a tool/function name per the shared capture
/// protocol: `created` when the name mentions create/write, `deleted` when
/// it mentions delete/remove, `modified` otherwise.
pub fn infer_change_type(tool_name: &str) -> FileChangeType {
    let lower = tool_name.to_lowercase();
    if lower.contains("create") || lower.contains("write") {
        FileChangeType::Created
    } else if lower.contains("delete") || lower.contains("remove") {
        FileChangeType::Deleted
    } else {
        FileChangeType::Modified
    }
}

pub fn infer_language(path: &str) -> Option<String> {
    let ext = Path::new(path).extension()?.to_str()?;
    let lang = match ext {
        "ts" | "tsx" => "ts",
        "js" | "jsx" | "mjs" | "cjs" => "js",
        "py" => "py",
        "rs" => "rs",
        "go" => "go",
        "rb" => "rb",
        "java" => "java",
        "c" => "c",
        "h" | "hpp" | "hh" | "cc" | "cpp" | "cxx" => "cpp",
        "md" => "md",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sh" | "bash" => "sh",
        other => other,
    };
    Some(lang.to_string())
}

/// Upserts a `FileChange` into `changes` keyed by path. Per the shared
/// capture protocol, the change type of a later upsert on the same path
/// replaces the earlier one ("last write wins"), and an entry's diff is
/// replaced only when the new upsert actually carries one.
pub fn upsert_file_change(
    changes: &mut Vec<FileChange>,
    index: &mut HashMap<String, usize>,
    path: String,
    change_type: FileChangeType,
    diff: Option<String>,
) {
    let language = infer_language(&path);
    if let Some(&pos) = index.get(&path) {
        let existing = &mut changes[pos];
        existing.change_type = change_type;
        if diff.is_some() {
            existing.diff = diff;
        }
    } else {
        index.insert(path.clone(), changes.len());
        changes.push(FileChange {
            path,
            change_type,
            diff,
            language,
        });
    }
}

/// Order-preserving deduplication by trimmed text, discarding blank
/// entries. Used for decisions, remaining tasks, and anywhere else a
/// deduplicated, order-preserved list is needed.
pub fn dedup_preserve_order<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
    }
    out
}

/// UTF-8-safe truncation that never splits a multi-byte character.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_role_maps_known_aliases() {
        assert_eq!(normalize_role("model"), Role::Assistant);
        assert_eq!(normalize_role("human"), Role::User);
        assert_eq!(normalize_role("tool"), Role::Tool);
        assert_eq!(normalize_role("system"), Role::System);
    }

    #[test]
    fn normalize_role_defaults_unknown_to_assistant() {
        assert_eq!(normalize_role("narrator"), Role::Assistant);
    }

    #[test]
    fn paths_equal_ignores_case_and_separator_style() {
        assert!(paths_equal("/Users/Dev/Project", "/users/dev/project"));
        assert!(paths_equal("C:\\work\\app", "C:/work/app"));
    }

    #[test]
    fn timestamp_from_millis_handles_negative_values() {
        let dt = timestamp_from_millis(-500).unwrap();
        assert_eq!(dt.timestamp(), -1);
    }

    #[test]
    fn classify_tool_buckets_known_names() {
        assert_eq!(classify_tool("Write"), ToolClass::Edit);
        assert_eq!(classify_tool("Read"), ToolClass::Read);
        assert_eq!(classify_tool("shell"), ToolClass::Bash);
        assert_eq!(classify_tool("mcp__server__call"), ToolClass::Mcp);
        assert_eq!(classify_tool("WebSearch"), ToolClass::Tool);
    }

    #[test]
    fn infer_change_type_matches_name_keywords() {
        assert_eq!(infer_change_type("create_file"), FileChangeType::Created);
        assert_eq!(infer_change_type("delete_file"), FileChangeType::Deleted);
        assert_eq!(infer_change_type("Edit"), FileChangeType::Modified);
    }

    #[test]
    fn upsert_file_change_last_write_wins() {
        let mut changes = Vec::new();
        let mut index = HashMap::new();
        upsert_file_change(
            &mut changes,
            &mut index,
            "src/a.ts".to_string(),
            FileChangeType::Created,
            None,
        );
        upsert_file_change(
            &mut changes,
            &mut index,
            "src/a.ts".to_string(),
            FileChangeType::Modified,
            Some("+1 -0".to_string()),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, FileChangeType::Modified);
        assert_eq!(changes[0].diff.as_deref(), Some("+1 -0"));
        assert_eq!(changes[0].language.as_deref(), Some("ts"));
    }

    #[test]
    fn dedup_preserve_order_drops_blanks_and_keeps_first_occurrence() {
        let items = vec![
            "  keep this  ".to_string(),
            "".to_string(),
            "other".to_string(),
            "keep this".to_string(),
        ];
        assert_eq!(dedup_preserve_order(items), vec!["keep this", "other"]);
    }

    #[test]
    fn truncate_never_splits_multibyte_chars() {
        let s = "héllo wörld";
        let truncated = truncate(s, 5);
        assert_eq!(truncated.chars().count(), 5);
    }
}
