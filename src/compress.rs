//! Compression engine (§4.5): builds eight priority layers and packs as
//! many as fit within a token budget.

use crate::ast::{CapturedSession, ConversationMessage};
use crate::tokens::estimate_tokens;

pub const GENERIC_FILE_BUDGET: u64 = 19_000;
const RECENT_MESSAGE_COUNT: usize = 20;

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: &'static str,
    pub priority: f64,
    pub content: String,
    pub tokens: u64,
}

fn layer(name: &'static str, priority: f64, content: String) -> Layer {
    let tokens = estimate_tokens(&content);
    Layer { name, priority, content, tokens }
}

fn render_task_state(session: &CapturedSession) -> String {
    let task = &session.task;
    let mut out = format!("Task: {}\n", task.description);
    if let Some(in_progress) = &task.in_progress {
        out.push_str(&format!("In progress: {in_progress}\n"));
    }
    if !task.completed.is_empty() {
        out.push_str("Completed:\n");
        for item in &task.completed {
            out.push_str(&format!("- {item}\n"));
        }
    }
    if !task.remaining.is_empty() {
        out.push_str("Remaining:\n");
        for item in &task.remaining {
            out.push_str(&format!("- {item}\n"));
        }
    }
    if !task.blockers.is_empty() {
        out.push_str("Task blockers:\n");
        for item in &task.blockers {
            out.push_str(&format!("- {item}\n"));
        }
    }
    out
}

fn render_active_files(session: &CapturedSession) -> String {
    if session.file_changes.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for fc in &session.file_changes {
        out.push_str(&format!("- {:?} {}", fc.change_type, fc.path));
        if let Some(diff) = &fc.diff {
            out.push_str(&format!(" ({diff})"));
        }
        out.push('\n');
    }
    out
}

fn render_decisions_blockers(session: &CapturedSession) -> String {
    let mut out = String::new();
    if !session.decisions.is_empty() {
        out.push_str("Decisions:\n");
        for d in &session.decisions {
            out.push_str(&format!("- {d}\n"));
        }
    }
    if !session.blockers.is_empty() {
        out.push_str("Blockers:\n");
        for b in &session.blockers {
            out.push_str(&format!("- {b}\n"));
        }
    }
    out
}

fn render_project_context(session: &CapturedSession) -> String {
    let p = &session.project;
    let mut out = format!("Path: {}\n", p.path);
    if let Some(name) = &p.name {
        out.push_str(&format!("Name: {name}\n"));
    }
    if let Some(branch) = &p.git_branch {
        out.push_str(&format!("Branch: {branch}\n"));
    }
    if let Some(status) = &p.git_status {
        out.push_str(&format!("Status:\n{status}\n"));
    }
    if let Some(log) = &p.git_log {
        out.push_str("Recent commits:\n");
        for line in log {
            out.push_str(&format!("- {line}\n"));
        }
    }
    if let Some(tree) = &p.directory_tree {
        out.push_str(&format!("Directory tree:\n{tree}\n"));
    }
    if let Some(memory) = &p.memory_excerpt {
        out.push_str(&format!("Memory file excerpt:\n{memory}\n"));
    }
    out
}

fn render_tool_activity(session: &CapturedSession) -> String {
    match &session.tool_activity {
        Some(activity) if !activity.is_empty() => {
            let mut out = String::new();
            for summary in activity {
                out.push_str(&format!("- {} x{}", summary.tool_class, summary.count));
                if !summary.samples.is_empty() {
                    out.push_str(&format!(": {}", summary.samples.join("; ")));
                }
                out.push('\n');
            }
            out
        }
        _ => String::new(),
    }
}

fn render_session_overview(session: &CapturedSession) -> String {
    format!(
        "Source: {}\nSession: {}\nCaptured at: {}\nMessages: {}\nEstimated tokens: {}\n",
        session.source,
        session.session_id,
        session.captured_at.to_rfc3339(),
        session.conversation.message_count,
        session.conversation.estimated_tokens,
    )
}

fn render_messages(messages: &[ConversationMessage]) -> String {
    let mut out = String::new();
    for m in messages {
        let role = match m.role {
            crate::ast::Role::User => "user",
            crate::ast::Role::Assistant => "assistant",
            crate::ast::Role::System => "system",
            crate::ast::Role::Tool => "tool",
        };
        out.push_str(&format!("[{role}] {}\n", m.content));
    }
    out
}

fn render_recent_messages(session: &CapturedSession) -> String {
    let messages = &session.conversation.messages;
    let start = messages.len().saturating_sub(RECENT_MESSAGE_COUNT);
    render_messages(&messages[start..])
}

fn render_full_history(session: &CapturedSession) -> String {
    let messages = &session.conversation.messages;
    let end = messages.len().saturating_sub(RECENT_MESSAGE_COUNT);
    render_messages(&messages[..end])
}

/// Builds all eight layers in fixed priority order.
pub fn build_layers(session: &CapturedSession) -> Vec<Layer> {
    vec![
        layer("TASK STATE", 1.0, render_task_state(session)),
        layer("ACTIVE FILES", 2.0, render_active_files(session)),
        layer("DECISIONS & BLOCKERS", 3.0, render_decisions_blockers(session)),
        layer("PROJECT CONTEXT", 4.0, render_project_context(session)),
        layer("TOOL ACTIVITY", 4.5, render_tool_activity(session)),
        layer("SESSION OVERVIEW", 5.0, render_session_overview(session)),
        layer("RECENT MESSAGES", 6.0, render_recent_messages(session)),
        layer("FULL HISTORY", 7.0, render_full_history(session)),
    ]
}

#[derive(Debug, Clone)]
pub struct CompressResult {
    pub included: Vec<Layer>,
    pub dropped: Vec<&'static str>,
    pub total_tokens: u64,
}

/// Packs layers under `budget`. Priorities 1-3 are always emitted
/// regardless of overrun; subsequent layers are included while the running
/// total stays within budget. The first layer that would overflow is
/// dropped along with every strictly lower-priority layer after it
/// (monotonic inclusion, so `compress` is monotone in the budget).
pub fn compress(session: &CapturedSession, budget: u64) -> CompressResult {
    let layers = build_layers(session);
    let mut included = Vec::new();
    let mut dropped = Vec::new();
    let mut total = 0u64;
    let mut overflowed = false;

    for layer in layers {
        if layer.priority <= 3.0 {
            total += layer.tokens;
            included.push(layer);
            continue;
        }
        if overflowed {
            dropped.push(layer.name);
            continue;
        }
        if total + layer.tokens <= budget {
            total += layer.tokens;
            included.push(layer);
        } else {
            overflowed = true;
            dropped.push(layer.name);
        }
    }

    CompressResult { included, dropped, total_tokens: total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use chrono::DateTime;

    fn mock_session(message_count: usize) -> CapturedSession {
        let messages: Vec<ConversationMessage> = (0..message_count)
            .map(|i| ConversationMessage {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("message body number {i} with some padding text to add tokens"),
                tool_name: None,
                timestamp: None,
            })
            .collect();
        CapturedSession {
            schema_version: SCHEMA_VERSION.to_string(),
            source: AgentId::ClaudeCode,
            captured_at: DateTime::from_timestamp(0, 0).unwrap(),
            session_id: "sess-mock".to_string(),
            session_started_at: None,
            project: ProjectContext {
                path: "/tmp/mock".to_string(),
                name: Some("mock".to_string()),
                git_branch: Some("main".to_string()),
                git_status: None,
                git_log: Some(vec!["abc123 initial commit".to_string()]),
                directory_tree: Some("src/\n  main.rs".to_string()),
                memory_excerpt: Some("remember this".to_string()),
            },
            conversation: ConversationBlock {
                message_count: message_count as u64,
                estimated_tokens: 100,
                messages,
            },
            file_changes: vec![FileChange {
                path: "src/main.rs".to_string(),
                change_type: FileChangeType::Modified,
                diff: Some("+3 -1".to_string()),
                language: Some("rs".to_string()),
            }],
            decisions: vec!["decided to use sqlite".to_string()],
            blockers: vec!["blocked by missing api key".to_string()],
            task: TaskState {
                description: "Build the thing".to_string(),
                completed: vec!["set up project".to_string()],
                remaining: vec!["write tests".to_string()],
                in_progress: Some("writing tests".to_string()),
                blockers: vec![],
            },
            tool_activity: Some(vec![ToolActivitySummary {
                tool_class: ToolClass::Edit,
                count: 3,
                samples: vec!["file=\"src/main.rs\"".to_string()],
            }]),
        }
    }

    #[test]
    fn infinite_budget_includes_all_layers_with_nothing_dropped() {
        let session = mock_session(30);
        let result = compress(&session, u64::MAX);
        assert_eq!(result.included.len(), 8);
        assert!(result.dropped.is_empty());
    }

    #[test]
    fn zero_budget_includes_only_priority_le_3() {
        let session = mock_session(30);
        let result = compress(&session, 0);
        assert!(result.included.iter().all(|l| l.priority <= 3.0));
        assert_eq!(result.included.len(), 3);
    }

    #[test]
    fn packing_is_monotone_in_budget() {
        let session = mock_session(40);
        let small = compress(&session, 50);
        let large = compress(&session, 5000);
        let small_names: std::collections::HashSet<_> = small.included.iter().map(|l| l.name).collect();
        let large_names: std::collections::HashSet<_> = large.included.iter().map(|l| l.name).collect();
        assert!(small_names.is_subset(&large_names));
    }

    #[test]
    fn total_tokens_never_exceeds_budget_except_for_the_mandatory_floor() {
        let session = mock_session(40);
        let floor: u64 = build_layers(&session).into_iter().filter(|l| l.priority <= 3.0).map(|l| l.tokens).sum();
        for budget in [0, 10, 100, 1000, 100_000] {
            let result = compress(&session, budget);
            assert!(result.total_tokens <= budget.max(floor));
        }
    }

    #[test]
    fn low_budget_drops_at_least_one_layer_and_keeps_task_state() {
        let session = mock_session(40);
        let result = compress(&session, 600);
        assert!(!result.dropped.is_empty());
        assert!(result.included.iter().any(|l| l.name == "TASK STATE"));
    }

    #[test]
    fn huge_budget_includes_all_seven_non_half_layers() {
        let session = mock_session(40);
        let result = compress(&session, 100_000);
        let non_half: Vec<_> = result.included.iter().filter(|l| l.priority.fract() == 0.0).collect();
        assert_eq!(non_half.len(), 7);
    }
}
