//! Finishing steps common to every adapter's `capture`: token fallback,
//! analysis, enrichment, tool-activity summarization, and schema
//! validation. Keeping this here means an individual adapter module is
//! responsible only for the part of the shared capture protocol (§4.1c-i)
//! that is genuinely agent-specific: reading its own storage format.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::analyzer;
use crate::ast::*;
use crate::enrich;
use crate::error::Result;
use crate::tokens::estimate_tokens;
use crate::util::truncate;

/// Per-tool-class running count plus up to three samples, keyed during a
/// capture pass and turned into a `ToolActivitySummary` list at the end.
#[derive(Debug, Default)]
pub struct ToolActivityBuilder {
    counts: HashMap<ToolClass, (u32, Vec<String>)>,
}

impl ToolActivityBuilder {
    pub fn record(&mut self, class: ToolClass, sample: String) {
        let entry = self.counts.entry(class).or_insert((0, Vec::new()));
        entry.0 += 1;
        if entry.1.len() < 3 {
            entry.1.push(sample);
        }
    }

    fn finish(self) -> Option<Vec<ToolActivitySummary>> {
        if self.counts.is_empty() {
            return None;
        }
        let mut summaries: Vec<ToolActivitySummary> = self
            .counts
            .into_iter()
            .map(|(tool_class, (count, samples))| ToolActivitySummary { tool_class, count, samples })
            .collect();
        summaries.sort_by_key(|s| s.tool_class as u8 as i32 * -1);
        Some(summaries)
    }
}

/// Per-agent overrides of the task block beyond what the analyzer can infer
/// from the message text alone (e.g. droid's explicit `todo_state` events).
#[derive(Debug, Default)]
pub struct TaskOverrides {
    pub remaining: Vec<String>,
    pub extra_completed: Vec<String>,
    pub in_progress: Option<String>,
}

/// Assembles, enriches, and validates a `CapturedSession` from the pieces
/// an adapter has already extracted from its native format. This is the
/// single point where steps (d) through (i) of the shared capture protocol
/// happen for every adapter.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    agent: AgentId,
    session_id: String,
    session_started_at: Option<DateTime<Utc>>,
    project_path: &Path,
    messages: Vec<ConversationMessage>,
    file_changes: Vec<FileChange>,
    tool_activity: ToolActivityBuilder,
    extra_decisions: Vec<String>,
    usage_tokens: u64,
    overrides: TaskOverrides,
) -> Result<CapturedSession> {
    let message_count = messages.len() as u64;
    let estimated_tokens =
        if usage_tokens > 0 { usage_tokens } else { messages.iter().map(|m| estimate_tokens(&m.content)).sum() };

    let analysis = analyzer::analyze(&messages, &extra_decisions);
    let in_progress = overrides.in_progress.or_else(|| {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| truncate(m.content.trim(), 200))
            .filter(|s| !s.is_empty())
    });

    let mut completed = analysis.completed;
    completed.extend(overrides.extra_completed);
    let completed = crate::util::dedup_preserve_order(completed);
    let remaining = crate::util::dedup_preserve_order(overrides.remaining);

    let project = enrich::enrich(project_path);

    let session = CapturedSession {
        schema_version: SCHEMA_VERSION.to_string(),
        source: agent,
        captured_at: Utc::now(),
        session_id,
        session_started_at,
        project,
        conversation: ConversationBlock { message_count, estimated_tokens, messages },
        file_changes,
        decisions: analysis.decisions,
        blockers: analysis.blockers,
        task: TaskState {
            description: analysis.task_description,
            completed,
            remaining,
            in_progress,
            blockers: vec![],
        },
        tool_activity: tool_activity.finish(),
    };
    session.validate()?;
    Ok(session)
}
