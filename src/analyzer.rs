//! Conversation analyzer: heuristic extraction of task description,
//! completed steps, decisions, and blockers from the normalized message
//! stream (§4.2). Operates on English text via lexical markers only; no
//! language detection, no intent inference. Never fails — absence of a
//! signal yields an empty list.

use crate::ast::{ConversationMessage, Role};
use crate::util::dedup_preserve_order;

const DECISION_MARKERS: &[&str] = &["decided to", "will use", "approach:"];
const BLOCKER_MARKERS: &[&str] = &["blocked by", "waiting on", "cannot", "fails with", "rate limit"];
const COMPLETED_MARKERS: &[&str] = &["done", "completed", "finished"];
const PAST_TENSE_FILE_WRITE_MARKERS: &[&str] = &["wrote ", "created ", "updated ", "saved "];

const TASK_DESCRIPTION_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub task_description: String,
    pub completed: Vec<String>,
    pub decisions: Vec<String>,
    pub blockers: Vec<String>,
}

/// Splits message content into rough sentences for marker scanning. Not a
/// real sentence boundary detector — splits on `.`, `!`, `?`, and newlines,
/// which is sufficient for matching short lexical markers.
fn sentences(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn contains_marker(sentence: &str, markers: &[&str]) -> bool {
    let lower = sentence.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// `extra_decisions` carries thought-block text adapters have already
/// pulled out of their content stream (Claude's `thinking` blocks, Gemini's
/// `thoughts[]`) — these are decisions by construction and bypass marker
/// matching entirely, per §4.2 "thought-block text passed through
/// separately by adapters".
pub fn analyze(messages: &[ConversationMessage], extra_decisions: &[String]) -> AnalysisResult {
    let task_description = messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| {
            let trimmed = m.content.trim();
            crate::util::truncate(trimmed, TASK_DESCRIPTION_MAX_CHARS)
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown task".to_string());

    let mut decisions: Vec<String> = extra_decisions.to_vec();
    let mut blockers = Vec::new();
    let mut completed = Vec::new();

    for message in messages {
        for sentence in sentences(&message.content) {
            if contains_marker(sentence, DECISION_MARKERS) {
                decisions.push(sentence.to_string());
            }
            if contains_marker(sentence, BLOCKER_MARKERS) {
                blockers.push(sentence.to_string());
            }
            let is_past_tense_write =
                message.role == Role::Assistant && contains_marker(sentence, PAST_TENSE_FILE_WRITE_MARKERS);
            if contains_marker(sentence, COMPLETED_MARKERS) || is_past_tense_write {
                completed.push(sentence.to_string());
            }
        }
    }

    AnalysisResult {
        task_description,
        completed: dedup_preserve_order(completed),
        decisions: dedup_preserve_order(decisions),
        blockers: dedup_preserve_order(blockers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> ConversationMessage {
        ConversationMessage { role, content: content.to_string(), tool_name: None, timestamp: None }
    }

    #[test]
    fn task_description_is_first_user_message_trimmed() {
        let messages = vec![
            msg(Role::System, "system prompt"),
            msg(Role::User, "  Set up an Express REST API with a /health endpoint  "),
        ];
        let result = analyze(&messages, &[]);
        assert_eq!(result.task_description, "Set up an Express REST API with a /health endpoint");
    }

    #[test]
    fn task_description_falls_back_when_no_user_message() {
        let messages = vec![msg(Role::Assistant, "hello")];
        let result = analyze(&messages, &[]);
        assert_eq!(result.task_description, "Unknown task");
    }

    #[test]
    fn decisions_match_lexical_markers() {
        let messages = vec![msg(Role::Assistant, "I decided to use Postgres for storage")];
        let result = analyze(&messages, &[]);
        assert_eq!(result.decisions.len(), 1);
        assert!(result.decisions[0].to_lowercase().contains("decided to"));
    }

    #[test]
    fn extra_decisions_bypass_marker_matching() {
        let result = analyze(&[], &["thinking about the architecture".to_string()]);
        assert_eq!(result.decisions, vec!["thinking about the architecture"]);
    }

    #[test]
    fn blockers_match_rate_limit_mentions() {
        let messages = vec![msg(Role::Assistant, "Currently blocked by a rate limit from the provider")];
        let result = analyze(&messages, &[]);
        assert_eq!(result.blockers.len(), 1);
    }

    #[test]
    fn completed_matches_past_tense_file_writes_from_assistant() {
        let messages = vec![msg(Role::Assistant, "I wrote the new auth middleware")];
        let result = analyze(&messages, &[]);
        assert_eq!(result.completed.len(), 1);
    }

    #[test]
    fn completed_ignores_past_tense_writes_from_user() {
        let messages = vec![msg(Role::User, "I wrote a failing test already")];
        let result = analyze(&messages, &[]);
        assert!(result.completed.is_empty());
    }

    #[test]
    fn outputs_are_deduplicated() {
        let messages = vec![
            msg(Role::Assistant, "Done with the migration"),
            msg(Role::Assistant, "Done with the migration"),
        ];
        let result = analyze(&messages, &[]);
        assert_eq!(result.completed.len(), 1);
    }

    #[test]
    fn empty_message_list_yields_empty_outputs() {
        let result = analyze(&[], &[]);
        assert_eq!(result.task_description, "Unknown task");
        assert!(result.decisions.is_empty());
        assert!(result.blockers.is_empty());
        assert!(result.completed.is_empty());
    }
}
