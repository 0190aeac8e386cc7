//! Prompt assembler (§4.6): turns a `CompressResult` into the fixed-order
//! text document handed off to the target tool — title banner, one
//! second-level heading per included layer, then a target-specific footer.
//! When the assembled content would exceed the 50-kilobyte reference-file
//! threshold, the document collapses to a short pointer at the write-out
//! location instead (the launcher then writes the full text to
//! `.braindump-handoff.md`, per §6's launcher contract).

use crate::ast::{AgentId, CapturedSession};
use crate::compress::CompressResult;
use crate::registry;

/// Above this size the caller should write the full document to a reference
/// file and hand the target tool a short "read this file" prompt instead.
pub const REFERENCE_FILE_THRESHOLD_BYTES: usize = 50_000;

fn footer_for(target: &str) -> String {
    if let Ok(agent) = target.parse::<AgentId>() {
        let entry = registry::registry_entry(agent);
        return format!(
            "---\n\nResume this work in {name}. Read the sections above, then continue from \"{layer}\" \
             (check its memory file, {memfile}, for anything durable worth keeping in sync).\n",
            name = entry.display_name,
            layer = "TASK STATE",
            memfile = entry.memory_file_names.first().copied().unwrap_or("its memory file"),
        );
    }
    "---\n\nResume this work by reading the sections above, starting from \"TASK STATE\".\n".to_string()
}

/// Builds the handoff document body (title banner + layers + footer) for a
/// captured session and the already-computed compression result.
pub fn build_prompt(session: &CapturedSession, result: &CompressResult, target: &str) -> String {
    let mut doc = String::new();
    doc.push_str(&format!(
        "# Session handoff: {source} / {session_id}\n\ncaptured {captured_at}, {tokens} estimated tokens\n\n",
        source = session.source,
        session_id = session.session_id,
        captured_at = session.captured_at.to_rfc3339(),
        tokens = result.total_tokens,
    ));
    for layer in &result.included {
        doc.push_str(&format!("## {}\n\n{}\n\n", layer.name, layer.content));
    }
    if !result.dropped.is_empty() {
        doc.push_str(&format!("_dropped for budget: {}_\n\n", result.dropped.join(", ")));
    }
    doc.push_str(&footer_for(target));
    doc
}

/// Either the full document, or — when it exceeds the reference-file
/// threshold — a short pointer prompt naming the file the caller should
/// have written the full document to.
pub enum AssembledPrompt {
    Inline(String),
    ReferenceFile { pointer_text: String, full_document: String },
}

pub fn assemble(session: &CapturedSession, result: &CompressResult, target: &str, reference_file_name: &str) -> AssembledPrompt {
    let full_document = build_prompt(session, result, target);
    if full_document.len() > REFERENCE_FILE_THRESHOLD_BYTES {
        let pointer_text = format!(
            "A detailed handoff for session {session_id} ({tokens} estimated tokens) was written to \
             `{reference_file_name}`. Open and read that file before continuing.\n",
            session_id = session.session_id,
            tokens = result.total_tokens,
        );
        AssembledPrompt::ReferenceFile { pointer_text, full_document }
    } else {
        AssembledPrompt::Inline(full_document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::compress::Layer;
    use chrono::DateTime;

    fn mock_session() -> CapturedSession {
        CapturedSession {
            schema_version: SCHEMA_VERSION.to_string(),
            source: AgentId::ClaudeCode,
            captured_at: DateTime::from_timestamp(0, 0).unwrap(),
            session_id: "sess-1".to_string(),
            session_started_at: None,
            project: ProjectContext { path: "/tmp/project".to_string(), ..Default::default() },
            conversation: ConversationBlock { message_count: 0, estimated_tokens: 0, messages: vec![] },
            file_changes: vec![],
            decisions: vec![],
            blockers: vec![],
            task: TaskState::default(),
            tool_activity: None,
        }
    }

    fn mock_result(layer_content_len: usize) -> CompressResult {
        CompressResult {
            included: vec![Layer { name: "TASK STATE", priority: 1.0, content: "x".repeat(layer_content_len), tokens: 1 }],
            dropped: vec!["FULL HISTORY"],
            total_tokens: 1,
        }
    }

    #[test]
    fn build_prompt_includes_title_layers_and_footer() {
        let session = mock_session();
        let result = mock_result(10);
        let doc = build_prompt(&session, &result, "claude-code");
        assert!(doc.contains("sess-1"));
        assert!(doc.contains("## TASK STATE"));
        assert!(doc.contains("dropped for budget: FULL HISTORY"));
        assert!(doc.contains("Claude Code"));
    }

    #[test]
    fn generic_footer_for_file_target() {
        let session = mock_session();
        let result = mock_result(10);
        let doc = build_prompt(&session, &result, "file");
        assert!(doc.contains("Resume this work by reading the sections above"));
    }

    #[test]
    fn oversized_document_becomes_a_reference_file_pointer() {
        let session = mock_session();
        let result = mock_result(REFERENCE_FILE_THRESHOLD_BYTES + 1);
        match assemble(&session, &result, "file", ".braindump-handoff.md") {
            AssembledPrompt::ReferenceFile { pointer_text, full_document } => {
                assert!(pointer_text.contains(".braindump-handoff.md"));
                assert!(full_document.len() > REFERENCE_FILE_THRESHOLD_BYTES);
            }
            AssembledPrompt::Inline(_) => panic!("expected a reference-file prompt"),
        }
    }

    #[test]
    fn small_document_stays_inline() {
        let session = mock_session();
        let result = mock_result(10);
        match assemble(&session, &result, "file", ".braindump-handoff.md") {
            AssembledPrompt::Inline(_) => {}
            AssembledPrompt::ReferenceFile { .. } => panic!("expected inline"),
        }
    }
}
