//! Project enricher (§4.3): repository metadata, a shallow directory
//! skeleton, and memory-file excerpts, all independently fault-tolerant —
//! failure anywhere here never aborts a handoff, it just leaves that field
//! empty (`EnrichmentFailure`, §7).
//!
//! Git invocation uses the `std::process::Command` idiom (tolerant of
//! "not a repo", non-zero exit, missing binary) but adds
//! a hard wall-clock timeout via `wait-timeout` so a hung git process can
//! never stall a handoff.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::ast::ProjectContext;
use crate::util::truncate;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);
const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", ".next", "dist", "__pycache__", ".venv"];
const TREE_LINE_CAP: usize = 40;
const TREE_DEPTH: usize = 2;
const MEMORY_FILE_NAMES: &[&str] = &["CLAUDE.md", ".claude/CLAUDE.md"];
const MEMORY_EXCERPT_MAX_CHARS: usize = 2000;

/// Runs a git subcommand under `dir` with a hard timeout. Returns `None` on
/// any failure: not a repo, non-zero exit, missing binary, or timeout.
fn run_git(dir: &Path, args: &[&str]) -> Option<String> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    match child.wait_timeout(GIT_TIMEOUT) {
        Ok(Some(status)) if status.success() => {
            let mut out = String::new();
            child.stdout.take()?.read_to_string(&mut out).ok()?;
            Some(out.trim_end().to_string())
        }
        Ok(Some(_)) => None,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            None
        }
        Err(_) => None,
    }
}

fn git_branch(dir: &Path) -> Option<String> {
    run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).filter(|s| !s.is_empty())
}

fn git_status(dir: &Path) -> Option<String> {
    run_git(dir, &["status", "--short"]).filter(|s| !s.is_empty())
}

fn git_log(dir: &Path) -> Option<Vec<String>> {
    let out = run_git(dir, &["log", "-n", "10", "--oneline"])?;
    let lines: Vec<String> = out.lines().map(str::to_string).collect();
    if lines.is_empty() { None } else { Some(lines) }
}

/// Reads `package.json`'s `name` field, falling back to the directory
/// basename when the file is absent, unreadable, or has no `name`.
fn project_name(dir: &Path) -> Option<String> {
    let pkg = dir.join("package.json");
    if let Ok(content) = std::fs::read_to_string(&pkg) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) {
            if let Some(name) = value.get("name").and_then(|n| n.as_str()) {
                return Some(name.to_string());
            }
        }
    }
    dir.file_name().map(|n| n.to_string_lossy().to_string())
}

fn build_tree_lines(dir: &Path, depth: usize, prefix: &str, lines: &mut Vec<String>) {
    if lines.len() >= TREE_LINE_CAP {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e.filter_map(|e| e.ok()).collect::<Vec<_>>(),
        Err(_) => return,
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if EXCLUDED_DIRS.contains(&name.as_str()) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();

    for d in &dirs {
        if lines.len() >= TREE_LINE_CAP {
            return;
        }
        lines.push(format!("{prefix}{d}/"));
        if depth < TREE_DEPTH {
            build_tree_lines(&dir.join(d), depth + 1, &format!("{prefix}  "), lines);
        }
    }
    for f in &files {
        if lines.len() >= TREE_LINE_CAP {
            return;
        }
        lines.push(format!("{prefix}{f}"));
    }
}

fn directory_tree(root: &Path) -> Option<String> {
    let mut lines = Vec::new();
    build_tree_lines(root, 0, "", &mut lines);
    if lines.is_empty() { None } else { Some(lines.join("\n")) }
}

fn memory_excerpt(root: &Path) -> Option<String> {
    let mut combined = String::new();
    for name in MEMORY_FILE_NAMES {
        if let Ok(content) = std::fs::read_to_string(root.join(name)) {
            combined.push_str(&content);
            combined.push('\n');
        }
    }
    if combined.trim().is_empty() {
        None
    } else {
        Some(truncate(&combined, MEMORY_EXCERPT_MAX_CHARS))
    }
}

/// Builds the project context block for a captured session. Every field is
/// independently best-effort; none of these failures abort the capture.
pub fn enrich(root: &Path) -> ProjectContext {
    ProjectContext {
        path: root.to_string_lossy().to_string(),
        name: project_name(root),
        git_branch: git_branch(root),
        git_status: git_status(root),
        git_log: git_log(root),
        directory_tree: directory_tree(root),
        memory_excerpt: memory_excerpt(root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("braindump-enrich-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn project_name_reads_package_json() {
        let dir = scratch_dir("pkgname");
        std::fs::write(dir.join("package.json"), r#"{"name": "my-app"}"#).unwrap();
        assert_eq!(project_name(&dir), Some("my-app".to_string()));
    }

    #[test]
    fn project_name_falls_back_to_dirname() {
        let dir = scratch_dir("noname");
        assert_eq!(project_name(&dir), dir.file_name().map(|n| n.to_string_lossy().to_string()));
    }

    #[test]
    fn directory_tree_excludes_fixed_set_and_sorts_dirs_before_files() {
        let dir = scratch_dir("tree");
        std::fs::create_dir_all(dir.join("node_modules")).unwrap();
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("README.md"), "x").unwrap();
        std::fs::write(dir.join("src/main.rs"), "x").unwrap();

        let tree = directory_tree(&dir).unwrap();
        assert!(!tree.contains("node_modules"));
        let src_pos = tree.find("src/").unwrap();
        let readme_pos = tree.find("README.md").unwrap();
        assert!(src_pos < readme_pos);
        assert!(tree.contains("main.rs"));
    }

    #[test]
    fn directory_tree_caps_at_forty_lines() {
        let dir = scratch_dir("bigtree");
        for i in 0..80 {
            std::fs::write(dir.join(format!("file-{i:03}.txt")), "x").unwrap();
        }
        let tree = directory_tree(&dir).unwrap();
        assert_eq!(tree.lines().count(), TREE_LINE_CAP);
    }

    #[test]
    fn memory_excerpt_concatenates_and_truncates() {
        let dir = scratch_dir("memory");
        std::fs::write(dir.join("CLAUDE.md"), "a".repeat(1500)).unwrap();
        std::fs::create_dir_all(dir.join(".claude")).unwrap();
        std::fs::write(dir.join(".claude/CLAUDE.md"), "b".repeat(1500)).unwrap();
        let excerpt = memory_excerpt(&dir).unwrap();
        assert_eq!(excerpt.chars().count(), MEMORY_EXCERPT_MAX_CHARS);
    }

    #[test]
    fn memory_excerpt_is_none_when_no_memory_files() {
        let dir = scratch_dir("nomemory");
        assert!(memory_excerpt(&dir).is_none());
    }

    #[test]
    fn enrich_tolerates_a_non_git_directory() {
        let dir = scratch_dir("nogit");
        let ctx = enrich(&dir);
        assert!(ctx.git_branch.is_none());
        assert!(ctx.git_status.is_none());
        assert!(ctx.git_log.is_none());
    }
}
