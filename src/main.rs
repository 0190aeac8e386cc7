//! CLI entry point for braindump.
//!
//! # Architecture overview
//!
//! `main.rs` is the thin coordination layer between the CLI surface and the
//! library crate. Its responsibilities are:
//!
//! 1. Parse CLI arguments (via `clap`).
//! 2. Load `~/.config/braindump/config.toml` for default output path,
//!    watch interval, token budget, and per-agent storage overrides.
//! 3. Dispatch to one of the seven commands (§6): `detect`, `list`,
//!    `capture`, `handoff`, `watch`, `resume`, `info` — plus the ambient
//!    `init`/`get`/`set`/`unset` config subcommands (§1) that operate on
//!    `~/.config/braindump/config.toml` directly.
//!
//! # Exit codes (§6)
//!
//! `0` success; `1` detection failure or bad argument; `2` listing error;
//! `3` capture or handoff error. `main()` classifies the failing command
//! and exits with the matching code rather than always exiting `1`, so a
//! calling script can distinguish "nothing to capture" from "capture itself
//! broke".

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, Stdio};

use clap::{Parser as ClapParser, Subcommand};

use braindump::adapter::{self, Adapter};
use braindump::ast::{AgentId, SessionInfo};
use braindump::compress;
use braindump::config::{self, Config};
use braindump::error::BraindumpError;
use braindump::prompt::{self, AssembledPrompt};
use braindump::registry;
use braindump::watcher::{StartOptions, WatchEventKind, Watcher};

#[derive(ClapParser)]
#[command(name = "braindump", about = "Capture an in-progress coding-agent session and hand it off to another tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ignore the config file; every option must be explicit
    #[arg(long, global = true)]
    detached: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default config file
    Init,
    /// Get a config value (e.g. `braindump get watch_interval_ms`); prints
    /// every value when no key is given
    Get {
        #[arg(value_name = "KEY")]
        key: Option<String>,
    },
    /// Set a config value (e.g. `braindump set sources.cursor ~/custom/path`)
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
    /// Remove a config value (e.g. `braindump unset sources.cursor`)
    Unset {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Print the first detected agent, or fail if none is found
    Detect,
    /// List sessions for one source (or the first detected agent)
    List {
        #[arg(long, value_name = "AGENT")]
        source: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        jsonl: bool,
    },
    /// Capture one session and write `.handoff/session.json`
    Capture {
        #[arg(long, value_name = "AGENT")]
        source: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Capture, compress, and assemble a handoff prompt for a target tool
    Handoff {
        #[arg(long, value_name = "AGENT")]
        source: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        tokens: Option<u64>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_clipboard: bool,
        #[arg(long)]
        launch: bool,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Poll agent storage on an interval, printing watcher events
    Watch {
        #[arg(long)]
        agents: Option<String>,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Print a previously written resume document
    Resume {
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Print the agent registry and detected sources
    Info,
}

/// Installs a `tracing_subscriber::fmt` subscriber gated by `RUST_LOG`
/// (default `warn`), so adapter-tick failures and watcher lifecycle
/// transitions surface without cluttering the plain `println!`/`eprintln!`
/// command output the rest of the CLI relies on.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = if cli.detached { Config::default() } else { Config::load() };

    let result = match &cli.command {
        Command::Init => config::init().map_err(|e| (e, 1)),
        Command::Get { key } => match key {
            Some(k) => config::get_value(k).map_err(|e| (e, 1)),
            None => config::list_values().map_err(|e| (e, 1)),
        },
        Command::Set { key, value } => config::set_value(key, value).map_err(|e| (e, 1)),
        Command::Unset { key } => config::unset_value(key).map_err(|e| (e, 1)),
        Command::Detect => run_detect(&config),
        Command::List { source, project, json, jsonl } => run_list(&config, source.as_deref(), project.as_deref(), *json, *jsonl),
        Command::Capture { source, session, project } => run_capture(&config, source.as_deref(), session.as_deref(), project.as_deref()),
        Command::Handoff { source, target, session, project, tokens, dry_run, no_clipboard, launch, output } => {
            run_handoff(&config, HandoffArgs {
                source: source.as_deref(),
                target: target.as_deref(),
                session: session.as_deref(),
                project: project.as_deref(),
                tokens: *tokens,
                dry_run: *dry_run,
                no_clipboard: *no_clipboard,
                launch: *launch,
                output: output.clone(),
            })
        }
        Command::Watch { agents, interval, project } => run_watch(&config, agents.as_deref(), *interval, project.as_deref()),
        Command::Resume { file } => run_resume(file.as_deref()),
        Command::Info => run_info(&config),
    };

    if let Err((err, code)) = result {
        eprintln!("Error: {err}");
        std::process::exit(code);
    }
}

type CliResult = Result<(), (BraindumpError, i32)>;

fn resolve_agent(config: &Config, source: Option<&str>) -> Result<AgentId, (BraindumpError, i32)> {
    if let Some(s) = source {
        return s.parse::<AgentId>().map_err(|e| (e, 1));
    }
    adapter::detect_any().ok_or((BraindumpError::NotDetected, 1))
        .or_else(|_| {
            // fall through to config-overridden detection: an agent may only
            // be detectable once its storage-path override is applied.
            AgentId::ALL
                .into_iter()
                .find(|id| adapter::for_agent_with_root(*id, config.source_path_for(*id)).detect())
                .ok_or((BraindumpError::NotDetected, 1))
        })
}

fn build_adapter(config: &Config, agent: AgentId) -> Box<dyn Adapter> {
    adapter::for_agent_with_root(agent, config.source_path_for(agent))
}

fn run_detect(config: &Config) -> CliResult {
    match resolve_agent(config, None) {
        Ok(agent) => {
            println!("{agent}");
            Ok(())
        }
        Err((err, code)) => {
            eprintln!("no agent session storage detected on this machine");
            Err((err, code))
        }
    }
}

fn run_list(config: &Config, source: Option<&str>, project: Option<&str>, json: bool, jsonl: bool) -> CliResult {
    let agent = resolve_agent(config, source)?;
    let adapter = build_adapter(config, agent);
    let sessions = adapter.list_sessions(project).map_err(|e| (e, 2))?;

    if jsonl {
        for s in &sessions {
            println!("{}", serde_json::to_string(s).unwrap_or_default());
        }
    } else if json {
        println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
    } else {
        print_sessions_table(&sessions);
    }
    Ok(())
}

fn print_sessions_table(sessions: &[SessionInfo]) {
    if sessions.is_empty() {
        eprintln!("No sessions found.");
        return;
    }
    for s in sessions {
        let last = s.last_active_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string());
        let count = s.message_count.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
        let preview = s.preview.as_deref().unwrap_or("");
        println!("{:<40} {:<25} {:>6}  {}", s.id, last, count, preview);
    }
}

fn run_capture(config: &Config, source: Option<&str>, session: Option<&str>, project: Option<&str>) -> CliResult {
    let agent = resolve_agent(config, source)?;
    let adapter = build_adapter(config, agent);

    let captured = match session {
        Some(id) => adapter.capture(id).map_err(|e| (e, 3))?,
        None => adapter.capture_latest(project).map_err(|e| (e, 3))?,
    };

    let handoff_dir = PathBuf::from(&captured.project.path).join(".handoff");
    std::fs::create_dir_all(&handoff_dir).map_err(|e| (BraindumpError::Io(e), 3))?;
    let session_path = handoff_dir.join("session.json");
    let json = serde_json::to_string_pretty(&captured).map_err(|e| (BraindumpError::JsonParse(e), 3))?;
    std::fs::write(&session_path, json).map_err(|e| (BraindumpError::Io(e), 3))?;

    println!("Captured {} session {} -> {}", agent, captured.session_id, session_path.display());
    Ok(())
}

struct HandoffArgs<'a> {
    source: Option<&'a str>,
    target: Option<&'a str>,
    session: Option<&'a str>,
    project: Option<&'a str>,
    tokens: Option<u64>,
    dry_run: bool,
    no_clipboard: bool,
    launch: bool,
    output: Option<PathBuf>,
}

fn run_handoff(config: &Config, args: HandoffArgs) -> CliResult {
    let agent = resolve_agent(config, args.source)?;
    let adapter = build_adapter(config, agent);

    let captured = match args.session {
        Some(id) => adapter.capture(id).map_err(|e| (e, 3))?,
        None => adapter.capture_latest(args.project).map_err(|e| (e, 3))?,
    };

    let target = args.target.unwrap_or("file");
    let budget = args
        .tokens
        .or(config.token_budget)
        .or_else(|| target.parse::<AgentId>().ok().map(|a| registry::registry_entry(a).usable_tokens))
        .unwrap_or(compress::GENERIC_FILE_BUDGET);

    let result = compress::compress(&captured, budget);
    let reference_file_name = ".braindump-handoff.md";
    let assembled = prompt::assemble(&captured, &result, target, reference_file_name);

    let handoff_dir = args.output.unwrap_or_else(|| PathBuf::from(&captured.project.path).join(".handoff"));
    std::fs::create_dir_all(&handoff_dir).map_err(|e| (BraindumpError::Io(e), 3))?;

    let (resume_text, full_document) = match &assembled {
        AssembledPrompt::Inline(text) => (text.clone(), None),
        AssembledPrompt::ReferenceFile { pointer_text, full_document } => (pointer_text.clone(), Some(full_document.clone())),
    };

    if args.dry_run {
        println!("{resume_text}");
        return Ok(());
    }

    let resume_path = handoff_dir.join("RESUME.md");
    std::fs::write(&resume_path, full_document.as_deref().unwrap_or(&resume_text)).map_err(|e| (BraindumpError::Io(e), 3))?;

    let session_json = serde_json::to_string_pretty(&captured).map_err(|e| (BraindumpError::JsonParse(e), 3))?;
    std::fs::write(handoff_dir.join("session.json"), session_json).map_err(|e| (BraindumpError::Io(e), 3))?;

    println!("Wrote handoff for {} session {} -> {}", agent, captured.session_id, resume_path.display());
    println!("{} tokens included, {} layer(s) dropped", result.total_tokens, result.dropped.len());

    if !args.no_clipboard {
        if let Err(e) = copy_to_clipboard(&resume_text) {
            eprintln!("warning: {e}");
        }
    }

    if args.launch {
        launch_target(target, &resume_text, &handoff_dir, reference_file_name)?;
    }

    Ok(())
}

/// Best-effort clipboard copy via the platform's native clipboard command,
/// the same spawn-and-tolerate-failure idiom the project enricher uses for
/// git. No clipboard crate in the dependency tree; a missing or failing
/// subprocess degrades to `ClipboardUnavailable` (§7), a warning, not a
/// pipeline failure.
fn copy_to_clipboard(text: &str) -> Result<(), BraindumpError> {
    let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
        ("pbcopy", &[])
    } else if cfg!(target_os = "windows") {
        ("clip", &[])
    } else {
        ("xclip", &["-selection", "clipboard"])
    };

    let mut child = ProcessCommand::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| BraindumpError::ClipboardUnavailable(e.to_string()))?;

    child
        .stdin
        .take()
        .ok_or_else(|| BraindumpError::ClipboardUnavailable("no stdin handle".into()))?
        .write_all(text.as_bytes())
        .map_err(|e| BraindumpError::ClipboardUnavailable(e.to_string()))?;

    let status = child.wait().map_err(|e| BraindumpError::ClipboardUnavailable(e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        Err(BraindumpError::ClipboardUnavailable(format!("{program} exited with {status}")))
    }
}

/// Launcher contract (§6): invoke the target tool with the resume text as
/// an argument, or, when it exceeds the 50KB threshold, write a reference
/// file and invoke with a short "read this file" prompt instead.
fn launch_target(target: &str, resume_text: &str, handoff_dir: &std::path::Path, reference_file_name: &str) -> CliResult {
    let (launch_text, launch_file) = if resume_text.len() > prompt::REFERENCE_FILE_THRESHOLD_BYTES {
        let ref_path = handoff_dir.join(reference_file_name);
        std::fs::write(&ref_path, resume_text).map_err(|e| (BraindumpError::Io(e), 3))?;
        (format!("Read {} and continue from there.", ref_path.display()), Some(ref_path))
    } else {
        (resume_text.to_string(), None)
    };

    let program = target_launch_command(target);
    let status = ProcessCommand::new(program).arg(&launch_text).status();
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err((BraindumpError::LaunchFailure(format!("{program} exited with {s}")), 3)),
        Err(e) => {
            if let Some(path) = launch_file {
                eprintln!("could not launch {program}; resume document is at {}", path.display());
            }
            Err((BraindumpError::LaunchFailure(e.to_string()), 3))
        }
    }
}

fn target_launch_command(target: &str) -> &'static str {
    match target.parse::<AgentId>() {
        Ok(AgentId::ClaudeCode) => "claude",
        Ok(AgentId::Codex) => "codex",
        Ok(AgentId::Cursor) => "cursor",
        Ok(AgentId::Copilot) => "copilot",
        Ok(AgentId::Gemini) => "gemini",
        Ok(AgentId::OpenCode) => "opencode",
        Ok(AgentId::Droid) => "droid",
        Err(_) => "cat",
    }
}

fn run_watch(config: &Config, agents: Option<&str>, interval: Option<u64>, project: Option<&str>) -> CliResult {
    let agent_ids: Vec<AgentId> = match agents {
        Some(csv) => csv
            .split(',')
            .map(|s| s.trim().parse::<AgentId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (e, 1))?,
        None => Vec::new(),
    };

    let mut watcher = Watcher::new();
    let options = StartOptions {
        agents: agent_ids,
        interval_ms: interval.unwrap_or_else(|| config.watch_interval_ms.unwrap_or(30_000)),
        project_path: project.map(str::to_string),
    };
    let interval_ms = options.interval_ms;
    watcher.start(options).map_err(|e| (e, 1))?;

    println!("Watching (interval {interval_ms}ms). Press Ctrl+C to stop.");
    loop {
        for event in watcher.tick() {
            match event.kind {
                WatchEventKind::NewSession => println!("[new-session] {} {}", event.agent, event.session_id),
                WatchEventKind::SessionUpdate => println!("[session-update] {} {}", event.agent, event.session_id),
                WatchEventKind::RateLimit { details } => println!("[rate-limit] {} {} — {details}", event.agent, event.session_id),
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(interval_ms));
    }
}

fn run_resume(file: Option<&std::path::Path>) -> CliResult {
    let path = file.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".handoff/RESUME.md"));
    let content = std::fs::read_to_string(&path).map_err(|e| (BraindumpError::Io(e), 3))?;
    print!("{content}");
    Ok(())
}

fn run_info(config: &Config) -> CliResult {
    println!("braindump — agent session capture and handoff\n");
    for id in AgentId::ALL {
        let entry = registry::registry_entry(id);
        let adapter = build_adapter(config, id);
        let status = if adapter.detect() { "detected" } else { "not detected" };
        println!(
            "{:<12} {:<20} context {:>8}  usable {:>7}  {}",
            id.as_str(),
            entry.display_name,
            entry.context_window,
            entry.usable_tokens,
            status
        );
    }
    Ok(())
}
