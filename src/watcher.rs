//! Watcher (§4.7): a per-process singleton state machine {idle, running}
//! that polls the configured adapters on a timer and diffs consecutive
//! snapshots into `new-session` / `session-update` / `rate-limit` events.
//! Timer-driven execution itself belongs to the CLI's `watch` command; this
//! module owns the state machine and the pure tick-diff logic so the
//! diffing rule (§8 "watcher rate-limit" scenario) can be tested without a
//! real clock or a real adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::adapter::Adapter;
use crate::ast::AgentId;
use crate::error::{BraindumpError, Result};

/// Enforces "only one active instance" (§9 "Watcher singleton") as an
/// ownership handle rather than relying on callers to behave: a second
/// `start` without an intervening `stop` fails with `AlreadyRunning`.
static RUNNING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub agent: AgentId,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub message_count: u64,
    pub last_checked_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// Set once a stall has already produced a `rate-limit` event, so the
    /// rule fires at most once per episode until growth resets it.
    pub rate_limit_emitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    NewSession,
    SessionUpdate,
    RateLimit { details: String },
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub agent: AgentId,
    pub session_id: String,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone)]
pub struct WatcherState {
    pub timestamp: DateTime<Utc>,
    pub agents: Vec<AgentId>,
    pub active_sessions: HashMap<SessionKey, TrackedSession>,
    pub running: bool,
}

pub struct StartOptions {
    pub agents: Vec<AgentId>,
    pub interval_ms: u64,
    pub project_path: Option<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        StartOptions { agents: Vec::new(), interval_ms: 30_000, project_path: None }
    }
}

pub struct Watcher {
    agents: Vec<AgentId>,
    project_path: Option<String>,
    snapshot: HashMap<SessionKey, TrackedSession>,
    running: bool,
}

impl Watcher {
    pub fn new() -> Self {
        Watcher { agents: Vec::new(), project_path: None, snapshot: HashMap::new(), running: false }
    }

    /// Transitions idle -> running. `options.agents` defaults to every
    /// adapter whose `detect()` currently returns true.
    pub fn start(&mut self, options: StartOptions) -> Result<()> {
        if RUNNING.swap(true, Ordering::SeqCst) {
            return Err(BraindumpError::AlreadyRunning);
        }
        self.agents = if options.agents.is_empty() {
            crate::adapter::all_adapters().iter().filter(|a| a.detect()).map(|a| a.agent_id()).collect()
        } else {
            options.agents
        };
        self.project_path = options.project_path;
        self.snapshot.clear();
        self.running = true;
        Ok(())
    }

    /// Cooperative cancellation: callers finish any in-flight tick before
    /// calling this. Transitions running -> idle.
    pub fn stop(&mut self) {
        self.running = false;
        RUNNING.store(false, Ordering::SeqCst);
    }

    pub fn get_state(&self) -> WatcherState {
        WatcherState {
            timestamp: Utc::now(),
            agents: self.agents.clone(),
            active_sessions: self.snapshot.clone(),
            running: self.running,
        }
    }

    /// One-shot capture of every watched agent's session list, independent
    /// of `running`/`idle` state and without mutating the tracked snapshot.
    pub fn take_snapshot(&self) -> HashMap<SessionKey, u64> {
        let agents = if self.agents.is_empty() { AgentId::ALL.to_vec() } else { self.agents.clone() };
        current_counts(&agents, self.project_path.as_deref())
    }

    /// Runs one tick: lists sessions for every watched agent, diffs against
    /// the stored snapshot, emits events, and replaces the snapshot.
    pub fn tick(&mut self) -> Vec<WatchEvent> {
        let counts = current_counts(&self.agents, self.project_path.as_deref());
        let (events, next_snapshot) = diff_tick(&self.snapshot, &counts, Utc::now());
        self.snapshot = next_snapshot;
        events
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

fn current_counts(agents: &[AgentId], project_path: Option<&str>) -> HashMap<SessionKey, u64> {
    let mut counts = HashMap::new();
    for &agent in agents {
        let adapter = crate::adapter::for_agent(agent);
        match adapter.list_sessions(project_path) {
            Ok(sessions) => {
                for s in sessions {
                    counts.insert(SessionKey { agent, session_id: s.id }, s.message_count.unwrap_or(0));
                }
            }
            Err(reason) => {
                tracing::warn!(%agent, error = %reason, "adapter tick failed, skipping this agent");
            }
        }
    }
    counts
}

/// The pure diffing rule from §4.7, steps 2-4: given the previous snapshot
/// and the freshly observed message counts, returns the events to emit and
/// the snapshot to carry forward to the next tick.
///
/// A `rate-limit` fires only on the *second* consecutive unchanged
/// observation (the key must already have gone through one unchanged tick
/// without firing), and only once per stall episode; any subsequent growth
/// clears `rate_limit_emitted` for the next stall.
fn diff_tick(
    previous: &HashMap<SessionKey, TrackedSession>,
    current_counts: &HashMap<SessionKey, u64>,
    now: DateTime<Utc>,
) -> (Vec<WatchEvent>, HashMap<SessionKey, TrackedSession>) {
    let mut events = Vec::new();
    let mut next = HashMap::new();

    for (key, &count) in current_counts {
        match previous.get(key) {
            None => {
                events.push(WatchEvent { agent: key.agent, session_id: key.session_id.clone(), kind: WatchEventKind::NewSession });
                next.insert(
                    key.clone(),
                    TrackedSession { message_count: count, last_checked_at: now, last_changed_at: now, rate_limit_emitted: false },
                );
            }
            Some(prev) if count > prev.message_count => {
                events.push(WatchEvent { agent: key.agent, session_id: key.session_id.clone(), kind: WatchEventKind::SessionUpdate });
                next.insert(
                    key.clone(),
                    TrackedSession { message_count: count, last_checked_at: now, last_changed_at: now, rate_limit_emitted: false },
                );
            }
            Some(prev) => {
                let unchanged_since_last_tick = prev.last_changed_at < prev.last_checked_at;
                let should_emit = unchanged_since_last_tick && !prev.rate_limit_emitted;
                if should_emit {
                    events.push(WatchEvent {
                        agent: key.agent,
                        session_id: key.session_id.clone(),
                        kind: WatchEventKind::RateLimit {
                            details: format!("no new messages in {} session for two consecutive checks", key.agent),
                        },
                    });
                }
                next.insert(
                    key.clone(),
                    TrackedSession {
                        message_count: count,
                        last_checked_at: now,
                        last_changed_at: prev.last_changed_at,
                        rate_limit_emitted: prev.rate_limit_emitted || should_emit,
                    },
                );
            }
        }
    }

    (events, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> SessionKey {
        SessionKey { agent: AgentId::ClaudeCode, session_id: id.to_string() }
    }

    fn tick_at(
        snapshot: &HashMap<SessionKey, TrackedSession>,
        counts: &HashMap<SessionKey, u64>,
        seconds: i64,
    ) -> (Vec<WatchEvent>, HashMap<SessionKey, TrackedSession>) {
        diff_tick(snapshot, counts, DateTime::from_timestamp(seconds, 0).unwrap())
    }

    #[test]
    fn first_observation_emits_new_session_exactly_once() {
        let counts = HashMap::from([(key("sess-a"), 3)]);
        let (events, snapshot) = tick_at(&HashMap::new(), &counts, 0);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, WatchEventKind::NewSession));

        let (events2, _) = tick_at(&snapshot, &counts, 10);
        assert!(events2.is_empty(), "unchanged count on the very next tick shouldn't fire anything yet");
    }

    #[test]
    fn rate_limit_fires_once_on_second_stall_then_resets_on_growth() {
        let counts = HashMap::from([(key("sess-a"), 5)]);
        let (_, snap1) = tick_at(&HashMap::new(), &counts, 0);
        let (events_tick2, snap2) = tick_at(&snap1, &counts, 30);
        assert!(events_tick2.is_empty(), "first unchanged observation shouldn't fire yet");

        let (events_tick3, snap3) = tick_at(&snap2, &counts, 60);
        assert_eq!(events_tick3.len(), 1);
        assert!(matches!(events_tick3[0].kind, WatchEventKind::RateLimit { .. }));

        let (events_tick4, snap4) = tick_at(&snap3, &counts, 90);
        assert!(events_tick4.is_empty(), "rate-limit fires at most once per stall episode");

        let grown = HashMap::from([(key("sess-a"), 9)]);
        let (events_tick5, snap5) = tick_at(&snap4, &grown, 120);
        assert_eq!(events_tick5.len(), 1);
        assert!(matches!(events_tick5[0].kind, WatchEventKind::SessionUpdate));

        let (events_tick6, _) = tick_at(&snap5, &grown, 150);
        assert!(events_tick6.is_empty());
    }

    #[test]
    fn second_start_without_stop_fails_with_already_running() {
        let mut a = Watcher::new();
        let mut b = Watcher::new();
        let r1 = a.start(StartOptions { agents: vec![AgentId::ClaudeCode], ..StartOptions::default() });
        assert!(r1.is_ok());
        let r2 = b.start(StartOptions::default());
        assert!(matches!(r2, Err(BraindumpError::AlreadyRunning)));
        a.stop();
        let r3 = b.start(StartOptions::default());
        assert!(r3.is_ok());
        b.stop();
    }
}
