//! Scripted in-memory session provider
//!
//! Replays configured signal sequences instead of driving real clients, so
//! engine behavior can be exercised deterministically. Used by the crate's
//! own tests and useful to embedders testing custom steps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::config::SessionConfig;

use super::{Probe, Session, SessionId, SessionProvider, Signal};

/// One scripted reaction to a `read`
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    /// Answer with this signal
    Signal(Signal),
    /// Fail with the distinguished crash error
    Crash(String),
    /// Fail with a non-crash probe error
    Fail(String),
    /// Never answer; exercises budget and cancellation paths
    Hang,
}

/// Ordered reads one session will serve.
///
/// Once exhausted the last entry repeats, matching a client that keeps
/// reporting its final state. An empty script reports `unknown` forever.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    reads: Vec<ScriptedRead>,
}

impl SessionScript {
    pub fn new(reads: Vec<ScriptedRead>) -> Self {
        Self { reads }
    }

    /// Script of plain text signals
    pub fn texts<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reads: values
                .into_iter()
                .map(|v| ScriptedRead::Signal(Signal::Text(v.into())))
                .collect(),
        }
    }

    /// Script of numeric counter signals
    pub fn counters<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self {
            reads: values
                .into_iter()
                .map(|v| ScriptedRead::Signal(Signal::Number(v)))
                .collect(),
        }
    }

    /// Append numeric counter signals after the scripted reads
    pub fn then_counters<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.reads
            .extend(values.into_iter().map(|v| ScriptedRead::Signal(Signal::Number(v))));
        self
    }

    /// Append a crash after the scripted reads
    pub fn then_crash(mut self, message: &str) -> Self {
        self.reads.push(ScriptedRead::Crash(message.to_string()));
        self
    }

    /// Append a non-crash read failure after the scripted reads
    pub fn then_fail(mut self, message: &str) -> Self {
        self.reads.push(ScriptedRead::Fail(message.to_string()));
        self
    }

    /// Append a read that never completes
    pub fn then_hang(mut self) -> Self {
        self.reads.push(ScriptedRead::Hang);
        self
    }
}

struct LiveSession {
    script: SessionScript,
    cursor: usize,
}

#[derive(Default)]
struct ProviderState {
    scripts: HashMap<String, VecDeque<SessionScript>>,
    live: HashMap<SessionId, LiveSession>,
    refuse: HashSet<String>,
    next_id: u64,
}

/// Deterministic in-memory provider replaying per-configuration scripts
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<ProviderState>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next session acquired with this config name.
    ///
    /// Each acquisition takes the next queued script; the final one is
    /// reused for any further sessions, so a single script serves repeated
    /// acquisitions of the same configuration.
    pub fn script(&self, config_name: &str, script: SessionScript) {
        self.lock()
            .scripts
            .entry(config_name.to_string())
            .or_default()
            .push_back(script);
    }

    /// Make acquisition fail for this config name
    pub fn refuse(&self, config_name: &str) {
        self.lock().refuse.insert(config_name.to_string());
    }

    /// Sessions handed out so far
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Sessions given back so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().expect("scripted provider state poisoned")
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn acquire(&self, role: &str, config: &SessionConfig) -> Result<Session> {
        let id = {
            let mut state = self.lock();
            if state.refuse.contains(&config.name) {
                return Err(Error::session_acquire(
                    role,
                    "provider refused this configuration",
                ));
            }
            let queue = state.scripts.get_mut(&config.name).ok_or_else(|| {
                Error::session_acquire(
                    role,
                    &format!("no script for configuration '{}'", config.name),
                )
            })?;
            let script = if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            state.next_id += 1;
            let id = SessionId(state.next_id);
            state.live.insert(id, LiveSession { script, cursor: 0 });
            id
        };
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Session {
            id,
            role: role.to_string(),
            config: config.clone(),
        })
    }

    async fn release(&self, session: Session) {
        self.lock().live.remove(&session.id);
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    async fn read(&self, session: &Session, probe: &Probe) -> Result<Signal> {
        let read = {
            let mut state = self.lock();
            let live = state.live.get_mut(&session.id).ok_or_else(|| {
                Error::probe_failed(probe.as_str(), session.id, "session is not live")
            })?;
            let read = live
                .script
                .reads
                .get(live.cursor)
                .or_else(|| live.script.reads.last())
                .cloned()
                .unwrap_or(ScriptedRead::Signal(Signal::Text("unknown".to_string())));
            if live.cursor < live.script.reads.len() {
                live.cursor += 1;
            }
            read
        };

        match read {
            ScriptedRead::Signal(signal) => Ok(signal),
            ScriptedRead::Crash(message) => Err(Error::session_crashed(session.id, &message)),
            ScriptedRead::Fail(message) => {
                Err(Error::probe_failed(probe.as_str(), session.id, &message))
            }
            ScriptedRead::Hang => Ok(std::future::pending().await),
        }
    }
}
