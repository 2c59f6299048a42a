//! Poll-until-converged state machine
//!
//! Many interop conditions are asynchronous: every participant must
//! eventually report a target state, and some states mean the attempt is
//! already lost. [`ConvergenceWatcher`] polls all sessions of a tuple at a
//! fixed cadence and resolves to exactly one terminal outcome within a
//! budget.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::session::{Probe, RunClock, Sample, Session, SessionProvider, Signal};

/// Poll cadence used by the built-in steps unless overridden
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watch budget used by the built-in steps unless overridden
pub const DEFAULT_CONVERGENCE_BUDGET: Duration = Duration::from_secs(60);

/// Terminal outcome of one watch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    /// Every session satisfied the success predicate
    Success,
    /// Some session satisfied the failure predicate or crashed
    Failed,
    /// The budget elapsed without a terminal match
    Timeout,
}

impl fmt::Display for ConvergenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// What to do when a session crashes mid-poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashPolicy {
    /// Classify the crash as a failed convergence
    #[default]
    Fail,
    /// Return the crash error so the tuple runner can attempt recovery
    Surface,
}

/// Where a watch cycle ended up
#[derive(Debug, Clone)]
pub struct WatchReport {
    pub outcome: ConvergenceOutcome,
    /// Reason for failed and timeout outcomes
    pub cause: Option<String>,
    /// Completed polls
    pub polls: u32,
}

/// Watch lifecycle; no transition leaves a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Pending,
    Polling,
    Done(ConvergenceOutcome),
}

impl WatchState {
    fn begin(&mut self) {
        if matches!(self, Self::Pending) {
            *self = Self::Polling;
        }
    }

    fn finish(&mut self, outcome: ConvergenceOutcome) -> ConvergenceOutcome {
        debug_assert!(!matches!(self, Self::Done(_)), "watch already terminal");
        *self = Self::Done(outcome);
        outcome
    }
}

/// Generic poll-until-condition engine.
///
/// Ticks at fixed `interval` spacing from the start of the watch, reading
/// one signal per session each tick. A tick whose signals all satisfy the
/// success predicate resolves SUCCESS; any signal satisfying the failure
/// predicate resolves FAILED immediately, without waiting for the rest to
/// fail too. If the next tick would pass the budget the watch resolves
/// TIMEOUT.
#[derive(Debug, Clone)]
pub struct ConvergenceWatcher {
    interval: Duration,
    budget: Duration,
    crash_policy: CrashPolicy,
}

impl ConvergenceWatcher {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval,
            budget,
            crash_policy: CrashPolicy::Fail,
        }
    }

    pub fn with_crash_policy(mut self, policy: CrashPolicy) -> Self {
        self.crash_policy = policy;
        self
    }

    /// Poll until the predicates resolve or the budget runs out.
    ///
    /// Samples are pushed into `trace` as they are read, so a watch cut
    /// short by cancellation keeps its partial telemetry. Crashed reads
    /// follow the configured [`CrashPolicy`]; other read errors propagate
    /// and mean the check could not be performed.
    #[allow(clippy::too_many_arguments)]
    pub async fn watch<S, F>(
        &self,
        provider: &dyn SessionProvider,
        sessions: &[Session],
        probe: &Probe,
        clock: &RunClock,
        trace: &mut Vec<Sample>,
        success: S,
        failure: F,
    ) -> Result<WatchReport>
    where
        S: Fn(&Signal) -> bool + Send,
        F: Fn(&Signal) -> bool + Send,
    {
        if self.interval.is_zero() {
            return Err(Error::config("poll interval must be positive"));
        }
        if sessions.is_empty() {
            return Err(Error::config("cannot watch zero sessions"));
        }

        let started = Instant::now();
        let deadline = started + self.budget;
        let mut tick = started;
        let mut state = WatchState::Pending;
        let mut polls = 0u32;

        loop {
            tick += self.interval;
            if tick > deadline {
                let outcome = state.finish(ConvergenceOutcome::Timeout);
                tracing::debug!(probe = %probe, polls, "convergence budget exhausted");
                return Ok(WatchReport {
                    outcome,
                    cause: Some(format!(
                        "no terminal state within {} ms ({} polls)",
                        self.budget.as_millis(),
                        polls
                    )),
                    polls,
                });
            }
            tokio::time::sleep_until(tick).await;
            state.begin();

            let signals = match provider.sample_all(sessions, probe).await {
                Ok(signals) => signals,
                Err(e) if e.is_crash() && self.crash_policy == CrashPolicy::Surface => {
                    return Err(e);
                }
                Err(e) if e.is_crash() => {
                    let outcome = state.finish(ConvergenceOutcome::Failed);
                    return Ok(WatchReport {
                        outcome,
                        cause: Some(e.to_string()),
                        polls,
                    });
                }
                Err(e) => return Err(e),
            };
            polls += 1;

            let sample = Sample::capture(clock, signals);
            trace.push(sample.clone());

            if let Some(slot) = sample.signals.iter().position(|sig| failure(sig)) {
                let role = sessions.get(slot).map(|s| s.role.as_str()).unwrap_or("?");
                let outcome = state.finish(ConvergenceOutcome::Failed);
                return Ok(WatchReport {
                    outcome,
                    cause: Some(format!(
                        "role '{role}' reported a failure signal on poll {polls}"
                    )),
                    polls,
                });
            }

            if sample.signals.iter().all(|sig| success(sig)) {
                let outcome = state.finish(ConvergenceOutcome::Success);
                tracing::debug!(probe = %probe, polls, "converged");
                return Ok(WatchReport {
                    outcome,
                    cause: None,
                    polls,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{ScriptedProvider, SessionScript};

    async fn sessions_for(provider: &ScriptedProvider, configs: &[&str]) -> Vec<Session> {
        let mut sessions = Vec::new();
        for name in configs {
            sessions.push(
                provider
                    .acquire("peer", &SessionConfig::new(*name))
                    .await
                    .unwrap(),
            );
        }
        sessions
    }

    fn connected(signal: &Signal) -> bool {
        signal.as_str() == Some("connected")
    }

    fn failed(signal: &Signal) -> bool {
        signal.as_str() == Some("failed")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_tick() {
        let provider = ScriptedProvider::new();
        provider.script(
            "chrome",
            SessionScript::texts(["unknown", "unknown", "connected"]),
        );
        let sessions = sessions_for(&provider, &["chrome"]).await;
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let report = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(10))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ConvergenceOutcome::Success);
        assert_eq!(report.polls, 3);
        assert_eq!(trace.len(), 3);
        // first poll lands one interval in, not at t=0
        assert_eq!(trace[0].at_ms, 1000);
        assert_eq!(trace[2].at_ms, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_fast_without_waiting_for_others() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking"]));
        provider.script("firefox", SessionScript::texts(["checking", "failed"]));
        let mut sessions = sessions_for(&provider, &["chrome"]).await;
        sessions.extend(sessions_for(&provider, &["firefox"]).await);
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let report = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(60))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ConvergenceOutcome::Failed);
        assert_eq!(report.polls, 2);
        assert!(report.cause.unwrap().contains("peer"));
        assert_eq!(trace.last().unwrap().at_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_budget_polls() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking"]));
        let sessions = sessions_for(&provider, &["chrome"]).await;
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let report = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(5))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ConvergenceOutcome::Timeout);
        assert_eq!(report.polls, 5);
        assert_eq!(
            trace.iter().map(|s| s.at_ms).collect::<Vec<_>>(),
            vec![1000, 2000, 3000, 4000, 5000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_requires_every_session() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["connected"]));
        provider.script("firefox", SessionScript::texts(["checking", "connected"]));
        let mut sessions = sessions_for(&provider, &["chrome"]).await;
        sessions.extend(sessions_for(&provider, &["firefox"]).await);
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let report = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(10))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ConvergenceOutcome::Success);
        assert_eq!(report.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_classifies_failed_by_default() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking"]).then_crash("tab gone"));
        let sessions = sessions_for(&provider, &["chrome"]).await;
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let report = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(10))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ConvergenceOutcome::Failed);
        assert!(report.cause.unwrap().contains("crashed"));
    }

    #[tokio::test(start_paused = true)]
    async fn crash_surfaces_when_requested() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking"]).then_crash("tab gone"));
        let sessions = sessions_for(&provider, &["chrome"]).await;
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let err = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(10))
            .with_crash_policy(CrashPolicy::Surface)
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap_err();

        assert!(err.is_crash());
        // the poll before the crash is still in the trace
        assert_eq!(trace.len(), 1);
    }

    #[tokio::test]
    async fn rejects_degenerate_configuration() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["connected"]));
        let sessions = sessions_for(&provider, &["chrome"]).await;
        let clock = RunClock::start();
        let mut trace = Vec::new();

        let err = ConvergenceWatcher::new(Duration::ZERO, Duration::from_secs(5))
            .watch(
                &provider,
                &sessions,
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap_err();
        assert!(err.is_config());

        let err = ConvergenceWatcher::new(Duration::from_secs(1), Duration::from_secs(5))
            .watch(
                &provider,
                &[],
                &Probe::new("state"),
                &clock,
                &mut trace,
                connected,
                failed,
            )
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
