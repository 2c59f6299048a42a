//! Built-in convergence step

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::convergence::{
    ConvergenceOutcome, ConvergenceWatcher, CrashPolicy, DEFAULT_CONVERGENCE_BUDGET,
    DEFAULT_POLL_INTERVAL,
};
use crate::session::{Probe, Signal};

use super::{Step, StepContext, StepOutcome};

/// Predicate over one session's signal
pub type SignalPredicate = dyn Fn(&Signal) -> bool + Send + Sync;

/// Waits until every session satisfies a success predicate, failing fast
/// when any satisfies a failure predicate.
///
/// This is the generic form of "wait for every peer to reach the connected
/// state": probe the connection state of each participant once per second
/// until all converge or one reports a lost connection.
pub struct ConvergenceStep {
    name: String,
    probe: Probe,
    success: Arc<SignalPredicate>,
    failure: Arc<SignalPredicate>,
    interval: Duration,
    budget: Duration,
    recover_on_crash: bool,
}

impl ConvergenceStep {
    pub fn new(
        name: impl Into<String>,
        probe: Probe,
        success: Arc<SignalPredicate>,
        failure: Arc<SignalPredicate>,
    ) -> Self {
        Self {
            name: name.into(),
            probe,
            success,
            failure,
            interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_CONVERGENCE_BUDGET,
            recover_on_crash: false,
        }
    }

    /// Convenience for text-state probes: succeed when every session
    /// reports one of `success_states`, fail as soon as any reports one of
    /// `failure_states`.
    pub fn text_states(
        name: impl Into<String>,
        probe: Probe,
        success_states: &[&str],
        failure_states: &[&str],
    ) -> Self {
        let success: Vec<String> = success_states.iter().map(|s| s.to_string()).collect();
        let failure: Vec<String> = failure_states.iter().map(|s| s.to_string()).collect();
        Self::new(
            name,
            probe,
            Arc::new(move |signal: &Signal| {
                signal
                    .as_str()
                    .map(|state| success.iter().any(|s| s == state))
                    .unwrap_or(false)
            }),
            Arc::new(move |signal: &Signal| {
                signal
                    .as_str()
                    .map(|state| failure.iter().any(|s| s == state))
                    .unwrap_or(false)
            }),
        )
    }

    pub fn with_cadence(mut self, interval: Duration, budget: Duration) -> Self {
        self.interval = interval;
        self.budget = budget;
        self
    }

    /// Opt into session recovery: a crash mid-poll is surfaced to the tuple
    /// runner instead of counting as a failed convergence.
    pub fn with_recovery(mut self, recover: bool) -> Self {
        self.recover_on_crash = recover;
        self
    }
}

#[async_trait]
impl Step for ConvergenceStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let policy = if self.recover_on_crash {
            CrashPolicy::Surface
        } else {
            CrashPolicy::Fail
        };
        let watcher =
            ConvergenceWatcher::new(self.interval, self.budget).with_crash_policy(policy);

        let provider = ctx.provider();
        let sessions = ctx.sessions();
        let clock = ctx.clock();
        let report = watcher
            .watch(
                provider,
                sessions,
                &self.probe,
                &clock,
                ctx.samples_mut(),
                |signal| (self.success)(signal),
                |signal| (self.failure)(signal),
            )
            .await;

        match report {
            Ok(report) => match report.outcome {
                ConvergenceOutcome::Success => StepOutcome::Passed,
                ConvergenceOutcome::Failed => StepOutcome::Failed(
                    report
                        .cause
                        .unwrap_or_else(|| "a session reported a failure state".to_string()),
                ),
                ConvergenceOutcome::Timeout => StepOutcome::TimedOut(
                    report
                        .cause
                        .unwrap_or_else(|| "convergence budget elapsed".to_string()),
                ),
            },
            Err(e) => StepOutcome::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{RunClock, ScriptedProvider, SessionProvider, SessionScript};

    #[tokio::test(start_paused = true)]
    async fn converges_and_records_samples() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking", "connected"]));
        let sessions = vec![provider
            .acquire("caller", &SessionConfig::new("chrome"))
            .await
            .unwrap()];

        let step = ConvergenceStep::text_states(
            "wait for connection",
            Probe::new("state"),
            &["connected", "completed"],
            &["failed"],
        )
        .with_cadence(Duration::from_secs(1), Duration::from_secs(10));

        let mut samples = Vec::new();
        let mut attachments = Vec::new();
        let clock = RunClock::start();
        let mut ctx =
            StepContext::new(&provider, &sessions, clock, &mut samples, &mut attachments);

        assert_eq!(step.execute(&mut ctx).await, StepOutcome::Passed);
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_state_fails_the_step() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking", "failed"]));
        let sessions = vec![provider
            .acquire("caller", &SessionConfig::new("chrome"))
            .await
            .unwrap()];

        let step = ConvergenceStep::text_states(
            "wait for connection",
            Probe::new("state"),
            &["connected"],
            &["failed"],
        )
        .with_cadence(Duration::from_secs(1), Duration::from_secs(10));

        let mut samples = Vec::new();
        let mut attachments = Vec::new();
        let clock = RunClock::start();
        let mut ctx =
            StepContext::new(&provider, &sessions, clock, &mut samples, &mut attachments);

        assert!(matches!(step.execute(&mut ctx).await, StepOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn crash_surfaces_when_recovery_enabled() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["checking"]).then_crash("gone"));
        let sessions = vec![provider
            .acquire("caller", &SessionConfig::new("chrome"))
            .await
            .unwrap()];

        let step = ConvergenceStep::text_states(
            "wait for connection",
            Probe::new("state"),
            &["connected"],
            &["failed"],
        )
        .with_cadence(Duration::from_secs(1), Duration::from_secs(10))
        .with_recovery(true);

        let mut samples = Vec::new();
        let mut attachments = Vec::new();
        let clock = RunClock::start();
        let mut ctx =
            StepContext::new(&provider, &sessions, clock, &mut samples, &mut attachments);

        assert!(matches!(
            step.execute(&mut ctx).await,
            StepOutcome::Crashed { .. }
        ));
    }
}
