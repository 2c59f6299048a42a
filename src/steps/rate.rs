//! Built-in rate check step

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::convergence::DEFAULT_POLL_INTERVAL;
use crate::session::{Probe, Sample};
use crate::stats::{MetricSampler, ToleranceEvaluator};

use super::{Step, StepContext, StepOutcome};

/// Sampling window used unless overridden
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(5);

/// Pulls a scalar counter out of one sample
pub type SampleExtractor = dyn Fn(&Sample) -> Option<f64> + Send + Sync;

/// Samples a counter over a window and checks the derived per-second rate
/// against an expected value with a relative tolerance band.
///
/// The generic form of "check the received bitrate is within 10% of the
/// nominal value": sample a byte counter once per second for five seconds
/// and compare the endpoint-derived rate against the band.
pub struct RateCheckStep {
    name: String,
    probe: Probe,
    extract: Arc<SampleExtractor>,
    expected: f64,
    tolerance: f64,
    interval: Duration,
    window: Duration,
    recover_on_crash: bool,
}

impl RateCheckStep {
    pub fn new(
        name: impl Into<String>,
        probe: Probe,
        extract: Arc<SampleExtractor>,
        expected: f64,
        tolerance: f64,
    ) -> Self {
        Self {
            name: name.into(),
            probe,
            extract,
            expected,
            tolerance,
            interval: DEFAULT_POLL_INTERVAL,
            window: DEFAULT_RATE_WINDOW,
            recover_on_crash: false,
        }
    }

    /// Check the numeric signal of one tuple slot, e.g. the sender's byte
    /// counter.
    pub fn slot_counter(
        name: impl Into<String>,
        probe: Probe,
        slot: usize,
        expected: f64,
        tolerance: f64,
    ) -> Self {
        Self::new(
            name,
            probe,
            Arc::new(move |sample: &Sample| sample.signals.get(slot).and_then(|s| s.as_f64())),
            expected,
            tolerance,
        )
    }

    pub fn with_cadence(mut self, interval: Duration, window: Duration) -> Self {
        self.interval = interval;
        self.window = window;
        self
    }

    /// Opt into session recovery: a crash mid-window is surfaced to the
    /// tuple runner instead of breaking the check.
    pub fn with_recovery(mut self, recover: bool) -> Self {
        self.recover_on_crash = recover;
        self
    }
}

#[async_trait]
impl Step for RateCheckStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let sampler = MetricSampler::new(self.interval, self.window);
        let provider = ctx.provider();
        let sessions = ctx.sessions();
        let clock = ctx.clock();

        let window = match sampler
            .sample(provider, sessions, &self.probe, &clock, ctx.samples_mut())
            .await
        {
            Ok(window) => window,
            Err(e) if e.is_crash() && self.recover_on_crash => return StepOutcome::from_error(e),
            Err(e) => return StepOutcome::Broken(e.to_string()),
        };

        let evaluator = ToleranceEvaluator::new(self.expected, self.tolerance);
        match evaluator.evaluate_window(&window, |sample| (self.extract)(sample)) {
            Ok(obs) => {
                ctx.attach_text(
                    self.name.as_str(),
                    format!(
                        "expected rate in [{:.1}..{:.1}] per second, observed {:.1} over {} ms",
                        obs.lower,
                        obs.upper,
                        obs.observed,
                        window.span_ms()
                    ),
                );
                if obs.within_bounds {
                    StepOutcome::Passed
                } else {
                    StepOutcome::Failed(format!(
                        "observed rate {:.1} outside [{:.1}..{:.1}]",
                        obs.observed, obs.lower, obs.upper
                    ))
                }
            }
            Err(e) => StepOutcome::Broken(e.to_string()),
        }
    }
}
