//! Time-windowed metric sampling
//!
//! Rate checks need telemetry captured over a bounded window rather than a
//! single snapshot. [`MetricSampler`] reads all sessions of a tuple at a
//! fixed cadence and yields a validated [`MetricWindow`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::session::{Probe, RunClock, Sample, Session, SessionProvider};

/// Ordered samples spanning a bounded duration, at least two points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricWindow")]
pub struct MetricWindow {
    samples: Vec<Sample>,
}

impl MetricWindow {
    /// Validate and wrap a captured sample series
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.len() < 2 {
            return Err(Error::invalid_window(format!(
                "need at least two samples, got {}",
                samples.len()
            )));
        }
        for pair in samples.windows(2) {
            if pair[1].at_ms < pair[0].at_ms {
                return Err(Error::invalid_window("sample timestamps regressed"));
            }
        }
        Ok(Self { samples })
    }

    pub fn first(&self) -> &Sample {
        &self.samples[0]
    }

    pub fn last(&self) -> &Sample {
        &self.samples[self.samples.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Milliseconds between the first and last sample
    pub fn span_ms(&self) -> u64 {
        self.last().at_ms - self.first().at_ms
    }
}

/// Unvalidated wire shape; deserialization funnels through
/// [`MetricWindow::new`] so persisted windows meet the same invariants
#[derive(Deserialize)]
struct RawMetricWindow {
    samples: Vec<Sample>,
}

impl TryFrom<RawMetricWindow> for MetricWindow {
    type Error = Error;

    fn try_from(raw: RawMetricWindow) -> Result<Self> {
        Self::new(raw.samples)
    }
}

/// Captures samples at fixed spacing over a bounded window.
///
/// The first sample is taken immediately and the final one exactly at the
/// window end, so every window carries at least two points. Intermediate
/// samples land on interval ticks in between.
#[derive(Debug, Clone)]
pub struct MetricSampler {
    interval: Duration,
    window: Duration,
}

impl MetricSampler {
    pub fn new(interval: Duration, window: Duration) -> Self {
        Self { interval, window }
    }

    /// Capture one window across all sessions.
    ///
    /// Samples are pushed into `trace` as they are read, so a sampling run
    /// cut short by cancellation keeps its partial telemetry. Read errors
    /// propagate; a crash can then drive step recovery, anything else means
    /// the window could not be measured.
    pub async fn sample(
        &self,
        provider: &dyn SessionProvider,
        sessions: &[Session],
        probe: &Probe,
        clock: &RunClock,
        trace: &mut Vec<Sample>,
    ) -> Result<MetricWindow> {
        if self.interval.is_zero() {
            return Err(Error::invalid_window("sampling interval must be positive"));
        }
        if sessions.is_empty() {
            return Err(Error::invalid_window("cannot sample zero sessions"));
        }

        let started = Instant::now();
        let end = started + self.window;
        let mut samples = Vec::new();

        let first = Sample::capture(clock, provider.sample_all(sessions, probe).await?);
        trace.push(first.clone());
        samples.push(first);

        let mut tick = started;
        loop {
            tick += self.interval;
            if tick >= end {
                break;
            }
            tokio::time::sleep_until(tick).await;
            let sample = Sample::capture(clock, provider.sample_all(sessions, probe).await?);
            trace.push(sample.clone());
            samples.push(sample);
        }

        tokio::time::sleep_until(end).await;
        let last = Sample::capture(clock, provider.sample_all(sessions, probe).await?);
        trace.push(last.clone());
        samples.push(last);

        tracing::debug!(probe = %probe, samples = samples.len(), "metric window captured");
        MetricWindow::new(samples)
    }
}
