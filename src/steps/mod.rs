//! Test steps
//!
//! A tuple's scenario is an ordered list of steps. The engine fixes no
//! step vocabulary; callers implement [`Step`] on top of the convergence
//! and sampling primitives. The submodules ship generic steps covering the
//! common cases.

pub mod convergence;
pub mod rate;
pub mod snapshot;

pub use convergence::ConvergenceStep;
pub use rate::RateCheckStep;
pub use snapshot::SnapshotStep;

use async_trait::async_trait;

use crate::common::Error;
use crate::report::Attachment;
use crate::session::{RunClock, Sample, Session, SessionId, SessionProvider};

/// How one step execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The condition held
    Passed,
    /// The condition was checked and did not hold
    Failed(String),
    /// The step's budget elapsed before the condition resolved
    TimedOut(String),
    /// The check could not be performed
    Broken(String),
    /// A session died mid-step; the tuple runner may recover once
    Crashed { session: SessionId, message: String },
}

impl StepOutcome {
    /// Map an error to an outcome: crashes become [`StepOutcome::Crashed`],
    /// anything else means the check could not be performed.
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::SessionCrashed { session, message } => Self::Crashed { session, message },
            other => Self::Broken(other.to_string()),
        }
    }
}

/// Execution context handed to each step.
///
/// The sample and attachment buffers belong to the tuple, not the step, so
/// diagnostics recorded before a budget or cancellation cut a step short
/// are retained in the tuple's result.
pub struct StepContext<'a> {
    provider: &'a dyn SessionProvider,
    sessions: &'a [Session],
    clock: RunClock,
    samples: &'a mut Vec<Sample>,
    attachments: &'a mut Vec<Attachment>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        provider: &'a dyn SessionProvider,
        sessions: &'a [Session],
        clock: RunClock,
        samples: &'a mut Vec<Sample>,
        attachments: &'a mut Vec<Attachment>,
    ) -> Self {
        Self {
            provider,
            sessions,
            clock,
            samples,
            attachments,
        }
    }

    pub fn provider(&self) -> &'a dyn SessionProvider {
        self.provider
    }

    /// The tuple's sessions, one per slot in role order
    pub fn sessions(&self) -> &'a [Session] {
        self.sessions
    }

    /// Monotonic clock for the owning tuple
    pub fn clock(&self) -> RunClock {
        self.clock
    }

    /// Record a sample into the tuple's diagnostics
    pub fn record_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Live sample buffer for primitives that record as they capture
    pub fn samples_mut(&mut self) -> &mut Vec<Sample> {
        self.samples
    }

    pub fn attach_text(&mut self, label: impl Into<String>, body: impl Into<String>) {
        self.attachments.push(Attachment::text(label, body));
    }

    pub fn attach_json(&mut self, label: impl Into<String>, value: serde_json::Value) {
        self.attachments.push(Attachment::json(label, value));
    }
}

/// One ordered unit of a tuple's scenario
#[async_trait]
pub trait Step: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Drive the step to a terminal outcome
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome;
}
