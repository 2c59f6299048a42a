//! Result types for matrix runs
//!
//! Everything here is a plain serializable value. The engine never persists
//! results; the embedding application decides what to do with them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matrix::Tuple;
use crate::session::Sample;

/// Terminal classification for tuples and steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every condition checked held
    Success,
    /// A condition was checked and did not hold
    Failed,
    /// A budget elapsed before the condition resolved
    Timeout,
    /// The check could not be performed
    Broken,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Broken => write!(f, "broken"),
        }
    }
}

/// Free-form diagnostic attached to a tuple result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub label: String,
    pub body: AttachmentBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentBody {
    Text(String),
    Json(serde_json::Value),
}

impl Attachment {
    pub fn text(label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            body: AttachmentBody::Text(body.into()),
        }
    }

    pub fn json(label: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            label: label.into(),
            body: AttachmentBody::Json(value),
        }
    }
}

/// How one step of one tuple ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub verdict: Verdict,
    /// Reason for non-success verdicts
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    /// Whether the step finished only after a session recovery
    pub recovered: bool,
}

/// Everything one tuple produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleResult {
    pub tuple: Tuple,
    pub verdict: Verdict,
    /// Tuple-level terminating cause when no step carries it
    pub cause: Option<String>,
    pub steps: Vec<StepReport>,
    pub samples: Vec<Sample>,
    pub attachments: Vec<Attachment>,
    pub elapsed_ms: u64,
}

impl TupleResult {
    /// Synthesized result for a tuple whose task died before reporting
    pub(crate) fn broken(tuple: Tuple, cause: impl Into<String>) -> Self {
        Self {
            tuple,
            verdict: Verdict::Broken,
            cause: Some(cause.into()),
            steps: Vec::new(),
            samples: Vec::new(),
            attachments: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Synthesized result for a tuple cancelled before it started
    pub(crate) fn timed_out(tuple: Tuple, cause: impl Into<String>) -> Self {
        Self {
            tuple,
            verdict: Verdict::Timeout,
            cause: Some(cause.into()),
            steps: Vec::new(),
            samples: Vec::new(),
            attachments: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict.is_success()
    }
}

/// Per-verdict counts across a matrix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictTallies {
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
    pub broken: usize,
}

impl VerdictTallies {
    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Success => self.success += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Timeout => self.timeout += 1,
            Verdict::Broken => self.broken += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failed + self.timeout + self.broken
    }
}

impl fmt::Display for VerdictTallies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} success, {} failed, {} timeout, {} broken",
            self.success, self.failed, self.timeout, self.broken
        )
    }
}

/// Aggregated outcome of one matrix run, results in tuple-generation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixResult {
    pub test: String,
    pub results: Vec<TupleResult>,
    pub tallies: VerdictTallies,
    pub elapsed_ms: u64,
}

impl MatrixResult {
    pub fn new(test: impl Into<String>, results: Vec<TupleResult>, elapsed_ms: u64) -> Self {
        let mut tallies = VerdictTallies::default();
        for result in &results {
            tallies.add(result.verdict);
        }
        Self {
            test: test.into(),
            results,
            tallies,
            elapsed_ms,
        }
    }

    pub fn all_success(&self) -> bool {
        self.tallies.success == self.results.len()
    }
}
