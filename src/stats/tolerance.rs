//! Rate derivation and tolerance classification
//!
//! A rate check compares a throughput derived from the endpoints of a
//! [`MetricWindow`](super::MetricWindow) against an expected value with a
//! relative tolerance band. Only the first and last samples influence the
//! derived rate; intermediate samples are diagnostics.

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::session::Sample;
use crate::stats::MetricWindow;

/// Observed rate classified against the expected band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    /// Units per second derived from the window endpoints
    pub observed: f64,
    /// Inclusive lower bound, `expected * (1 - tolerance)`
    pub lower: f64,
    /// Inclusive upper bound, `expected * (1 + tolerance)`
    pub upper: f64,
    pub within_bounds: bool,
}

/// Classifies a rate derived from two samples against
/// `expected * (1 ± relative_tolerance)`, bounds inclusive.
///
/// The counter field and direction live in the extractor closure supplied
/// by the caller; the evaluator is protocol-agnostic.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceEvaluator {
    expected: f64,
    relative_tolerance: f64,
}

impl ToleranceEvaluator {
    pub fn new(expected: f64, relative_tolerance: f64) -> Self {
        Self {
            expected,
            relative_tolerance,
        }
    }

    /// Derive `(extract(last) - extract(first)) / elapsed_seconds` and
    /// classify it.
    ///
    /// Zero or negative elapsed time, a missing counter, and a counter that
    /// decreased (a session restarted mid-window) are all unusable-window
    /// errors, never a failed verdict.
    pub fn evaluate<E>(&self, first: &Sample, last: &Sample, extract: E) -> Result<RateObservation>
    where
        E: Fn(&Sample) -> Option<f64>,
    {
        if !self.expected.is_finite() || self.expected < 0.0 {
            return Err(Error::config("expected rate must be finite and non-negative"));
        }
        if !self.relative_tolerance.is_finite() || self.relative_tolerance < 0.0 {
            return Err(Error::config(
                "relative tolerance must be finite and non-negative",
            ));
        }

        let start = extract(first)
            .ok_or_else(|| Error::invalid_window("counter missing from first sample"))?;
        let end = extract(last)
            .ok_or_else(|| Error::invalid_window("counter missing from last sample"))?;

        let elapsed_ms = last.at_ms as i64 - first.at_ms as i64;
        if elapsed_ms <= 0 {
            return Err(Error::NonPositiveElapsed { elapsed_ms });
        }
        if end < start {
            return Err(Error::invalid_window(format!(
                "counter regressed from {start} to {end}; session likely restarted mid-window"
            )));
        }

        let observed = (end - start) / (elapsed_ms as f64 / 1000.0);
        let lower = self.expected * (1.0 - self.relative_tolerance);
        let upper = self.expected * (1.0 + self.relative_tolerance);
        Ok(RateObservation {
            observed,
            lower,
            upper,
            within_bounds: lower <= observed && observed <= upper,
        })
    }

    /// Evaluate a captured window's endpoints
    pub fn evaluate_window<E>(&self, window: &MetricWindow, extract: E) -> Result<RateObservation>
    where
        E: Fn(&Sample) -> Option<f64>,
    {
        self.evaluate(window.first(), window.last(), extract)
    }
}
