//! Metric collection and tolerance evaluation

pub mod sampler;
pub mod tolerance;

pub use sampler::{MetricSampler, MetricWindow};
pub use tolerance::{RateObservation, ToleranceEvaluator};
