//! Interop matrix runner - combinatorial interop testing over live sessions
//!
//! This library expands role/candidate declarations into a full test
//! matrix, runs every tuple through a shared step list under bounded
//! concurrency, and reports one verdict per tuple.

pub mod common;
pub mod config;
pub mod convergence;
pub mod matrix;
pub mod report;
pub mod session;
pub mod stats;
pub mod steps;

// Re-export the types most callers touch
pub use common::{Error, Result};
pub use config::{RoleSpec, SessionConfig, TestDefinition};
pub use matrix::{generate_explicit, generate_tuples, AbortHandle, MatrixRunner, Tuple};
pub use report::{MatrixResult, TupleResult, Verdict};
pub use session::{Probe, Sample, Session, SessionId, SessionProvider, Signal};
