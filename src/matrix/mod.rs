//! Matrix execution
//!
//! Tuple generation, per-tuple step driving with crash recovery, and the
//! bounded fan-out that runs a whole matrix under one global deadline.

pub mod generator;
pub mod runner;
pub mod tuple_runner;

pub use generator::{generate_explicit, generate_tuples, Tuple, TupleSlot};
pub use runner::{AbortHandle, MatrixRunner};
pub use tuple_runner::TupleRunner;

use tokio::sync::watch;

/// Resolve once the shared cancel flag is raised.
///
/// Pends forever when the flag can no longer be raised, so callers can use
/// it in a `select!` without a spurious wakeup on sender drop.
pub(crate) async fn cancelled(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
