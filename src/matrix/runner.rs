//! Matrix-level scheduling
//!
//! Fans tuples out over a bounded worker pool, enforces the global budget,
//! and folds every tuple into exactly one result, reported in generation
//! order regardless of completion order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::config::TestDefinition;
use crate::report::{MatrixResult, TupleResult};
use crate::session::SessionProvider;
use crate::steps::Step;

use super::{cancelled, Tuple, TupleRunner};

/// Cancels a running matrix from outside the run loop
#[derive(Clone)]
pub struct AbortHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Ask every in-flight tuple to wind down. Queued tuples finish as
    /// timeouts without starting; results gathered so far are kept.
    pub fn abort(&self) {
        // all receivers may be gone already, which is fine
        let _ = self.cancel.send(true);
    }
}

/// Drives a whole matrix to completion
pub struct MatrixRunner {
    definition: TestDefinition,
    provider: Arc<dyn SessionProvider>,
    cancel: Arc<watch::Sender<bool>>,
}

impl MatrixRunner {
    pub fn new(definition: TestDefinition, provider: Arc<dyn SessionProvider>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            definition,
            provider,
            cancel: Arc::new(cancel),
        }
    }

    /// Handle for cancelling the run from another task
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Execute every tuple and collect the results in generation order.
    ///
    /// At most `concurrency` tuples run at once. Each tuple ends in exactly
    /// one verdict: step failures, budgets, crashes, and panics all fold
    /// into the per-tuple result rather than aborting the matrix. When the
    /// global budget elapses, in-flight tuples are cancelled and keep the
    /// diagnostics gathered so far, and tuples still waiting for a worker
    /// finish as timeouts.
    ///
    /// Returns an error only for configuration problems found before any
    /// session is touched.
    pub async fn run(
        &self,
        tuples: Vec<Tuple>,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<MatrixResult> {
        self.definition.validate()?;
        if tuples.is_empty() {
            return Err(Error::config("matrix contains no tuples to execute"));
        }
        for tuple in &tuples {
            if tuple.len() != self.definition.participants {
                return Err(Error::config(format!(
                    "tuple '{}' has {} sessions but the test declares {} participants",
                    tuple.id(),
                    tuple.len(),
                    self.definition.participants
                )));
            }
        }

        let total = tuples.len();
        tracing::info!(
            test = %self.definition.name,
            tuples = total,
            concurrency = self.definition.concurrency,
            "matrix starting"
        );

        let started = Instant::now();
        let deadline = started + self.definition.global_budget();
        let semaphore = Arc::new(Semaphore::new(self.definition.concurrency));
        let runner = Arc::new(TupleRunner::new(
            self.provider.clone(),
            self.definition.tuple_budget(),
        ));
        let steps: Arc<[Arc<dyn Step>]> = steps.into();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for tuple in tuples.iter().cloned() {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            let steps = steps.clone();
            let cancel = self.cancel.subscribe();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                // biased so a cancelled matrix never starts another tuple
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(&cancel) => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    None => TupleResult::timed_out(
                        tuple,
                        "matrix deadline reached before the tuple started",
                    ),
                    Some(_permit) => runner.run(tuple, &steps, cancel).await,
                };
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(done, total, "matrix progress");
                result
            }));
        }

        // the deadline arms exactly once; afterwards every tuple winds
        // down on its own and join_all completes
        let all = join_all(handles);
        tokio::pin!(all);
        let joined = tokio::select! {
            biased;
            joined = &mut all => joined,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    budget_ms = self.definition.global_budget_ms,
                    "global budget elapsed, cancelling remaining tuples"
                );
                let _ = self.cancel.send(true);
                all.await
            }
        };

        let mut results = Vec::with_capacity(total);
        for (index, joined) in joined.into_iter().enumerate() {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    let cause = if e.is_panic() {
                        "tuple task panicked"
                    } else {
                        "tuple task was aborted"
                    };
                    tracing::error!(
                        tuple = %tuples[index].id(),
                        error = %e,
                        "tuple task did not finish"
                    );
                    results.push(TupleResult::broken(tuples[index].clone(), cause));
                }
            }
        }

        let result = MatrixResult::new(
            self.definition.name.clone(),
            results,
            started.elapsed().as_millis() as u64,
        );
        tracing::info!(
            test = %self.definition.name,
            tallies = %result.tallies,
            elapsed_ms = result.elapsed_ms,
            "matrix finished"
        );
        Ok(result)
    }
}
