//! Per-tuple execution
//!
//! One [`TupleRunner`] drives the ordered step list for one tuple: lazy
//! session acquisition, per-step outcomes, bounded crash recovery, and the
//! per-tuple budget. It never touches sibling tuples; isolation lives one
//! level up in the matrix runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::report::{Attachment, StepReport, TupleResult, Verdict};
use crate::session::{RunClock, Sample, Session, SessionId, SessionProvider};
use crate::steps::{Step, StepContext, StepOutcome};

use super::{cancelled, Tuple};

/// Upper bound on one provider release so a hung provider cannot wedge a
/// tuple on its way out
const RELEASE_GRACE: Duration = Duration::from_secs(5);

/// How the select around one step resolved
enum StepDrive {
    Completed(StepOutcome),
    BudgetExhausted,
    Cancelled,
}

enum Recovery {
    Replaced,
    Deadline,
    Cancelled,
    Failed(String),
}

/// Executes one tuple to a terminal verdict within a budget
pub struct TupleRunner {
    provider: Arc<dyn SessionProvider>,
    budget: Duration,
}

impl TupleRunner {
    pub fn new(provider: Arc<dyn SessionProvider>, budget: Duration) -> Self {
        Self { provider, budget }
    }

    /// Run the ordered steps against freshly acquired sessions.
    ///
    /// Always returns a result: failures, timeouts, crashes, and the
    /// cancel signal all fold into the verdict, and diagnostics gathered
    /// before the terminating event are retained. A step reporting a
    /// crashed session gets exactly one retry against a replacement
    /// session; a second crash of the same step is broken.
    #[tracing::instrument(skip_all, fields(tuple = %tuple.id()))]
    pub async fn run(
        &self,
        tuple: Tuple,
        steps: &[Arc<dyn Step>],
        cancel: watch::Receiver<bool>,
    ) -> TupleResult {
        let clock = RunClock::start();
        let deadline = Instant::now() + self.budget;

        let mut samples: Vec<Sample> = Vec::new();
        let mut attachments: Vec<Attachment> = Vec::new();
        let mut reports: Vec<StepReport> = Vec::new();

        // Acquire one session per slot, in role order.
        let slots = tuple.slots().to_vec();
        let mut sessions: Vec<Session> = Vec::with_capacity(slots.len());
        for slot in &slots {
            // biased so a raised cancel flag wins ties and no new session
            // work starts after cancellation
            let acquired = tokio::select! {
                biased;
                _ = cancelled(&cancel) => None,
                outcome = tokio::time::timeout_at(
                    deadline,
                    self.provider.acquire(&slot.role, &slot.config),
                ) => Some(outcome),
            };
            match acquired {
                None => {
                    self.release_all(sessions).await;
                    return Self::seal(
                        tuple,
                        Verdict::Timeout,
                        Some("cancelled before all sessions were acquired".to_string()),
                        reports,
                        samples,
                        attachments,
                        clock,
                    );
                }
                Some(Err(_)) => {
                    self.release_all(sessions).await;
                    return Self::seal(
                        tuple,
                        Verdict::Timeout,
                        Some("tuple budget exhausted during session acquisition".to_string()),
                        reports,
                        samples,
                        attachments,
                        clock,
                    );
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(role = %slot.role, error = %e, "session acquisition failed");
                    self.release_all(sessions).await;
                    return Self::seal(
                        tuple,
                        Verdict::Broken,
                        Some(e.to_string()),
                        reports,
                        samples,
                        attachments,
                        clock,
                    );
                }
                Some(Ok(Ok(session))) => sessions.push(session),
            }
        }

        let mut verdict = Verdict::Success;
        let mut cause: Option<String> = None;

        'steps: for step in steps {
            let mut retried = false;
            loop {
                let step_started = clock.now_ms();
                let drive = {
                    let mut ctx = StepContext::new(
                        self.provider.as_ref(),
                        &sessions,
                        clock,
                        &mut samples,
                        &mut attachments,
                    );
                    tokio::select! {
                        biased;
                        _ = cancelled(&cancel) => StepDrive::Cancelled,
                        outcome = tokio::time::timeout_at(deadline, step.execute(&mut ctx)) => {
                            match outcome {
                                Ok(outcome) => StepDrive::Completed(outcome),
                                Err(_) => StepDrive::BudgetExhausted,
                            }
                        }
                    }
                };
                let elapsed_ms = clock.now_ms() - step_started;

                match drive {
                    StepDrive::Cancelled => {
                        let detail = "matrix run cancelled mid-step".to_string();
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Timeout,
                            detail: Some(detail.clone()),
                            elapsed_ms,
                            recovered: retried,
                        });
                        verdict = Verdict::Timeout;
                        cause = Some(detail);
                        break 'steps;
                    }
                    StepDrive::BudgetExhausted => {
                        let detail =
                            format!("tuple budget of {} ms exhausted", self.budget.as_millis());
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Timeout,
                            detail: Some(detail.clone()),
                            elapsed_ms,
                            recovered: retried,
                        });
                        verdict = Verdict::Timeout;
                        cause = Some(detail);
                        break 'steps;
                    }
                    StepDrive::Completed(StepOutcome::Passed) => {
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Success,
                            detail: None,
                            elapsed_ms,
                            recovered: retried,
                        });
                        break;
                    }
                    StepDrive::Completed(StepOutcome::Failed(message)) => {
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Failed,
                            detail: Some(message),
                            elapsed_ms,
                            recovered: retried,
                        });
                        verdict = Verdict::Failed;
                        break 'steps;
                    }
                    StepDrive::Completed(StepOutcome::TimedOut(message)) => {
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Timeout,
                            detail: Some(message),
                            elapsed_ms,
                            recovered: retried,
                        });
                        verdict = Verdict::Timeout;
                        break 'steps;
                    }
                    StepDrive::Completed(StepOutcome::Broken(message)) => {
                        reports.push(StepReport {
                            name: step.name().to_string(),
                            verdict: Verdict::Broken,
                            detail: Some(message),
                            elapsed_ms,
                            recovered: retried,
                        });
                        verdict = Verdict::Broken;
                        break 'steps;
                    }
                    StepDrive::Completed(StepOutcome::Crashed { session, message }) => {
                        if retried {
                            let detail =
                                format!("session crashed again after recovery: {message}");
                            reports.push(StepReport {
                                name: step.name().to_string(),
                                verdict: Verdict::Broken,
                                detail: Some(detail.clone()),
                                elapsed_ms,
                                recovered: true,
                            });
                            verdict = Verdict::Broken;
                            cause = Some(detail);
                            break 'steps;
                        }
                        tracing::warn!(
                            session = %session,
                            step = step.name(),
                            "session crashed, attempting recovery"
                        );
                        match self.recover(&mut sessions, session, deadline, &cancel).await {
                            Recovery::Replaced => {
                                retried = true;
                                continue;
                            }
                            Recovery::Cancelled => {
                                let detail = "cancelled during session recovery".to_string();
                                reports.push(StepReport {
                                    name: step.name().to_string(),
                                    verdict: Verdict::Timeout,
                                    detail: Some(detail.clone()),
                                    elapsed_ms,
                                    recovered: false,
                                });
                                verdict = Verdict::Timeout;
                                cause = Some(detail);
                                break 'steps;
                            }
                            Recovery::Deadline => {
                                let detail =
                                    "tuple budget exhausted during session recovery".to_string();
                                reports.push(StepReport {
                                    name: step.name().to_string(),
                                    verdict: Verdict::Timeout,
                                    detail: Some(detail.clone()),
                                    elapsed_ms,
                                    recovered: false,
                                });
                                verdict = Verdict::Timeout;
                                cause = Some(detail);
                                break 'steps;
                            }
                            Recovery::Failed(message) => {
                                let detail =
                                    format!("could not replace crashed session: {message}");
                                reports.push(StepReport {
                                    name: step.name().to_string(),
                                    verdict: Verdict::Broken,
                                    detail: Some(detail.clone()),
                                    elapsed_ms,
                                    recovered: false,
                                });
                                verdict = Verdict::Broken;
                                cause = Some(detail);
                                break 'steps;
                            }
                        }
                    }
                }
            }
        }

        self.release_all(sessions).await;
        Self::seal(tuple, verdict, cause, reports, samples, attachments, clock)
    }

    /// Replace a crashed session in place: release the dead one first so
    /// pooled providers get their capacity back, then acquire a fresh
    /// session with the same role and configuration.
    async fn recover(
        &self,
        sessions: &mut Vec<Session>,
        dead: SessionId,
        deadline: Instant,
        cancel: &watch::Receiver<bool>,
    ) -> Recovery {
        let Some(slot) = sessions.iter().position(|s| s.id == dead) else {
            return Recovery::Failed(format!("crashed session {dead} is not part of this tuple"));
        };

        let dead_session = sessions.remove(slot);
        let role = dead_session.role.clone();
        let config = dead_session.config.clone();
        if tokio::time::timeout(RELEASE_GRACE, self.provider.release(dead_session))
            .await
            .is_err()
        {
            tracing::warn!(session = %dead, "release of crashed session timed out");
        }

        let acquired = tokio::select! {
            biased;
            _ = cancelled(cancel) => None,
            outcome = tokio::time::timeout_at(
                deadline,
                self.provider.acquire(&role, &config),
            ) => Some(outcome),
        };
        match acquired {
            None => Recovery::Cancelled,
            Some(Err(_)) => Recovery::Deadline,
            Some(Ok(Err(e))) => Recovery::Failed(e.to_string()),
            Some(Ok(Ok(fresh))) => {
                tracing::info!(old = %dead, new = %fresh.id, role = %role, "session recovered");
                sessions.insert(slot, fresh);
                Recovery::Replaced
            }
        }
    }

    async fn release_all(&self, sessions: Vec<Session>) {
        for session in sessions {
            let id = session.id;
            if tokio::time::timeout(RELEASE_GRACE, self.provider.release(session))
                .await
                .is_err()
            {
                tracing::warn!(session = %id, "session release timed out");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn seal(
        tuple: Tuple,
        verdict: Verdict,
        cause: Option<String>,
        steps: Vec<StepReport>,
        samples: Vec<Sample>,
        attachments: Vec<Attachment>,
        clock: RunClock,
    ) -> TupleResult {
        let elapsed_ms = clock.now_ms();
        tracing::info!(verdict = %verdict, elapsed_ms, "tuple finished");
        TupleResult {
            tuple,
            verdict,
            cause,
            steps,
            samples,
            attachments,
            elapsed_ms,
        }
    }
}
