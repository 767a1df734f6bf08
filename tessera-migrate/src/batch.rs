//! Bounded-concurrency fan-out across tenants.
//!
//! Tenants are partitioned into batches of `concurrency`; tasks within one
//! batch run concurrently, batches are strictly sequential. A failing task
//! can abort the run: nothing new starts, and tenants never attempted are
//! reported as skipped.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde::Serialize;
use tessera_core::TenantId;
use tracing::debug;

/// Error text attached to tenants skipped by an abort.
pub const SKIPPED_BY_ABORT: &str = "Skipped due to abort";

/// What a failure handler tells the fan-out to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Start no further tasks; remaining tenants become skipped.
    Abort,
}

/// Outcome of one tenant's task.
#[derive(Debug)]
pub enum TaskOutcome<R, E> {
    /// The task finished.
    Done(R),
    /// The task failed.
    Failed(E),
    /// The task never started because an earlier failure aborted the run.
    Skipped,
}

/// Counts over a finished fan-out.
///
/// `failed` excludes skipped tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Tenants handed to the fan-out.
    pub total: usize,
    /// Tasks that finished successfully.
    pub succeeded: usize,
    /// Tasks that ran and failed.
    pub failed: usize,
    /// Tasks never started.
    pub skipped: usize,
}

impl BatchSummary {
    /// Tally outcomes. `succeeded_fn` decides whether a completed task's
    /// result counts as a success (a migration can finish with
    /// `success = false`).
    pub fn tally<R, E>(
        outcomes: &[(TenantId, TaskOutcome<R, E>)],
        succeeded_fn: impl Fn(&R) -> bool,
    ) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
        };
        for (_, outcome) in outcomes {
            match outcome {
                TaskOutcome::Done(result) if succeeded_fn(result) => summary.succeeded += 1,
                TaskOutcome::Done(_) | TaskOutcome::Failed(_) => summary.failed += 1,
                TaskOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Run `task` for every tenant with at most `concurrency` in flight.
///
/// `on_error` is consulted for every failure; returning
/// [`ErrorPolicy::Abort`] raises a flag checked before each task starts.
/// Tasks already in flight run to completion. Results come back in input
/// order.
pub async fn run_batched<R, E, F, Fut>(
    tenant_ids: Vec<TenantId>,
    concurrency: usize,
    on_error: impl Fn(&TenantId, &E) -> ErrorPolicy,
    task: F,
) -> Vec<(TenantId, TaskOutcome<R, E>)>
where
    F: Fn(TenantId) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let concurrency = concurrency.max(1);
    let aborted = AtomicBool::new(false);
    let task = &task;
    let on_error = &on_error;
    let aborted_ref = &aborted;

    let mut outcomes = Vec::with_capacity(tenant_ids.len());
    for batch in tenant_ids.chunks(concurrency) {
        let results = join_all(batch.iter().map(|tenant_id| async move {
            if aborted_ref.load(Ordering::SeqCst) {
                return (tenant_id.clone(), TaskOutcome::Skipped);
            }
            match task(tenant_id.clone()).await {
                Ok(result) => (tenant_id.clone(), TaskOutcome::Done(result)),
                Err(err) => {
                    if on_error(tenant_id, &err) == ErrorPolicy::Abort {
                        debug!(tenant_id = %tenant_id, "fan-out aborted");
                        aborted_ref.store(true, Ordering::SeqCst);
                    }
                    (tenant_id.clone(), TaskOutcome::Failed(err))
                }
            }
        }))
        .await;
        outcomes.extend(results);
    }
    outcomes
}
