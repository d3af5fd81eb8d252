// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconciliation of local job state with the spooler.
//
// One sweep lists every in-flight job (printing, with a spooler handle),
// probes each one concurrently, and applies any observed change through a
// compare-and-set on (status, handle).  A change is published exactly once:
// only the writer that wins the swap publishes, and a job that left
// `printing` is no longer listed as in flight.
//
// Nothing in here is fatal.  Probe panics, store errors and lost swaps are
// logged and counted, and the sweep carries on with the remaining jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use kioskprint_core::Transition;
use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{EventAction, Job, JobEvent, JobStatus, SpoolerState};

use crate::notify::NotificationSink;
use crate::prober::StatusProbe;
use crate::store::{SharedStore, lock_store};

/// Result of reconciling a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The spooler agrees with the stored status.
    Unchanged,
    /// The spooler could not be queried or the job has no handle.
    Unknown,
    /// The stored status moved to the contained value and an event went out.
    Updated(JobStatus),
    /// The job changed concurrently; the observation was dropped.
    Stale,
    /// The monitor was stopping before the job was probed.
    Skipped,
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub unknown: usize,
    pub stale: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Unknown => self.unknown += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Stale => self.stale += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

/// Probe one job and apply what the spooler reports.
///
/// `job` is the caller's view of the record.  The write only lands if the
/// stored job is still printing under the same handle.
pub async fn reconcile_job<P: StatusProbe>(
    store: &SharedStore,
    prober: &P,
    sink: &dyn NotificationSink,
    job: &Job,
) -> Result<Outcome> {
    let Some(handle) = job.spooler_handle.as_deref() else {
        return Ok(Outcome::Unknown);
    };
    if job.status != JobStatus::Printing {
        return Ok(Outcome::Unchanged);
    }

    let state = prober.probe(Some(handle)).await;
    let Some(observed) = state.job_status() else {
        debug!(job_id = %job.id, handle, "spooler state unknown; job left as is");
        return Ok(Outcome::Unknown);
    };
    if observed == job.status {
        debug!(job_id = %job.id, handle, ?state, "job unchanged");
        return Ok(Outcome::Unchanged);
    }

    let next = job.status.apply(Transition::SpoolerReported(state))?;
    let Some(updated) = swap_status(store, job, handle, next)? else {
        warn!(
            error = %KioskError::StoreConflict(job.id),
            handle,
            observed = %next,
            "stale spooler observation dropped"
        );
        return Ok(Outcome::Stale);
    };

    if state == SpoolerState::Error {
        warn!(job_id = %job.id, handle, "spooler reported the job as failed");
    }
    info!(job_id = %job.id, handle, from = %job.status, to = %next, "job status reconciled");
    sink.publish(JobEvent::new(&updated, EventAction::StatusChanged));
    Ok(Outcome::Updated(next))
}

/// Compare-and-set under the store lock.  Returns the updated record, or
/// `None` when the job moved on.
fn swap_status(
    store: &SharedStore,
    job: &Job,
    handle: &str,
    next: JobStatus,
) -> Result<Option<Job>> {
    let store = lock_store(store)?;
    if !store.compare_and_set_status(&job.id, JobStatus::Printing, Some(handle), next)? {
        return Ok(None);
    }
    store.get(&job.id)
}

/// Run one reconciliation pass over every in-flight job.
///
/// At most `limit` probes run at once.  Jobs not yet probed when `running`
/// is cleared are skipped.
pub async fn sweep<P: StatusProbe>(
    store: &SharedStore,
    prober: &Arc<P>,
    sink: &Arc<dyn NotificationSink>,
    limit: &Arc<Semaphore>,
    running: &Arc<AtomicBool>,
) -> SweepReport {
    let mut report = SweepReport::default();

    let jobs = match lock_store(store).and_then(|s| s.list_in_flight()) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "could not list in-flight jobs");
            report.failed += 1;
            return report;
        }
    };
    if jobs.is_empty() {
        return report;
    }
    debug!(count = jobs.len(), "sweeping in-flight jobs");

    let mut tasks = JoinSet::new();
    for job in jobs {
        if !running.load(Ordering::SeqCst) {
            report.skipped += 1;
            continue;
        }
        let store = Arc::clone(store);
        let prober = Arc::clone(prober);
        let sink = Arc::clone(sink);
        let limit = Arc::clone(limit);
        let running = Arc::clone(running);

        tasks.spawn(async move {
            let _permit = match limit.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(KioskError::Database(format!("probe limiter closed: {e}"))),
            };
            if !running.load(Ordering::SeqCst) {
                return Ok(Outcome::Skipped);
            }
            reconcile_job(&store, prober.as_ref(), sink.as_ref(), &job)
                .await
                .inspect_err(|e| warn!(job_id = %job.id, error = %e, "reconciliation failed"))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                report.checked += 1;
                report.record(outcome);
            }
            Ok(Err(_)) => report.failed += 1,
            Err(e) if e.is_panic() => {
                error!(error = %e, "probe task panicked");
                report.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "probe task cancelled");
                report.failed += 1;
            }
        }
    }

    if report.updated > 0 || report.failed > 0 {
        info!(?report, "sweep finished");
    } else {
        debug!(?report, "sweep finished");
    }
    report
}
