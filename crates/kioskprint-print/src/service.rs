// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job service: the user and admin actions that drive the lifecycle.
//
// Every action validates its transition inside the same store transaction
// that writes it, then publishes one event.  Spooler calls are made with no
// store lock held.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use kioskprint_core::Transition;
use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{
    ColorMode, Copies, EventAction, Job, JobEvent, JobId, JobStatus, Orientation, PrintSettings,
};

use crate::dispatcher::{Dispatched, Dispatcher};
use crate::notify::NotificationSink;
use crate::pages::count_pages;
use crate::prober::StatusProbe;
use crate::reconcile::reconcile_job;
use crate::runner::CommandRunner;
use crate::store::{SharedStore, lock_store};

/// Action surface shared by the upload, payment and admin front ends.
pub struct JobService<R, P> {
    store: SharedStore,
    dispatcher: Dispatcher<R>,
    prober: Arc<P>,
    sink: Arc<dyn NotificationSink>,
    printer_name: String,
    rate_per_page: u64,
}

impl<R: CommandRunner, P: StatusProbe> JobService<R, P> {
    pub fn new(
        store: SharedStore,
        dispatcher: Dispatcher<R>,
        prober: Arc<P>,
        sink: Arc<dyn NotificationSink>,
        printer_name: impl Into<String>,
        rate_per_page: u64,
    ) -> Self {
        Self {
            store,
            dispatcher,
            prober,
            sink,
            printer_name: printer_name.into(),
            rate_per_page,
        }
    }

    // -- Queries --------------------------------------------------------------

    pub fn get(&self, id: &JobId) -> Result<Job> {
        lock_store(&self.store)?
            .get(id)?
            .ok_or(KioskError::JobNotFound(*id))
    }

    /// All jobs newest first, or the jobs in one status oldest first.
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let store = lock_store(&self.store)?;
        match status {
            Some(status) => store.list_by_status(status),
            None => store.list_all(),
        }
    }

    // -- User actions ---------------------------------------------------------

    /// Register an uploaded file under `id`, priced at the current per-page
    /// rate.
    #[instrument(skip(self, stored_path))]
    pub async fn register_upload(
        &self,
        id: JobId,
        filename: String,
        stored_path: PathBuf,
    ) -> Result<Job> {
        let path = stored_path.clone();
        let pages = tokio::task::spawn_blocking(move || count_pages(&path))
            .await
            .map_err(|e| KioskError::Document(format!("page count task failed: {e}")))??;

        let job = Job::new(filename, stored_path, pages, self.rate_per_page).with_id(id);
        lock_store(&self.store)?.insert(&job)?;
        info!(job_id = %job.id, pages, cost = job.cost(), "upload registered");
        self.publish(&job, EventAction::Uploaded);
        Ok(job)
    }

    /// Change print settings.  Copies are clamped to 1..=99.
    pub fn update_settings(
        &self,
        id: &JobId,
        copies: i64,
        orientation: Orientation,
        color: ColorMode,
    ) -> Result<Job> {
        let settings = PrintSettings {
            copies: Copies::clamped(copies),
            orientation,
            color,
        };
        let job = lock_store(&self.store)?.update_settings(id, settings)?;
        self.publish(&job, EventAction::SettingsUpdated);
        Ok(job)
    }

    /// Record proof of payment and queue the job for approval.
    pub fn submit_payment(&self, id: &JobId, reference: Option<String>) -> Result<Job> {
        let job = self.transition(id, Transition::PaymentSubmitted, |job| {
            job.submitted_at = Some(Utc::now());
            job.payment_reference = reference;
        })?;
        info!(job_id = %id, "payment submitted");
        self.publish(&job, EventAction::PaymentSubmitted);
        Ok(job)
    }

    // -- Admin actions --------------------------------------------------------

    /// Approve a paid job and send it to the printer.
    ///
    /// A spooler failure still records the approval and moves the job to
    /// `error`; the dispatch error is then returned to the caller.  If the
    /// job changes while `lp` runs, an accepted spooler job is reported as
    /// `UntrackedDispatch` and a failed one as its dispatch error.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: &JobId, actor: &str) -> Result<Job> {
        let job = self.get(id)?;
        job.status.apply(Transition::Approved { dispatched: true })?;

        let dispatched = self.dispatch(&job).await;
        let transition = Transition::Approved {
            dispatched: dispatched.is_ok(),
        };
        let now = Utc::now();
        let handle = dispatched.as_ref().ok().and_then(|d| d.handle.clone());
        let was_dispatched = dispatched.is_ok();

        let recorded = self.transition(id, transition, |job| {
            job.approved_at.get_or_insert(now);
            job.approved_by = Some(actor.to_string());
            if was_dispatched {
                job.spooler_handle = handle.clone();
                job.dispatched_at = Some(now);
            }
        });
        match (recorded, dispatched) {
            (Ok(job), Ok(_)) => {
                info!(job_id = %id, actor, handle = ?job.spooler_handle, "job approved and dispatched");
                self.publish(&job, EventAction::Approved);
                Ok(job)
            }
            (Ok(job), Err(e)) => {
                warn!(job_id = %id, actor, error = %e, "job approved but dispatch failed");
                self.publish(&job, EventAction::Approved);
                Err(e)
            }
            (Err(e), Ok(_)) => Err(self.untracked(id, actor, handle, e)),
            (Err(e), Err(dispatch_err)) => {
                warn!(job_id = %id, actor, error = %e, "job changed while a failed dispatch ran");
                Err(dispatch_err)
            }
        }
    }

    /// Decline a paid job.
    pub fn reject(&self, id: &JobId, actor: &str) -> Result<Job> {
        let job = self.transition(id, Transition::Rejected, |job| {
            job.rejected_at = Some(Utc::now());
            job.rejected_by = Some(actor.to_string());
        })?;
        info!(job_id = %id, actor, "job rejected");
        self.publish(&job, EventAction::Rejected);
        Ok(job)
    }

    /// Dispatch the job again and track the new spooler handle.
    ///
    /// A failed resend leaves the job untouched and returns the dispatch
    /// error.  A job changed while `lp` runs yields `UntrackedDispatch`.
    #[instrument(skip(self))]
    pub async fn resend(&self, id: &JobId, actor: &str) -> Result<Job> {
        let job = self.get(id)?;
        job.status.apply(Transition::Resent)?;

        let dispatched = self.dispatch(&job).await.inspect_err(|e| {
            warn!(job_id = %id, actor, error = %e, "resend failed; job left as is");
        })?;

        let previous = job.spooler_handle;
        let handle = dispatched.handle;
        let job = self
            .transition(id, Transition::Resent, |job| {
                job.spooler_handle = handle.clone();
                job.dispatched_at = Some(Utc::now());
            })
            .map_err(|e| self.untracked(id, actor, handle.clone(), e))?;
        info!(
            job_id = %id,
            actor,
            previous = ?previous,
            handle = ?job.spooler_handle,
            "job resent"
        );
        self.publish(&job, EventAction::Resent);
        Ok(job)
    }

    /// Mark the payment as returned.
    pub fn refund(&self, id: &JobId, actor: &str) -> Result<Job> {
        let job = self.transition(id, Transition::Refunded, |job| {
            job.refunded_at = Some(Utc::now());
            job.refunded_by = Some(actor.to_string());
        })?;
        info!(job_id = %id, actor, "job refunded");
        self.publish(&job, EventAction::Refunded);
        Ok(job)
    }

    /// Reconcile one job with the spooler now rather than on the next sweep.
    pub async fn check_status(&self, id: &JobId) -> Result<Job> {
        let job = self.get(id)?;
        if job.is_in_flight() {
            reconcile_job(&self.store, self.prober.as_ref(), self.sink.as_ref(), &job).await?;
            return self.get(id);
        }
        Ok(job)
    }

    // -- Helpers --------------------------------------------------------------

    /// Apply `transition` and `f` in one store transaction.
    fn transition(
        &self,
        id: &JobId,
        transition: Transition,
        f: impl FnOnce(&mut Job),
    ) -> Result<Job> {
        lock_store(&self.store)?.update(id, |job| {
            job.status = job.status.apply(transition)?;
            f(job);
            Ok(())
        })
    }

    /// The spooler holds a job this store no longer points at.
    fn untracked(
        &self,
        id: &JobId,
        actor: &str,
        handle: Option<String>,
        cause: KioskError,
    ) -> KioskError {
        error!(
            job_id = %id,
            actor,
            handle = ?handle,
            error = %cause,
            "job changed during dispatch; spooler job is untracked"
        );
        KioskError::UntrackedDispatch { id: *id, handle }
    }

    async fn dispatch(&self, job: &Job) -> Result<Dispatched> {
        self.dispatcher
            .dispatch(
                &job.stored_path,
                &self.printer_name,
                job.settings.copies.get(),
                job.settings.orientation,
                job.settings.color,
            )
            .await
    }

    fn publish(&self, job: &Job, action: EventAction) {
        self.sink.publish(JobEvent::new(job, action));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStore;
    use crate::testing::{FakeProbe, FakeRunner, RecordingSink, failed, ok};
    use kioskprint_core::SpoolerConfig;
    use kioskprint_core::types::SpoolerState;

    struct Harness {
        service: JobService<FakeRunner, FakeProbe>,
        store: SharedStore,
        runner: Arc<FakeRunner>,
        probe: Arc<FakeProbe>,
        recorder: Arc<RecordingSink>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let runner = Arc::new(FakeRunner::new());
            let probe = Arc::new(FakeProbe::new());
            let recorder = Arc::new(RecordingSink::new());
            let store = JobStore::open_in_memory().unwrap().into_shared();
            let service = JobService::new(
                Arc::clone(&store),
                Dispatcher::new(Arc::clone(&runner), SpoolerConfig::default()),
                Arc::clone(&probe),
                recorder.clone(),
                "Office",
                500,
            );
            Self {
                service,
                store,
                runner,
                probe,
                recorder,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        async fn upload(&self, name: &str) -> Job {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"image bytes").unwrap();
            self.service
                .register_upload(JobId::new(), name.to_string(), path)
                .await
                .unwrap()
        }

        async fn paid_job(&self) -> Job {
            let job = self.upload("photo.png").await;
            self.service
                .submit_payment(&job.id, Some("gcash-123".into()))
                .unwrap()
        }

        fn spooler_accepts(&self, handle: &str) {
            self.runner
                .respond_to_prefix("lp ", ok(&format!("request id is {handle} (1 file(s))\n")));
        }

        /// Apply `transition` directly in the store while the next `lp` runs.
        fn during_dispatch(&self, id: JobId, transition: Transition) {
            let store = Arc::clone(&self.store);
            self.runner.before_next_run(move || {
                lock_store(&store)
                    .unwrap()
                    .update(&id, |job| {
                        job.status = job.status.apply(transition)?;
                        Ok(())
                    })
                    .unwrap();
            });
        }

        fn actions(&self) -> Vec<EventAction> {
            self.recorder.events().iter().map(|e| e.action).collect()
        }
    }

    #[tokio::test]
    async fn upload_prices_the_job() {
        let h = Harness::new();
        let job = h.upload("photo.png").await;
        assert_eq!(job.pages, 1);
        assert_eq!(job.cost(), 500);
        assert_eq!(job.status, JobStatus::AwaitingPayment);
        assert_eq!(h.actions(), [EventAction::Uploaded]);
    }

    #[tokio::test]
    async fn upload_of_unsupported_file_fails() {
        let h = Harness::new();
        let err = h
            .service
            .register_upload(JobId::new(), "notes.docx".into(), h.dir.path().join("notes.docx"))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, KioskError::Document(_)));
        assert!(h.service.list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_are_clamped_and_repriced() {
        let h = Harness::new();
        let job = h.upload("photo.png").await;

        let updated = h
            .service
            .update_settings(&job.id, 500, Orientation::Landscape, ColorMode::Color)
            .unwrap();
        assert_eq!(updated.settings.copies.get(), 99);
        assert_eq!(updated.cost(), 99 * 500);

        let updated = h
            .service
            .update_settings(&job.id, 0, Orientation::Portrait, ColorMode::Bw)
            .unwrap();
        assert_eq!(updated.settings.copies.get(), 1);
        assert_eq!(updated.cost(), 500);
    }

    #[tokio::test]
    async fn payment_moves_to_pending_approval_once() {
        let h = Harness::new();
        let job = h.paid_job().await;
        assert_eq!(job.status, JobStatus::PendingApproval);
        assert_eq!(job.payment_reference.as_deref(), Some("gcash-123"));
        assert!(job.submitted_at.is_some());

        let err = h.service.submit_payment(&job.id, None).expect_err("twice");
        assert!(matches!(err, KioskError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn approve_dispatches_and_tracks_handle() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.spooler_accepts("Office-17");

        let job = h.service.approve(&job.id, "admin").await.unwrap();
        assert_eq!(job.status, JobStatus::Printing);
        assert_eq!(job.spooler_handle.as_deref(), Some("Office-17"));
        assert_eq!(job.approved_by.as_deref(), Some("admin"));
        assert!(job.dispatched_at.is_some());
        assert_eq!(h.actions().last(), Some(&EventAction::Approved));

        let settings = h
            .service
            .update_settings(&job.id, 3, Orientation::Portrait, ColorMode::Bw)
            .expect_err("locked after dispatch");
        assert!(matches!(settings, KioskError::InvalidSettings(_)));
    }

    #[tokio::test]
    async fn approve_with_spooler_failure_lands_in_error() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.runner
            .respond_to_prefix("lp ", failed("lp: Destination \"Office\" is not accepting jobs."));

        let err = h.service.approve(&job.id, "admin").await.expect_err("dispatch fails");
        assert!(matches!(err, KioskError::Dispatch(ref m) if m.contains("not accepting jobs")));

        let stored = h.service.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.spooler_handle, None);
        assert!(stored.approved_at.is_some());
        assert_eq!(h.recorder.events().last().unwrap().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn approve_of_job_rejected_mid_dispatch_reports_spooler_job() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.spooler_accepts("Office-99");
        h.during_dispatch(job.id, Transition::Rejected);
        let before = h.recorder.events().len();

        let err = h.service.approve(&job.id, "admin").await.expect_err("raced");
        assert!(matches!(
            err,
            KioskError::UntrackedDispatch { id, handle: Some(ref hd) } if id == job.id && hd == "Office-99"
        ));
        assert_eq!(h.runner.calls().len(), 1);

        let stored = h.service.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Rejected);
        assert_eq!(stored.spooler_handle, None);
        assert_eq!(h.recorder.events().len(), before);
    }

    #[tokio::test]
    async fn failed_dispatch_wins_over_concurrent_change() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.runner.respond_to_prefix("lp ", failed("lp: Scheduler is not running."));
        h.during_dispatch(job.id, Transition::Rejected);

        let err = h.service.approve(&job.id, "admin").await.expect_err("raced");
        assert!(matches!(err, KioskError::Dispatch(ref m) if m.contains("Scheduler")));
        assert_eq!(h.service.get(&job.id).unwrap().status, JobStatus::Rejected);
    }

    #[tokio::test]
    async fn resend_of_job_refunded_mid_dispatch_reports_spooler_job() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.runner.respond_to_prefix("lp ", failed("lp: Unable to connect"));
        let _ = h.service.approve(&job.id, "admin").await;

        h.spooler_accepts("PRN-12");
        h.during_dispatch(job.id, Transition::Refunded);
        let err = h.service.resend(&job.id, "admin").await.expect_err("raced");
        assert!(matches!(
            err,
            KioskError::UntrackedDispatch { handle: Some(ref hd), .. } if hd == "PRN-12"
        ));

        let stored = h.service.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Refunded);
        assert_eq!(stored.spooler_handle, None);
    }

    #[tokio::test]
    async fn approve_requires_pending_approval() {
        let h = Harness::new();
        let job = h.upload("photo.png").await;
        let err = h.service.approve(&job.id, "admin").await.expect_err("unpaid");
        assert!(matches!(err, KioskError::InvalidTransition { .. }));
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn resend_from_error_tracks_new_handle() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.runner.respond_to_prefix("lp ", failed("lp: Unable to connect"));
        let _ = h.service.approve(&job.id, "admin").await;

        h.spooler_accepts("PRN-11");
        let job = h.service.resend(&job.id, "admin").await.unwrap();
        assert_eq!(job.status, JobStatus::Printing);
        assert_eq!(job.spooler_handle.as_deref(), Some("PRN-11"));
        assert_eq!(h.actions().last(), Some(&EventAction::Resent));
    }

    #[tokio::test]
    async fn resend_while_printing_replaces_handle() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.spooler_accepts("PRN-7");
        h.service.approve(&job.id, "admin").await.unwrap();

        h.spooler_accepts("PRN-8");
        let job = h.service.resend(&job.id, "admin").await.unwrap();
        assert_eq!(job.spooler_handle.as_deref(), Some("PRN-8"));
        assert_eq!(job.status, JobStatus::Printing);
    }

    #[tokio::test]
    async fn failed_resend_leaves_job_unchanged() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.spooler_accepts("PRN-7");
        h.service.approve(&job.id, "admin").await.unwrap();
        let before = h.recorder.events().len();

        h.runner.respond_to_prefix("lp ", failed("lp: printer offline"));
        let err = h.service.resend(&job.id, "admin").await.expect_err("fails");
        assert!(matches!(err, KioskError::Dispatch(_)));

        let stored = h.service.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Printing);
        assert_eq!(stored.spooler_handle.as_deref(), Some("PRN-7"));
        assert_eq!(h.recorder.events().len(), before);
    }

    #[tokio::test]
    async fn reject_and_refund() {
        let h = Harness::new();
        let job = h.paid_job().await;

        let job = h.service.reject(&job.id, "admin").unwrap();
        assert_eq!(job.status, JobStatus::Rejected);
        assert_eq!(job.rejected_by.as_deref(), Some("admin"));

        let job = h.service.refund(&job.id, "cashier").unwrap();
        assert_eq!(job.status, JobStatus::Refunded);
        assert_eq!(job.refunded_by.as_deref(), Some("cashier"));

        assert!(h.service.refund(&job.id, "cashier").is_err());
        assert_eq!(
            h.actions(),
            [
                EventAction::Uploaded,
                EventAction::PaymentSubmitted,
                EventAction::Rejected,
                EventAction::Refunded
            ]
        );
    }

    #[tokio::test]
    async fn check_status_reconciles_on_demand() {
        let h = Harness::new();
        let job = h.paid_job().await;
        h.spooler_accepts("PRN-21");
        h.service.approve(&job.id, "admin").await.unwrap();
        h.probe.set("PRN-21", SpoolerState::Completed);

        let job = h.service.check_status(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.actions().last(), Some(&EventAction::StatusChanged));

        // Terminal jobs are not probed again.
        let probes = h.probe.probe_count();
        h.service.check_status(&job.id).await.unwrap();
        assert_eq!(h.probe.probe_count(), probes);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let h = Harness::new();
        let err = h.service.refund(&JobId::new(), "admin").expect_err("missing");
        assert!(matches!(err, KioskError::JobNotFound(_)));
    }
}
