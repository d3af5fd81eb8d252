// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background spooler monitor.
//
// Owns the periodic reconciliation task.  The task sweeps once on start and
// then on every tick of the poll interval.  Between sweeps it waits on both
// the ticker and a shutdown notification, so `stop()` is honoured at once
// when idle.  A sweep that is still running gets `shutdown_grace` to finish
// before the task is aborted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use kioskprint_core::AppConfig;

use crate::notify::NotificationSink;
use crate::prober::StatusProbe;
use crate::reconcile::sweep;
use crate::store::SharedStore;

/// Timing and concurrency for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub max_concurrent_probes: usize,
}

impl From<&AppConfig> for MonitorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            shutdown_grace: config.shutdown_grace(),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Lifecycle state of the monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Stopped,
    Running,
}

/// Periodic reconciliation of in-flight jobs against the spooler.
pub struct SpoolerMonitor<P: StatusProbe> {
    store: SharedStore,
    prober: Arc<P>,
    sink: Arc<dyn NotificationSink>,
    config: MonitorConfig,
    status: MonitorStatus,
    /// Cleared on stop; sweeps check it between jobs.
    running: Arc<AtomicBool>,
    /// Wakes the loop out of its inter-sweep wait.
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    sweeps: Arc<AtomicU64>,
}

impl<P: StatusProbe> SpoolerMonitor<P> {
    /// Create a monitor in the `Stopped` state.
    pub fn new(
        store: SharedStore,
        prober: Arc<P>,
        sink: Arc<dyn NotificationSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            prober,
            sink,
            config,
            status: MonitorStatus::Stopped,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    /// Number of sweeps finished since the monitor was created.
    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Spawn the reconciliation task.  Must be called inside a Tokio runtime.
    /// Calling it on a running monitor does nothing.
    pub fn start(&mut self) {
        if self.status == MonitorStatus::Running {
            debug!("spooler monitor already running");
            return;
        }

        // A fresh signal so a permit left by an earlier stop cannot end the
        // new task straight away.
        self.shutdown_signal = Arc::new(Notify::new());
        self.running.store(true, Ordering::SeqCst);

        let worker = Worker {
            store: Arc::clone(&self.store),
            prober: Arc::clone(&self.prober),
            sink: Arc::clone(&self.sink),
            limit: Arc::new(Semaphore::new(self.config.max_concurrent_probes)),
            running: Arc::clone(&self.running),
            shutdown: Arc::clone(&self.shutdown_signal),
            sweeps: Arc::clone(&self.sweeps),
            poll_interval: self.config.poll_interval,
        };
        self.task_handle = Some(tokio::spawn(worker.run()));
        self.status = MonitorStatus::Running;

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            max_concurrent_probes = self.config.max_concurrent_probes,
            "spooler monitor started"
        );
    }

    /// Stop the task, waiting up to `shutdown_grace` for an in-progress
    /// sweep before aborting it.
    pub async fn stop(&mut self) {
        if self.status != MonitorStatus::Running {
            return;
        }
        info!("stopping spooler monitor");

        self.running.store(false, Ordering::SeqCst);
        self.shutdown_signal.notify_one();

        if let Some(mut handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.shutdown_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "spooler monitor task ended abnormally"),
                Err(_) => {
                    warn!(
                        grace_secs = self.config.shutdown_grace.as_secs_f64(),
                        "sweep did not finish in time; aborting"
                    );
                    handle.abort();
                }
            }
        }

        self.status = MonitorStatus::Stopped;
        info!(sweeps = self.sweeps_completed(), "spooler monitor stopped");
    }
}

impl<P: StatusProbe> Drop for SpoolerMonitor<P> {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_signal.notify_one();
        }
    }
}

/// State moved into the spawned task.
struct Worker<P> {
    store: SharedStore,
    prober: Arc<P>,
    sink: Arc<dyn NotificationSink>,
    limit: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    sweeps: Arc<AtomicU64>,
    poll_interval: Duration,
}

impl<P: StatusProbe> Worker<P> {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    debug!("spooler monitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            sweep(
                &self.store,
                &self.prober,
                &self.sink,
                &self.limit,
                &self.running,
            )
            .await;
            self.sweeps.fetch_add(1, Ordering::SeqCst);
        }
    }
}
