// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer. Opens the store, loads the config and builds the
// spooler-facing components that the daemon and CLI commands share.
//
// The job store is a single rusqlite connection behind `Arc<Mutex<>>`.
// Contention is low because every operation is a sub-millisecond query and
// spooler commands run without the lock held.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use kioskprint_core::AppConfig;
use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{Job, JobEvent, JobId};
use kioskprint_print::{
    BroadcastSink, Dispatcher, JobService, JobStore, LpstatProber, MonitorConfig, SharedStore,
    SpoolerMonitor, SystemRunner,
};

const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "jobs.db";
const UPLOADS_DIR: &str = "uploads";
const EVENT_CAPACITY: usize = 256;

pub type Prober = LpstatProber<SystemRunner>;
pub type Jobs = JobService<SystemRunner, Prober>;

/// Shared application services.
pub struct AppServices {
    store: SharedStore,
    sink: Arc<BroadcastSink>,
    prober: Arc<Prober>,
    jobs: Jobs,
    config: AppConfig,
    data_dir: PathBuf,
}

impl AppServices {
    /// Initialise all services rooted at `data_dir`.  Call once at startup.
    pub fn init(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        info!(path = %data_dir.display(), "initialising app services");

        let config = load_or_init_config(&data_dir)?;
        let store = JobStore::open(data_dir.join(DATABASE_FILE))?.into_shared();

        let runner = Arc::new(SystemRunner::new(config.spooler.command_timeout()));
        let prober = Arc::new(LpstatProber::new(
            Arc::clone(&runner),
            config.spooler.lpstat_command.clone(),
            config.assume_completed_when_missing,
        ));
        let sink = Arc::new(BroadcastSink::new(EVENT_CAPACITY));
        let jobs = JobService::new(
            Arc::clone(&store),
            Dispatcher::new(runner, config.spooler.clone()),
            Arc::clone(&prober),
            sink.clone(),
            config.printer_name.clone(),
            config.rate_per_page,
        );

        info!(printer = %config.printer_name, "app services initialised");
        Ok(Self {
            store,
            sink,
            prober,
            jobs,
            config,
            data_dir,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    /// Receive every job event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sink.subscribe()
    }

    /// Build the background monitor.  It is returned stopped.
    pub fn monitor(&self) -> SpoolerMonitor<Prober> {
        SpoolerMonitor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.prober),
            self.sink.clone(),
            MonitorConfig::from(&self.config),
        )
    }

    /// Copy an uploaded file into the data directory and register it.
    pub async fn upload(&self, source: &Path) -> Result<Job> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                KioskError::Document(format!("not a file name: {}", source.display()))
            })?;

        let uploads = self.data_dir.join(UPLOADS_DIR);
        tokio::fs::create_dir_all(&uploads).await?;
        let id = JobId::new();
        let stored = uploads.join(format!("{id}-{filename}"));
        tokio::fs::copy(source, &stored).await?;

        match self.jobs.register_upload(id, filename, stored.clone()).await {
            Ok(job) => Ok(job),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&stored).await {
                    warn!(path = %stored.display(), error = %cleanup, "could not remove rejected upload");
                }
                Err(e)
            }
        }
    }
}

/// Read `config.json`, or write the defaults when it does not exist yet.
fn load_or_init_config(data_dir: &Path) -> Result<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(data) => {
            let config: AppConfig = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let config = AppConfig::default();
            persist_config(data_dir, &config)?;
            info!(path = %path.display(), "default config written");
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}

fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}
