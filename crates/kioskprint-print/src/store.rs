// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent job store backed by SQLite.
//
// The store owns every job record.  Document bytes live on disk and are
// referenced by path.  The schema is fixed and versioned through
// `PRAGMA user_version`; migrations run once when the store is opened.
//
// Every mutation is a single statement or a single transaction scoped to one
// job id, so the reconciliation loop and admin actions never lose each
// other's updates.  Status changes coming from the spooler use
// compare-and-set on (status, handle) and are dropped when stale.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{Copies, Job, JobId, JobStatus, PrintSettings};

/// Schema version written to `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// Migration `i` upgrades the schema from version `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE jobs (
        id                TEXT PRIMARY KEY,
        filename          TEXT NOT NULL,
        stored_path       TEXT NOT NULL,
        pages             INTEGER NOT NULL,
        rate_per_page     INTEGER NOT NULL,
        cost              INTEGER NOT NULL,
        copies            INTEGER NOT NULL DEFAULT 1,
        orientation       TEXT NOT NULL DEFAULT 'portrait',
        color             TEXT NOT NULL DEFAULT 'bw',
        status            TEXT NOT NULL,
        spooler_handle    TEXT,
        payment_reference TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL,
        submitted_at      TEXT,
        approved_at       TEXT,
        approved_by       TEXT,
        rejected_at       TEXT,
        rejected_by       TEXT,
        refunded_at       TEXT,
        refunded_by       TEXT,
        dispatched_at     TEXT
    );
    CREATE INDEX jobs_status ON jobs (status);
"#];

const SELECT_JOB: &str = "SELECT id, filename, stored_path, pages, rate_per_page, copies,
        orientation, color, status, spooler_handle, payment_reference,
        created_at, updated_at, submitted_at, approved_at, approved_by,
        rejected_at, rejected_by, refunded_at, refunded_by, dispatched_at
     FROM jobs";

/// Store shared between request handlers and the reconciliation loop.
pub type SharedStore = Arc<Mutex<JobStore>>;

/// Lock a shared store, turning a poisoned lock into an error.
pub fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, JobStore>> {
    store
        .lock()
        .map_err(|_| KioskError::Database("job store lock poisoned".into()))
}

/// Convert a `rusqlite::Error` into a `KioskError::Database` with context.
fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> KioskError {
    move |e| KioskError::Database(format!("{context}: {e}"))
}

/// Keyed job store backed by a SQLite database.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively.  Calls are short single-row statements, so async callers lock
/// the [`SharedStore`] directly and never hold the guard across an `.await`.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the store at `path` and bring its schema up to date.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;

        // WAL lets dashboard reads proceed while the monitor writes.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;

        migrate(&conn)?;
        info!("job store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        migrate(&conn)?;
        debug!("in-memory job store opened");
        Ok(Self { conn })
    }

    /// Wrap in the shared handle used across tasks.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Insert a new job.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert(&self, job: &Job) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, filename, stored_path, pages, rate_per_page, cost,
                    copies, orientation, color, status, spooler_handle, payment_reference,
                    created_at, updated_at, submitted_at, approved_at, approved_by,
                    rejected_at, rejected_by, refunded_at, refunded_by, dispatched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    job.id.to_string(),
                    job.filename,
                    job.stored_path.to_string_lossy(),
                    job.pages,
                    sql_amount(job.rate_per_page),
                    sql_amount(job.cost()),
                    job.settings.copies.get(),
                    job.settings.orientation.as_str(),
                    job.settings.color.as_str(),
                    job.status.as_str(),
                    job.spooler_handle,
                    job.payment_reference,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    job.submitted_at.map(|t| t.to_rfc3339()),
                    job.approved_at.map(|t| t.to_rfc3339()),
                    job.approved_by,
                    job.rejected_at.map(|t| t.to_rfc3339()),
                    job.rejected_by,
                    job.refunded_at.map(|t| t.to_rfc3339()),
                    job.refunded_by,
                    job.dispatched_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(db_err("insert job"))?;

        info!(job_id = %job.id, "job stored");
        Ok(())
    }

    /// Retrieve a single job.  Returns `None` if it does not exist.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn get(&self, id: &JobId) -> Result<Option<Job>> {
        self.conn
            .query_row(
                &format!("{SELECT_JOB} WHERE id = ?1"),
                params![id.to_string()],
                row_to_job,
            )
            .optional()
            .map_err(db_err("get job"))
    }

    /// All jobs, newest first.
    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<Job>> {
        self.query_jobs(&format!("{SELECT_JOB} ORDER BY created_at DESC"), [])
    }

    /// Jobs in `status`, oldest first.
    #[instrument(skip(self))]
    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.query_jobs(
            &format!("{SELECT_JOB} WHERE status = ?1 ORDER BY created_at ASC"),
            params![status.as_str()],
        )
    }

    /// Jobs the reconciliation loop must poll: printing with a known handle.
    #[instrument(skip(self))]
    pub fn list_in_flight(&self) -> Result<Vec<Job>> {
        self.query_jobs(
            &format!(
                "{SELECT_JOB} WHERE status = ?1 AND spooler_handle IS NOT NULL
                 ORDER BY created_at ASC"
            ),
            params![JobStatus::Printing.as_str()],
        )
    }

    /// Overwrite a job's status without lifecycle checks.
    ///
    /// Lifecycle-checked changes go through [`JobStore::update`] or
    /// [`JobStore::compare_and_set_status`].
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn update_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(db_err("update status"))?;
        if rows == 0 {
            return Err(KioskError::JobNotFound(*id));
        }
        debug!(job_id = %id, %status, "job status updated");
        Ok(())
    }

    /// Record the spooler handle of the latest dispatch attempt.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn set_spooler_handle(&self, id: &JobId, handle: Option<&str>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET spooler_handle = ?1, updated_at = ?2 WHERE id = ?3",
                params![handle, Utc::now().to_rfc3339(), id.to_string()],
            )
            .map_err(db_err("set spooler handle"))?;
        if rows == 0 {
            return Err(KioskError::JobNotFound(*id));
        }
        Ok(())
    }

    /// Move a job to `next` only if it is still in `expected` with the same
    /// spooler handle.
    ///
    /// Returns `Ok(false)` when the job changed underneath the caller.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: JobStatus,
        expected_handle: Option<&str>,
        next: JobStatus,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4 AND spooler_handle IS ?5",
                params![
                    next.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected.as_str(),
                    expected_handle,
                ],
            )
            .map_err(db_err("compare-and-set status"))?;

        if rows == 1 {
            debug!(job_id = %id, from = %expected, to = %next, "job status swapped");
            return Ok(true);
        }
        if self.get(id)?.is_none() {
            return Err(KioskError::JobNotFound(*id));
        }
        Ok(false)
    }

    /// Atomic read-modify-write of one job.
    ///
    /// `f` sees the current record; if it returns an error nothing is
    /// written.  `updated_at` is bumped and the cost column recomputed.
    #[instrument(skip(self, f), fields(job_id = %id))]
    pub fn update<F>(&self, id: &JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(db_err("begin transaction"))?;

        let mut job = tx
            .query_row(
                &format!("{SELECT_JOB} WHERE id = ?1"),
                params![id.to_string()],
                row_to_job,
            )
            .optional()
            .map_err(db_err("read job"))?
            .ok_or(KioskError::JobNotFound(*id))?;

        f(&mut job)?;
        job.id = *id;
        job.updated_at = Utc::now();

        tx.execute(
            "UPDATE jobs SET cost = ?1, copies = ?2, orientation = ?3, color = ?4,
                status = ?5, spooler_handle = ?6, payment_reference = ?7, updated_at = ?8,
                submitted_at = ?9, approved_at = ?10, approved_by = ?11, rejected_at = ?12,
                rejected_by = ?13, refunded_at = ?14, refunded_by = ?15, dispatched_at = ?16
             WHERE id = ?17",
            params![
                sql_amount(job.cost()),
                job.settings.copies.get(),
                job.settings.orientation.as_str(),
                job.settings.color.as_str(),
                job.status.as_str(),
                job.spooler_handle,
                job.payment_reference,
                job.updated_at.to_rfc3339(),
                job.submitted_at.map(|t| t.to_rfc3339()),
                job.approved_at.map(|t| t.to_rfc3339()),
                job.approved_by,
                job.rejected_at.map(|t| t.to_rfc3339()),
                job.rejected_by,
                job.refunded_at.map(|t| t.to_rfc3339()),
                job.refunded_by,
                job.dispatched_at.map(|t| t.to_rfc3339()),
                id.to_string(),
            ],
        )
        .map_err(db_err("write job"))?;

        tx.commit().map_err(db_err("commit"))?;
        Ok(job)
    }

    /// Change print settings.  Only allowed before the job is dispatched.
    pub fn update_settings(&self, id: &JobId, settings: PrintSettings) -> Result<Job> {
        self.update(id, |job| {
            if !job.status.settings_editable() {
                return Err(KioskError::InvalidSettings(format!(
                    "settings are locked once a job is {}",
                    job.status
                )));
            }
            job.settings = settings;
            Ok(())
        })
    }

    /// Persisted cost column.
    #[cfg(test)]
    pub(crate) fn stored_cost(&self, id: &JobId) -> Result<Option<u64>> {
        self.conn
            .query_row(
                "SELECT cost FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|cost| cost.map(|c| c as u64))
            .map_err(db_err("read cost"))
    }

    fn query_jobs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err("prepare"))?;
        let jobs = stmt
            .query_map(params, row_to_job)
            .map_err(db_err("query"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;
        debug!(count = jobs.len(), "jobs listed");
        Ok(jobs)
    }
}

/// Apply pending migrations inside one transaction.
fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err("read schema version"))?;

    if version > SCHEMA_VERSION {
        return Err(KioskError::Database(format!(
            "database schema version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("begin migration"))?;
    for (from, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        tx.execute_batch(sql).map_err(db_err("migrate"))?;
        info!(from, to = from + 1, "schema migrated");
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(db_err("write schema version"))?;
    tx.commit().map_err(db_err("commit migration"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

/// Money columns are SQLite integers; amounts beyond `i64::MAX` are capped.
fn sql_amount(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                warn!(column = idx, value = %raw, error = %e, "unparsable timestamp ignored");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Map a row selected with [`SELECT_JOB`] to a `Job`.
fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let stored_path: String = row.get(2)?;
    let copies: u32 = row.get(5)?;
    let orientation: String = row.get(6)?;
    let color: String = row.get(7)?;
    let status: String = row.get(8)?;

    Ok(Job {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        filename: row.get(1)?,
        stored_path: PathBuf::from(stored_path),
        pages: row.get(3)?,
        rate_per_page: row.get::<_, i64>(4)? as u64,
        settings: PrintSettings {
            copies: Copies::new(copies).map_err(|e| conversion_error(5, e))?,
            orientation: orientation.parse().map_err(|e| conversion_error(6, e))?,
            color: color.parse().map_err(|e| conversion_error(7, e))?,
        },
        status: status.parse().map_err(|e| conversion_error(8, e))?,
        spooler_handle: row.get(9)?,
        payment_reference: row.get(10)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
        submitted_at: optional_timestamp(row, 13)?,
        approved_at: optional_timestamp(row, 14)?,
        approved_by: row.get(15)?,
        rejected_at: optional_timestamp(row, 16)?,
        rejected_by: row.get(17)?,
        refunded_at: optional_timestamp(row, 18)?,
        refunded_by: row.get(19)?,
        dispatched_at: optional_timestamp(row, 20)?,
    })
}
