// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for kioskprint.

use thiserror::Error;

use crate::lifecycle::Transition;
use crate::types::{JobId, JobStatus};

/// Top-level error type for all kioskprint operations.
#[derive(Debug, Error)]
pub enum KioskError {
    // -- Spooler --
    /// The spooler refused or failed to accept a job.  Carries the
    /// spooler's own error text.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    // -- Lifecycle --
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("cannot apply {transition:?} to a job in state {from}")]
    InvalidTransition { from: JobStatus, transition: Transition },

    /// A concurrent update changed the job first; this write was dropped.
    #[error("job {0} was modified concurrently")]
    StoreConflict(JobId),

    /// The spooler accepted the job, but the job changed before the handle
    /// could be recorded.  The spooler job is no longer tracked.
    #[error("job {id} changed during dispatch; spooler job {handle:?} is untracked")]
    UntrackedDispatch { id: JobId, handle: Option<String> },

    #[error("invalid print settings: {0}")]
    InvalidSettings(String),

    // -- Documents --
    #[error("document error: {0}")]
    Document(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KioskError>;
