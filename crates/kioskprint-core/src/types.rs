// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the kioskprint job queue.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KioskError;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| KioskError::InvalidJobId(format!("{s}: {e}")))
    }
}

/// Lifecycle states of a print job.
///
/// Stored as the snake_case keyword returned by [`JobStatus::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Uploaded, waiting for the user to pay.
    AwaitingPayment,
    /// Payment proof submitted, waiting for an admin.
    PendingApproval,
    /// Handed to the spooler.
    Printing,
    /// Dispatch failed or the spooler reported a failure. Resendable.
    Error,
    /// Admin declined the job.
    Rejected,
    /// Spooler finished the job (or the job was purged from its history).
    Completed,
    /// Cancelled at the spooler.
    Canceled,
    /// Aborted by the spooler.
    Aborted,
    /// Money returned to the user.
    Refunded,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        Self::AwaitingPayment,
        Self::PendingApproval,
        Self::Printing,
        Self::Error,
        Self::Rejected,
        Self::Completed,
        Self::Canceled,
        Self::Aborted,
        Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::PendingApproval => "pending_approval",
            Self::Printing => "printing",
            Self::Error => "error",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Refunded => "refunded",
        }
    }

    /// Terminal states are never left except towards `Refunded`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Canceled | Self::Aborted | Self::Rejected | Self::Refunded
        )
    }

    /// Print settings may only change before the job reaches the spooler.
    pub fn settings_editable(&self) -> bool {
        matches!(self, Self::AwaitingPayment | Self::PendingApproval)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| KioskError::Database(format!("unknown job status {s:?}")))
    }
}

/// State of a job as observed at the spooler.
///
/// `Pending` is a sub-state of printing: the spooler holds the job but has not
/// started it yet.  `Unknown` means the spooler could not be asked or the job
/// could not be classified; it is never written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoolerState {
    Printing,
    Pending,
    Completed,
    Canceled,
    Aborted,
    Error,
    Unknown,
}

impl SpoolerState {
    /// The job status this observation implies, if any.
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            Self::Printing | Self::Pending => Some(JobStatus::Printing),
            Self::Completed => Some(JobStatus::Completed),
            Self::Canceled => Some(JobStatus::Canceled),
            Self::Aborted => Some(JobStatus::Aborted),
            Self::Error => Some(JobStatus::Error),
            Self::Unknown => None,
        }
    }
}

/// Page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    /// Stored keyword, which is also the CUPS `-o` option.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

impl FromStr for Orientation {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portrait" => Ok(Self::Portrait),
            "landscape" => Ok(Self::Landscape),
            other => Err(KioskError::InvalidSettings(format!("unknown orientation {other:?}"))),
        }
    }
}

/// Colour rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Bw,
    Color,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bw => "bw",
            Self::Color => "color",
        }
    }
}

impl FromStr for ColorMode {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bw" => Ok(Self::Bw),
            "color" => Ok(Self::Color),
            other => Err(KioskError::InvalidSettings(format!("unknown color mode {other:?}"))),
        }
    }
}

/// Number of copies, always within `1..=99`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Copies(u8);

impl Copies {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 99;

    /// Validate a copy count.
    pub fn new(n: u32) -> Result<Self, KioskError> {
        if (Self::MIN..=Self::MAX).contains(&n) {
            Ok(Self(n as u8))
        } else {
            Err(KioskError::InvalidSettings(format!(
                "copies must be between {} and {}, got {n}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// Clamp an arbitrary request into the valid range.
    pub fn clamped(n: i64) -> Self {
        Self(n.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(&self) -> u32 {
        u32::from(self.0)
    }
}

impl Default for Copies {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u32> for Copies {
    type Error = KioskError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<Copies> for u32 {
    fn from(c: Copies) -> u32 {
        c.get()
    }
}

/// Print settings for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrintSettings {
    pub copies: Copies,
    pub orientation: Orientation,
    pub color: ColorMode,
}

/// A complete print job record.
///
/// Cost is derived from pages, rate and copies and is never stored on its
/// own; see [`Job::cost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub filename: String,
    pub stored_path: PathBuf,
    pub pages: u32,
    /// Price per printed page in minor currency units.
    pub rate_per_page: u64,
    pub settings: PrintSettings,
    pub status: JobStatus,
    /// Spooler handle of the latest successful dispatch, e.g. `Office-123`.
    pub spooler_handle: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly uploaded job awaiting payment.
    pub fn new(filename: String, stored_path: PathBuf, pages: u32, rate_per_page: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            filename,
            stored_path,
            pages,
            rate_per_page,
            settings: PrintSettings::default(),
            status: JobStatus::AwaitingPayment,
            spooler_handle: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            refunded_at: None,
            refunded_by: None,
            dispatched_at: None,
        }
    }

    /// Use a caller-chosen id, e.g. one already embedded in the stored file name.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Cost of a single copy.  Saturates rather than overflowing.
    pub fn cost_per_copy(&self) -> u64 {
        u64::from(self.pages).saturating_mul(self.rate_per_page)
    }

    /// Total cost: `pages × rate × copies`, saturating at `u64::MAX`.
    pub fn cost(&self) -> u64 {
        self.cost_per_copy()
            .saturating_mul(u64::from(self.settings.copies.get()))
    }

    /// In-flight jobs are the ones the reconciliation loop polls.
    pub fn is_in_flight(&self) -> bool {
        self.status == JobStatus::Printing && self.spooler_handle.is_some()
    }

    /// Display fields carried in change notifications.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            filename: self.filename.clone(),
            pages: self.pages,
            cost: self.cost(),
            copies: self.settings.copies.get(),
            orientation: self.settings.orientation,
            color: self.settings.color,
            status: self.status,
        }
    }
}

/// Display snapshot of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub filename: String,
    pub pages: u32,
    pub cost: u64,
    pub copies: u32,
    pub orientation: Orientation,
    pub color: ColorMode,
    pub status: JobStatus,
}

/// Why a notification was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Uploaded,
    SettingsUpdated,
    PaymentSubmitted,
    Approved,
    Rejected,
    Resent,
    Refunded,
    /// The spooler reported a new state.
    StatusChanged,
}

/// Change notification published to connected observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub action: EventAction,
    pub job: JobSnapshot,
}

impl JobEvent {
    pub fn new(job: &Job, action: EventAction) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            action,
            job: job.snapshot(),
        }
    }
}
