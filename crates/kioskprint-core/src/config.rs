// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KioskError, Result};

/// Largest accepted `rate_per_page`, in minor currency units.
pub const MAX_RATE_PER_PAGE: u64 = 1_000_000_000;

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// CUPS destination that receives approved jobs.
    pub printer_name: String,
    /// Price per printed page in minor currency units.
    pub rate_per_page: u64,
    /// Seconds between reconciliation sweeps.
    pub poll_interval_secs: u64,
    /// How long shutdown waits for an in-flight sweep.
    pub shutdown_grace_secs: u64,
    /// Upper bound on concurrent spooler probes within one sweep.
    pub max_concurrent_probes: usize,
    /// Treat a job missing from every spooler listing as completed.
    /// Spoolers purge old history, so absence usually means success.
    pub assume_completed_when_missing: bool,
    /// Spooler command-line settings.
    pub spooler: SpoolerConfig,
}

impl AppConfig {
    /// Reject values that cannot be priced or stored.
    pub fn validate(&self) -> Result<()> {
        if self.rate_per_page > MAX_RATE_PER_PAGE {
            return Err(KioskError::InvalidSettings(format!(
                "rate_per_page must be at most {MAX_RATE_PER_PAGE}, got {}",
                self.rate_per_page
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            printer_name: "Office".into(),
            rate_per_page: 500,
            poll_interval_secs: 30,
            shutdown_grace_secs: 10,
            max_concurrent_probes: 4,
            assume_completed_when_missing: true,
            spooler: SpoolerConfig::default(),
        }
    }
}

/// How the CUPS command-line tools are invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerConfig {
    /// Submission command (`lp`).
    pub lp_command: String,
    /// Query command (`lpstat`).
    pub lpstat_command: String,
    /// Hard limit for any single spooler command.
    pub command_timeout_secs: u64,
    /// `-o` option sent for black & white jobs.  Some drivers need a
    /// vendor key here, e.g. `CNIJGrayScale=1`.
    pub monochrome_option: String,
    /// `-o` option sent for colour jobs.
    pub color_option: String,
}

impl SpoolerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            lp_command: "lp".into(),
            lpstat_command: "lpstat".into(),
            command_timeout_secs: 20,
            monochrome_option: "print-color-mode=monochrome".into(),
            color_option: "print-color-mode=color".into(),
        }
    }
}
