// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the admin dashboard.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Severity drives how the dashboard presents it.

use crate::error::KioskError;

/// Severity of an error from the operator's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Spooler busy or briefly unreachable; trying again may work.
    Transient,
    /// Someone has to do something at the printer or in CUPS.
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the operator should try (shown as body text).
    pub suggestion: String,
    /// Whether a resend is worth offering.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `KioskError` into a `HumanError`.
pub fn humanize_error(err: &KioskError) -> HumanError {
    match err {
        KioskError::Dispatch(detail) => humanize_spooler_error(detail),

        KioskError::JobNotFound(_) | KioskError::InvalidJobId(_) => HumanError {
            message: "That print job no longer exists.".into(),
            suggestion: "Refresh the dashboard; the job may have been cleaned up.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        KioskError::InvalidTransition { from, .. } => HumanError {
            message: "That action isn't possible for this job right now.".into(),
            suggestion: format!("The job is currently {from}. Refresh to see its latest state."),
            retriable: false,
            severity: Severity::Permanent,
        },

        KioskError::StoreConflict(_) => HumanError {
            message: "Someone else updated this job at the same time.".into(),
            suggestion: "Refresh the dashboard and check the job before trying again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        KioskError::UntrackedDispatch { handle, .. } => HumanError {
            message: "The job was sent to the printer, but someone changed it at the same time.".into(),
            suggestion: match handle {
                Some(h) => format!("Check the job, and run `cancel {h}` if it should not print."),
                None => "Check the job and the CUPS queue before doing anything else.".into(),
            },
            retriable: false,
            severity: Severity::ActionRequired,
        },

        KioskError::InvalidSettings(detail) => HumanError {
            message: "Those print settings aren't allowed.".into(),
            suggestion: format!("Check copies, orientation and colour. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        KioskError::Document(_) => HumanError {
            message: "We couldn't read this document.".into(),
            suggestion: "The file may be damaged. Ask the customer to upload it again, preferably as a PDF.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        KioskError::Database(_) | KioskError::Serialization(_) => HumanError {
            message: "The job database had a problem.".into(),
            suggestion: "Try again. If this keeps happening, restart the service.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        KioskError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "The uploaded file is missing.".into(),
                    suggestion: "It may have been cleaned up. Ask the customer to upload it again.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }
    }
}

/// Map spooler stderr text to a human-readable error.
fn humanize_spooler_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("timed out") {
        HumanError {
            message: "The print system didn't respond in time.".into(),
            suggestion: "CUPS may be busy. Wait a moment and resend the job.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("scheduler is not running") || lower.contains("connection refused") {
        HumanError {
            message: "The print system isn't running.".into(),
            suggestion: "Start the CUPS service on the print server, then resend the job.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("does not exist") || lower.contains("unknown destination") {
        HumanError {
            message: "The configured printer isn't known to CUPS.".into(),
            suggestion: "Check the printer name in the settings against `lpstat -p`.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("not accepting jobs") || lower.contains("disabled") {
        HumanError {
            message: "The printer is paused.".into(),
            suggestion: "Re-enable the printer in CUPS (cupsenable / cupsaccept), then resend.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("file not found") || lower.contains("no such file") {
        HumanError {
            message: "The uploaded file is missing.".into(),
            suggestion: "Ask the customer to upload the document again.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("copies") {
        HumanError {
            message: "The number of copies isn't allowed.".into(),
            suggestion: "Choose between 1 and 99 copies.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: "The printer couldn't accept the job.".into(),
            suggestion: format!("Check the printer, then resend. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}
