// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job lifecycle state machine.
//
//   awaiting_payment -> pending_approval -> printing | error | rejected
//   printing -> completed | canceled | aborted | error   (spooler reports)
//   printing | error -> printing                         (resend)
//   printing | error | terminal -> refunded              (admin refund)
//
// Terminal states are completed, canceled, aborted, rejected and refunded.
// Only an explicit refund leaves a terminal state.

use serde::{Deserialize, Serialize};

use crate::error::{KioskError, Result};
use crate::types::{JobStatus, SpoolerState};

/// Events that move a job through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// User submitted proof of payment.
    PaymentSubmitted,
    /// Admin approved; `dispatched` tells whether the spooler accepted it.
    Approved { dispatched: bool },
    /// Admin declined the job.
    Rejected,
    /// Reconciliation observed a state at the spooler.
    SpoolerReported(SpoolerState),
    /// Admin re-sent the job and the spooler accepted it.
    Resent,
    /// Admin returned the payment.
    Refunded,
}

impl JobStatus {
    /// Apply `transition` to this status.
    ///
    /// A spooler report of `Unknown` or `Pending` leaves a printing job
    /// unchanged.
    pub fn apply(self, transition: Transition) -> Result<JobStatus> {
        use JobStatus::*;

        let next = match (self, transition) {
            (AwaitingPayment, Transition::PaymentSubmitted) => Some(PendingApproval),
            (PendingApproval, Transition::Approved { dispatched: true }) => Some(Printing),
            (PendingApproval, Transition::Approved { dispatched: false }) => Some(Error),
            (PendingApproval, Transition::Rejected) => Some(Rejected),
            (Printing, Transition::SpoolerReported(state)) => {
                Some(state.job_status().unwrap_or(Printing))
            }
            (Printing | Error, Transition::Resent) => Some(Printing),
            (Printing | Error | Completed | Canceled | Aborted | Rejected, Transition::Refunded) => {
                Some(Refunded)
            }
            _ => None,
        };

        next.ok_or(KioskError::InvalidTransition {
            from: self,
            transition,
        })
    }
}
