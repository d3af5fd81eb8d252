// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spooler status probing via `lpstat`.
//
// CUPS offers no machine-readable job listing on the command line, so the
// classification below is keyword matching over free text and is best-effort
// by nature.  The parsing is kept in pure functions pinned by tests against
// literal `lpstat` output; `StatusProbe` is the seam for swapping in a
// structured query later.
//
// Probe order:
//   1. `lpstat -o`                  active queue; failure => Unknown
//   2. `lpstat -l -o <handle>`      detail for an active job
//   3. `lpstat -W completed -l`     history incl. canceled/aborted jobs
//   4. absent everywhere            => Completed (configurable)

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use kioskprint_core::types::SpoolerState;

use crate::runner::CommandRunner;

/// Anything that can report a spooler job's state.
pub trait StatusProbe: Send + Sync + 'static {
    /// Classify the job behind `handle`.  Never fails: anything that cannot
    /// be determined is [`SpoolerState::Unknown`].
    fn probe(&self, handle: Option<&str>) -> impl Future<Output = SpoolerState> + Send;
}

/// CUPS prober backed by `lpstat`.
pub struct LpstatProber<R> {
    runner: Arc<R>,
    lpstat_command: String,
    assume_completed_when_missing: bool,
}

impl<R: CommandRunner> LpstatProber<R> {
    pub fn new(runner: Arc<R>, lpstat_command: impl Into<String>, assume_completed_when_missing: bool) -> Self {
        Self {
            runner,
            lpstat_command: lpstat_command.into(),
            assume_completed_when_missing,
        }
    }

    async fn lpstat(&self, args: &[&str]) -> Option<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match self.runner.run(&self.lpstat_command, &args).await {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                warn!(?args, stderr = %out.stderr.trim(), "lpstat failed");
                None
            }
            Err(e) => {
                warn!(?args, error = %e, "lpstat could not be run");
                None
            }
        }
    }
}

impl<R: CommandRunner> StatusProbe for LpstatProber<R> {
    async fn probe(&self, handle: Option<&str>) -> SpoolerState {
        let handle = match handle.map(str::trim) {
            Some(h) if !h.is_empty() => h,
            _ => return SpoolerState::Unknown,
        };

        let Some(active) = self.lpstat(&["-o"]).await else {
            return SpoolerState::Unknown;
        };

        if contains_handle(&active, handle) {
            // A failed detail query still leaves the job visibly active.
            let detail = self.lpstat(&["-l", "-o", handle]).await.unwrap_or_default();
            let state = classify_active_detail(&detail);
            debug!(handle, ?state, "job is in the active queue");
            return state;
        }

        let Some(history) = self.lpstat(&["-W", "completed", "-l"]).await else {
            return SpoolerState::Unknown;
        };

        if let Some(block) = isolate_job_block(&history, handle) {
            let state = classify_completed_block(&block);
            debug!(handle, ?state, "job found in completed history");
            return state;
        }

        if self.assume_completed_when_missing {
            debug!(handle, "job absent from every listing; assuming completed");
            SpoolerState::Completed
        } else {
            debug!(handle, "job absent from every listing");
            SpoolerState::Unknown
        }
    }
}

fn is_handle_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Whether `text` mentions `handle` as a whole token, so that `PRN-7` does not
/// match `PRN-70`.
pub fn contains_handle(text: &str, handle: &str) -> bool {
    if handle.is_empty() {
        return false;
    }
    text.match_indices(handle).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + handle.len()..].chars().next();
        !before.is_some_and(is_handle_char) && !after.is_some_and(is_handle_char)
    })
}

/// Classify `lpstat -l -o <handle>` output for a job in the active queue.
pub fn classify_active_detail(detail: &str) -> SpoolerState {
    let lower = detail.to_lowercase();
    if lower.contains("processing") || lower.contains("printing") {
        SpoolerState::Printing
    } else if ["pending", "held", "hold", "waiting"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        SpoolerState::Pending
    } else {
        SpoolerState::Printing
    }
}

/// Cut the block describing `handle` out of a `lpstat -l` listing.
///
/// A block starts at the job's own line and runs until the next line that
/// begins in column zero (the next job) or the end of output.
pub fn isolate_job_block(listing: &str, handle: &str) -> Option<String> {
    let mut lines = listing.lines();
    let first = lines.by_ref().find(|line| contains_handle(line, handle))?;

    let mut block = vec![first];
    block.extend(lines.take_while(|line| {
        line.is_empty() || line.starts_with(char::is_whitespace)
    }));
    Some(block.join("\n"))
}

/// Classify a job block from the completed-jobs history.
pub fn classify_completed_block(block: &str) -> SpoolerState {
    let lower = block.to_lowercase();
    if lower.contains("canceled") || lower.contains("cancelled") {
        SpoolerState::Canceled
    } else if lower.contains("aborted") {
        SpoolerState::Aborted
    } else if lower.contains("error") || lower.contains("failed") {
        SpoolerState::Error
    } else {
        SpoolerState::Completed
    }
}
