// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External command execution for the spooler tools.
//
// CUPS is driven through its command-line clients (`lp`, `lpstat`).  Every
// invocation goes through a `CommandRunner` so that dispatch and probing can
// be exercised against scripted outputs, and so that a hung spooler cannot
// stall the caller: the system runner enforces a hard timeout and kills the
// child when it expires.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use kioskprint_core::error::Result;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program to completion.
///
/// An `Err` means the program could not be run at all (missing binary,
/// timeout).  A program that ran and failed is an `Ok` with
/// `success == false`.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Runs real processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, ?args, "running spooler command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(program, timeout_secs = self.timeout.as_secs(), "spooler command hung");
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{program} timed out after {}s", self.timeout.as_secs()),
                )
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
