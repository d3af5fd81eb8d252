// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted fakes shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{JobEvent, SpoolerState};

use crate::notify::NotificationSink;
use crate::prober::StatusProbe;
use crate::runner::{CommandOutput, CommandRunner};

pub(crate) fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub(crate) fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

enum Scripted {
    Output(CommandOutput),
    Unreachable,
}

/// Command runner answering from a script keyed by the full command line
/// (`program arg1 arg2 ...`).  Exact matches win over prefix matches.
/// Unscripted commands fail with empty output.
#[derive(Default)]
pub(crate) struct FakeRunner {
    exact: Mutex<HashMap<String, Scripted>>,
    prefixes: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<String>>,
    before_next_run: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, cmdline: &str, output: CommandOutput) {
        self.exact
            .lock()
            .unwrap()
            .insert(cmdline.to_string(), Scripted::Output(output));
    }

    pub(crate) fn respond_to_prefix(&self, prefix: &str, output: CommandOutput) {
        let mut prefixes = self.prefixes.lock().unwrap();
        prefixes.retain(|(p, _)| p != prefix);
        prefixes.push((prefix.to_string(), output));
    }

    /// Make `cmdline` fail to run at all (e.g. a timeout).
    pub(crate) fn unreachable(&self, cmdline: &str) {
        self.exact
            .lock()
            .unwrap()
            .insert(cmdline.to_string(), Scripted::Unreachable);
    }

    /// Run `f` inside the next command, as if another actor acted while
    /// the spooler was busy.
    pub(crate) fn before_next_run(&self, f: impl FnOnce() + Send + 'static) {
        *self.before_next_run.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let cmdline = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(cmdline.clone());
        let hook = self.before_next_run.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        if let Some(scripted) = self.exact.lock().unwrap().get(&cmdline) {
            return match scripted {
                Scripted::Output(out) => Ok(out.clone()),
                Scripted::Unreachable => Err(KioskError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{program} timed out"),
                ))),
            };
        }

        let prefixes = self.prefixes.lock().unwrap();
        let matched = prefixes
            .iter()
            .filter(|(p, _)| cmdline.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, out)| out.clone());
        Ok(matched.unwrap_or_else(|| failed("unscripted command")))
    }
}

/// Prober answering from a per-handle table; unlisted handles are `Unknown`.
#[derive(Default)]
pub(crate) struct FakeProbe {
    states: Mutex<HashMap<String, SpoolerState>>,
    panics_on: Mutex<Option<String>>,
    probes: AtomicUsize,
}

impl FakeProbe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, handle: &str, state: SpoolerState) {
        self.states
            .lock()
            .unwrap()
            .insert(handle.to_string(), state);
    }

    pub(crate) fn panic_on(&self, handle: &str) {
        *self.panics_on.lock().unwrap() = Some(handle.to_string());
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl StatusProbe for FakeProbe {
    async fn probe(&self, handle: Option<&str>) -> SpoolerState {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let Some(handle) = handle else {
            return SpoolerState::Unknown;
        };
        let should_panic = self.panics_on.lock().unwrap().as_deref() == Some(handle);
        if should_panic {
            panic!("probe exploded for {handle}");
        }
        self.states
            .lock()
            .unwrap()
            .get(handle)
            .copied()
            .unwrap_or(SpoolerState::Unknown)
    }
}

/// Sink that records every published event.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}
