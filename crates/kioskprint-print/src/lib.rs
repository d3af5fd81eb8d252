// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kioskprint print: CUPS dispatch and status probing, the persistent job
// store, and the background loop that reconciles the two.  This crate drives
// the lifecycle defined in `kioskprint-core` against a real spooler.

pub mod dispatcher;
pub mod monitor;
pub mod notify;
pub mod pages;
pub mod prober;
pub mod reconcile;
pub mod runner;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatched, Dispatcher};
pub use monitor::{MonitorConfig, MonitorStatus, SpoolerMonitor};
pub use notify::{BroadcastSink, NotificationSink};
pub use prober::{LpstatProber, StatusProbe};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use service::JobService;
pub use store::{JobStore, SharedStore};
