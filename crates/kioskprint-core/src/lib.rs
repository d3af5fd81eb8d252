// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kioskprint: core types, job lifecycle, and error definitions shared across
// all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod lifecycle;
pub mod types;

pub use config::{AppConfig, SpoolerConfig};
pub use error::KioskError;
pub use lifecycle::Transition;
pub use types::*;
