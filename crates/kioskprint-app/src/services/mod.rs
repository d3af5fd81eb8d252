// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: wires the kioskprint backend crates together for the
// daemon and the admin command line.

pub mod app_services;
pub mod data_dir;
