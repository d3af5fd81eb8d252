// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

/// Default data directory when none is given on the command line or in
/// `KIOSKPRINT_DATA_DIR`.
pub fn data_dir() -> PathBuf {
    resolve(|key| std::env::var(key).ok())
}

fn resolve(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    let base = if let Some(xdg) = var("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg)
    } else if let Some(home) = var("HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(home).join(".local").join("share")
    } else {
        // Last resort
        std::env::temp_dir()
    };
    base.join("kioskprint")
}
