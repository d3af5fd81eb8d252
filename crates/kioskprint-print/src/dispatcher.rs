// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatch via CUPS `lp`.
//
// On success `lp` prints an acknowledgement such as
//
//     request id is Office-123 (1 file(s))
//
// and the token after "request id is" is the spooler handle we track.  No
// retry happens here; resending is an explicit admin action.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use kioskprint_core::SpoolerConfig;
use kioskprint_core::error::{KioskError, Result};
use kioskprint_core::types::{ColorMode, Copies, Orientation};

use crate::runner::CommandRunner;

const REQUEST_ID_MARKER: &str = "request id is ";

/// A job accepted by the spooler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Spooler handle, or `None` when the acknowledgement could not be parsed.
    pub handle: Option<String>,
    /// Raw acknowledgement text.
    pub acknowledgement: String,
}

/// Submits stored files to the spooler.
pub struct Dispatcher<R> {
    runner: Arc<R>,
    config: SpoolerConfig,
}

impl<R: CommandRunner> Dispatcher<R> {
    pub fn new(runner: Arc<R>, config: SpoolerConfig) -> Self {
        Self { runner, config }
    }

    /// Build the `lp` argument list.
    pub fn lp_args(
        &self,
        file_path: &Path,
        printer_name: &str,
        copies: Copies,
        orientation: Orientation,
        color: ColorMode,
    ) -> Vec<String> {
        let color_option = match color {
            ColorMode::Bw => &self.config.monochrome_option,
            ColorMode::Color => &self.config.color_option,
        };
        vec![
            "-d".into(),
            printer_name.into(),
            "-n".into(),
            copies.get().to_string(),
            "-o".into(),
            orientation.as_str().into(),
            "-o".into(),
            color_option.clone(),
            file_path.display().to_string(),
        ]
    }

    /// Send `file_path` to `printer_name`.
    ///
    /// Fails with [`KioskError::Dispatch`] when the file is missing, the copy
    /// count is out of range, `lp` cannot be run, or the spooler rejects the
    /// job.  Spooler rejections carry `lp`'s stderr verbatim.
    pub async fn dispatch(
        &self,
        file_path: &Path,
        printer_name: &str,
        copies: u32,
        orientation: Orientation,
        color: ColorMode,
    ) -> Result<Dispatched> {
        let copies = Copies::new(copies).map_err(|e| KioskError::Dispatch(e.to_string()))?;

        let exists = tokio::fs::try_exists(file_path).await.unwrap_or(false);
        if !exists {
            return Err(KioskError::Dispatch(format!(
                "file not found: {}",
                file_path.display()
            )));
        }

        let args = self.lp_args(file_path, printer_name, copies, orientation, color);
        let output = self
            .runner
            .run(&self.config.lp_command, &args)
            .await
            .map_err(|e| KioskError::Dispatch(e.to_string()))?;

        if !output.success {
            let stderr = output.stderr.trim();
            let detail = if stderr.is_empty() {
                format!("{} exited with failure", self.config.lp_command)
            } else {
                stderr.to_string()
            };
            warn!(printer = printer_name, error = %detail, "spooler rejected job");
            return Err(KioskError::Dispatch(detail));
        }

        let acknowledgement = output.stdout.trim().to_string();
        let handle = parse_request_id(&acknowledgement);
        match &handle {
            Some(h) => info!(printer = printer_name, handle = %h, copies = copies.get(), "job dispatched"),
            None => warn!(
                printer = printer_name,
                acknowledgement = %acknowledgement,
                "job dispatched but no handle in acknowledgement; it cannot be tracked"
            ),
        }

        Ok(Dispatched {
            handle,
            acknowledgement,
        })
    }
}

/// Extract the handle from `lp`'s acknowledgement.
pub fn parse_request_id(acknowledgement: &str) -> Option<String> {
    let (_, rest) = acknowledgement.split_once(REQUEST_ID_MARKER)?;
    rest.split_whitespace()
        .next()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, failed, ok};

    fn dispatcher(runner: &Arc<FakeRunner>) -> Dispatcher<FakeRunner> {
        Dispatcher::new(Arc::clone(runner), SpoolerConfig::default())
    }

    #[test]
    fn parses_request_id() {
        assert_eq!(
            parse_request_id("request id is Canon_G3000_W-123 (1 file(s))").as_deref(),
            Some("Canon_G3000_W-123")
        );
        assert_eq!(parse_request_id("request id is PRN-7").as_deref(), Some("PRN-7"));
        assert_eq!(parse_request_id("lp: job queued"), None);
        assert_eq!(parse_request_id("request id is "), None);
    }

    #[test]
    fn translates_options() {
        let runner = Arc::new(FakeRunner::new());
        let d = dispatcher(&runner);
        let args = d.lp_args(
            Path::new("/srv/up/a.pdf"),
            "Office",
            Copies::new(3).unwrap(),
            Orientation::Landscape,
            ColorMode::Bw,
        );
        assert_eq!(
            args,
            [
                "-d",
                "Office",
                "-n",
                "3",
                "-o",
                "landscape",
                "-o",
                "print-color-mode=monochrome",
                "/srv/up/a.pdf"
            ]
        );
    }

    #[tokio::test]
    async fn successful_dispatch_returns_handle() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.respond_to_prefix("lp -d Office", ok("request id is Office-42 (1 file(s))\n"));

        let dispatched = dispatcher(&runner)
            .dispatch(file.path(), "Office", 2, Orientation::Portrait, ColorMode::Color)
            .await
            .expect("dispatch");
        assert_eq!(dispatched.handle.as_deref(), Some("Office-42"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("-n 2"));
        assert!(calls[0].contains("print-color-mode=color"));
    }

    #[tokio::test]
    async fn unparsable_acknowledgement_still_succeeds() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.respond_to_prefix("lp ", ok("queued\n"));

        let dispatched = dispatcher(&runner)
            .dispatch(file.path(), "Office", 1, Orientation::Portrait, ColorMode::Bw)
            .await
            .expect("dispatch");
        assert_eq!(dispatched.handle, None);
    }

    #[tokio::test]
    async fn spooler_error_text_is_verbatim() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.respond_to_prefix(
            "lp ",
            failed("lp: The printer or class does not exist.\n"),
        );

        let err = dispatcher(&runner)
            .dispatch(file.path(), "Nope", 1, Orientation::Portrait, ColorMode::Bw)
            .await
            .expect_err("should fail");
        match err {
            KioskError::Dispatch(detail) => {
                assert_eq!(detail, "lp: The printer or class does not exist.")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_rejected_without_running_lp() {
        let runner = Arc::new(FakeRunner::new());
        let err = dispatcher(&runner)
            .dispatch(
                Path::new("/nonexistent/upload.pdf"),
                "Office",
                1,
                Orientation::Portrait,
                ColorMode::Bw,
            )
            .await
            .expect_err("should fail");
        assert!(matches!(err, KioskError::Dispatch(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn copies_out_of_range_are_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        for copies in [0, 100] {
            let err = dispatcher(&runner)
                .dispatch(file.path(), "Office", copies, Orientation::Portrait, ColorMode::Bw)
                .await
                .expect_err("should fail");
            assert!(matches!(err, KioskError::Dispatch(_)));
        }
        assert!(runner.calls().is_empty());
    }
}
