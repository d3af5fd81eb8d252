// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// kioskprint: paid print kiosk engine
//
// Entry point.  Initialises logging and backend services, then either runs the
// spooler monitor until interrupted or performs a single admin action.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use kioskprint_core::error::Result;
use kioskprint_core::human_errors::humanize_error;
use kioskprint_core::types::{ColorMode, Job, JobId, JobStatus, Orientation};

use services::app_services::AppServices;
use services::data_dir;

#[derive(Debug, Parser)]
#[command(name = "kioskprint", version, about = "Paid print kiosk: CUPS dispatch and job status tracking")]
struct Cli {
    /// Directory holding config.json, jobs.db and uploads.
    #[arg(long, env = "KIOSKPRINT_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the spooler monitor until Ctrl-C (the default).
    Serve,
    /// Register a document for printing.
    Upload { file: PathBuf },
    /// Change copies, orientation or colour before the job is paid.
    Settings {
        id: JobId,
        #[arg(long, default_value_t = 1)]
        copies: i64,
        #[arg(long, default_value = "portrait")]
        orientation: Orientation,
        #[arg(long, default_value = "bw")]
        color: ColorMode,
    },
    /// Record proof of payment.
    Pay {
        id: JobId,
        #[arg(long)]
        reference: Option<String>,
    },
    /// Approve a paid job and send it to the printer.
    Approve {
        id: JobId,
        #[arg(long, default_value = "admin")]
        actor: String,
    },
    /// Decline a paid job.
    Reject {
        id: JobId,
        #[arg(long, default_value = "admin")]
        actor: String,
    },
    /// Send a printing or failed job to the printer again.
    Resend {
        id: JobId,
        #[arg(long, default_value = "admin")]
        actor: String,
    },
    /// Mark a job's payment as returned.
    Refund {
        id: JobId,
        #[arg(long, default_value = "admin")]
        actor: String,
    },
    /// Ask the spooler about a job right now.
    Status { id: JobId },
    /// List jobs, optionally only those in one status.
    List {
        #[arg(long)]
        status: Option<JobStatus>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let dir = cli.data_dir.unwrap_or_else(data_dir::data_dir);

    let services = match AppServices::init(dir) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not initialise services");
            return ExitCode::FAILURE;
        }
    };

    match run(&services, cli.command.unwrap_or(Command::Serve)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let human = humanize_error(&e);
            error!(error = %e, "command failed");
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(services: &AppServices, command: Command) -> Result<()> {
    let jobs = services.jobs();
    match command {
        Command::Serve => serve(services).await,
        Command::Upload { file } => print_job(&services.upload(&file).await?),
        Command::Settings {
            id,
            copies,
            orientation,
            color,
        } => print_job(&jobs.update_settings(&id, copies, orientation, color)?),
        Command::Pay { id, reference } => print_job(&jobs.submit_payment(&id, reference)?),
        Command::Approve { id, actor } => print_job(&jobs.approve(&id, &actor).await?),
        Command::Reject { id, actor } => print_job(&jobs.reject(&id, &actor)?),
        Command::Resend { id, actor } => print_job(&jobs.resend(&id, &actor).await?),
        Command::Refund { id, actor } => print_job(&jobs.refund(&id, &actor)?),
        Command::Status { id } => print_job(&jobs.check_status(&id).await?),
        Command::List { status } => {
            let listed = jobs.list(status)?;
            println!("{}", serde_json::to_string_pretty(&listed)?);
            Ok(())
        }
    }
}

fn print_job(job: &Job) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(job)?);
    Ok(())
}

/// Run the monitor, logging every job event as JSON, until Ctrl-C.
async fn serve(services: &AppServices) -> Result<()> {
    let mut events = services.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "kioskprint::events", event = %json, "job event"),
                    Err(e) => warn!(error = %e, "could not serialise job event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let in_flight = services.jobs().list(Some(JobStatus::Printing))?.len();
    info!(
        printer = %services.config().printer_name,
        in_flight,
        "kioskprint starting"
    );

    let mut monitor = services.monitor();
    monitor.start();

    let signal = tokio::signal::ctrl_c().await;
    monitor.stop().await;
    event_log.abort();
    signal?;

    info!("kioskprint stopped");
    Ok(())
}
