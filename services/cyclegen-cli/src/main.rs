use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cyclegen_core::{CoreError, LoggingConfig};
use cyclegen_engine::{ActivityState, ActivitySummary, StopReason};

mod logging;
mod session;

use session::ActivityArgs;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_ERRORED: u8 = 2;
const EXIT_ERROR_ON_CYCLE: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "cyclegen")]
#[command(about = "Cycle-driven load generator", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level: trace, debug, info, warn or error (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an activity until its cycles are done or it is stopped
    Run {
        #[command(flatten)]
        activity: ActivityArgs,

        /// Show a spinner with completed cycles
        #[arg(long)]
        progress: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,

        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Validate parameters and workload without running
    Check(ActivityArgs),
    /// Print the resolved parameters and op plan
    Describe(ActivityArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.clone(),
    };
    if let Err(err) = logging::init(&logging) {
        eprintln!("error: {err:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    match execute(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(failure_code(&err))
        }
    }
}

async fn execute(command: Command) -> Result<u8> {
    match command {
        Command::Run {
            activity,
            progress,
            metrics,
            json,
        } => {
            let activity = session::load_activity(&activity)?;
            let summary = session::run_activity(activity, progress).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                report(&summary);
            }
            if metrics {
                print!("{}", cyclegen_core::metrics::gather_text());
            }
            Ok(exit_code(&summary))
        }
        Command::Check(activity) => {
            let activity = session::load_activity(&activity)?;
            println!(
                "ok: activity `{}` with {} op(s), plan length {}",
                activity.config().alias,
                activity.op_names().len(),
                activity.plan().len()
            );
            Ok(EXIT_OK)
        }
        Command::Describe(activity) => {
            let activity = session::load_activity(&activity)?;
            print!("{}", session::describe(&activity));
            Ok(EXIT_OK)
        }
    }
}

fn report(summary: &ActivitySummary) {
    let counts = &summary.counts;
    eprintln!("\nActivity `{}` {:?}", summary.alias, summary.state);
    if let Some(reason) = &summary.reason {
        eprintln!("  Reason: {reason}");
    }
    eprintln!("  Cycles completed: {}", counts.completed);
    eprintln!("  Succeeded: {}", counts.success);
    eprintln!("  Errors: {} ({} ignored)", counts.errors, counts.ignored);
    if counts.interrupted > 0 {
        eprintln!("  Interrupted: {}", counts.interrupted);
    }
    eprintln!("  Time elapsed: {:.2}s", summary.elapsed.as_secs_f64());
    eprintln!("  Throughput: {:.0} cycles/sec", summary.achieved_rate);
}

fn exit_code(summary: &ActivitySummary) -> u8 {
    match (&summary.reason, summary.state) {
        (Some(StopReason::ErrorOnCycle(_)), _) => EXIT_ERROR_ON_CYCLE,
        (_, ActivityState::Errored) => EXIT_ERRORED,
        _ => EXIT_OK,
    }
}

fn failure_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Config(_) | CoreError::Parse { .. } | CoreError::IoError(_)) | None => {
            EXIT_CONFIG
        }
        Some(_) => EXIT_ERRORED,
    }
}
