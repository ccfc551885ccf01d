mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use storeflow::config::Overrides;
use storeflow::scheduler::ScheduleConfigBuilder;
use storeflow::{DefinitionLoader, Scheduler};

#[derive(Parser)]
#[command(
    name = "storeflow",
    version,
    about = "Run declarative data pipelines across data stores"
)]
struct Cli {
    /// Definition files or directories holding them
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Log store connection events and force the debug level
    #[arg(short, long)]
    debug: bool,

    /// Log per-record progress for every operation
    #[arg(short, long)]
    verbose: bool,

    /// Re-run every pipeline with this period, in seconds
    #[arg(short, long)]
    period: Option<u64>,

    /// Pipelines allowed to run at the same time
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Shortest wait between two passes, in seconds
    #[arg(long, default_value_t = 1)]
    min_delay: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.debug);

    let scheduler = match build_scheduler(&cli) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!(error = %err, "failed to load definitions");
            return ExitCode::from(1);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current pass");
            on_signal.cancel();
        }
    });

    match scheduler.run_until(&cancel).await {
        Ok(summary) if cli.period.is_none() => match summary.last {
            Some(pass) if !pass.is_success() => ExitCode::from(2),
            _ => ExitCode::SUCCESS,
        },
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "scheduler stopped");
            ExitCode::from(2)
        }
    }
}

fn build_scheduler(cli: &Cli) -> anyhow::Result<Scheduler> {
    let jobs = DefinitionLoader::default()
        .with_overrides(Overrides {
            debug: cli.debug,
            verbose: cli.verbose,
        })
        .load_paths(&cli.paths)?;

    let config = ScheduleConfigBuilder::default()
        .worker_num(cli.workers)
        .period(cli.period.map(Duration::from_secs))
        .min_delay(Duration::from_secs(cli.min_delay))
        .build()
        .context("invalid schedule settings")?;

    let mut scheduler = Scheduler::new(config);
    for job in jobs {
        info!(job = job.name(), pipelines = job.executors().len(), "loaded");
        scheduler.add_job(job);
    }
    Ok(scheduler)
}
