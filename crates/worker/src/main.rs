use anyhow::{Context, Result};
use clap::Parser;
use quill_core::config::WorkerSettings;
use std::time::Duration;
use tracing::{error, info, warn};

mod scheduler;

use crate::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "quill-worker", about = "Drives scheduled webhook dispatch")]
struct Args {
    /// Base URL of the quill api.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    api_url: String,

    /// Seconds between dispatch ticks.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    let settings = WorkerSettings::from_env().context("failed to load worker settings")?;

    let scheduler = Scheduler::new(
        &args.api_url,
        settings.cron_secret,
        Duration::from_secs(args.timeout),
    )?;

    if args.once {
        let summary = scheduler.tick().await.inspect_err(|err| {
            error!(endpoint = scheduler.endpoint(), error = ?err, "dispatch tick failed")
        })?;
        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            retrying = summary.retrying,
            failed = summary.failed,
            "dispatch tick complete"
        );
        return Ok(());
    }

    info!(endpoint = scheduler.endpoint(), interval_secs = args.interval, "worker starting");
    scheduler
        .run(Duration::from_secs(args.interval.max(1)), async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    info!("worker stopped");

    Ok(())
}
