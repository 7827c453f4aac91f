//! `ticker-collector` binary.
//!
//! Loads configuration from the environment (or a JSON file), wires HTTP
//! sources to in-memory stores, and either runs the pipeline once or keeps
//! the cron triggers running until Ctrl-C.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

use ticker_collector::builders::{build_scheduler, http_collaborators};
use ticker_collector::config::CollectorConfig;
use ticker_collector::core::{AppResult, RunOutcome, TriggerKind};
use ticker_collector::util::{init_tracing, init_tracing_json};

#[derive(Debug, Parser)]
#[command(name = "ticker-collector", version, about = "Scheduled market data collector")]
struct Cli {
    /// JSON configuration file. Environment variables are used when absent.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run one pipeline immediately and exit.
    #[arg(long)]
    once: bool,

    /// With `--once`, run only the indicator refresh.
    #[arg(long, requires = "once")]
    indicators_only: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn load_config(path: Option<&PathBuf>) -> AppResult<CollectorConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CollectorConfig::from_json_str(&raw).map_err(|e| anyhow!(e))
        }
        None => CollectorConfig::from_env().map_err(|e| anyhow!(e)),
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let config = load_config(cli.config.as_ref()).context("loading configuration")?;
    let (collaborators, stores) = http_collaborators(&config)?;
    let scheduler = build_scheduler(&config, collaborators)?;

    if cli.once {
        let kind = if cli.indicators_only {
            TriggerKind::IndicatorRefresh
        } else {
            TriggerKind::FullPipeline
        };
        let outcome = scheduler.run_now(kind).await;
        scheduler.shutdown().await;

        match outcome? {
            RunOutcome::Completed(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            RunOutcome::Skipped => info!("run skipped"),
        }
        for (dataset, count) in stores.counts() {
            info!(dataset, count, "records held");
        }
        return Ok(());
    }

    scheduler.start();
    let status = scheduler.status();
    for next in &status.next_runs {
        info!(trigger = %next.name, at = %next.at, wait = %next.time_until, "next run");
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}
