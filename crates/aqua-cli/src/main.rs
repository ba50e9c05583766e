use std::sync::Arc;

use anyhow::{Context, Result};
use aqua_ingest::{FlowIngest, QualityIngest};
use aqua_store::{MeasurementStore, PgStore};
use aqua_sync::{
    load_preload, partition_groups, verify, LiveSimulator, PipelineConfig, ReplayScheduler,
};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "aqua-cli")]
#[command(about = "Water telemetry split-and-replay ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the measurement tables and identity indexes.
    Migrate,
    /// One-shot historical load of the preload partitions.
    Preload {
        /// Delete all stored rows before loading.
        #[arg(long)]
        clear: bool,
    },
    /// Release the remainder partitions over time until drained.
    Replay,
    /// Push synthetic readings until stopped.
    Simulate,
    /// Dry-run check of the historical load; exits non-zero on mismatch.
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    let store = PgStore::connect(&config.database_url).await?;

    match cli.command {
        Commands::Migrate => {
            store.init_schema().await?;
            info!("measurement schema ready");
        }
        Commands::Preload { clear } => {
            let (quality, flow) = load_datasets(&config)?;
            if clear {
                store.reset().await?;
            }
            let (quality_pre, _) = partition_groups(quality.groups, config.preload_ratio);
            let (flow_pre, _) = partition_groups(flow.groups, config.preload_ratio);
            let summary = load_preload(&store, &quality_pre, &flow_pre).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Replay => {
            let (quality, flow) = load_datasets(&config)?;
            let (_, quality_rem) = partition_groups(quality.groups, config.preload_ratio);
            let (_, flow_rem) = partition_groups(flow.groups, config.preload_ratio);
            let scheduler = ReplayScheduler::new(Arc::new(store), quality_rem, flow_rem);
            let summary = scheduler.run(config.replay_interval, ctrl_c_stop()).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Simulate => {
            let simulator = LiveSimulator::new(Arc::new(store));
            simulator.run(config.sim_interval, ctrl_c_stop()).await;
        }
        Commands::Verify => {
            let (quality, flow) = load_datasets(&config)?;
            let report = verify(&store, &quality, &flow, config.preload_ratio).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.pass {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_datasets(config: &PipelineConfig) -> Result<(QualityIngest, FlowIngest)> {
    let labels = config.label_map()?;
    let quality = aqua_ingest::read_quality_file(&config.quality_csv, &labels)
        .context("loading water quality export")?;
    let flow = aqua_ingest::read_flow_file(&config.flow_csv).context("loading flow export")?;
    info!(
        quality_rows = quality.summary.rows_kept,
        quality_skipped = quality.summary.skipped_rows,
        flow_rows = flow.summary.rows_kept,
        flow_skipped = flow.summary.skipped_rows,
        "normalized source exports"
    );
    Ok((quality, flow))
}

fn ctrl_c_stop() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}
