//! Standalone sequencer node.
//!
//! Runs the full pipeline with in-memory storage and a logging publisher.
//! Pointing the publisher at a real settlement endpoint is a deployment
//! concern; the pipeline itself does not change.

use clap::Parser;
use sesame_backend::ReferenceBackendFactory;
use sesame_merkle::{InMemoryWorldStateStorage, WorldStateStore};
use sesame_sequencer::{chain_event_channel, InMemoryLedger, LogPublisher, RollupScheduler};
use sesame_types::SequencerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "sesame-node")]
#[command(about = "Privacy rollup sequencer node", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path; built-in defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .init();

    let config = match &cli.config {
        Some(path) => SequencerConfig::load(path)?,
        None => SequencerConfig::default(),
    };
    config.validate()?;

    let storage = Arc::new(InMemoryWorldStateStorage::new());
    let store = Arc::new(WorldStateStore::open(config.world_state.clone(), storage)?);
    let ledger = Arc::new(InMemoryLedger::new());
    let publisher = Arc::new(LogPublisher::new());
    let factory = ReferenceBackendFactory::new();

    let scheduler = RollupScheduler::new(
        config.clone(),
        store.clone(),
        &factory,
        ledger,
        publisher,
    )?;
    let handle = scheduler.handle();

    info!(
        num_inner_txs = config.num_inner_txs,
        num_outer_proofs = config.num_outer_proofs,
        publish_interval_ms = config.publish_interval_ms,
        workers = config.worker_count,
        world_root = %store.world_root(),
        "sequencer node starting"
    );
    drop(handle); // Submission comes from an RPC layer in a full deployment.

    let (_event_sender, events) = chain_event_channel(config.event_channel_capacity);
    let (shutdown_sender, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_sender.send(true);
        }
    });

    scheduler.run(events, shutdown).await?;
    Ok(())
}
