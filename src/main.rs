// Adaptive Replication Controller - single-DC demo binary.
//
// Boots one Replica Manager instance for the configured DC. The
// inter-DC transport is the in-memory stand-in (`InMemoryTransport`):
// a real deployment swaps it for a networked `InterDcTransport` without
// touching anything above that seam.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use adaptive_replicad::backend::MemStorageBackend;
use adaptive_replicad::config::ControllerConfig;
use adaptive_replicad::domain::{DcId, ReplicaKey, StrategyKind, Value};
use adaptive_replicad::interdc::transport::InMemoryTransport;
use adaptive_replicad::interdc::InterDcManager;
use adaptive_replicad::manager::ReplicaManagerBuilder;
use adaptive_replicad::registry::MemReplicaRegistry;
use adaptive_replicad::store::BackedValueStore;
use adaptive_replicad::strategy::StrategyEngine;
use adaptive_replicad::{Result, VERSION};

#[derive(Parser, Debug)]
#[command(name = "adaptive-replicad", version = VERSION, about = "Adaptive replication controller")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, default_value = "replicad.toml")]
    config: PathBuf,

    /// Overrides `dc_id` from the configuration file.
    #[arg(long)]
    dc_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    print_banner();

    let cli = Cli::parse();
    let mut config = match ControllerConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            info!(path = %cli.config.display(), error = %e, "no config file loaded, using defaults");
            ControllerConfig::default()
        }
    };
    if let Some(dc_id) = cli.dc_id {
        config.dc_id = dc_id;
    }

    info!(dc_id = %config.dc_id, peers = ?config.peers, "starting replication controller");

    let transport = Arc::new(InMemoryTransport::new());
    let idm = Arc::new(InterDcManager::new(transport.clone(), config.rpc_timeouts()));

    let rm = Arc::new(
        ReplicaManagerBuilder::new()
            .with_self_dc(DcId::new(config.dc_id.clone()))
            .with_peers(config.peer_dcs())
            .with_value_store(Arc::new(BackedValueStore::new(MemStorageBackend::new())))
            .with_registry(Arc::new(MemReplicaRegistry::new()))
            .with_strategy_engine(Arc::new(StrategyEngine::new()))
            .with_interdc_manager(idm)
            .build()
            .map_err(|e| {
                error!(error = %e, "failed to build replica manager");
                e
            })?,
    );
    transport.register(DcId::new(config.dc_id.clone()), rm.clone());

    let tick_driver = rm.clone();
    tokio::spawn(async move {
        tick_driver.run_tick_loop(Duration::from_secs(1)).await;
    });

    seed_demo_key(&rm, &config).await;

    println!();
    println!("+------------------------------------------------------------+");
    println!("|  Replication controller ready for dc={:<30}|", config.dc_id);
    println!("+------------------------------------------------------------+");
    println!();

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    info!("shutdown complete");
    Ok(())
}

fn print_banner() {
    println!("==================================================");
    println!("  Adaptive Replication Controller v{}", VERSION);
    println!("==================================================");
    println!();
}

/// Creates a single sample key so the demo has something to read back
/// immediately after startup; purely illustrative, not part of the
/// controller's public contract.
async fn seed_demo_key(rm: &adaptive_replicad::manager::ReplicaManager, config: &ControllerConfig) {
    let key = ReplicaKey::from_str("demo/welcome");
    let value = Value::from_static(b"hello from adaptive-replicad");
    match rm
        .create(key.clone(), value, StrategyKind::AdaptiveDecay, config.strategy_params())
        .await
    {
        Ok(()) => info!(key = %key, "seeded demo key"),
        Err(e) => info!(key = %key, error = %e, "demo key already present"),
    }
}
