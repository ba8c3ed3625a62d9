// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Blobchain Node
//!
//! Entry point for the `blobchain-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the chain and runs the host,
//! build trigger and gossip loops until Ctrl+C or SIGTERM.
//!
//! - `run`     - start the node
//! - `genesis` - write a genesis file
//! - `version` - print build version information

mod cli;
mod host;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use blobchain_protocol::chain::{CustomAllocation, Genesis};
use blobchain_protocol::config::{VmConfig, PROTOCOL_VERSION};
use blobchain_protocol::crypto::keccak256;
use blobchain_protocol::network::Gossiper;
use blobchain_protocol::storage::{Database, SledDatabase};
use blobchain_protocol::vm::{BuildTrigger, TimedTrigger, Vm};

use cli::{BlobchainCli, Commands};
use metrics::NodeMetrics;

/// Engine channel depth. One pending notification is all the host needs.
const ENGINE_CHANNEL_CAPACITY: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BlobchainCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Genesis(args) => write_genesis(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read {} at {}", what, path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid {} JSON at {}", what, path.display()))
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    let genesis: Genesis = read_json(&args.genesis, "genesis")?;
    let config: VmConfig = match &args.config {
        Some(path) => read_json(path, "config")?,
        None => VmConfig::default(),
    };
    let airdrop = match &args.airdrop {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read airdrop at {}", path.display()))?,
        None => Vec::new(),
    };

    tracing::info!(
        data_dir = %args.data_dir.display(),
        magic = genesis.magic,
        metrics_port = args.metrics_port,
        "starting blobchain-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db: Arc<dyn Database> = Arc::new(
        SledDatabase::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "database opened");

    // --- VM ---
    let (engine_tx, engine_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);
    let trigger = TimedTrigger::new(engine_tx, config.build_interval());
    let vm = Vm::new(
        genesis,
        config,
        db,
        &airdrop,
        Arc::clone(&trigger) as Arc<dyn BuildTrigger>,
    )
    .context("failed to initialize chain")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics
        .block_height
        .set(vm.last_accepted_block().height() as i64);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Background loops ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gossiper = Arc::new(Gossiper::new(Arc::clone(&vm), Arc::new(host::LoggingSender)));

    let tasks = vec![
        tokio::spawn(Arc::clone(&trigger).run(shutdown_rx.clone())),
        tokio::spawn(Arc::clone(&gossiper).run(shutdown_rx.clone())),
        tokio::spawn(host::run(
            Arc::clone(&vm),
            Arc::clone(&node_metrics),
            engine_rx,
            shutdown_rx,
        )),
    ];

    // --- Serve ---
    tokio::select! {
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }
    tracing::info!(last_accepted = %vm.last_accepted(), "blobchain-node stopped");
    Ok(())
}

/// Parses `0xADDRESS=BALANCE`.
fn parse_allocation(raw: &str) -> Result<CustomAllocation> {
    let Some((address, balance)) = raw.split_once('=') else {
        bail!("allocation {raw:?} is not ADDR=BALANCE");
    };
    Ok(CustomAllocation {
        address: address
            .trim()
            .parse()
            .with_context(|| format!("invalid allocation address {address:?}"))?,
        balance: balance
            .trim()
            .parse()
            .with_context(|| format!("invalid allocation balance {balance:?}"))?,
    })
}

fn write_genesis(args: cli::GenesisArgs) -> Result<()> {
    let mut genesis = Genesis::default_with_magic(args.magic);
    genesis.custom_allocation = args
        .allocations
        .iter()
        .map(|raw| parse_allocation(raw))
        .collect::<Result<_>>()?;

    if let Some(path) = &args.airdrop {
        let airdrop = std::fs::read(path)
            .with_context(|| format!("failed to read airdrop at {}", path.display()))?;
        genesis.airdrop_hash = format!("0x{}", hex::encode(keccak256(&airdrop)));
        genesis.airdrop_units = args.airdrop_units;
    }
    genesis.verify().context("generated genesis is invalid")?;

    let json = serde_json::to_string_pretty(&genesis)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write genesis to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn print_version() {
    println!("blobchain-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    Ok(())
}
