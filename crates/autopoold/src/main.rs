//! autopoold — the autopool daemon.
//!
//! Single binary that assembles every pool from `autopool.toml`:
//! - State store (redb)
//! - Static host inventory per pool
//! - Pool controller task per pool
//! - HTTP listener per pool
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! autopoold run --config autopool.toml --data-dir /var/lib/autopool
//! autopoold check --config autopool.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use autopool_api::ApiState;
use autopool_controller::{PoolRuntime, Supervisor};
use autopool_core::{AutopoolConfig, epoch_secs};
use autopool_pool::StaticInventory;
use autopool_state::StateStore;
use autopool_traffic::Listener;

#[derive(Parser)]
#[command(name = "autopoold", about = "autopool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every configured pool until Ctrl-C.
    Run {
        /// Path to autopool.toml.
        #[arg(long, default_value = "autopool.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/autopool")]
        data_dir: PathBuf,

        /// Override the API port from the config file.
        #[arg(long)]
        api_port: Option<u16>,
    },
    /// Validate a config file and print the derived scaling policies.
    Check {
        #[arg(long, default_value = "autopool.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autopool=debug,autopoold=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            api_port,
        } => run(&config, &data_dir, api_port).await,
        Command::Check { config } => check(&config),
    }
}

fn load(path: &Path) -> anyhow::Result<AutopoolConfig> {
    AutopoolConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    for pool in &config.pools {
        println!(
            "pool {}: min {} max {} desired {} ({} hosts), tick every {}s",
            pool.name,
            pool.min_size,
            pool.max_size,
            pool.initial_capacity(),
            pool.compute.addresses.len(),
            pool.tick_interval().as_secs()
        );
        for policy in pool.scaling_policies() {
            println!(
                "  {}: {:?} {} when {:?} {:?} {} for {} x {}s, cooldown {}s",
                policy.name,
                policy.direction,
                policy.adjustment,
                policy.statistic,
                policy.comparison,
                policy.threshold,
                policy.evaluation_periods,
                pool.period_seconds,
                policy.cooldown_secs
            );
        }
    }
    Ok(())
}

async fn run(config_path: &Path, data_dir: &Path, api_port: Option<u16>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    info!(pools = config.pools.len(), "autopool daemon starting");

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("autopool.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Build pools ────────────────────────────────────────────

    let now = epoch_secs();
    let mut runtimes = Vec::with_capacity(config.pools.len());
    for pool in &config.pools {
        // Hosts held by restored instances stay allocated.
        let restored = store.get_snapshot(&pool.name)?;
        let inventory = StaticInventory::with_allocated(
            pool.compute.addresses.clone(),
            restored.iter().flat_map(|s| s.instances.iter()),
        );
        let runtime =
            PoolRuntime::build(pool.clone(), Arc::new(inventory), store.clone(), now).await?;
        info!(pool = %pool.name, min = pool.min_size, max = pool.max_size, "pool initialized");
        runtimes.push((pool.listener_port, runtime));
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let mut supervisor = Supervisor::new();
    let mut listeners = JoinSet::new();
    let mut handles = Vec::with_capacity(runtimes.len());
    for (port, runtime) in runtimes {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = Listener::bind(addr, runtime.handle.targets.clone()).await?;
        listeners.spawn(listener.serve(shutdown_rx.clone()));

        handles.push(runtime.handle);
        supervisor.spawn(runtime.controller, shutdown_rx.clone());
    }

    // ── Start API server ───────────────────────────────────────

    let router = autopool_api::build_router(ApiState::new(handles));
    let addr = SocketAddr::from(([0, 0, 0, 0], api_port.unwrap_or(config.api.port)));
    info!(%addr, "API server starting");
    let api_listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API on {addr}"))?;

    let server = axum::serve(api_listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // In-progress ticks finish, including their drains.
    supervisor.join_all().await;
    while let Some(joined) = listeners.join_next().await {
        match joined {
            Ok(Err(e)) => error!(error = %e, "listener failed"),
            Err(e) => error!(error = %e, "listener task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!("autopool daemon stopped");
    Ok(())
}
