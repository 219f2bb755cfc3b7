//! labcelld — the labcell worker daemon.
//!
//! Single binary that assembles the subsystems one worker process runs:
//! - Asset store (redb)
//! - Asset type catalog (TOML, or the built-in sim catalog)
//! - Live object registry with the sim driver set
//! - Distributed lock manager (in-memory or Redis lock store)
//! - State sync loop + periodic lock sweep
//!
//! # Usage
//!
//! ```text
//! labcelld worker --data-dir /var/lib/labcell --workcell-id cell-1
//! labcelld worker --redis 127.0.0.1:6379 --catalog /etc/labcell/types.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use labcell_lock::{AssetLockManager, LockStore, MemoryLockStore, RedisLockStore};
use labcell_registry::{DriverFactory, LiveRegistry, sim};
use labcell_state::{AssetStore, AssetTypeCatalog};
use labcell_sync::{StateSyncer, SyncConfig};

#[derive(Parser)]
#[command(name = "labcelld", about = "labcell worker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one worker process for a workcell.
    Worker {
        /// Data directory for the asset store and snapshots.
        #[arg(long, default_value = "/var/lib/labcell")]
        data_dir: PathBuf,

        /// Workcell identifier; generated when omitted.
        #[arg(long)]
        workcell_id: Option<String>,

        /// Asset type catalog TOML; the sim catalog is used when omitted.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Redis lock store address (host:port). In-memory when omitted.
        #[arg(long)]
        redis: Option<String>,

        /// Durable checkpoint interval in seconds.
        #[arg(long, default_value = "5")]
        sync_interval: u64,

        /// Disk snapshot interval in seconds.
        #[arg(long, default_value = "60")]
        disk_interval: u64,

        /// Lock sweep interval in seconds.
        #[arg(long, default_value = "60")]
        sweep_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,labcelld=debug,labcell=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Worker {
            data_dir,
            workcell_id,
            catalog,
            redis,
            sync_interval,
            disk_interval,
            sweep_interval,
        } => {
            let workcell_id = workcell_id
                .unwrap_or_else(|| format!("cell-{}", uuid::Uuid::new_v4().simple()));
            run_worker(
                data_dir,
                workcell_id,
                catalog,
                redis,
                Duration::from_secs(sync_interval),
                Duration::from_secs(disk_interval),
                Duration::from_secs(sweep_interval),
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    data_dir: PathBuf,
    workcell_id: String,
    catalog_path: Option<PathBuf>,
    redis: Option<String>,
    sync_interval: Duration,
    disk_interval: Duration,
    sweep_interval: Duration,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let store = AssetStore::open(&data_dir.join("labcell.redb"))?;

    let catalog = match &catalog_path {
        Some(path) => AssetTypeCatalog::from_file(path)?,
        None => sim::sim_catalog(),
    };

    let mut factory = DriverFactory::new();
    sim::register_sim_drivers(&mut factory);
    let registry = Arc::new(LiveRegistry::new(store.clone(), catalog, factory));

    let lock_store: Arc<dyn LockStore> = match &redis {
        Some(addr) => {
            info!(%addr, "using Redis lock store");
            Arc::new(RedisLockStore::new(addr.clone()))
        }
        None => {
            info!("using in-memory lock store");
            Arc::new(MemoryLockStore::new())
        }
    };
    let lock_manager = Arc::new(AssetLockManager::new(lock_store));

    // Periodic defense-in-depth sweep of expired/orphaned locks.
    let sweeper = {
        let lock_manager = lock_manager.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep_interval).await;
                match lock_manager.sweep_expired() {
                    Ok(report) if report.removed() > 0 => {
                        info!(removed = report.removed(), failed = report.failed, "lock sweep")
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "lock sweep failed"),
                }
            }
        })
    };

    let mut sync_config = SyncConfig::new(&workcell_id, data_dir.join("snapshots"));
    sync_config.db_interval = sync_interval;
    sync_config.disk_interval = disk_interval;
    let sync_handle = StateSyncer::new(store, registry.clone(), sync_config)
        .start()
        .await?;

    info!(%workcell_id, data_dir = %data_dir.display(), "labcelld worker running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    sweeper.abort();
    sync_handle.stop().await;
    registry.shutdown_all().await;

    Ok(())
}
