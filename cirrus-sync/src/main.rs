//! cirrus-sync: provider sync daemon.
//!
//! Serves a JSON inventory snapshot as the provider and mirrors it into
//! the local inventory, once or on a fixed interval.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cirrus_log::{LogManager, create_audit_logger};
use cirrus_sync::{
    BranchPolicy, DataStore, InventoryProvider, JobStatus, MemoryStore, SqliteStore,
    SyncAuditLogger, SyncConfig, SyncEngine, SyncRange,
};

/// cirrus provider sync agent
#[derive(Parser, Debug)]
#[command(name = "cirrus-sync", version, about)]
struct Args {
    /// Provider account id
    #[arg(long)]
    provider_id: String,

    /// Provider display name (defaults to the id)
    #[arg(long)]
    provider_name: Option<String>,

    /// JSON inventory snapshot to sync from
    #[arg(long)]
    inventory: PathBuf,

    /// Directory for the SQLite inventory
    #[arg(long, default_value = "/var/lib/cirrus/sync")]
    data_dir: PathBuf,

    /// Keep the inventory in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Directory for the persistent audit log
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Seconds between passes; 0 runs a single pass
    #[arg(long, default_value = "0")]
    interval: u64,

    /// Mark passes as full syncs
    #[arg(long)]
    full_sync: bool,

    /// Restrict passes to a region (local or global id, repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Restrict passes to a zone (local or global id, repeatable)
    #[arg(long = "zone")]
    zones: Vec<String>,

    /// Restrict passes to a host (local or global id, repeatable)
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Stop a pass at the first failed branch
    #[arg(long)]
    fail_fast: bool,
}

impl Args {
    fn into_config(self) -> SyncConfig {
        let range = SyncRange {
            full_sync: self.full_sync,
            regions: self.regions,
            zones: self.zones,
            hosts: self.hosts,
        };
        SyncConfig {
            provider_name: self.provider_name.unwrap_or_else(|| self.provider_id.clone()),
            provider_id: self.provider_id,
            inventory: self.inventory,
            data_dir: (!self.ephemeral).then_some(self.data_dir),
            log_dir: self.log_dir,
            interval_secs: self.interval,
            range,
            policy: if self.fail_fast {
                BranchPolicy::AbortPass
            } else {
                BranchPolicy::SkipSubtree
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cirrus_sync=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config();
    config.validate()?;

    info!("Starting cirrus-sync for provider {}", config.provider_name);

    let store: Arc<dyn DataStore> = match &config.data_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            info!("Inventory database in {}", dir.display());
            Arc::new(SqliteStore::new(dir).await?)
        }
        None => {
            warn!("Running with an in-memory inventory");
            Arc::new(MemoryStore::new())
        }
    };

    let log_storage = match &config.log_dir {
        Some(dir) => Some(Arc::new(LogManager::new(dir)?)),
        None => None,
    };
    let audit = Arc::new(SyncAuditLogger::new(create_audit_logger("sync", log_storage)));

    store
        .upsert_provider(&config.provider_id, &config.provider_name)
        .await?;
    let provider = InventoryProvider::open(&config.inventory).await?;
    let engine = SyncEngine::new(Arc::clone(&store), audit.clone()).with_policy(config.policy);

    match config.interval() {
        None => {
            run_pass(&engine, &provider, &config).await;
        }
        Some(period) => {
            info!("Syncing every {}s", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_pass(&engine, &provider, &config).await,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }

    audit.shutdown().await;
    Ok(())
}

async fn run_pass(engine: &SyncEngine, provider: &InventoryProvider, config: &SyncConfig) {
    if let Err(e) = provider.reload().await {
        error!("Inventory reload failed, syncing the previous snapshot: {e:#}");
    }

    let report = engine
        .run(provider, &config.provider_id, config.range.clone())
        .await;
    match &report.status {
        JobStatus::Completed => info!(job = %report.job_id, "{}", report.summary()),
        JobStatus::CompletedWithErrors => {
            warn!(job = %report.job_id, "{}", report.summary());
            for err in report.failed_branches() {
                warn!(job = %report.job_id, "{err}");
            }
        }
        JobStatus::Failed { reason } => error!(job = %report.job_id, "Sync failed: {reason}"),
    }
}
