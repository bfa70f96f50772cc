//! Rackline Daemon
//!
//! Opens the segmented log store and runs its background maintenance
//! loops: the periodic rotation sweep and the cache refresh / retention
//! eviction pass. Overlapping ticks of the same loop collapse instead
//! of queueing.

use anyhow::Result;
use clap::Parser;
use rackline_common::{
    IntervalConfig, LogConfig, NodeConfig, RacklineConfig, ReplicaConfig, Role, Schedule,
    TaskGate,
};
use rackline_logstore::LogStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "racklined")]
#[command(about = "Rackline segmented log store daemon")]
#[command(version)]
struct Args {
    /// Data directory for the metadata database and segment files
    #[arg(long, default_value = "/var/lib/rackline", env = "RACKLINE_DATA_DIR")]
    data_dir: PathBuf,

    /// Node name
    #[arg(long, default_value = "rackline-node")]
    name: String,

    /// Node role (primary or follower)
    #[arg(long, default_value = "primary")]
    role: String,

    /// Seal the live segment once it reaches this many records.
    /// Rotation is disabled when omitted.
    #[arg(long)]
    rotate_max_len: Option<u64>,

    /// Number of most-recent segments to retain per log key.
    /// Retention eviction is disabled when omitted.
    #[arg(long)]
    keep_count: Option<u64>,

    /// Schedule entry as unit=cadence_ms (repeatable), e.g. 5m=300000
    #[arg(long = "schedule", value_name = "UNIT=CADENCE_MS")]
    schedule: Vec<String>,

    /// Rendezvous identifier published in replica snapshots
    #[arg(long)]
    discovery_key: Option<String>,

    /// Rotation sweep interval in milliseconds
    #[arg(long, default_value_t = 120_000)]
    rotate_interval_ms: u64,

    /// Cache refresh interval in milliseconds
    #[arg(long, default_value_t = 60_000)]
    cache_interval_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_role(role: &str) -> Result<Role> {
    match role {
        "primary" => Ok(Role::Primary),
        "follower" => Ok(Role::Follower),
        other => anyhow::bail!("unknown role '{other}' (expected primary or follower)"),
    }
}

fn parse_schedule(entries: &[String]) -> Result<Schedule> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some((unit, cadence)) = entry.split_once('=') else {
            anyhow::bail!("bad schedule entry '{entry}' (expected UNIT=CADENCE_MS)");
        };
        let cadence: u64 = cadence
            .parse()
            .map_err(|_| anyhow::anyhow!("bad cadence in schedule entry '{entry}'"))?;
        parsed.push((unit.to_string(), cadence));
    }
    Ok(Schedule::new(parsed))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let role = parse_role(&args.role)?;
    let schedule = parse_schedule(&args.schedule)?;

    let config = RacklineConfig {
        node: NodeConfig {
            name: args.name.clone(),
            data_dir: args.data_dir.clone(),
        },
        log: LogConfig {
            rotate_max_len: args.rotate_max_len,
            keep_count: args.keep_count,
        },
        replica: ReplicaConfig {
            role,
            rpc_public_key: None,
            discovery_key: args.discovery_key.clone(),
        },
        intervals: IntervalConfig {
            rotate_ms: args.rotate_interval_ms,
            cache_refresh_ms: args.cache_interval_ms,
            ..Default::default()
        },
    };

    info!(
        name = %config.node.name,
        data_dir = %config.node.data_dir.display(),
        ?role,
        "starting rackline daemon"
    );

    let store = Arc::new(LogStore::open(&config, schedule)?);
    let gate = Arc::new(TaskGate::new());

    spawn_rotation_sweep(
        Arc::clone(&store),
        Arc::clone(&gate),
        config.intervals.rotate_ms,
    );
    spawn_cache_refresh(
        Arc::clone(&store),
        Arc::clone(&gate),
        config.intervals.cache_refresh_ms,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

fn spawn_rotation_sweep(store: Arc<LogStore>, gate: Arc<TaskGate>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let Some(_pass) = gate.try_enter("rotate") else {
                warn!("previous rotation sweep still running, skipping tick");
                continue;
            };
            match store.rotate_logs().await {
                Ok(events) if !events.is_empty() => {
                    info!(sealed = events.len(), "rotation sweep sealed segments");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "rotation sweep failed"),
            }
        }
    });
}

fn spawn_cache_refresh(store: Arc<LogStore>, gate: Arc<TaskGate>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let Some(_pass) = gate.try_enter("cache-refresh") else {
                warn!("previous cache refresh still running, skipping tick");
                continue;
            };
            if let Err(e) = store.refresh_cache().await {
                warn!(error = %e, "cache refresh failed");
            }
        }
    });
}
