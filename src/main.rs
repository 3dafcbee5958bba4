//! MQTT ACL Provisioner CLI
//!
//! Serves newline-delimited JSON provisioning requests on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_mqtt_provisioner::acl::MemoryAclStore;
use sentinel_mqtt_provisioner::identity::MemoryIdentityCache;
use sentinel_mqtt_provisioner::{verify, Provisioner, ProvisionerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// MQTT ACL provisioner
#[derive(Parser, Debug)]
#[command(name = "sentinel-mqtt-provisioner")]
#[command(author = "Sentinel Contributors")]
#[command(version)]
#[command(about = "Provisions MQTT broker ACLs for authenticated clients", long_about = None)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON log format
    #[arg(long)]
    json_logs: bool,

    /// Interval between sweeps of expired cache entries (seconds)
    #[arg(long, default_value = "60")]
    purge_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr, stdout carries responses
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MQTT ACL provisioner");

    let config = if let Some(config_path) = &args.config {
        info!(path = %config_path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str(&content).context("Failed to parse config file")?
    } else {
        ProvisionerConfig::default()
    };

    let verifier = verify::from_config(&config.verifier)?;
    let ttl = config.cache.entry_ttl_secs.map(Duration::from_secs);
    let cache = Arc::new(MemoryIdentityCache::new(ttl));
    let store = Arc::new(MemoryAclStore::new());

    if ttl.is_some() && args.purge_interval_secs > 0 {
        spawn_cache_purge(cache.clone(), Duration::from_secs(args.purge_interval_secs));
    }

    let provisioner = Provisioner::new(config, cache, store, verifier)?;

    info!("Provisioner ready, reading requests from stdin");

    provisioner
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    info!("Input closed, shutting down");
    Ok(())
}

/// Periodically drop expired entries so idle credentials do not pile up
fn spawn_cache_purge(cache: Arc<MemoryIdentityCache>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "Expired cache entries purged");
            }
        }
    });
}
