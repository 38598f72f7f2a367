//! Commonpot Daemon
//!
//! Serves the shared-expense ledger over HTTP and notifies registered
//! callbacks about every committed change.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! commonpot
//!
//! # Start with custom config
//! commonpot --config /path/to/config.toml
//!
//! # Start with custom HTTP port and storage directory
//! commonpot --http-port 8096 --storage-dir /data/commonpot
//!
//! # Require three approvals for refunds
//! commonpot --min-approves 3
//! ```

use clap::Parser;
use commonpot::{Config, Gate, HttpServer, LedgerDb, Notifier, Services, Thresholds};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "commonpot")]
#[command(about = "Shared-expense ledger with refund voting")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "COMMONPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "COMMONPOT_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "COMMONPOT_HTTP_PORT")]
    http_port: Option<u16>,

    /// Vote sum needed to accept a refund
    #[arg(long)]
    min_approves: Option<i64>,

    /// Negated vote sum needed to reject a refund
    #[arg(long)]
    min_disapproves: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("commonpot=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(n) = args.min_approves {
        config.community.min_approves = n;
    }
    if let Some(n) = args.min_disapproves {
        config.community.min_disapproves = n;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        min_approves = config.community.min_approves,
        min_disapproves = config.community.min_disapproves,
        "Starting commonpot"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(LedgerDb::open(&config.storage_dir)?);
    let thresholds: Thresholds = config.community;

    // Start callback notifier
    let (notifier, worker) = Notifier::new(config.notifier);
    let notifier_handle = worker.spawn();

    let services = Arc::new(Services::new(
        db.clone(),
        Arc::new(Gate::new()),
        Arc::new(notifier),
        thresholds,
    ));

    let community = services.users.ensure_community(&config.community_user_name)?;
    info!(user_id = community.id, "Community user ready");

    let total = services.users.total_balance()?;
    if total != 0 {
        warn!(total, "Sum of balances is not zero");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let http_server = Arc::new(HttpServer::new(services.clone(), addr));

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    // Run HTTP server with graceful shutdown
    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    // Pending notifications are abandoned on shutdown
    notifier_handle.abort();

    let stats = services.notifier_stats();
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "Final notifier stats"
    );
    if let Ok(db_stats) = db.stats() {
        info!(
            users = db_stats.users,
            transactions = db_stats.transactions,
            "Final ledger stats"
        );
    }

    Ok(())
}
