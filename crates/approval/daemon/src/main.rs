//! Approval daemon: background SLA scanning and REST API
//!
//! The daemon provides:
//! - REST API for templates, requests, delegations and the audit trail
//! - Periodic scan that expires delegations, sends reminders, escalates
//!   overdue actions and applies timeout policies

use approval_daemon::error::{DaemonError, DaemonResult};
use approval_daemon::{DaemonConfig, Server};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Approval daemon CLI
#[derive(Parser)]
#[command(name = "doad")]
#[command(about = "Approval, delegation-of-authority and escalation daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DOA_CONFIG")]
    config: Option<String>,

    /// Listen address; overrides the configuration file
    #[arg(short, long, env = "DOA_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "DOA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DOA_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.server.listen_addr,
        scan_interval_secs = config.scheduler.scan_interval_secs,
        "Starting approval daemon"
    );

    let server = Server::new(config).await?;
    server.run().await
}
