//! Duet server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! duet-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate (production)
//! duet-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::time::Duration;

use clap::Parser;
use duet_server::{CoordinatorConfig, HousekeeperConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Duet matchmaking and signaling relay server
#[derive(Parser, Debug)]
#[command(name = "duet-server")]
#[command(about = "Anonymous 1:1 matchmaking and WebRTC signaling relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long, requires = "key")]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, requires = "cert")]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Seconds between housekeeping sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Sessions older than this many seconds are ended
    #[arg(long, default_value = "7200")]
    max_session_age_secs: u64,

    /// Queue entries older than this many seconds are dropped
    #[arg(long, default_value = "600")]
    queue_staleness_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("duet server starting");

    if args.cert.is_none() {
        tracing::warn!("no TLS certificate provided, using a self-signed certificate");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        coordinator: CoordinatorConfig {
            max_connections: args.max_connections,
            housekeeper: HousekeeperConfig {
                sweep_interval: Duration::from_secs(args.sweep_interval_secs),
                max_session_age: Duration::from_secs(args.max_session_age_secs),
                queue_staleness: Duration::from_secs(args.queue_staleness_secs),
            },
        },
    };

    let server = Server::bind(config)?;

    tracing::info!("listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
