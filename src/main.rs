//! HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ rate limit ──▶ load_balancer ──▶ Backend
//!                      (request id,    (per-client     (alive subset,
//!                       tracing)        token bucket)   round robin)
//!
//!     health monitor ── probes every backend each interval ──▶ alive/dead flags
//!     proxy failures ── transport error on a request ─────────▶ dead immediately
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use balancer_proxy::config::load_config;
use balancer_proxy::http::HttpServer;
use balancer_proxy::lifecycle::{signals, Shutdown};
use balancer_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "balancer-proxy")]
#[command(about = "HTTP load balancer with health checks and rate limiting", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        backends = config.backends.len(),
        algorithm = %config.balancer.algorithm,
        rate_limit = config.rate_limit.enabled,
        "balancer-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.clone())?;
    tokio::spawn(signals::shutdown_on_signal(shutdown));

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
