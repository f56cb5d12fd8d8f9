//! Edge Relay - caching reverse proxy for allow-listed upstream APIs

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use relay_api::{AppState, create_router};
use relay_core::{ProxyService, ResponseCache, RouteResolver, SystemClock, spawn_sweep_task};
use relay_proxy::{RetryingFetcher, TokioSleeper, UpstreamClient};

/// Edge Relay - caching reverse proxy for allow-listed upstream APIs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Edge Relay v{}", env!("CARGO_PKG_VERSION"));

    // Install the Prometheus recorder before any metric is touched
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            warn!("Metrics disabled, failed to install recorder: {}", e);
            None
        }
    };

    // Initialize routing
    let allow_list = Arc::new(config.build_allow_list()?);
    for key in allow_list.keys() {
        if let Some(entry) = allow_list.get(key) {
            info!("Route /{} -> {}", key, entry.base);
        }
    }
    let resolver = RouteResolver::new(allow_list);

    // Initialize upstream client
    let client = Arc::new(
        UpstreamClient::new(config.client_config()).context("Failed to build upstream client")?,
    );
    let fetcher = RetryingFetcher::new(client, Arc::new(TokioSleeper), config.retry_policy())?;

    // Initialize response cache
    let cache = Arc::new(ResponseCache::new(config.cache_config(), Arc::new(SystemClock)));
    if let Some(interval) = config.sweep_interval() {
        spawn_sweep_task(cache.clone(), interval);
    }

    let service = Arc::new(ProxyService::new(
        resolver,
        cache,
        fetcher,
        config.service_config(),
    ));

    // Create router
    let app = create_router(AppState::new(service), metrics_handle)
        .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
