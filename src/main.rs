use rendergate::cache::MemoryCache;
use rendergate::config::Config;
use rendergate::pool::PoolConfig;
use rendergate::prerender::Prerender;
use rendergate::proxy::GatewayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rendergate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rendergate.toml"));

    let config = if config_path.exists() {
        let config = Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?;
        info!(path = %config_path.display(), "Configuration loaded");
        config
    } else {
        warn!(path = %config_path.display(), "No configuration file, using defaults and environment");
        Config::default()
    };

    // Environment is read exactly once, here
    let settings = config.prerender.clone().resolve().map_err(|e| {
        error!(error = %e, "Invalid prerender options");
        e
    })?;

    info!(
        name = PKG_NAME,
        version = VERSION,
        service_url = %settings.service_url,
        token = settings.token.is_some(),
        whitelist = settings.whitelist.len(),
        blacklist = settings.blacklist.len(),
        "Starting prerender gateway"
    );

    let mut prerender = Prerender::new(settings)?;
    if config.cache.memory {
        info!(
            capacity = config.cache.capacity,
            ttl_secs = config.cache.ttl_secs,
            "In-memory render cache enabled"
        );
        let cache = MemoryCache::with_limits(config.cache.capacity, config.cache.ttl());
        prerender = prerender.with_cache(Arc::new(cache));
    }

    let origin = config.server.origin_uri()?;
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let pool_config = PoolConfig {
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: Duration::from_secs(config.server.pool_idle_timeout_secs),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gateway = GatewayServer::with_pool_config(
        bind_addr,
        Arc::new(prerender),
        origin,
        shutdown_rx,
        pool_config,
    )
    .with_request_timeout(config.server.request_timeout());

    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), gateway_handle).await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}
