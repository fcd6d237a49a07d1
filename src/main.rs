//! # Service Gateway - Main Entry Point
//!
//! Startup sequence:
//!
//! 1. Load configuration (file + `GATEWAY_*` environment) and initialise logging/metrics
//! 2. Build the discovery clients, connect them, and publish the first directory
//! 3. Start the registry refresh loops and the rate limiter cleanup task
//! 4. Serve the proxy and monitoring listeners until SIGINT/SIGTERM
//!
//! On shutdown the shared token is cancelled, every client withdraws the gateway's
//! own registration under a bounded timeout, and the process exits after a short
//! grace delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use service_gateway::core::error::GatewayError;
use service_gateway::discovery::{sources_from_config, ServiceRegistry};
use service_gateway::gateway::server::{monitoring_router, proxy_router, GatewayServer, MonitoringState};
use service_gateway::middleware::rate_limiting::RateLimiter;
use service_gateway::observability::{init_logging, install_recorder};
use service_gateway::proxy::ReverseProxy;
use service_gateway::routing::resolver::RegistryResolver;
use service_gateway::{GatewayConfig, GatewayResult};

const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Gateway terminated: {}", e);
        eprintln!("Gateway terminated: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> GatewayResult<()> {
    let config = GatewayConfig::load().await?;
    init_logging(&config.logging)?;
    let metrics = install_recorder(&config.server.name)?;

    info!(name = %config.server.name, version = env!("CARGO_PKG_VERSION"), "Starting service gateway");

    let shutdown = CancellationToken::new();

    let sources = sources_from_config(&config).await?;
    if sources.is_empty() {
        warn!("no discovery clients configured, every request will be unavailable");
    }

    let registry = Arc::new(ServiceRegistry::new(sources, config.registry.clone()));
    registry.connect_all(&shutdown).await?;
    registry.refresh();
    let mut background = registry.start_background_tasks(shutdown.clone());

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit)?);
    background.push(limiter.start_cleanup_task(config.rate_limit.cleanup_interval, shutdown.clone()));

    let resolver = Arc::new(RegistryResolver::new(Arc::clone(&registry)));
    let proxy = Arc::new(ReverseProxy::new(&config.proxy, resolver)?);

    let monitoring = MonitoringState::new(config.server.name.clone(), Arc::clone(&registry), Some(metrics))?;
    let server = GatewayServer::new(
        &config.server,
        proxy_router(proxy, limiter),
        monitoring_router(monitoring),
    )?;

    let mut server_task = tokio::spawn(server.start(shutdown.clone()));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, beginning graceful shutdown");
        }
        result = &mut server_task => {
            shutdown.cancel();
            registry.deregister_all(DEREGISTER_TIMEOUT).await;
            return match result {
                Ok(outcome) => outcome,
                Err(e) => Err(GatewayError::internal(format!("server task failed: {}", e))),
            };
        }
    }

    shutdown.cancel();
    registry.deregister_all(DEREGISTER_TIMEOUT).await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    match server_task.await {
        Ok(Err(e)) => error!("Server error during shutdown: {}", e),
        Err(e) => error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    for handle in background {
        handle.abort();
    }

    info!("Service gateway shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
