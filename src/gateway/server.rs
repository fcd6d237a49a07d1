//! # HTTP Server Module
//!
//! The gateway runs two listeners:
//!
//! - **proxy**: every path is proxied. Requests pass the rate limiter, are resolved
//!   to an upstream URL, and are forwarded there.
//! - **monitoring**: `/` status page, `/list` JSON listing, `/prometheus`, `/health`.
//!
//! Both stop when the shared `CancellationToken` is cancelled, after in-flight
//! requests complete.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing the proxy, limiter and registry across request tasks
//! - Axum state extractors (`State<T>`) instead of globals
//! - `into_make_service_with_connect_info` so handlers can see the peer address

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::registry::ServiceRegistry;
use crate::gateway::status_page::{RemoteView, StatusPage};
use crate::middleware::rate_limiting::{rate_limit_middleware, RateLimiter};
use crate::proxy::reverse_proxy::ReverseProxy;

/// State shared by proxy request handlers
#[derive(Clone)]
pub struct ProxyState {
    pub proxy: Arc<ReverseProxy>,
}

/// State shared by monitoring handlers
#[derive(Clone)]
pub struct MonitoringState {
    pub name: String,
    pub registry: Arc<ServiceRegistry>,
    pub status_page: Arc<StatusPage>,
    pub metrics: Option<PrometheusHandle>,
}

impl MonitoringState {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<ServiceRegistry>,
        metrics: Option<PrometheusHandle>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            name: name.into(),
            registry,
            status_page: Arc::new(StatusPage::new()?),
            metrics,
        })
    }
}

/// Router that proxies every path through the rate limiter
pub fn proxy_router(proxy: Arc<ReverseProxy>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .fallback(proxy_request)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware)),
        )
        .with_state(ProxyState { proxy })
}

/// Router for the monitoring listener
pub fn monitoring_router(state: MonitoringState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/list", get(list_remotes))
        .route("/prometheus", get(prometheus_metrics))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn proxy_request(State(state): State<ProxyState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let target = match state.proxy.resolve_target(&path, query.as_deref()) {
        Ok(target) => target,
        Err(e) => return e.into_response(),
    };

    match state.proxy.forward(request, target).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn status_page(State(state): State<MonitoringState>) -> Result<Html<String>, GatewayError> {
    let html = state.status_page.render(
        &state.name,
        &state.registry.list(),
        &state.registry.stats(),
        &state.registry.sources(),
    )?;
    Ok(Html(html))
}

/// Every known instance; 204 when the directory is empty
async fn list_remotes(State(state): State<MonitoringState>) -> Response {
    let remotes = state.registry.list();
    if remotes.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let views: Vec<RemoteView> = remotes.iter().map(RemoteView::from).collect();
    Json(views).into_response()
}

async fn prometheus_metrics(State(state): State<MonitoringState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn health_check(State(state): State<MonitoringState>) -> impl IntoResponse {
    let health_info = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": state.name,
        "registry": state.registry.stats(),
        "discovery": state.registry.sources(),
    });

    (StatusCode::OK, Json(health_info))
}

/// Both listeners, ready to bind
pub struct GatewayServer {
    bind_addr: SocketAddr,
    monitoring_bind_addr: SocketAddr,
    proxy_app: Router,
    monitoring_app: Router,
}

impl GatewayServer {
    pub fn new(config: &ServerConfig, proxy_app: Router, monitoring_app: Router) -> GatewayResult<Self> {
        let bind_addr = parse_addr(&config.bind_address, config.service_port)?;
        let monitoring_bind_addr = parse_addr(&config.bind_address, config.monitoring_port)?;

        Ok(Self {
            bind_addr,
            monitoring_bind_addr,
            proxy_app,
            monitoring_app,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn monitoring_bind_addr(&self) -> SocketAddr {
        self.monitoring_bind_addr
    }

    /// Serve both listeners until `shutdown` is cancelled
    #[instrument(skip(self, shutdown))]
    pub async fn start(self, shutdown: CancellationToken) -> GatewayResult<()> {
        let proxy_listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind proxy server to {}: {}", self.bind_addr, e))
        })?;
        let monitoring_listener = TcpListener::bind(self.monitoring_bind_addr).await.map_err(|e| {
            GatewayError::internal(format!(
                "Failed to bind monitoring server to {}: {}",
                self.monitoring_bind_addr, e
            ))
        })?;

        info!("Proxy server listening on {}", self.bind_addr);
        info!("Monitoring server listening on {}", self.monitoring_bind_addr);

        let proxy_shutdown = shutdown.clone();
        let proxy_server = axum::serve(
            proxy_listener,
            self.proxy_app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { proxy_shutdown.cancelled().await });

        let monitoring_server = axum::serve(
            monitoring_listener,
            self.monitoring_app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

        let (proxy_result, monitoring_result) = tokio::join!(proxy_server, monitoring_server);
        proxy_result.map_err(|e| GatewayError::internal(format!("Proxy server error: {}", e)))?;
        monitoring_result
            .map_err(|e| GatewayError::internal(format!("Monitoring server error: {}", e)))?;

        info!("HTTP servers stopped");
        Ok(())
    }
}

fn parse_addr(host: &str, port: u16) -> GatewayResult<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid bind address {}:{}: {}", host, port, e)))
}
