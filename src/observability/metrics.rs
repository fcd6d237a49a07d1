//! # Metrics
//!
//! The gateway records through the `metrics` facade macros; this module installs
//! the Prometheus recorder behind them and keeps the handle used to render
//! `/prometheus` on the monitoring listener.
//!
//! Recorded series:
//! - `registry_refreshes_total`, `registry_services`, `registry_instances`
//! - `proxy_requests_total{outcome}`, `proxy_upstream_errors_total{status}`
//! - `rate_limit_decisions_total{decision}`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

use crate::core::error::{GatewayError, GatewayResult};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder, returning its render handle
///
/// Calling this again returns the handle of the recorder installed first.
pub fn install_recorder(service_name: &str) -> GatewayResult<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .install_recorder()
        .map_err(|e| GatewayError::internal(format!("failed to install metrics recorder: {}", e)))?;

    info!(service = %service_name, "Prometheus recorder installed");
    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Recorder handle, if one was installed
pub fn handle() -> Option<PrometheusHandle> {
    HANDLE.get().cloned()
}
