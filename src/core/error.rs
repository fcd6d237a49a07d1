//! # Error Handling Module
//!
//! This module defines every error the gateway can produce while resolving, forwarding
//! and rate limiting requests, using the `thiserror` crate. Each variant knows which
//! HTTP status it maps to, so request handlers can simply return `GatewayResult<T>`
//! and let Axum render the failure.
//!
//! ## Routing Failure Kinds
//!
//! Three variants describe why a request could not be routed:
//! - `InvalidPath`: the inbound path does not name a service (client error)
//! - `EmptyBaseUrl`: a lookup succeeded but produced no endpoint (bad gateway)
//! - `ServiceUnavailable`: no live instance is known for the service
//!
//! ## Rust Error Handling Concepts
//!
//! - `Result<T, E>` instead of exceptions: failures are ordinary return values
//! - The `?` operator propagates an error to the caller and converts it through `From`
//! - `#[derive(Error)]` implements `Display` and `std::error::Error` from the
//!   `#[error("...")]` attributes

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// The inbound path cannot be parsed into a service name
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// The resolved service endpoint was empty despite a successful lookup
    #[error("empty base url")]
    EmptyBaseUrl,

    /// No healthy instance is known for the requested service
    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: String },

    /// A discovery backend could not be reached
    #[error("connect error ({backend}): {message}")]
    Connect { backend: String, message: String },

    /// The caller exceeded the rate rule matching the request path
    #[error("rate limit exceeded: {limit} requests per {period:?}")]
    RateLimitExceeded {
        limit: u64,
        period: Duration,
        retry_after: Duration,
    },

    /// The request body exceeded the configured buffering limit
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Upstream request timeout
    #[error("request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Configuration-related errors (invalid values, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Discovery protocol errors (malformed registry payloads, unexpected status codes)
    #[error("Service discovery error: {message}")]
    Discovery { message: String },

    /// HTTP client errors when talking to upstreams or registries
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create an invalid path error for the given inbound path
    pub fn invalid_path<S: Into<String>>(path: S) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>>(service: S) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
        }
    }

    /// Create a connect error for a named discovery backend
    pub fn connect<B: Into<String>, M: Into<String>>(backend: B, message: M) -> Self {
        Self::Connect {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a service discovery error with a custom message
    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            Self::EmptyBaseUrl => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Connect { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Discovery { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if a client could reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. }
                | Self::Connect { .. }
                | Self::RateLimitExceeded { .. }
                | Self::Timeout { .. }
                | Self::HttpClient { .. }
                | Self::Io { .. }
        )
    }

    /// Whether this is one of the three routing failure kinds
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. } | Self::EmptyBaseUrl | Self::ServiceUnavailable { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "invalid_path",
            Self::EmptyBaseUrl => "empty_base_url",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Connect { .. } => "connect_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration_error",
            Self::Discovery { .. } => "service_discovery_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Timeouts are reported separately so they surface as 504 instead of 502
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_ms: 0 }
        } else {
            Self::HttpClient {
                message: err.to_string(),
            }
        }
    }
}

/// Render errors as structured JSON responses
///
/// Rate limit rejections additionally carry a `Retry-After` header (whole seconds,
/// rounded up) so well-behaved clients can back off.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        let mut response = (status, Json(error_response)).into_response();
        if let Self::RateLimitExceeded { retry_after, .. } = &self {
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
