//! # Path Processor
//!
//! Turns an inbound request path into a service name plus the sub-path to
//! forward, and joins a resolved base URL back with that sub-path.
//!
//! ## The `api` Marker
//!
//! The literal segment `api` may appear first or second in a path. It is
//! normalised to always sit right after the service name, so these parse alike:
//!
//! ```text
//! /api/service/test  ->  [service, api, test]
//! /service/api/test  ->  [service, api, test]
//! ```
//!
//! With [`ApiMarker::Strip`] the marker is removed instead, so
//! `/api/service-a/widgets` forwards to `/widgets`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::resolver::ServiceResolver;

const API_MARKER: &str = "api";

/// Treatment of the `api` path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMarker {
    /// Keep the marker in the forwarded path, at position 2
    #[default]
    Preserve,
    /// Drop the marker from the forwarded path
    Strip,
}

impl FromStr for ApiMarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(ApiMarker::Preserve),
            "strip" => Ok(ApiMarker::Strip),
            other => Err(format!("unknown api marker mode '{}'", other)),
        }
    }
}

impl fmt::Display for ApiMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiMarker::Preserve => f.write_str("preserve"),
            ApiMarker::Strip => f.write_str("strip"),
        }
    }
}

/// Parsed path: the service name followed by the forwarded segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts(Vec<String>);

impl PathParts {
    pub fn service(&self) -> &str {
        // Construction guarantees at least one segment.
        &self.0[0]
    }

    /// Segments after the service name
    pub fn forwarded(&self) -> &[String] {
        &self.0[1..]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[String]> for PathParts {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

/// Stateless path splitter/joiner
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProcessor {
    marker: ApiMarker,
}

impl PathProcessor {
    pub fn new(marker: ApiMarker) -> Self {
        Self { marker }
    }

    pub fn marker(&self) -> ApiMarker {
        self.marker
    }

    /// Split a path into service name and forwarded segments
    pub fn split(&self, path: &str) -> GatewayResult<PathParts> {
        let lowered = path.to_lowercase();
        let mut parts: Vec<String> = lowered
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.trim().is_empty())
            .map(str::to_string)
            .collect();

        if parts.is_empty() {
            return Err(GatewayError::invalid_path(path));
        }

        let leading_marker = parts[0] == API_MARKER;
        if leading_marker {
            parts.remove(0);
        }
        if parts.is_empty() {
            return Err(GatewayError::invalid_path(path));
        }

        if leading_marker {
            if parts.len() == 1 {
                parts.push(API_MARKER.to_string());
            } else if parts[1] != API_MARKER {
                parts.insert(1, API_MARKER.to_string());
            }
        }

        if self.marker == ApiMarker::Strip && parts.len() > 1 && parts[1] == API_MARKER {
            parts.remove(1);
        }

        Ok(PathParts(parts))
    }

    /// Append the forwarded segments of `parts` to `base`
    pub fn join<S: AsRef<str>>(&self, base: &str, parts: &[S]) -> GatewayResult<String> {
        if base.is_empty() {
            return Err(GatewayError::EmptyBaseUrl);
        }
        if parts.len() <= 1 {
            return Ok(base.to_string());
        }

        let forwarded: Vec<&str> = parts[1..].iter().map(AsRef::as_ref).collect();
        Ok(format!("{}/{}", base, forwarded.join("/")))
    }

    /// Resolve a path to a fully qualified target URL
    pub fn resolve(&self, path: &str, resolver: &dyn ServiceResolver) -> GatewayResult<String> {
        let parts = self.split(path)?;
        let service = parts.service();

        let base = resolver.resolve(service)?;
        if base.is_empty() {
            return Err(GatewayError::service_unavailable(service));
        }

        let joined = self.join(&base, parts.as_slice())?;
        if joined.contains("://") {
            Ok(joined)
        } else {
            Ok(format!("http://{}", joined))
        }
    }
}
