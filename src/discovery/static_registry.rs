//! # Static Discovery
//!
//! Inventory that never changes after startup, loaded either from an
//! in-memory map or from a JSON/YAML file of the form:
//!
//! ```yaml
//! - name: service-a
//!   instances:
//!     - http://backend:3101
//!     - backend:3102
//! ```
//!
//! Every static instance is reported as `UP`.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{RemoteCollection, STATUS_UP};
use crate::discovery::client::{ConnectionState, DiscoveryClient};
use crate::discovery::endpoint::parse_endpoint;

/// One record of a static registry file
#[derive(Debug, Clone, Deserialize)]
pub struct StaticServiceRecord {
    pub name: String,
    #[serde(default)]
    pub instances: Vec<String>,
}

/// Discovery client backed by a fixed inventory
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    services: RemoteCollection,
}

impl StaticDiscovery {
    /// Build from a map of service name to raw endpoint strings
    pub fn from_map<I, S, E>(services: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<E>)>,
        S: AsRef<str>,
        E: AsRef<str>,
    {
        Self::from_records(services.into_iter().map(|(name, instances)| {
            StaticServiceRecord {
                name: name.as_ref().to_string(),
                instances: instances.iter().map(|e| e.as_ref().to_string()).collect(),
            }
        }))
    }

    /// Build from parsed file records
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = StaticServiceRecord>,
    {
        let mut services = RemoteCollection::new();
        for record in records {
            for endpoint in &record.instances {
                let remote = parse_endpoint(&record.name, endpoint, STATUS_UP);
                debug!(service = %remote.app(), remote = %remote, "static instance");
                services.insert(remote);
            }
        }
        Self { services }
    }

    /// Load a registry file; `.json`, `.yaml` and `.yml` are supported
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::config(format!(
                "Failed to read static registry {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let records: Vec<StaticServiceRecord> = match extension.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            _ => {
                return Err(GatewayError::config(format!(
                    "unsupported file type: {}",
                    path.display()
                )))
            }
        };

        let discovery = Self::from_records(records);
        info!(
            file = %path.display(),
            services = discovery.services.service_names().count(),
            instances = discovery.services.instance_count(),
            "Loaded static registry"
        );
        Ok(discovery)
    }

    /// Grouped view keyed by service name, mostly useful for diagnostics
    pub fn as_map(&self) -> HashMap<String, Vec<String>> {
        self.services
            .iter()
            .map(|(name, remotes)| {
                (
                    name.clone(),
                    remotes.iter().map(ToString::to_string).collect(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl DiscoveryClient for StaticDiscovery {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn connect(&self, _shutdown: CancellationToken) -> GatewayResult<()> {
        Ok(())
    }

    fn services(&self) -> RemoteCollection {
        self.services.clone()
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Fetching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map_parses_endpoints() {
        let discovery = StaticDiscovery::from_map([(
            "service-a",
            vec!["backend:3101", "https://secure:443"],
        )]);

        let services = discovery.services();
        let remotes = services.get("SERVICE-A");
        assert_eq!(remotes.len(), 2);
        assert!(remotes.iter().all(|r| r.is_up()));
        assert_eq!(remotes[0].to_string(), "http://backend:3101");
        assert_eq!(remotes[1].to_string(), "https://secure");
    }

    #[test]
    fn test_as_map_is_keyed_by_canonical_name() {
        let discovery = StaticDiscovery::from_map([("svc", vec!["h:1"])]);
        let map = discovery.as_map();
        assert_eq!(map.get("SVC").unwrap(), &vec!["http://h:1".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_is_immediate() {
        let discovery = StaticDiscovery::default();
        assert!(discovery.connect(CancellationToken::new()).await.is_ok());
        assert!(discovery.services().is_empty());
        assert!(discovery.notifications().is_none());
    }
}
