//! Service discovery: the client contract, its implementations and the
//! aggregating registry.

pub mod client;
pub mod endpoint;
pub mod eureka;
pub mod push;
pub mod registry;
pub mod static_registry;

pub use client::{ConnectionState, DiscoveryClient, LocalInstance, ServicesChanged};
pub use eureka::EurekaDiscovery;
pub use push::{NatsTransport, PushDiscovery, PushRecord, PushTransport};
pub use registry::{DirectorySnapshot, DiscoverySource, RegistryStats, ServiceRegistry};
pub use static_registry::StaticDiscovery;

use std::sync::Arc;
use tracing::info;

use crate::core::config::GatewayConfig;
use crate::core::error::GatewayResult;

/// Instantiate every discovery client the configuration enables
///
/// A static registry file that cannot be read is an error; Eureka and push
/// clients only fail later, when connecting.
pub async fn sources_from_config(config: &GatewayConfig) -> GatewayResult<Vec<DiscoverySource>> {
    let local = LocalInstance::new(
        &config.server.name,
        config.server.advertised_ip.clone(),
        config.server.service_port,
    );
    let discovery = &config.discovery;
    let mut sources = Vec::new();

    if let Some(path) = &discovery.static_registry_file {
        let client = StaticDiscovery::load_from_file(path).await?;
        sources.push(DiscoverySource::required(Arc::new(client)));
    }

    if discovery.eureka.enabled {
        let client = EurekaDiscovery::new(discovery.eureka.clone(), local.clone())?;
        sources.push(DiscoverySource {
            client: Arc::new(client),
            required: discovery.eureka.required,
        });
    }

    if discovery.push.enabled {
        let client = PushDiscovery::nats(&discovery.push, local.clone());
        sources.push(DiscoverySource {
            client: Arc::new(client),
            required: discovery.push.required,
        });
    }

    info!(
        clients = ?sources.iter().map(|s| s.client.name()).collect::<Vec<_>>(),
        "discovery clients configured"
    );
    Ok(sources)
}
