//! Service name to base URL resolution.

use std::sync::Arc;

use crate::core::error::GatewayResult;
use crate::discovery::registry::ServiceRegistry;

/// Resolves a logical service name to the base URL of one instance
pub trait ServiceResolver: Send + Sync {
    fn resolve(&self, service: &str) -> GatewayResult<String>;
}

impl<F> ServiceResolver for F
where
    F: Fn(&str) -> GatewayResult<String> + Send + Sync,
{
    fn resolve(&self, service: &str) -> GatewayResult<String> {
        self(service)
    }
}

/// Resolver backed by the service registry
///
/// Every call advances the service's ring, so consecutive resolutions rotate
/// through the known instances. The returned base carries the instance scheme.
#[derive(Clone)]
pub struct RegistryResolver {
    registry: Arc<ServiceRegistry>,
}

impl RegistryResolver {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

impl ServiceResolver for RegistryResolver {
    fn resolve(&self, service: &str) -> GatewayResult<String> {
        self.registry
            .select(&service.to_uppercase())
            .map(|remote| remote.to_string())
    }
}
