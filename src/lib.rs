//! # Service Gateway Library
//!
//! An API gateway core that aggregates several service-discovery backends into one
//! directory, round-robins across the live instances of each service, and
//! reverse-proxies inbound requests to them behind a rule-based rate limiter.
//!
//! ## Request Path
//!
//! ```text
//! request -> rate limiter -> path processor -> service resolver -> registry ring
//!         -> reverse proxy -> upstream instance
//! ```
//!
//! ## Rust Module System Explained
//!
//! - `mod module_name;` declares a module; `use module_name::item;` imports from it
//! - Items are private by default; `pub` makes them part of the crate's API
//! - `pub use` re-exports items so users can import them from the crate root

/// Error type, configuration and the remote/collection value types
pub mod core;

/// Discovery client contract, Eureka/push/static clients, and the service registry
pub mod discovery;

/// HTTP listeners: proxy and monitoring
pub mod gateway;

/// Round-robin ring over service instances
pub mod load_balancing;

/// Rate limiter rule engine and middleware
pub mod middleware;

/// Logging and metrics initialisation
pub mod observability;

/// Target resolution and request forwarding
pub mod proxy;

/// Path parsing, service resolution and wildcard patterns
pub mod routing;

pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{Remote, RemoteCollection, Scheme};
pub use discovery::registry::ServiceRegistry;
pub use gateway::server::GatewayServer;
pub use proxy::reverse_proxy::ReverseProxy;
