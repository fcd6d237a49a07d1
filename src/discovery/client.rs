//! # Discovery Client Contract
//!
//! Every discovery backend (Eureka polling, NATS push, static file) implements
//! [`DiscoveryClient`]. The registry only ever talks to this trait.
//!
//! ## Contract
//!
//! - `connect` makes the first connection attempt inline and returns its outcome.
//!   Whatever happens, the client keeps working in its own background tasks
//!   (retrying, polling, heartbeating) until the shutdown token is cancelled.
//!   Callers decide whether an initial failure is fatal (required backends) or
//!   merely logged (optional backends).
//! - `services` never performs network I/O: it returns the last good inventory,
//!   or an empty collection when nothing was fetched yet.
//! - `notifications` hands out a receiver for clients that learn about changes
//!   by push; polling and static clients return `None`.
//!
//! ## Rust Concepts Used
//!
//! - `async_trait` for async methods in a trait used as `Arc<dyn DiscoveryClient>`
//! - `tokio::sync::broadcast` so several listeners can follow one client's changes
//! - `CancellationToken` to stop every background loop from one place

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::error::GatewayResult;
use crate::core::types::RemoteCollection;

/// Capacity of each client's change channel
pub const NOTIFICATION_CAPACITY: usize = 64;

/// Signal that a client's inventory changed and the directory should be rebuilt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicesChanged {
    /// Name of the client that observed the change
    pub source: &'static str,
}

/// Receiving half of a client's change channel
pub type ChangeReceiver = broadcast::Receiver<ServicesChanged>;

/// Sending half of a client's change channel
pub type ChangeSender = broadcast::Sender<ServicesChanged>;

/// Connection life cycle of a discovery client
///
/// `Disconnected -> Connecting -> Fetching` for clients that only read the
/// inventory, `Disconnected -> Connecting -> Registered` once the gateway has
/// also announced itself to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Fetching,
    Registered,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Fetching => "fetching",
            ConnectionState::Registered => "registered",
        };
        f.write_str(name)
    }
}

/// How the gateway announces itself to backends that support registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInstance {
    /// Application name, upper-cased like every other service name
    pub app: String,
    pub ip: String,
    pub port: u16,
}

impl LocalInstance {
    pub fn new(app: impl AsRef<str>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            app: app.as_ref().to_uppercase(),
            ip: ip.into(),
            port,
        }
    }

    /// `APP:ip:port`
    pub fn instance_id(&self) -> String {
        format!("{}:{}:{}", self.app, self.ip, self.port)
    }
}

/// Uniform interface over one external inventory source
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Short backend name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Establish the link to the backend and start background work
    async fn connect(&self, shutdown: CancellationToken) -> GatewayResult<()>;

    /// Last known-good inventory from this source
    fn services(&self) -> RemoteCollection;

    /// Change notifications, for clients that receive pushes
    fn notifications(&self) -> Option<ChangeReceiver> {
        None
    }

    fn state(&self) -> ConnectionState;

    /// Best-effort withdrawal of the gateway's own registration
    async fn deregister(&self) -> GatewayResult<()> {
        Ok(())
    }
}
