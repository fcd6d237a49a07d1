//! # Service Registry
//!
//! Aggregates every configured discovery client into one queryable directory.
//!
//! ## Refresh Model
//!
//! A refresh asks each client for its cached inventory (`services()`, no network
//! I/O), merges the results, drops instances that are not `UP`, de-duplicates by
//! `(service, rendered remote)` and builds one [`Ring`] per service. Only then is
//! the new [`DirectorySnapshot`] published, by replacing a single `Arc` under a
//! write lock. Readers hold the read lock just long enough to clone that `Arc`,
//! so they always see one complete snapshot, old or new.
//!
//! Refreshes run on a timer (initial delay, then a fixed interval) and whenever a
//! client publishes a change notification. All loops stop when the shared
//! `CancellationToken` is cancelled.
//!
//! ## Rust Concepts Used
//!
//! - `parking_lot::RwLock<Option<Arc<T>>>` as an atomically swappable pointer
//! - `Arc<dyn DiscoveryClient>` trait objects for heterogeneous backends
//! - `BTreeMap` to de-duplicate and to give rings a stable, sorted order

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::RegistryConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Remote, RemoteCollection};
use crate::discovery::client::{ConnectionState, DiscoveryClient};
use crate::load_balancing::Ring;

/// Immutable view of every known service and its ring
#[derive(Debug)]
pub struct DirectorySnapshot {
    rings: HashMap<String, Ring>,
    built_at: DateTime<Utc>,
}

impl DirectorySnapshot {
    /// Merge collections from several sources into a snapshot
    pub fn build<I>(collections: I) -> Self
    where
        I: IntoIterator<Item = RemoteCollection>,
    {
        let mut merged: BTreeMap<String, BTreeMap<String, Remote>> = BTreeMap::new();

        for collection in collections {
            for (service, remotes) in collection {
                for remote in remotes.into_iter().filter(Remote::is_up) {
                    merged
                        .entry(service.to_uppercase())
                        .or_default()
                        .entry(remote.to_string())
                        .or_insert(remote);
                }
            }
        }

        let rings = merged
            .into_iter()
            .map(|(service, remotes)| (service, Ring::new(remotes.into_values().collect())))
            .collect();

        Self {
            rings,
            built_at: Utc::now(),
        }
    }

    /// Ring of a service, looked up case-insensitively
    pub fn ring(&self, service: &str) -> Option<&Ring> {
        self.rings.get(&service.to_uppercase())
    }

    /// All instances, sorted by rendered form
    pub fn list(&self) -> Vec<Remote> {
        let mut remotes: Vec<Remote> = self
            .rings
            .values()
            .flat_map(|ring| ring.instances().iter().cloned())
            .collect();
        remotes.sort();
        remotes
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rings.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            services: self.rings.len(),
            instances: self.rings.values().map(Ring::len).sum(),
            built_at: Some(self.built_at),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub services: usize,
    pub instances: usize,
    pub built_at: Option<DateTime<Utc>>,
}

/// A configured discovery client and whether the gateway can run without it
#[derive(Clone)]
pub struct DiscoverySource {
    pub client: Arc<dyn DiscoveryClient>,
    pub required: bool,
}

impl DiscoverySource {
    pub fn required(client: Arc<dyn DiscoveryClient>) -> Self {
        Self {
            client,
            required: true,
        }
    }

    pub fn optional(client: Arc<dyn DiscoveryClient>) -> Self {
        Self {
            client,
            required: false,
        }
    }
}

/// Status of one client, for the monitoring listener
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: &'static str,
    pub state: ConnectionState,
    pub required: bool,
}

/// Aggregating service registry
pub struct ServiceRegistry {
    sources: Vec<DiscoverySource>,
    snapshot: RwLock<Option<Arc<DirectorySnapshot>>>,
    /// Held from collection to publication so refreshes publish in collection order
    refresh_guard: Mutex<()>,
    config: RegistryConfig,
}

impl ServiceRegistry {
    pub fn new(sources: Vec<DiscoverySource>, config: RegistryConfig) -> Self {
        Self {
            sources,
            snapshot: RwLock::new(None),
            refresh_guard: Mutex::new(()),
            config,
        }
    }

    /// Connect every client. Failures of optional clients are logged; the first
    /// failure of a required client is returned.
    pub async fn connect_all(&self, shutdown: &CancellationToken) -> GatewayResult<()> {
        for source in &self.sources {
            let name = source.client.name();
            match source.client.connect(shutdown.clone()).await {
                Ok(()) => info!(client = name, "discovery client connected"),
                Err(e) if source.required => {
                    error!(client = name, error = %e, "required discovery client failed to connect");
                    return Err(e);
                }
                Err(e) => warn!(
                    client = name,
                    error = %e,
                    "optional discovery client failed to connect, continuing without it"
                ),
            }
        }
        Ok(())
    }

    /// Rebuild the directory from every client's cached inventory and publish it.
    ///
    /// Concurrent callers are serialized: a refresh started later never loses to one
    /// that collected earlier.
    pub fn refresh(&self) -> Arc<DirectorySnapshot> {
        let _guard = self.refresh_guard.lock();
        let collections = self
            .sources
            .iter()
            .map(|source| source.client.services())
            .collect::<Vec<_>>();

        let snapshot = Arc::new(DirectorySnapshot::build(collections));
        *self.snapshot.write() = Some(Arc::clone(&snapshot));

        let stats = snapshot.stats();
        counter!("registry_refreshes_total").increment(1);
        gauge!("registry_services").set(stats.services as f64);
        gauge!("registry_instances").set(stats.instances as f64);
        debug!(
            services = stats.services,
            instances = stats.instances,
            "service directory refreshed"
        );

        snapshot
    }

    /// Current snapshot, if one was ever built
    pub fn snapshot(&self) -> Option<Arc<DirectorySnapshot>> {
        self.snapshot.read().clone()
    }

    /// Next instance of a service in round-robin order
    pub fn select(&self, service: &str) -> GatewayResult<Remote> {
        let snapshot = self
            .snapshot()
            .ok_or_else(|| GatewayError::service_unavailable(service))?;

        snapshot
            .ring(service)
            .and_then(Ring::next)
            .ok_or_else(|| GatewayError::service_unavailable(service))
    }

    /// `host:port` of the next instance of a service
    pub fn get(&self, service: &str) -> GatewayResult<String> {
        self.select(service).map(|remote| remote.authority())
    }

    /// Every known instance, sorted by rendered form; empty before the first refresh
    pub fn list(&self) -> Vec<Remote> {
        self.snapshot()
            .map(|snapshot| snapshot.list())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        self.snapshot()
            .map(|snapshot| snapshot.stats())
            .unwrap_or_default()
    }

    pub fn sources(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|source| SourceStatus {
                name: source.client.name(),
                state: source.client.state(),
                required: source.required,
            })
            .collect()
    }

    /// Spawn the refresh timer and one listener per notifying client
    pub fn start_background_tasks(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let registry = Arc::clone(self);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            registry.refresh_timer(token).await;
        }));

        for source in &self.sources {
            if let Some(mut receiver) = source.client.notifications() {
                let registry = Arc::clone(self);
                let token = shutdown.clone();
                let name = source.client.name();
                handles.push(tokio::spawn(async move {
                    loop {
                        let received = tokio::select! {
                            _ = token.cancelled() => break,
                            received = receiver.recv() => received,
                        };
                        match received {
                            Ok(event) => {
                                debug!(client = event.source, "change notification received");
                                registry.refresh();
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(client = name, skipped, "notifications lagged");
                                registry.refresh();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    debug!(client = name, "notification listener stopped");
                }));
            }
        }

        info!(
            initial_delay = ?self.config.refresh_initial_delay,
            interval = ?self.config.refresh_interval,
            "started service registry background tasks"
        );
        handles
    }

    async fn refresh_timer(&self, shutdown: CancellationToken) {
        let start = Instant::now() + self.config.refresh_initial_delay;
        let mut ticker = interval_at(start, self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh();
                }
            }
        }
        debug!("registry refresh timer stopped");
    }

    /// Ask every client to withdraw the gateway's own registration
    pub async fn deregister_all(&self, timeout: Duration) {
        for source in &self.sources {
            let name = source.client.name();
            match tokio::time::timeout(timeout, source.client.deregister()).await {
                Ok(Ok(())) => debug!(client = name, "de-registration complete"),
                Ok(Err(e)) => error!(client = name, error = %e, "de-registration failed"),
                Err(_) => warn!(client = name, ?timeout, "de-registration timed out"),
            }
        }
    }
}
