//! # Push-Notified Discovery
//!
//! Discovery client for registries that announce changes instead of being polled.
//! The default transport is NATS; the client itself only depends on the
//! [`PushTransport`] trait so other buses (or in-process fakes) can be plugged in.
//!
//! ## Subjects
//!
//! - `{prefix}.register`: the gateway announces itself after connecting
//! - `{prefix}.discover`: request/reply returning a JSON list of [`PushRecord`]
//! - `{prefix}.changed`: any message triggers a re-fetch and a registry notification
//! - `{prefix}.deregister`: the gateway withdraws itself on shutdown
//!
//! Connection attempts repeat with a fixed delay until they succeed or the
//! shutdown token is cancelled. If the change subscription ends, the client
//! goes back to connecting.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::PushConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{RemoteCollection, STATUS_UP};
use crate::discovery::client::{
    ChangeReceiver, ChangeSender, ConnectionState, DiscoveryClient, LocalInstance,
    ServicesChanged, NOTIFICATION_CAPACITY,
};
use crate::discovery::endpoint::parse_endpoint;

/// Message bus used by [`PushDiscovery`]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open the connection; called again after a failure or a lost subscription
    async fn connect(&self) -> GatewayResult<()>;

    async fn publish(&self, subject: String, payload: Bytes) -> GatewayResult<()>;

    async fn request(&self, subject: String, payload: Bytes) -> GatewayResult<Bytes>;

    /// Stream of message payloads published on `subject`
    async fn subscribe(&self, subject: String) -> GatewayResult<BoxStream<'static, Bytes>>;
}

/// One service as announced on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRecord {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub state: String,
}

/// NATS implementation of [`PushTransport`]
pub struct NatsTransport {
    servers: Vec<String>,
    client: RwLock<Option<async_nats::Client>>,
}

impl NatsTransport {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> GatewayResult<async_nats::Client> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| GatewayError::connect("nats", "not connected"))
    }
}

#[async_trait]
impl PushTransport for NatsTransport {
    async fn connect(&self) -> GatewayResult<()> {
        let addresses = if self.servers.is_empty() {
            "nats://localhost:4222".to_string()
        } else {
            self.servers.join(",")
        };

        let client = async_nats::connect(addresses)
            .await
            .map_err(|e| GatewayError::connect("nats", e.to_string()))?;
        *self.client.write() = Some(client);
        Ok(())
    }

    async fn publish(&self, subject: String, payload: Bytes) -> GatewayResult<()> {
        self.client()?
            .publish(subject, payload)
            .await
            .map_err(|e| GatewayError::discovery(format!("NATS publish failed: {}", e)))
    }

    async fn request(&self, subject: String, payload: Bytes) -> GatewayResult<Bytes> {
        let message = self
            .client()?
            .request(subject, payload)
            .await
            .map_err(|e| GatewayError::discovery(format!("NATS request failed: {}", e)))?;
        Ok(message.payload)
    }

    async fn subscribe(&self, subject: String) -> GatewayResult<BoxStream<'static, Bytes>> {
        let subscriber = self
            .client()?
            .subscribe(subject)
            .await
            .map_err(|e| GatewayError::discovery(format!("NATS subscribe failed: {}", e)))?;
        Ok(subscriber.map(|message| message.payload).boxed())
    }
}

/// Push-notified discovery client
#[derive(Clone)]
pub struct PushDiscovery {
    inner: Arc<PushInner>,
}

struct PushInner {
    transport: Arc<dyn PushTransport>,
    subject_prefix: String,
    retry_interval: Duration,
    local: LocalInstance,
    services: RwLock<Option<RemoteCollection>>,
    state: RwLock<ConnectionState>,
    changes: ChangeSender,
}

impl PushDiscovery {
    /// Client over NATS using the configured servers
    pub fn nats(config: &PushConfig, local: LocalInstance) -> Self {
        let transport = Arc::new(NatsTransport::new(config.servers.clone()));
        Self::with_transport(transport, config, local)
    }

    pub fn with_transport(
        transport: Arc<dyn PushTransport>,
        config: &PushConfig,
        local: LocalInstance,
    ) -> Self {
        let (changes, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(PushInner {
                transport,
                subject_prefix: config.subject_prefix.clone(),
                retry_interval: config.retry_interval,
                local,
                services: RwLock::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
                changes,
            }),
        }
    }

    fn subject(&self, action: &str) -> String {
        format!("{}.{}", self.inner.subject_prefix, action)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    fn own_record(&self, state: &str) -> PushRecord {
        let local = &self.inner.local;
        PushRecord {
            name: local.app.clone(),
            endpoints: vec![format!("http://{}:{}", local.ip, local.port)],
            state: state.to_string(),
        }
    }

    /// Request the current inventory and cache it
    pub async fn fetch(&self) -> GatewayResult<RemoteCollection> {
        let payload = self
            .inner
            .transport
            .request(self.subject("discover"), Bytes::new())
            .await?;

        let records: Vec<PushRecord> = serde_json::from_slice(&payload).map_err(|e| {
            GatewayError::discovery(format!("Failed to parse discovery response: {}", e))
        })?;

        let collection = self.to_collection(records);
        debug!(
            services = collection.service_names().count(),
            instances = collection.instance_count(),
            "push discovery fetch complete"
        );
        *self.inner.services.write() = Some(collection.clone());
        Ok(collection)
    }

    fn to_collection(&self, records: Vec<PushRecord>) -> RemoteCollection {
        let mut collection = RemoteCollection::new();
        for record in records {
            if !record.state.eq_ignore_ascii_case(STATUS_UP) {
                continue;
            }
            if record.name.eq_ignore_ascii_case(&self.inner.local.app) {
                continue;
            }
            if record.endpoints.is_empty() {
                warn!(service = %record.name, "could not find endpoint for service");
                continue;
            }
            for endpoint in &record.endpoints {
                collection.insert(parse_endpoint(&record.name, endpoint, STATUS_UP));
            }
        }
        collection
    }

    fn notify(&self) {
        // No receivers simply means nobody listens yet.
        let _ = self.inner.changes.send(ServicesChanged { source: "push" });
    }

    async fn establish(&self) -> GatewayResult<BoxStream<'static, Bytes>> {
        let transport = &self.inner.transport;
        transport.connect().await?;

        let announcement = serde_json::to_vec(&self.own_record(STATUS_UP))?;
        transport
            .publish(self.subject("register"), Bytes::from(announcement))
            .await?;

        let changes = transport.subscribe(self.subject("changed")).await?;
        self.fetch().await?;

        self.set_state(ConnectionState::Registered);
        info!(subject_prefix = %self.inner.subject_prefix, "connected to push registry");
        self.notify();
        Ok(changes)
    }

    async fn supervise(
        self,
        shutdown: CancellationToken,
        mut current: Option<BoxStream<'static, Bytes>>,
    ) {
        loop {
            let stream = match current.take() {
                Some(stream) => stream,
                None => match self.reconnect(&shutdown).await {
                    Some(stream) => stream,
                    None => break,
                },
            };

            self.watch(stream, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            warn!("push change subscription closed, reconnecting");
            self.set_state(ConnectionState::Connecting);
        }
        debug!("push discovery supervisor stopped");
    }

    async fn reconnect(&self, shutdown: &CancellationToken) -> Option<BoxStream<'static, Bytes>> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.inner.retry_interval) => {}
            }

            match self.establish().await {
                Ok(stream) => return Some(stream),
                Err(e) => warn!(error = %e, "push registry connection attempt failed"),
            }
        }
    }

    async fn watch(&self, mut stream: BoxStream<'static, Bytes>, shutdown: &CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => return,
                message = stream.next() => message,
            };

            match message {
                Some(_) => match self.fetch().await {
                    Ok(_) => self.notify(),
                    Err(e) => warn!(error = %e, "re-fetch after change notification failed"),
                },
                None => return,
            }
        }
    }
}

#[async_trait]
impl DiscoveryClient for PushDiscovery {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn connect(&self, shutdown: CancellationToken) -> GatewayResult<()> {
        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok(stream) => {
                tokio::spawn(self.clone().supervise(shutdown, Some(stream)));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "push registry unreachable, retrying in background");
                tokio::spawn(self.clone().supervise(shutdown, None));
                Err(match e {
                    GatewayError::Connect { .. } => e,
                    other => GatewayError::connect("push", other.to_string()),
                })
            }
        }
    }

    fn services(&self) -> RemoteCollection {
        self.inner.services.read().clone().unwrap_or_default()
    }

    fn notifications(&self) -> Option<ChangeReceiver> {
        Some(self.inner.changes.subscribe())
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    async fn deregister(&self) -> GatewayResult<()> {
        if self.state() != ConnectionState::Registered {
            return Ok(());
        }

        let payload = serde_json::to_vec(&self.own_record("DOWN"))?;
        self.inner
            .transport
            .publish(self.subject("deregister"), Bytes::from(payload))
            .await?;
        self.set_state(ConnectionState::Disconnected);
        info!("withdrawn from push registry");
        Ok(())
    }
}
