//! # Eureka Discovery
//!
//! Polling client for the Eureka REST API.
//!
//! | Operation  | Request                                 |
//! |------------|-----------------------------------------|
//! | fetch      | `GET {url}/apps`                        |
//! | register   | `POST {url}/apps/{APP}`                 |
//! | heartbeat  | `PUT {url}/apps/{APP}/{instanceId}`     |
//! | deregister | `DELETE {url}/apps/{APP}/{instanceId}`  |
//!
//! A heartbeat answered with 404 means the server forgot the instance (for
//! example after a restart) and triggers a fresh registration. Failed fetches
//! keep the previous inventory.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::EurekaConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Remote, RemoteCollection, Scheme};
use crate::discovery::client::{ConnectionState, DiscoveryClient, LocalInstance};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long de-registration waits for an in-flight heartbeat before aborting it
const HEARTBEAT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Eureka polling discovery client
#[derive(Clone)]
pub struct EurekaDiscovery {
    inner: Arc<EurekaInner>,
}

struct EurekaInner {
    config: EurekaConfig,
    base_url: String,
    local: LocalInstance,
    http: reqwest::Client,
    applications: RwLock<Option<RemoteCollection>>,
    state: RwLock<ConnectionState>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Result of a lease renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Renewed,
    NotFound,
}

impl EurekaDiscovery {
    pub fn new(config: EurekaConfig, local: LocalInstance) -> GatewayResult<Self> {
        if config.url.trim().is_empty() {
            return Err(GatewayError::config("eureka url is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build eureka client: {}", e)))?;

        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            inner: Arc::new(EurekaInner {
                config,
                base_url,
                local,
                http,
                applications: RwLock::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
                heartbeat: Mutex::new(None),
            }),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.inner.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "eureka client state change");
            *current = state;
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.inner.config.login, &self.inner.config.password) {
            (Some(login), password) if !login.is_empty() => {
                request.basic_auth(login, password.as_deref())
            }
            _ => request,
        }
    }

    fn instance_url(&self) -> String {
        format!(
            "{}/apps/{}/{}",
            self.inner.base_url,
            self.inner.local.app,
            self.inner.local.instance_id()
        )
    }

    /// Fetch `/apps` and replace the cached inventory
    pub async fn fetch(&self) -> GatewayResult<RemoteCollection> {
        let url = format!("{}/apps", self.inner.base_url);
        let response = self
            .authorize(self.inner.http.get(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| GatewayError::connect("eureka", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::discovery(format!(
                "eureka fetch returned {}",
                status
            )));
        }

        let envelope: ApplicationsEnvelope = response.json().await.map_err(|e| {
            GatewayError::discovery(format!("Failed to parse eureka applications: {}", e))
        })?;
        let collection = envelope.into_collection();

        debug!(
            services = collection.service_names().count(),
            instances = collection.instance_count(),
            "eureka refresh complete"
        );
        *self.inner.applications.write() = Some(collection.clone());
        Ok(collection)
    }

    /// Register the gateway as an instance of its own application
    pub async fn register(&self) -> GatewayResult<()> {
        let local = &self.inner.local;
        let url = format!("{}/apps/{}", self.inner.base_url, local.app);
        let body = json!({
            "instance": {
                "instanceId": local.instance_id(),
                "hostName": local.ip,
                "app": local.app,
                "ipAddr": local.ip,
                "vipAddress": local.app,
                "secureVipAddress": local.app,
                "status": "UP",
                "overriddenstatus": "UNKNOWN",
                "port": { "$": local.port, "@enabled": "true" },
                "securePort": { "$": 443, "@enabled": "false" },
                "homePageUrl": format!("http://{}:{}", local.ip, local.port),
                "dataCenterInfo": {
                    "@class": "com.netflix.appinfo.MyDataCenterInfo",
                    "name": "MyOwn"
                }
            }
        });

        let response = self
            .authorize(self.inner.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::connect("eureka", e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::discovery(format!(
                "eureka registration returned {}",
                response.status()
            )));
        }

        self.set_state(ConnectionState::Registered);
        info!(instance_id = %local.instance_id(), "registered with eureka");
        Ok(())
    }

    /// Renew the lease of the gateway's own registration
    pub async fn heartbeat(&self) -> GatewayResult<HeartbeatOutcome> {
        let response = self
            .authorize(self.inner.http.put(self.instance_url()))
            .send()
            .await
            .map_err(|e| GatewayError::connect("eureka", e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(HeartbeatOutcome::Renewed),
            StatusCode::NOT_FOUND => Ok(HeartbeatOutcome::NotFound),
            status => Err(GatewayError::discovery(format!(
                "eureka heartbeat returned {}",
                status
            ))),
        }
    }

    async fn refresh_loop(self, shutdown: CancellationToken) {
        let period = self.inner.config.refresh_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.fetch().await {
                Ok(_) => {
                    if *self.inner.state.read() != ConnectionState::Registered {
                        self.set_state(ConnectionState::Fetching);
                    }
                }
                Err(e) => error!(error = %e, "eureka refresh failed, keeping previous inventory"),
            }
        }
        debug!("eureka refresh loop stopped");
    }

    async fn heartbeat_loop(self, shutdown: CancellationToken) {
        let period = self.inner.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if *self.inner.state.read() != ConnectionState::Registered {
                if let Err(e) = self.register().await {
                    warn!(error = %e, "eureka registration failed");
                }
                continue;
            }

            match self.heartbeat().await {
                Ok(HeartbeatOutcome::Renewed) => debug!("eureka heartbeat successful"),
                Ok(HeartbeatOutcome::NotFound) => {
                    info!("eureka does not know this instance, registering again");
                    if let Err(e) = self.register().await {
                        error!(error = %e, "eureka re-registration failed");
                    }
                }
                Err(e) => error!(error = %e, "eureka heartbeat failed"),
            }
        }
        debug!("eureka heartbeat loop stopped");
    }
}

#[async_trait]
impl DiscoveryClient for EurekaDiscovery {
    fn name(&self) -> &'static str {
        "eureka"
    }

    async fn connect(&self, shutdown: CancellationToken) -> GatewayResult<()> {
        self.set_state(ConnectionState::Connecting);

        let fetched = self.fetch().await;
        if fetched.is_ok() {
            self.set_state(ConnectionState::Fetching);
        }

        if self.inner.config.register {
            if let Err(e) = self.register().await {
                warn!(error = %e, "initial eureka registration failed, will retry");
            }
            let handle = tokio::spawn(self.clone().heartbeat_loop(shutdown.clone()));
            if let Some(previous) = self.inner.heartbeat.lock().replace(handle) {
                previous.abort();
            }
        }
        tokio::spawn(self.clone().refresh_loop(shutdown));

        fetched.map(|_| ()).map_err(|e| match e {
            GatewayError::Connect { .. } => e,
            other => GatewayError::connect("eureka", other.to_string()),
        })
    }

    fn services(&self) -> RemoteCollection {
        self.inner.applications.read().clone().unwrap_or_default()
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    async fn deregister(&self) -> GatewayResult<()> {
        if !self.inner.config.register {
            return Ok(());
        }

        // A registration still in flight must not land after the DELETE
        let heartbeat = self.inner.heartbeat.lock().take();
        if let Some(mut handle) = heartbeat {
            if tokio::time::timeout(HEARTBEAT_STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("eureka heartbeat still running, aborting it");
                handle.abort();
            }
        }

        info!("client instance going to de-register");
        let response = self
            .authorize(self.inner.http.delete(self.instance_url()))
            .send()
            .await
            .map_err(|e| GatewayError::connect("eureka", e.to_string()))?;

        self.set_state(ConnectionState::Disconnected);
        if response.status().is_success() {
            info!("application instance de-registered");
            Ok(())
        } else {
            Err(GatewayError::discovery(format!(
                "eureka de-registration returned {}",
                response.status()
            )))
        }
    }
}

// Eureka JSON model. Older servers emit a bare object where a list is expected.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationsEnvelope {
    applications: Applications,
}

#[derive(Debug, Deserialize)]
struct Applications {
    #[serde(default)]
    application: OneOrMany<Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    name: String,
    #[serde(default)]
    instance: OneOrMany<InstanceInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceInfo {
    ip_addr: String,
    #[serde(default)]
    status: String,
    port: Option<PortInfo>,
    secure_port: Option<PortInfo>,
}

#[derive(Debug, Deserialize)]
struct PortInfo {
    #[serde(rename = "$")]
    port: u16,
    #[serde(rename = "@enabled", default)]
    enabled: serde_json::Value,
}

impl PortInfo {
    fn is_enabled(&self) -> bool {
        match &self.enabled {
            serde_json::Value::Bool(enabled) => *enabled,
            serde_json::Value::String(enabled) => enabled.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

impl ApplicationsEnvelope {
    fn into_collection(self) -> RemoteCollection {
        let mut collection = RemoteCollection::new();
        for app in self.applications.application.into_vec() {
            for instance in app.instance.into_vec() {
                let (scheme, port) = match (&instance.secure_port, &instance.port) {
                    (Some(secure), _) if secure.is_enabled() => (Scheme::Https, secure.port),
                    (_, Some(plain)) => (Scheme::Http, plain.port),
                    _ => (Scheme::Http, 0),
                };
                collection.insert(Remote::new(
                    &app.name,
                    scheme,
                    instance.ip_addr,
                    port,
                    instance.status,
                ));
            }
        }
        collection
    }
}
