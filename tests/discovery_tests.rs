//! # Discovery Client Integration Tests
//!
//! - Eureka against a `wiremock` server: fetch, registration, heartbeat re-registration
//!   on 404, basic auth, de-registration
//! - Static registry files loaded through `tempfile`
//! - Push discovery over an in-process transport built on tokio channels

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use service_gateway::core::config::{EurekaConfig, PushConfig, RegistryConfig};
use service_gateway::core::error::{GatewayError, GatewayResult};
use service_gateway::discovery::client::{ConnectionState, DiscoveryClient, LocalInstance};
use service_gateway::discovery::{
    DiscoverySource, EurekaDiscovery, PushDiscovery, PushRecord, PushTransport, ServiceRegistry,
    StaticDiscovery,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn local() -> LocalInstance {
    LocalInstance::new("gateway", "127.0.0.1", 3000)
}

fn eureka_config(url: String) -> EurekaConfig {
    EurekaConfig {
        enabled: true,
        url,
        register: false,
        refresh_interval: Duration::from_secs(3600),
        heartbeat_interval: Duration::from_secs(3600),
        ..EurekaConfig::default()
    }
}

fn applications_body() -> serde_json::Value {
    json!({
        "applications": {
            "versions__delta": "1",
            "application": [{
                "name": "SERVICE-A",
                "instance": [
                    {"ipAddr": "10.0.0.1", "status": "UP", "port": {"$": 3101, "@enabled": "true"}},
                    {"ipAddr": "10.0.0.2", "status": "UP", "port": {"$": 3102, "@enabled": "true"}}
                ]
            }]
        }
    })
}

async fn requests_matching(server: &MockServer, verb: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.to_string() == verb && request.url.path() == url_path)
        .count()
}

#[tokio::test]
async fn test_eureka_fetch_feeds_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/eureka/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications_body()))
        .mount(&server)
        .await;

    let client = Arc::new(
        EurekaDiscovery::new(eureka_config(format!("{}/eureka/", server.uri())), local()).unwrap(),
    );
    let registry = ServiceRegistry::new(
        vec![DiscoverySource::required(client.clone())],
        RegistryConfig::default(),
    );

    let shutdown = CancellationToken::new();
    registry.connect_all(&shutdown).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Fetching);

    registry.refresh();
    assert_eq!(registry.get("service-a").unwrap(), "10.0.0.1:3101");
    assert_eq!(registry.get("service-a").unwrap(), "10.0.0.2:3102");
    shutdown.cancel();
}

#[tokio::test]
async fn test_eureka_unreachable_is_connect_error() {
    let client = EurekaDiscovery::new(eureka_config("http://127.0.0.1:1".to_string()), local()).unwrap();
    let shutdown = CancellationToken::new();

    let result = client.connect(shutdown.clone()).await;
    assert!(matches!(result, Err(GatewayError::Connect { .. })));
    assert!(client.services().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn test_eureka_failed_refresh_keeps_previous_inventory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = EurekaDiscovery::new(eureka_config(server.uri()), local()).unwrap();
    assert_eq!(client.fetch().await.unwrap().instance_count(), 2);
    assert!(client.fetch().await.is_err());
    assert_eq!(client.services().instance_count(), 2);
}

#[tokio::test]
async fn test_eureka_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications_body()))
        .expect(1)
        .mount(&server)
        .await;

    let config = EurekaConfig {
        login: Some("user".to_string()),
        password: Some("pass".to_string()),
        ..eureka_config(server.uri())
    };
    let client = EurekaDiscovery::new(config, local()).unwrap();
    assert_eq!(client.fetch().await.unwrap().instance_count(), 2);
}

#[tokio::test]
async fn test_eureka_heartbeat_not_found_registers_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/apps/GATEWAY"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/apps/GATEWAY/GATEWAY:127.0.0.1:3000"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/apps/GATEWAY/GATEWAY:127.0.0.1:3000"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = EurekaConfig {
        register: true,
        heartbeat_interval: Duration::from_millis(30),
        ..eureka_config(server.uri())
    };
    let client = EurekaDiscovery::new(config, local()).unwrap();
    let shutdown = CancellationToken::new();

    client.connect(shutdown.clone()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Registered);

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    client.deregister().await.unwrap();

    assert!(requests_matching(&server, "PUT", "/apps/GATEWAY/GATEWAY:127.0.0.1:3000").await >= 1);
    assert!(requests_matching(&server, "POST", "/apps/GATEWAY").await >= 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        requests_matching(&server, "DELETE", "/apps/GATEWAY/GATEWAY:127.0.0.1:3000").await,
        1
    );
}

#[tokio::test]
async fn test_eureka_deregister_waits_for_in_flight_heartbeat() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/apps/GATEWAY"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/apps/GATEWAY/GATEWAY:127.0.0.1:3000"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/apps/GATEWAY/GATEWAY:127.0.0.1:3000"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = EurekaConfig {
        register: true,
        heartbeat_interval: Duration::from_millis(30),
        ..eureka_config(server.uri())
    };
    let client = EurekaDiscovery::new(config, local()).unwrap();
    let shutdown = CancellationToken::new();
    client.connect(shutdown.clone()).await.unwrap();

    // The first heartbeat is now waiting on the slow 404, which triggers a re-registration
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    client.deregister().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let requests = server.received_requests().await.unwrap_or_default();
    let last = requests.last().expect("no requests recorded");
    assert_eq!(last.method.to_string(), "DELETE");
    assert_eq!(
        requests_matching(&server, "DELETE", "/apps/GATEWAY/GATEWAY:127.0.0.1:3000").await,
        1
    );
    assert_eq!(requests_matching(&server, "POST", "/apps/GATEWAY").await, 2);
}

#[tokio::test]
async fn test_static_registry_from_json_and_yaml() {
    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        json_file,
        r#"[{{"name": "service-a", "instances": ["http://backend:3101", "backend:3102"]}}]"#
    )
    .unwrap();

    let client = StaticDiscovery::load_from_file(json_file.path()).await.unwrap();
    let services = client.services();
    assert_eq!(services.get("SERVICE-A").len(), 2);

    let mut yaml_file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    writeln!(yaml_file, "- name: service-b").unwrap();
    writeln!(yaml_file, "  instances:").unwrap();
    writeln!(yaml_file, "    - grpc://backend:9000").unwrap();

    let client = StaticDiscovery::load_from_file(yaml_file.path()).await.unwrap();
    let remotes = client.services().get("service-b").to_vec();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].to_string(), "grpc://backend:9000");
}

#[tokio::test]
async fn test_static_registry_rejects_unknown_extension() {
    let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
    writeln!(file, "service-a = backend:3101").unwrap();

    let result = StaticDiscovery::load_from_file(file.path()).await;
    assert!(matches!(result, Err(GatewayError::Configuration { .. })));
}

/// In-process push registry
#[derive(Default)]
struct ChannelTransport {
    records: Mutex<Vec<PushRecord>>,
    published: Mutex<Vec<(String, Bytes)>>,
    changes: Mutex<Option<mpsc::Sender<Bytes>>>,
    failures_left: AtomicUsize,
}

impl ChannelTransport {
    fn with_records(records: Vec<PushRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    fn published_subjects(&self) -> Vec<String> {
        self.published.lock().iter().map(|(subject, _)| subject.clone()).collect()
    }

    async fn announce_change(&self, records: Vec<PushRecord>) {
        *self.records.lock() = records;
        let sender = self.changes.lock().clone();
        if let Some(sender) = sender {
            sender.send(Bytes::from_static(b"changed")).await.unwrap();
        }
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    async fn connect(&self) -> GatewayResult<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::connect("push", "registry offline"));
        }
        Ok(())
    }

    async fn publish(&self, subject: String, payload: Bytes) -> GatewayResult<()> {
        self.published.lock().push((subject, payload));
        Ok(())
    }

    async fn request(&self, _subject: String, _payload: Bytes) -> GatewayResult<Bytes> {
        let records = self.records.lock().clone();
        Ok(Bytes::from(serde_json::to_vec(&records)?))
    }

    async fn subscribe(&self, _subject: String) -> GatewayResult<BoxStream<'static, Bytes>> {
        let (sender, receiver) = mpsc::channel(16);
        *self.changes.lock() = Some(sender);
        Ok(ReceiverStream::new(receiver).boxed())
    }
}

fn record(name: &str, endpoints: &[&str], state: &str) -> PushRecord {
    PushRecord {
        name: name.to_string(),
        endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        state: state.to_string(),
    }
}

fn push_config() -> PushConfig {
    PushConfig {
        enabled: true,
        retry_interval: Duration::from_millis(20),
        ..PushConfig::default()
    }
}

#[tokio::test]
async fn test_push_connect_fetch_and_change_notification() {
    let transport = Arc::new(ChannelTransport::with_records(vec![
        record("service-a", &["http://backend:3101"], "UP"),
        record("gateway", &["http://127.0.0.1:3000"], "UP"),
    ]));
    let client = PushDiscovery::with_transport(transport.clone(), &push_config(), local());
    let mut notifications = client.notifications().unwrap();

    let shutdown = CancellationToken::new();
    client.connect(shutdown.clone()).await.unwrap();

    assert_eq!(client.state(), ConnectionState::Registered);
    assert_eq!(client.services().get("SERVICE-A").len(), 1);
    assert!(client.services().get("GATEWAY").is_empty());
    assert_eq!(transport.published_subjects(), vec!["discovery.register"]);
    assert_eq!(notifications.recv().await.unwrap().source, "push");

    transport
        .announce_change(vec![
            record("service-a", &["http://backend:3101", "http://backend:3102"], "UP"),
            record("service-b", &["http://backend:3201"], "UP"),
        ])
        .await;

    tokio::time::timeout(Duration::from_secs(1), notifications.recv())
        .await
        .expect("no change notification")
        .unwrap();
    assert_eq!(client.services().get("service-a").len(), 2);
    assert_eq!(client.services().get("service-b").len(), 1);

    client.deregister().await.unwrap();
    assert_eq!(
        transport.published_subjects(),
        vec!["discovery.register", "discovery.deregister"]
    );
    let (_, payload) = transport.published.lock().last().cloned().unwrap();
    let withdrawn: PushRecord = serde_json::from_slice(&payload).unwrap();
    assert_eq!(withdrawn.state, "DOWN");

    shutdown.cancel();
}

#[tokio::test]
async fn test_push_retries_until_registry_is_reachable() {
    let transport = Arc::new(ChannelTransport::with_records(vec![record(
        "service-a",
        &["http://backend:3101"],
        "UP",
    )]));
    transport.failures_left.store(2, Ordering::SeqCst);

    let client = PushDiscovery::with_transport(transport.clone(), &push_config(), local());
    let shutdown = CancellationToken::new();

    let result = client.connect(shutdown.clone()).await;
    assert!(matches!(result, Err(GatewayError::Connect { .. })));
    assert!(client.services().is_empty());

    let mut connected = false;
    for _ in 0..50 {
        if client.state() == ConnectionState::Registered {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected, "push client never reconnected");
    assert_eq!(client.services().get("service-a").len(), 1);
    shutdown.cancel();
}
