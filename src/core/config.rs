//! # Configuration Module
//!
//! Configuration for the gateway is assembled in three layers:
//! 1. Built-in defaults (`GatewayConfig::default()`)
//! 2. An optional file named by `GATEWAY_CONFIG_FILE` (YAML, JSON or TOML, picked by extension)
//! 3. `GATEWAY_*` environment variables, which always win
//!
//! After layering, `validate()` collects every problem it can find and reports them
//! together in a single `GatewayError::Configuration`.
//!
//! ## Key Features
//! - serde deserialization with `#[serde(default)]` on every section, so partial files work
//! - Human readable durations (`"5s"`, `"1m"`) through `humantime` / `humantime-serde`
//! - Discovery backends can be marked `required`, which turns connection failures fatal

use crate::core::error::{GatewayError, GatewayResult};
use crate::middleware::rate_limiting::LimiterMode;
use crate::routing::path::ApiMarker;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "GATEWAY_CONFIG_FILE";

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener ports and the identity the gateway advertises to registries
    pub server: ServerConfig,

    /// Outbound connection settings used by the reverse proxy
    pub proxy: ProxyConfig,

    /// Directory refresh schedule
    pub registry: RegistryConfig,

    /// Discovery backends
    pub discovery: DiscoveryConfig,

    /// Rate limiter rules and mode
    pub rate_limit: RateLimitConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// Listener and identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Application name used when registering with discovery backends
    pub name: String,

    /// Port of the proxy listener
    pub service_port: u16,

    /// Port of the monitoring listener (status page, listing, metrics)
    pub monitoring_port: u16,

    /// Address both listeners bind to
    pub bind_address: String,

    /// IP address announced to discovery backends
    pub advertised_ip: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "api-gateway".to_string(),
            service_port: 3000,
            monitoring_port: 3001,
            bind_address: "0.0.0.0".to_string(),
            advertised_ip: "127.0.0.1".to_string(),
        }
    }
}

/// Outbound HTTP settings for forwarding requests to upstream instances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Dial timeout for new upstream connections
    #[serde(with = "humantime_serde")]
    pub conn_timeout: Duration,

    /// TCP keep-alive interval for pooled upstream connections
    #[serde(with = "humantime_serde")]
    pub conn_keepalive: Duration,

    /// Budget for the TLS handshake on top of the dial timeout.
    ///
    /// The HTTP client has a single connect deadline, so this value is summed with
    /// `conn_timeout`: a new TLS connection may take up to
    /// `conn_timeout + tls_handshake_timeout` before the dial fails.
    #[serde(with = "humantime_serde")]
    pub tls_handshake_timeout: Duration,

    /// Whole-request timeout for a forwarded call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Largest request body, in bytes, buffered for forwarding; larger bodies get `413`
    pub max_body_size: usize,

    /// How the literal `api` path segment is treated when forwarding
    pub api_marker: ApiMarker,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            conn_timeout: Duration::from_secs(1),
            conn_keepalive: Duration::from_secs(5),
            tls_handshake_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            max_body_size: 16 * 1024 * 1024,
            api_marker: ApiMarker::default(),
        }
    }
}

impl ProxyConfig {
    /// Connect deadline handed to the upstream client: dial plus TLS handshake
    pub fn connect_timeout(&self) -> Duration {
        self.conn_timeout + self.tls_handshake_timeout
    }
}

/// Refresh schedule for the service directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Delay before the first timed refresh
    #[serde(with = "humantime_serde")]
    pub refresh_initial_delay: Duration,

    /// Interval between timed refreshes
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_initial_delay: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Discovery backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Polling registry (Eureka REST API)
    pub eureka: EurekaConfig,

    /// Push-notified registry over NATS
    pub push: PushConfig,

    /// Static registry file (JSON or YAML)
    pub static_registry_file: Option<PathBuf>,
}

/// Eureka polling client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EurekaConfig {
    pub enabled: bool,

    /// Base URL of the Eureka REST API, e.g. `http://eureka:8761/eureka`
    pub url: String,

    pub login: Option<String>,
    pub password: Option<String>,

    /// Interval between fetches of `/apps`
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Interval between heartbeats for the gateway's own registration
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Register the gateway itself as an instance
    pub register: bool,

    /// Fail startup when the first connection attempt fails
    pub required: bool,
}

impl Default for EurekaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            login: None,
            password: None,
            refresh_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            register: true,
            required: false,
        }
    }
}

/// NATS push client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,

    /// NATS server URLs
    pub servers: Vec<String>,

    /// Subject prefix; the client uses `{prefix}.register`, `{prefix}.discover`,
    /// `{prefix}.changed` and `{prefix}.deregister`
    pub subject_prefix: String,

    /// Fixed delay between connection attempts
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Fail startup when the first connection attempt fails
    pub required: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: vec!["nats://127.0.0.1:4222".to_string()],
            subject_prefix: "discovery".to_string(),
            retry_interval: Duration::from_secs(5),
            required: false,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per period by the global rule
    pub limit: u64,

    /// Window of the global rule
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    pub mode: LimiterMode,

    /// Pattern-scoped rules as `pattern:limit:period`, evaluated in order
    pub custom: Vec<String>,

    /// Wildcard patterns that bypass limiting entirely
    pub skip: Vec<String>,

    /// How often expired counters are purged from storage
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            period: Duration::from_secs(60),
            mode: LimiterMode::Off,
            custom: Vec::new(),
            skip: Vec::new(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// `json` or `text`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build the effective configuration: file named by `GATEWAY_CONFIG_FILE` (if any),
    /// then environment overrides, then validation
    pub async fn load() -> GatewayResult<Self> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()).await?,
            _ => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file, choosing the format from its extension
    pub async fn from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse YAML config: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e))),
            "toml" => toml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse TOML config: {}", e))),
            other => Err(GatewayError::config(format!(
                "Unsupported config file extension '{}'",
                other
            ))),
        }
    }

    /// Apply `GATEWAY_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        // Server
        if let Ok(name) = env::var("GATEWAY_NAME") {
            self.server.name = name;
        }
        if let Ok(port) = env::var("GATEWAY_SERVICE_PORT") {
            self.server.service_port = parse_env("GATEWAY_SERVICE_PORT", &port)?;
        }
        if let Ok(port) = env::var("GATEWAY_MONITORING_PORT") {
            self.server.monitoring_port = parse_env("GATEWAY_MONITORING_PORT", &port)?;
        }
        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(ip) = env::var("GATEWAY_ADVERTISED_IP") {
            self.server.advertised_ip = ip;
        }

        // Proxy
        if let Ok(value) = env::var("GATEWAY_TARGET_CONN_TIMEOUT") {
            self.proxy.conn_timeout = parse_duration_env("GATEWAY_TARGET_CONN_TIMEOUT", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_TARGET_CONN_KEEPALIVE") {
            self.proxy.conn_keepalive =
                parse_duration_env("GATEWAY_TARGET_CONN_KEEPALIVE", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_TARGET_TLS_HANDSHAKE_TIMEOUT") {
            self.proxy.tls_handshake_timeout =
                parse_duration_env("GATEWAY_TARGET_TLS_HANDSHAKE_TIMEOUT", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_REQUEST_TIMEOUT") {
            self.proxy.request_timeout = parse_duration_env("GATEWAY_REQUEST_TIMEOUT", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_MAX_BODY_SIZE") {
            self.proxy.max_body_size = parse_env("GATEWAY_MAX_BODY_SIZE", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_API_MARKER") {
            self.proxy.api_marker = parse_env("GATEWAY_API_MARKER", &value)?;
        }

        // Registry
        if let Ok(value) = env::var("GATEWAY_REGISTRY_REFRESH_INITIAL_DELAY") {
            self.registry.refresh_initial_delay =
                parse_duration_env("GATEWAY_REGISTRY_REFRESH_INITIAL_DELAY", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_REGISTRY_REFRESH_INTERVAL") {
            self.registry.refresh_interval =
                parse_duration_env("GATEWAY_REGISTRY_REFRESH_INTERVAL", &value)?;
        }

        // Eureka
        let eureka = &mut self.discovery.eureka;
        if let Ok(value) = env::var("GATEWAY_EUREKA_ENABLED") {
            eureka.enabled = parse_env("GATEWAY_EUREKA_ENABLED", &value)?;
        }
        if let Ok(url) = env::var("GATEWAY_EUREKA_URL") {
            eureka.url = url;
        }
        if let Ok(login) = env::var("GATEWAY_EUREKA_LOGIN") {
            eureka.login = Some(login);
        }
        if let Ok(password) = env::var("GATEWAY_EUREKA_PASSWORD") {
            eureka.password = Some(password);
        }
        if let Ok(value) = env::var("GATEWAY_EUREKA_REFRESH_INTERVAL") {
            eureka.refresh_interval = parse_duration_env("GATEWAY_EUREKA_REFRESH_INTERVAL", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_EUREKA_HEARTBEAT_INTERVAL") {
            eureka.heartbeat_interval =
                parse_duration_env("GATEWAY_EUREKA_HEARTBEAT_INTERVAL", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_EUREKA_REGISTER") {
            eureka.register = parse_env("GATEWAY_EUREKA_REGISTER", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_EUREKA_REQUIRED") {
            eureka.required = parse_env("GATEWAY_EUREKA_REQUIRED", &value)?;
        }

        // Push
        let push = &mut self.discovery.push;
        if let Ok(value) = env::var("GATEWAY_PUSH_ENABLED") {
            push.enabled = parse_env("GATEWAY_PUSH_ENABLED", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_PUSH_SERVERS") {
            push.servers = split_list(&value);
        }
        if let Ok(prefix) = env::var("GATEWAY_PUSH_SUBJECT_PREFIX") {
            push.subject_prefix = prefix;
        }
        if let Ok(value) = env::var("GATEWAY_PUSH_RETRY_INTERVAL") {
            push.retry_interval = parse_duration_env("GATEWAY_PUSH_RETRY_INTERVAL", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_PUSH_REQUIRED") {
            push.required = parse_env("GATEWAY_PUSH_REQUIRED", &value)?;
        }

        // Static registry
        if let Ok(path) = env::var("GATEWAY_STATIC_REGISTRY_FILE") {
            self.discovery.static_registry_file = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        // Rate limiting
        if let Ok(value) = env::var("GATEWAY_LIMITER_LIMIT") {
            self.rate_limit.limit = parse_env("GATEWAY_LIMITER_LIMIT", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_LIMITER_PERIOD") {
            self.rate_limit.period = parse_duration_env("GATEWAY_LIMITER_PERIOD", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_LIMITER_MODE") {
            self.rate_limit.mode = parse_env("GATEWAY_LIMITER_MODE", &value)?;
        }
        if let Ok(value) = env::var("GATEWAY_LIMITER_CUSTOM") {
            self.rate_limit.custom = split_list(&value);
        }
        if let Ok(value) = env::var("GATEWAY_LIMITER_SKIP") {
            self.rate_limit.skip = split_list(&value);
        }
        if let Ok(value) = env::var("GATEWAY_RATE_LIMIT_CLEANUP_INTERVAL") {
            self.rate_limit.cleanup_interval =
                parse_duration_env("GATEWAY_RATE_LIMIT_CLEANUP_INTERVAL", &value)?;
        }

        // Logging
        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.name.trim().is_empty() {
            errors.push("server name cannot be empty".to_string());
        }
        if self.server.service_port == 0 {
            errors.push("service_port must be greater than 0".to_string());
        }
        if self.server.monitoring_port == 0 {
            errors.push("monitoring_port must be greater than 0".to_string());
        }
        if self.server.service_port == self.server.monitoring_port {
            errors.push("service_port and monitoring_port must differ".to_string());
        }
        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.proxy.conn_timeout.is_zero() {
            errors.push("target conn_timeout must be greater than 0".to_string());
        }
        if self.proxy.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }
        if self.proxy.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        if self.registry.refresh_interval.is_zero() {
            errors.push("registry refresh_interval must be greater than 0".to_string());
        }

        let eureka = &self.discovery.eureka;
        if eureka.enabled {
            if eureka.url.trim().is_empty() {
                errors.push("eureka is enabled but no url is configured".to_string());
            } else if let Err(e) = Url::parse(&eureka.url) {
                errors.push(format!("eureka url '{}' is invalid: {}", eureka.url, e));
            }
            if eureka.refresh_interval.is_zero() {
                errors.push("eureka refresh_interval must be greater than 0".to_string());
            }
            if eureka.register && eureka.heartbeat_interval.is_zero() {
                errors.push("eureka heartbeat_interval must be greater than 0".to_string());
            }
        }

        let push = &self.discovery.push;
        if push.enabled {
            if push.servers.is_empty() {
                errors.push("push discovery is enabled but no servers are configured".to_string());
            }
            if push.subject_prefix.trim().is_empty() {
                errors.push("push subject_prefix cannot be empty".to_string());
            }
            if push.retry_interval.is_zero() {
                errors.push("push retry_interval must be greater than 0".to_string());
            }
        }

        if self.rate_limit.period.is_zero() {
            errors.push("rate limit period must be greater than 0".to_string());
        }
        if self.rate_limit.cleanup_interval.is_zero() {
            errors.push("rate limit cleanup_interval must be greater than 0".to_string());
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            other => errors.push(format!("unknown log format '{}'", other)),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(errors.join("; ")))
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> GatewayResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid {}: {}", name, e)))
}

fn parse_duration_env(name: &str, value: &str) -> GatewayResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| GatewayError::config(format!("Invalid {}: {}", name, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    // Tests touching process environment run one at a time
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_default_config_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.refresh_initial_delay, Duration::from_secs(5));
        assert_eq!(config.registry.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.rate_limit.mode, LimiterMode::Off);
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
server:
  name: edge
  service_port: 8080
  monitoring_port: 8081
registry:
  refresh_interval: 15s
rate_limit:
  mode: deny
  custom:
    - "*/service-a/*:10:10s"
"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.server.name, "edge");
        assert_eq!(config.server.service_port, 8080);
        assert_eq!(config.registry.refresh_interval, Duration::from_secs(15));
        assert_eq!(config.registry.refresh_initial_delay, Duration::from_secs(5));
        assert_eq!(config.rate_limit.mode, LimiterMode::Deny);
        assert_eq!(config.rate_limit.custom, vec!["*/service-a/*:10:10s"]);
    }

    #[tokio::test]
    async fn test_unknown_limiter_mode_in_file_disables_limiting() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "rate_limit:\n  mode: throttle\n  limit: 3").unwrap();

        let config = GatewayConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.rate_limit.mode, LimiterMode::Off);
        assert_eq!(config.rate_limit.limit, 3);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_config_from_json_and_toml_files() {
        let mut json = Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"{{"proxy": {{"api_marker": "strip", "conn_timeout": "2s"}}}}"#).unwrap();
        let config = GatewayConfig::from_file(json.path()).await.unwrap();
        assert_eq!(config.proxy.api_marker, ApiMarker::Strip);
        assert_eq!(config.proxy.conn_timeout, Duration::from_secs(2));

        let mut toml_file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            toml_file,
            "[discovery.eureka]\nenabled = true\nurl = \"http://eureka:8761/eureka\"\n"
        )
        .unwrap();
        let config = GatewayConfig::from_file(toml_file.path()).await.unwrap();
        assert!(config.discovery.eureka.enabled);
        assert_eq!(config.discovery.eureka.url, "http://eureka:8761/eureka");
    }

    #[test]
    fn test_connect_timeout_sums_dial_and_handshake() {
        let proxy = ProxyConfig {
            conn_timeout: Duration::from_millis(1500),
            tls_handshake_timeout: Duration::from_millis(500),
            ..ProxyConfig::default()
        };
        assert_eq!(proxy.connect_timeout(), Duration::from_secs(2));
        assert_eq!(ProxyConfig::default().connect_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unsupported_config_extension() {
        let file = Builder::new().suffix(".ini").tempfile().unwrap();
        let err = GatewayConfig::from_file(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported config file extension"));
    }

    #[test]
    fn test_environment_variable_overrides() {
        let _guard = ENV_LOCK.lock();
        env::set_var("GATEWAY_SERVICE_PORT", "9999");
        env::set_var("GATEWAY_REGISTRY_REFRESH_INTERVAL", "90s");
        env::set_var("GATEWAY_LIMITER_MODE", "delay");
        env::set_var("GATEWAY_LIMITER_CUSTOM", "*/a/*:5:5s, */b/*:1:1m");
        env::set_var("GATEWAY_PUSH_SERVERS", "nats://a:4222,nats://b:4222");
        env::set_var("GATEWAY_MAX_BODY_SIZE", "1024");

        let mut config = GatewayConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("GATEWAY_SERVICE_PORT");
        env::remove_var("GATEWAY_REGISTRY_REFRESH_INTERVAL");
        env::remove_var("GATEWAY_LIMITER_MODE");
        env::remove_var("GATEWAY_LIMITER_CUSTOM");
        env::remove_var("GATEWAY_PUSH_SERVERS");
        env::remove_var("GATEWAY_MAX_BODY_SIZE");

        result.unwrap();
        assert_eq!(config.server.service_port, 9999);
        assert_eq!(config.registry.refresh_interval, Duration::from_secs(90));
        assert_eq!(config.rate_limit.mode, LimiterMode::Delay);
        assert_eq!(config.rate_limit.custom, vec!["*/a/*:5:5s", "*/b/*:1:1m"]);
        assert_eq!(config.discovery.push.servers.len(), 2);
        assert_eq!(config.proxy.max_body_size, 1024);
    }

    #[test]
    fn test_invalid_environment_variables() {
        let _guard = ENV_LOCK.lock();
        env::set_var("GATEWAY_MONITORING_PORT", "not-a-port");

        let mut config = GatewayConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var("GATEWAY_MONITORING_PORT");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Invalid GATEWAY_MONITORING_PORT"));
    }

    #[test]
    fn test_config_validation_collects_errors() {
        let mut config = GatewayConfig::default();
        config.server.monitoring_port = config.server.service_port;
        config.discovery.eureka.enabled = true;
        config.logging.format = "xml".to_string();
        config.proxy.max_body_size = 0;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("max_body_size must be greater than 0"));
        assert!(message.contains("must differ"));
        assert!(message.contains("eureka is enabled but no url"));
        assert!(message.contains("unknown log format"));
    }
}
