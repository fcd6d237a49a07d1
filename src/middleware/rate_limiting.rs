//! # Rate Limiting
//!
//! Three layers, from pure to effectful:
//!
//! 1. [`RateLimitRules`]: maps a request path to a [`RateRule`] and derives the
//!    counter key for a caller. Custom rules are checked in registration order and
//!    the first match wins; the global rule applies otherwise.
//! 2. [`RateLimitStorage`]: counts hits per key. [`InMemoryStorage`] is a fixed
//!    window counter on `DashMap`, purged periodically by a cleanup task.
//! 3. [`RateLimiter`] + [`rate_limit_middleware`]: combine rules, storage and the
//!    configured [`LimiterMode`] into an axum middleware.
//!
//! ## Modes
//!
//! - `off`: every request passes
//! - `deny`: over-limit requests get `429 Too Many Requests` with `Retry-After`
//! - `delay`: over-limit requests are held until the window resets, then proceed
//!
//! Custom rules are configured as `pattern:limit:period`, e.g. `*/service-a/*:10:10s`.

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::RateLimitConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::matcher::{compile_wildcard, PatternSet};

/// Key segment used for requests that fall through to the global rule
pub const GLOBAL_RULE_KEY: &str = "global";

/// Identity used when the caller cannot be identified
pub const ANONYMOUS: &str = "anonymous";

/// What the limiter does with a request that exceeded its rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterMode {
    #[default]
    Off,
    Deny,
    Delay,
}

/// Unknown or empty values turn limiting off
impl FromStr for LimiterMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "deny" => LimiterMode::Deny,
            "delay" => LimiterMode::Delay,
            "off" | "" => LimiterMode::Off,
            other => {
                warn!(mode = other, "unknown rate limiter mode, limiting disabled");
                LimiterMode::Off
            }
        })
    }
}

impl<'de> Deserialize<'de> for LimiterMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.parse::<LimiterMode>() {
            Ok(mode) => Ok(mode),
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for LimiterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterMode::Off => f.write_str("off"),
            LimiterMode::Deny => f.write_str("deny"),
            LimiterMode::Delay => f.write_str("delay"),
        }
    }
}

/// A limit applied to the requests of one caller over a fixed period
#[derive(Debug, Clone)]
pub struct RateRule {
    pattern: Option<String>,
    matcher: Option<Regex>,
    limit: u64,
    period: Duration,
}

impl RateRule {
    /// Fallback rule without a pattern
    pub fn global(limit: u64, period: Duration) -> Self {
        Self {
            pattern: None,
            matcher: None,
            limit,
            period,
        }
    }

    /// Pattern-scoped rule
    pub fn custom(pattern: &str, limit: u64, period: Duration) -> GatewayResult<Self> {
        if period.is_zero() {
            return Err(GatewayError::config(format!(
                "rate rule '{}' has a zero period",
                pattern
            )));
        }
        Ok(Self {
            pattern: Some(pattern.to_string()),
            matcher: Some(compile_wildcard(pattern)?),
            limit,
            period,
        })
    }

    /// Parse `pattern:limit:period`
    pub fn parse(definition: &str) -> GatewayResult<Self> {
        let mut fields = definition.trim().splitn(3, ':');
        let (pattern, limit, period) = match (fields.next(), fields.next(), fields.next()) {
            (Some(pattern), Some(limit), Some(period)) if !pattern.is_empty() => {
                (pattern, limit, period)
            }
            _ => {
                return Err(GatewayError::config(format!(
                    "invalid rate rule '{}', expected pattern:limit:period",
                    definition
                )))
            }
        };

        let limit = limit.trim().parse::<u64>().map_err(|e| {
            GatewayError::config(format!("invalid limit in rate rule '{}': {}", definition, e))
        })?;
        let period = humantime::parse_duration(period.trim()).map_err(|e| {
            GatewayError::config(format!("invalid period in rate rule '{}': {}", definition, e))
        })?;

        Self::custom(pattern, limit, period)
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_global(&self) -> bool {
        self.pattern.is_none()
    }

    fn matches(&self, path: &str) -> bool {
        self.matcher
            .as_ref()
            .map(|matcher| matcher.is_match(path))
            .unwrap_or(false)
    }
}

/// Ordered rule list: custom rules first, in registration order, then the global rule
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    global: RateRule,
    custom: Vec<RateRule>,
}

impl RateLimitRules {
    pub fn new(global: RateRule) -> Self {
        Self {
            global,
            custom: Vec::new(),
        }
    }

    /// Append a custom rule; it is checked after every rule added before it
    pub fn with_rule(mut self, rule: RateRule) -> Self {
        self.custom.push(rule);
        self
    }

    pub fn push(&mut self, rule: RateRule) {
        self.custom.push(rule);
    }

    /// Rule governing `path`
    pub fn rule_for(&self, path: &str) -> &RateRule {
        self.custom
            .iter()
            .find(|rule| rule.matches(path))
            .unwrap_or(&self.global)
    }

    /// Counter key for a caller on `path`; each rule counts independently
    pub fn key_for(&self, identity: &str, path: &str) -> String {
        let rule = self.rule_for(path);
        format!("{}:{}", identity, rule.pattern().unwrap_or(GLOBAL_RULE_KEY))
    }

    pub fn global(&self) -> &RateRule {
        &self.global
    }

    pub fn custom(&self) -> &[RateRule] {
        &self.custom
    }
}

/// Outcome of counting one hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window resets
    pub reset_after: Duration,
}

/// Counter backend for the limiter
#[async_trait]
pub trait RateLimitStorage: Send + Sync {
    /// Count a hit for `key` under a fixed window of `period` allowing `limit` hits
    async fn hit(&self, key: &str, limit: u64, period: Duration) -> GatewayResult<RateLimitResult>;

    /// Drop expired windows, returning how many were removed
    async fn cleanup_expired(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    period: Duration,
    count: u64,
}

impl Window {
    fn expires(&self) -> Instant {
        self.started + self.period
    }
}

/// Fixed window counters kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    windows: DashMap<String, Window>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryStorage {
    async fn hit(&self, key: &str, limit: u64, period: Duration) -> GatewayResult<RateLimitResult> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            period,
            count: 0,
        });

        let window = entry.value_mut();
        if now >= window.expires() || window.period != period {
            *window = Window {
                started: now,
                period,
                count: 0,
            };
        }

        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        }

        Ok(RateLimitResult {
            allowed,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_after: window.expires().saturating_duration_since(now),
        })
    }

    async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires() > now);
        before.saturating_sub(self.windows.len())
    }
}

/// What to do with one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after: Duration },
    Delay { wait: Duration },
}

impl RateDecision {
    fn label(&self) -> &'static str {
        match self {
            RateDecision::Allow => "allow",
            RateDecision::Deny { .. } => "deny",
            RateDecision::Delay { .. } => "delay",
        }
    }
}

/// Rules, storage and mode combined
pub struct RateLimiter {
    rules: RateLimitRules,
    mode: LimiterMode,
    skip: PatternSet,
    storage: Arc<dyn RateLimitStorage>,
}

impl RateLimiter {
    pub fn new(rules: RateLimitRules, mode: LimiterMode, storage: Arc<dyn RateLimitStorage>) -> Self {
        Self {
            rules,
            mode,
            skip: PatternSet::default(),
            storage,
        }
    }

    /// Paths matching any of these patterns are never limited
    pub fn with_skip(mut self, skip: PatternSet) -> Self {
        self.skip = skip;
        self
    }

    /// Build from configuration; malformed custom rules are logged and skipped
    pub fn from_config(config: &RateLimitConfig) -> GatewayResult<Self> {
        let mut rules = RateLimitRules::new(RateRule::global(config.limit, config.period));
        for definition in &config.custom {
            match RateRule::parse(definition) {
                Ok(rule) => {
                    debug!(pattern = ?rule.pattern(), limit = rule.limit(), period = ?rule.period(), "custom rate rule");
                    rules.push(rule);
                }
                Err(e) => warn!(rule = %definition, error = %e, "skipping malformed rate rule"),
            }
        }

        let skip = PatternSet::new(config.skip.iter().cloned())?;
        info!(
            mode = %config.mode,
            limit = config.limit,
            period = ?config.period,
            custom_rules = rules.custom().len(),
            "rate limiter configured"
        );

        Ok(Self::new(rules, config.mode, Arc::new(InMemoryStorage::new())).with_skip(skip))
    }

    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    pub fn mode(&self) -> LimiterMode {
        self.mode
    }

    fn is_skipped(&self, path: &str) -> bool {
        !self.skip.is_empty() && self.skip.matches(path)
    }

    /// Count the request and decide what happens to it
    pub async fn check(&self, identity: &str, path: &str) -> GatewayResult<RateDecision> {
        if self.mode == LimiterMode::Off || self.is_skipped(path) {
            return Ok(RateDecision::Allow);
        }

        let rule = self.rules.rule_for(path);
        let key = self.rules.key_for(identity, path);
        let result = self.storage.hit(&key, rule.limit(), rule.period()).await?;

        let decision = if result.allowed {
            RateDecision::Allow
        } else {
            match self.mode {
                LimiterMode::Deny => RateDecision::Deny {
                    retry_after: result.reset_after,
                },
                LimiterMode::Delay => RateDecision::Delay {
                    wait: result.reset_after,
                },
                LimiterMode::Off => RateDecision::Allow,
            }
        };

        counter!("rate_limit_decisions_total", "decision" => decision.label()).increment(1);
        if decision != RateDecision::Allow {
            debug!(key = %key, decision = decision.label(), reset_after = ?result.reset_after, "rate limit exceeded");
        }
        Ok(decision)
    }

    /// Count a request that already waited out its window
    async fn record_after_wait(&self, identity: &str, path: &str) -> GatewayResult<()> {
        let rule = self.rules.rule_for(path);
        let key = self.rules.key_for(identity, path);
        self.storage.hit(&key, rule.limit(), rule.period()).await?;
        Ok(())
    }

    /// Periodically purge expired counters until shutdown
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = storage.cleanup_expired().await;
                        if removed > 0 {
                            debug!(removed, "purged expired rate limit windows");
                        }
                    }
                }
            }
        })
    }
}

/// Caller identity: first `X-Forwarded-For` entry, else the peer IP, else anonymous
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// axum middleware applying the limiter to every request
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);
    let path = request.uri().path().to_string();

    match limiter.check(&identity, &path).await {
        Ok(RateDecision::Allow) => next.run(request).await,
        Ok(RateDecision::Deny { retry_after }) => {
            let rule = limiter.rules().rule_for(&path);
            GatewayError::RateLimitExceeded {
                limit: rule.limit(),
                period: rule.period(),
                retry_after,
            }
            .into_response()
        }
        Ok(RateDecision::Delay { wait }) => {
            tokio::time::sleep(wait).await;
            if let Err(e) = limiter.record_after_wait(&identity, &path).await {
                warn!(error = %e, "failed to count delayed request");
            }
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "rate limit check failed, letting request through");
            next.run(request).await
        }
    }
}
