//! # Rate Limiting Tests
//!
//! Rule selection and the deny/delay/off modes driven through the axum middleware.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::{middleware, Router};
use axum_test::TestServer;
use service_gateway::core::config::RateLimitConfig;
use service_gateway::middleware::rate_limiting::{
    rate_limit_middleware, InMemoryStorage, LimiterMode, RateLimitRules, RateLimiter, RateRule,
};
use service_gateway::routing::matcher::PatternSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn app(limiter: RateLimiter) -> TestServer {
    let router = Router::new()
        .fallback(|| async { "ok" })
        .layer(middleware::from_fn_with_state(Arc::new(limiter), rate_limit_middleware));
    TestServer::new(router).unwrap()
}

fn forwarded_for(ip: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_static(ip),
    )
}

#[test]
fn test_first_registered_rule_wins() {
    let rules = RateLimitRules::new(RateRule::global(100, Duration::from_secs(60)))
        .with_rule(RateRule::parse("*/service-a/*:10:10s").unwrap())
        .with_rule(RateRule::parse("*/api/*:5:5s").unwrap());

    let rule = rules.rule_for("/api/service-a/x");
    assert_eq!(rule.pattern(), Some("*/service-a/*"));
    assert_eq!(rule.limit(), 10);
    assert_eq!(rule.period(), Duration::from_secs(10));
}

#[test]
fn test_rule_order_differs_from_pattern_set_order() {
    let rules = RateLimitRules::new(RateRule::global(100, Duration::from_secs(60)))
        .with_rule(RateRule::parse("*/api/*:5:5s").unwrap())
        .with_rule(RateRule::parse("*/service-a/*:10:10s").unwrap());
    let patterns = PatternSet::new(["*/api/*", "*/service-a/*"]).unwrap();

    assert_eq!(rules.rule_for("/api/service-a/x").pattern(), Some("*/api/*"));
    assert_eq!(patterns.first_match("/api/service-a/x"), Some("*/service-a/*"));
}

#[test]
fn test_malformed_custom_rules_are_skipped() {
    let config = RateLimitConfig {
        mode: LimiterMode::Deny,
        custom: vec![
            "*/service-a/*:10:10s".to_string(),
            "broken".to_string(),
            "*/b/*:many:1s".to_string(),
        ],
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::from_config(&config).unwrap();
    assert_eq!(limiter.rules().custom().len(), 1);
    assert_eq!(limiter.mode(), LimiterMode::Deny);
}

#[tokio::test]
async fn test_deny_mode_rejects_with_retry_after() {
    let limiter = RateLimiter::new(
        RateLimitRules::new(RateRule::global(2, Duration::from_secs(30))),
        LimiterMode::Deny,
        Arc::new(InMemoryStorage::new()),
    );
    let server = app(limiter);
    let (name, value) = forwarded_for("203.0.113.1");

    for _ in 0..2 {
        server
            .get("/svc/x")
            .add_header(name.clone(), value.clone())
            .await
            .assert_status_ok();
    }

    let denied = server.get("/svc/x").add_header(name, value).await;
    denied.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = denied
        .header("retry-after")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=30).contains(&retry_after));

    let body: serde_json::Value = denied.json();
    assert_eq!(body["error"]["code"], 429);
}

#[tokio::test]
async fn test_callers_and_rules_count_independently() {
    let rules = RateLimitRules::new(RateRule::global(5, Duration::from_secs(60)))
        .with_rule(RateRule::custom("*/service-a/*", 1, Duration::from_secs(60)).unwrap());
    let limiter = RateLimiter::new(rules, LimiterMode::Deny, Arc::new(InMemoryStorage::new()));
    let server = app(limiter);
    let (name, first) = forwarded_for("198.51.100.1");
    let (_, second) = forwarded_for("198.51.100.2");

    server
        .get("/api/service-a/x")
        .add_header(name.clone(), first.clone())
        .await
        .assert_status_ok();
    server
        .get("/api/service-a/x")
        .add_header(name.clone(), first.clone())
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    server
        .get("/api/other")
        .add_header(name.clone(), first)
        .await
        .assert_status_ok();
    server
        .get("/api/service-a/x")
        .add_header(name, second)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_delay_mode_holds_request_until_window_resets() {
    let limiter = RateLimiter::new(
        RateLimitRules::new(RateRule::global(1, Duration::from_millis(300))),
        LimiterMode::Delay,
        Arc::new(InMemoryStorage::new()),
    );
    let server = app(limiter);

    server.get("/svc/x").await.assert_status_ok();

    let started = Instant::now();
    server.get("/svc/x").await.assert_status_ok();
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_off_mode_never_limits() {
    let limiter = RateLimiter::new(
        RateLimitRules::new(RateRule::global(1, Duration::from_secs(60))),
        LimiterMode::Off,
        Arc::new(InMemoryStorage::new()),
    );
    let server = app(limiter);

    for _ in 0..5 {
        server.get("/svc/x").await.assert_status_ok();
    }
}

#[tokio::test]
async fn test_skip_patterns_from_config() {
    let config = RateLimitConfig {
        limit: 1,
        mode: LimiterMode::Deny,
        skip: vec!["*/health".to_string()],
        ..RateLimitConfig::default()
    };
    let server = app(RateLimiter::from_config(&config).unwrap());

    for _ in 0..3 {
        server.get("/svc/health").await.assert_status_ok();
    }
    server.get("/svc/data").await.assert_status_ok();
    server
        .get("/svc/data")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}
