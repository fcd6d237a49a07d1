//! # Registry Benchmarks
//!
//! Hot-path costs of the gateway: ring selection, directory rebuilds, path
//! splitting and rate rule lookup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use service_gateway::core::config::RegistryConfig;
use service_gateway::core::types::{Remote, RemoteCollection, Scheme};
use service_gateway::discovery::registry::DirectorySnapshot;
use service_gateway::discovery::{DiscoverySource, ServiceRegistry, StaticDiscovery};
use service_gateway::load_balancing::ring::Ring;
use service_gateway::middleware::rate_limiting::{RateLimitRules, RateRule};
use service_gateway::routing::path::{ApiMarker, PathProcessor};

fn collection(services: usize, instances: usize) -> RemoteCollection {
    let mut collection = RemoteCollection::new();
    for s in 0..services {
        for i in 0..instances {
            collection.insert(Remote::new(
                &format!("service-{}", s),
                Scheme::Http,
                "10.0.0.1",
                3000 + i as u16,
                "UP",
            ));
        }
    }
    collection
}

fn benchmark_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_next");

    for &size in &[2usize, 16, 128] {
        let ring = Ring::new(
            (0..size)
                .map(|i| Remote::new("svc", Scheme::Http, "backend", 3000 + i as u16, "UP"))
                .collect(),
        );

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ring, |b, ring| {
            b.iter(|| black_box(ring.next()));
        });
    }

    group.finish();
}

fn benchmark_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let registry = ServiceRegistry::new(
        vec![DiscoverySource::optional(Arc::new(StaticDiscovery::from_map([
            ("service-a", vec!["backend:3101", "backend:3102", "backend:3103"]),
            ("service-b", vec!["backend:3201"]),
        ])))],
        RegistryConfig::default(),
    );
    registry.refresh();

    group.bench_function("select", |b| {
        b.iter(|| black_box(registry.select(black_box("SERVICE-A"))))
    });

    for &services in &[10usize, 100] {
        let source = collection(services, 4);
        group.bench_with_input(BenchmarkId::new("snapshot_build", services), &source, |b, source| {
            b.iter(|| black_box(DirectorySnapshot::build([source.clone()])))
        });
    }

    group.finish();
}

fn benchmark_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_processor");
    let preserve = PathProcessor::new(ApiMarker::Preserve);
    let strip = PathProcessor::new(ApiMarker::Strip);

    group.bench_function("split_preserve", |b| {
        b.iter(|| black_box(preserve.split(black_box("/api/service-a/widgets/42/parts"))))
    });
    group.bench_function("split_strip", |b| {
        b.iter(|| black_box(strip.split(black_box("/api/service-a/widgets/42/parts"))))
    });
    group.bench_function("join", |b| {
        let parts = ["service-a", "widgets", "42", "parts"];
        b.iter(|| black_box(preserve.join(black_box("http://backend:3101"), &parts)))
    });

    group.finish();
}

fn benchmark_rate_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_rules");

    let mut rules = RateLimitRules::new(RateRule::global(100, Duration::from_secs(60)));
    for i in 0..20 {
        if let Ok(rule) = RateRule::custom(&format!("*/service-{}/*", i), 10, Duration::from_secs(10)) {
            rules.push(rule);
        }
    }

    group.bench_function("rule_for_hit", |b| {
        b.iter(|| black_box(rules.rule_for(black_box("/api/service-19/widgets"))))
    });
    group.bench_function("rule_for_global", |b| {
        b.iter(|| black_box(rules.rule_for(black_box("/api/other/widgets"))))
    });
    group.bench_function("key_for", |b| {
        b.iter(|| black_box(rules.key_for(black_box("203.0.113.1"), "/api/service-3/x")))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_ring,
    benchmark_registry,
    benchmark_paths,
    benchmark_rate_rules
);

criterion_main!(benches);
