//! Benchmarks for request building and state aggregation.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use streamdeploy::core::{DeploymentProperties, LifecycleState};
use streamdeploy::deployer::{DeploymentRequestBuilder, PropertyResolver};
use streamdeploy::state::aggregate;
use streamdeploy::testing::{sample_registry, three_stage};

fn aggregate_benchmark(c: &mut Criterion) {
    let uniform = vec![LifecycleState::Deployed; 64];
    let mut mixed = uniform.clone();
    mixed[17] = LifecycleState::Deploying;
    mixed[42] = LifecycleState::Failed;

    c.bench_function("aggregate_uniform_64", |b| b.iter(|| aggregate(black_box(&uniform))));
    c.bench_function("aggregate_mixed_64", |b| b.iter(|| aggregate(black_box(&mixed))));
}

fn property_benchmark(c: &mut Criterion) {
    let mut props = DeploymentProperties::new();
    for i in 0..50 {
        props.insert(format!("app.*.key{i}"), "wildcard");
        props.insert(format!("app.log.key{i}"), "targeted");
        props.insert(format!("deployer.transform.memory{i}"), "512m");
    }

    c.bench_function("resolve_app_properties", |b| {
        b.iter(|| PropertyResolver::app_properties(black_box(&props), "log"))
    });
    c.bench_function("resolve_deployer_properties", |b| {
        b.iter(|| PropertyResolver::deployer_properties(black_box(&props), "transform"))
    });
}

fn request_benchmark(c: &mut Criterion) {
    let builder = DeploymentRequestBuilder::new(Arc::new(sample_registry()));
    let definition = three_stage();
    let props = DeploymentProperties::new()
        .with("app.http.producer.partitionKeyExpression", "headers.id")
        .with("deployer.transform.count", "3");

    c.bench_function("build_requests_three_stage", |b| {
        b.iter(|| tokio_test::block_on(builder.build(black_box(&definition), black_box(&props))))
    });
}

criterion_group!(benches, aggregate_benchmark, property_benchmark, request_benchmark);
criterion_main!(benches);
