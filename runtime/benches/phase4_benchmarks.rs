//! Phase 4 Performance Benchmarks
//!
//! Benchmarks for production-hardening features:
//! - RetryPolicy: overhead of retry logic
//! - CircuitBreaker: overhead of circuit breaker checks
//! - Combined: realistic production scenarios
//!
//! Run with: `cargo bench --bench phase4_benchmarks`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use composable_rust_runtime::{CircuitBreaker, RetryPolicy};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

/// Benchmark RetryPolicy overhead
fn benchmark_retry_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_policy");
    group.throughput(Throughput::Elements(1));

    let policy = RetryPolicy::default();

    group.bench_function("should_retry_check", |b| {
        b.iter(|| {
            black_box(policy.should_retry(black_box(3)));
        });
    });

    group.bench_function("delay_calculation", |b| {
        b.iter(|| {
            black_box(policy.delay_for_attempt(black_box(2)));
        });
    });

    group.bench_function("create_default", |b| {
        b.iter(|| {
            black_box(RetryPolicy::default());
        });
    });

    group.bench_function("builder_chain", |b| {
        b.iter(|| {
            black_box(
                RetryPolicy::new()
                    .with_max_attempts(10)
                    .with_initial_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_secs(60))
                    .with_backoff_multiplier(2.0),
            );
        });
    });

    group.finish();
}

/// Benchmark CircuitBreaker overhead
fn benchmark_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");
    group.throughput(Throughput::Elements(1));

    group.bench_function("state_check_closed", |b| {
        let breaker = CircuitBreaker::new();
        b.iter(|| {
            black_box(breaker.state());
        });
    });

    group.bench_function("record_success", |b| {
        let breaker = CircuitBreaker::new();
        b.iter(|| {
            breaker.record_success();
        });
    });

    group.bench_function("record_failure", |b| {
        let breaker = CircuitBreaker::new().with_failure_threshold(1000);
        b.iter(|| {
            breaker.record_failure();
        });
    });


    group.bench_function("create_default", |b| {
        b.iter(|| {
            black_box(CircuitBreaker::default());
        });
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("call_success", |b| {
        let breaker = CircuitBreaker::new();

        b.to_async(&runtime).iter(|| async {
            let _ = breaker.call(|| async { Ok::<i32, String>(42) }).await;
        });
    });

    group.finish();
}

/// Benchmark combined production scenario
fn benchmark_production_scenario(c: &mut Criterion) {
    let mut group = c.benchmark_group("production_scenario");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    // Simulates a typical production operation with all safety features
    group.bench_function("operation_with_circuit_breaker", |b| {
        let breaker = CircuitBreaker::new();

        b.to_async(&runtime).iter(|| async {
            let _ = breaker
                .call(|| async {
                    // Simulate successful operation
                    tokio::time::sleep(Duration::from_micros(10)).await;
                    Ok::<(), String>(())
                })
                .await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_retry_policy,
    benchmark_circuit_breaker,
    benchmark_production_scenario,
);
criterion_main!(benches);
