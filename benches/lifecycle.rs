//! Benchmarks for environment lifecycle operations.
//!
//! Run with: `cargo bench`
//!
//! Performance targets:
//! - `open()` < 100ms for a new environment
//! - `open()` < 100ms for an existing environment
//! - `close()` < 50ms

use criterion::{criterion_group, criterion_main, Criterion};
use sink_core::{Config, Environment};
use tempfile::tempdir;

/// Benchmark opening a new environment.
fn bench_open_new(c: &mut Criterion) {
    c.bench_function("open_new_environment", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let path = dir.path().join("mail.sink");

                let start = std::time::Instant::now();
                let env = Environment::open(&path, &Config::default()).unwrap();
                total += start.elapsed();

                env.close();
            }

            total
        });
    });
}

/// Benchmark opening an existing environment.
fn bench_open_existing(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mail.sink");

    let env = Environment::open(&path, &Config::default()).unwrap();
    env.close();

    c.bench_function("open_existing_environment", |b| {
        b.iter(|| {
            let env = Environment::open(&path, &Config::default()).unwrap();
            env.close();
        });
    });
}

/// Benchmark closing an environment.
fn bench_close(c: &mut Criterion) {
    c.bench_function("close_environment", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let path = dir.path().join("mail.sink");

                let env = Environment::open(&path, &Config::default()).unwrap();

                let start = std::time::Instant::now();
                env.close();
                total += start.elapsed();
            }

            total
        });
    });
}

criterion_group!(benches, bench_open_new, bench_open_existing, bench_close);
criterion_main!(benches);
