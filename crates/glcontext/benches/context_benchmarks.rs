//! Context core benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glcontext::{gl, Context, ContextLock, ContextRegistry, ContextRequest, GlConfig, HeadlessDriver};
use std::sync::Arc;

fn headless_context() -> Context {
    let registry = Arc::new(ContextRegistry::new(&GlConfig::default().with_fail_fast(true)));
    Context::new(registry, Arc::new(HeadlessDriver::default()), "headless:0", ContextRequest::default())
}

/// Benchmark the ownership lock.
fn bench_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_lock");

    for fail_fast in [true, false] {
        let lock = ContextLock::new(fail_fast);
        group.bench_with_input(BenchmarkId::new("uncontended", fail_fast), &lock, |b, lock| {
            b.iter(|| {
                lock.lock().ok();
                lock.unlock().ok();
            })
        });
    }

    group.finish();
}

/// Benchmark make-current on an already created context.
fn bench_make_current(c: &mut Criterion) {
    let context = headless_context();
    context.make_current().ok();
    context.release().ok();

    c.bench_function("make_current_release", |b| {
        b.iter(|| {
            black_box(context.make_current().ok());
            context.release().ok();
        })
    });
}

/// Benchmark cached tracker lookups.
fn bench_trackers(c: &mut Criterion) {
    let context = headless_context();
    context.make_current().ok();
    context.bind_buffer(gl::ARRAY_BUFFER, 1).ok();
    context.buffer_data(gl::ARRAY_BUFFER, 4096, None, gl::STATIC_DRAW).ok();

    let mut group = c.benchmark_group("trackers");

    group.bench_function("bound_buffer_size", |b| {
        b.iter(|| black_box(context.bound_buffer_size(black_box(gl::ARRAY_BUFFER)).ok()))
    });

    group.bench_function("extension_hit", |b| {
        b.iter(|| black_box(context.is_extension_available(black_box("GL_KHR_debug"))))
    });

    group.bench_function("extension_miss", |b| {
        b.iter(|| black_box(context.is_extension_available(black_box("GL_NV_nonexistent"))))
    });

    group.finish();
    context.release().ok();
}

criterion_group!(benches, bench_lock, bench_make_current, bench_trackers);
criterion_main!(benches);
