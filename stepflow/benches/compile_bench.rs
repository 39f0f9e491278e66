//! Benchmarks for compiling and registering pipelines.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use stepflow::compiler::Compiler;
use stepflow::config::EnvironmentConfig;
use stepflow::coordinator::{Coordinator, ExecutionGuard};
use stepflow::events::NoOpEventSink;
use stepflow::identity::{compute_version_hash, CacheKeyEngine};
use stepflow::store::InMemoryStore;
use stepflow::testing::{fixtures, RecordingStack};

fn compile_benchmark(c: &mut Criterion) {
    let stack = RecordingStack::new();

    c.bench_function("compile_training", |b| {
        b.iter(|| {
            let mut pipeline = fixtures::training_pipeline();
            black_box(Compiler::new().compile(&mut pipeline, &stack))
        });
    });

    c.bench_function("identity_training", |b| {
        let mut pipeline = fixtures::training_pipeline();
        let Ok((deployment, spec)) = Compiler::new().compile(&mut pipeline, &stack) else {
            return;
        };
        b.iter(|| {
            let hash = compute_version_hash(
                &spec,
                pipeline.name(),
                pipeline.definition().source_code(),
                |id| pipeline.step_source_code(id),
            );
            let keys = CacheKeyEngine::from_deployment(&deployment, |id| pipeline.step_source_code(id))
                .and_then(|mut engine| engine.cache_keys());
            black_box((hash, keys))
        });
    });
}

fn register_benchmark(c: &mut Criterion) {
    let coordinator = Coordinator::new(Arc::new(InMemoryStore::default()), Arc::new(RecordingStack::new()))
        .with_environment(EnvironmentConfig::default())
        .with_execution_guard(Arc::new(ExecutionGuard::new()))
        .with_event_sink(Arc::new(NoOpEventSink));

    c.bench_function("register_existing", |b| {
        let mut pipeline = fixtures::training_pipeline();
        b.iter(|| black_box(tokio_test::block_on(coordinator.register(&mut pipeline))));
    });
}

criterion_group!(benches, compile_benchmark, register_benchmark);
criterion_main!(benches);
