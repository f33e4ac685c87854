//! Scheduler throughput against an in-memory SQLite store.
//!
//! Run with: cargo bench --bench scheduler

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

use sdlc_engine::adapters::sqlite::{create_migrated_test_pool, SqliteTaskRepository};
use sdlc_engine::domain::models::TaskAction;
use sdlc_engine::services::Scheduler;

fn scheduler(rt: &Runtime) -> Scheduler {
    let pool = rt
        .block_on(create_migrated_test_pool())
        .expect("in-memory pool");
    Scheduler::new(Arc::new(SqliteTaskRepository::new(pool)))
}

fn bench_submit_and_drain(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("scheduler");

    for batch in [10usize, 100] {
        let scheduler = scheduler(&rt);
        group.bench_with_input(BenchmarkId::new("submit_next_complete", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async {
                for _ in 0..batch {
                    scheduler
                        .submit(Uuid::new_v4(), TaskAction::Advance)
                        .await
                        .expect("submit");
                }
                while let Some(task) = scheduler.next().await.expect("next") {
                    black_box(scheduler.complete(task.id).await.expect("complete"));
                }
            });
        });
    }

    group.finish();
}

fn bench_recover(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let scheduler = scheduler(&rt);
    rt.block_on(async {
        for _ in 0..500 {
            scheduler
                .submit(Uuid::new_v4(), TaskAction::Advance)
                .await
                .expect("submit");
        }
    });

    c.bench_function("scheduler/recover_500_queued", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(scheduler.recover().await.expect("recover")) });
    });
}

criterion_group!(benches, bench_submit_and_drain, bench_recover);
criterion_main!(benches);
