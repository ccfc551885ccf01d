use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use storeflow::scheduler::ScheduleConfigBuilder;
use storeflow::store::{MemoryStore, Record};
use storeflow::{DefinitionLoader, PipelineJob, Scheduler};

fn mock_users(count: usize) -> Vec<Record> {
    (0..count)
        .map(|id| {
            json!({
                "id": id,
                "username": format!("user_{id}"),
                "contact": {
                    "email": format!("user_{id}@example.com"),
                    "phone": format!("+1-555-{:04}", id % 10_000),
                },
                "age": 18 + id % 60,
                "tags": ["alpha", "beta", "gamma"],
            })
        })
        .collect()
}

fn definition(concurrency: usize) -> String {
    format!(
        r#"
name: copy-users
stores:
  src: {{ type: memory, name: source }}
  dst: {{ type: memory, name: target }}
operation:
  extract:
    src: {{ use: stream, with: {{ query: {{ collection: users }}, concurrency: {concurrency} }} }}
  transform:
    src: {{ use: select, with: {{ fields: {{ id: id, name: username, email: contact.email }} }} }}
  load:
    dst: {{ use: upsert, with: {{ collection: users, key: id }} }}
"#
    )
}

fn copy_job(users: &[Record], concurrency: usize) -> PipelineJob {
    DefinitionLoader::default()
        .with_memory_store(
            "source",
            MemoryStore::new().with_collection("users", users.to_vec()),
        )
        .with_memory_store("target", MemoryStore::new())
        .load_str(&definition(concurrency), Path::new("bench.yaml"))
        .unwrap()
}

fn bench_record_volumes(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_record_volumes");
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for volume in [100usize, 1000, 5000] {
        let users = mock_users(volume);
        group.throughput(Throughput::Elements(volume as u64));
        group.bench_with_input(BenchmarkId::new("records", volume), &users, |b, users| {
            b.to_async(&runtime).iter(|| async move {
                copy_job(users, 1).run().await.unwrap();
            });
        });
    }
    group.finish();
}

fn bench_stream_concurrency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_stream_concurrency");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let users = mock_users(1000);
    for concurrency in [1usize, 4, 16, 64] {
        group.throughput(Throughput::Elements(users.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("in_flight", concurrency),
            &concurrency,
            |b, &concurrency| {
                let users = &users;
                b.to_async(&runtime).iter(|| async move {
                    copy_job(users, concurrency).run().await.unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_scheduled_pipelines(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduled_pipelines");
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let users = mock_users(500);
    let pipeline_count = 8;
    for worker_num in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((users.len() * pipeline_count) as u64));
        group.bench_with_input(
            BenchmarkId::new("workers", worker_num),
            &worker_num,
            |b, &worker_num| {
                let users = &users;
                b.to_async(&runtime).iter(|| async move {
                    let config = ScheduleConfigBuilder::default()
                        .worker_num(worker_num)
                        .build()
                        .unwrap();
                    let mut scheduler = Scheduler::new(config);
                    for _ in 0..pipeline_count {
                        scheduler.add_job(copy_job(users, 4));
                    }
                    let summary = scheduler
                        .run_until(&CancellationToken::new())
                        .await
                        .unwrap();
                    assert!(summary.last.is_some_and(|pass| pass.is_success()));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_record_volumes,
    bench_stream_concurrency,
    bench_scheduled_pipelines
);
criterion_main!(benches);
