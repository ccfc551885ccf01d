use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use storeflow::operation::{transform_fn, ActionError, ExtractAction, LoadAction};
use storeflow::pipeline::{RecordSink, Registry};
use storeflow::scheduler::ScheduleConfigBuilder;
use storeflow::store::{MemoryStore, Query, QueryOptions, Record, StoreHandle};
use storeflow::{DefinitionLoader, OperationDefinition, PipelineExecutor, Scheduler};

struct StreamCollection(&'static str);

#[async_trait]
impl ExtractAction for StreamCollection {
    async fn extract(
        &self,
        store: &StoreHandle,
        _registry: &Registry,
        sink: &RecordSink<'_>,
    ) -> Result<(), ActionError> {
        let mut records = store
            .stream(&Query::find(self.0), &QueryOptions::default())
            .await?;
        while let Some(record) = records.next().await {
            sink.process(record?).await?;
        }
        Ok(())
    }
}

struct UpsertById {
    fail_on: Option<i64>,
}

#[async_trait]
impl LoadAction for UpsertById {
    async fn load(
        &self,
        store: &StoreHandle,
        _registry: &Registry,
        record: &Record,
    ) -> Result<(), ActionError> {
        if self.fail_on.is_some() && record["id"].as_i64() == self.fail_on {
            return Err(ActionError::new("write error"));
        }
        store.upsert("users", &["id".to_string()], record).await?;
        Ok(())
    }
}

fn users() -> MemoryStore {
    MemoryStore::new().with_collection(
        "users",
        vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})],
    )
}

fn copy_users(dst: &MemoryStore, fail_on: Option<i64>) -> PipelineExecutor {
    let definition = OperationDefinition::builder()
        .name("copy-users")
        .store(StoreHandle::memory("src", users()))
        .store(StoreHandle::memory("dst", dst.clone()))
        .extract("src", StreamCollection("users"))
        .transform("src", transform_fn(|_, _, record| Ok(record)))
        .load("dst", UpsertById { fail_on })
        .build()
        .unwrap();
    PipelineExecutor::new(definition)
}

fn ids(records: &[Value]) -> Vec<i64> {
    let mut ids: Vec<i64> = records.iter().filter_map(|r| r["id"].as_i64()).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_copies_every_record() {
    let dst = MemoryStore::new();
    let executor = copy_users(&dst, None);

    let report = executor.run().await.unwrap();
    executor.close().await.unwrap();

    assert_eq!(report.reads(), 3);
    assert_eq!(report.writes(), 3);
    assert_eq!(ids(&dst.documents("users")), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_load_failure_ends_the_run() {
    let dst = MemoryStore::new();
    let executor = copy_users(&dst, Some(2));

    let err = tokio::time::timeout(Duration::from_secs(5), executor.run())
        .await
        .expect("run must not hang waiting for parity")
        .unwrap_err();
    executor.close().await.unwrap();

    assert!(err.to_string().contains("write error"), "{err}");
    assert_eq!(ids(&dst.documents("users")), vec![1]);
}

const COPY: &str = r#"
stores:
  src: { type: memory, name: source }
  dst: { type: memory, name: target }
operation:
  extract:
    src: { use: stream, with: { query: { collection: users } } }
  load:
    dst: { use: upsert, with: { collection: users, key: id } }
"#;

const BROKEN: &str = r#"
stores:
  src: { type: memory, name: source }
operation:
  extract:
    src: { use: query, with: { query: { text: "SELECT * FROM users" } } }
  load:
    src: { use: insert, with: { collection: copies } }
"#;

#[tokio::test]
async fn test_scheduled_definitions_from_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a-copy.yaml"), COPY).unwrap();
    fs::write(dir.path().join("b-broken.yml"), BROKEN).unwrap();
    fs::write(dir.path().join("notes.txt"), "not a definition").unwrap();

    let target = MemoryStore::new();
    let jobs = DefinitionLoader::default()
        .with_memory_store("source", users())
        .with_memory_store("target", target.clone())
        .load_paths(&[dir.path().to_path_buf()])
        .unwrap();
    let names: Vec<&str> = jobs.iter().map(|job| job.name()).collect();
    assert_eq!(names, vec!["a-copy", "b-broken"]);

    let mut scheduler = Scheduler::new(ScheduleConfigBuilder::default().build().unwrap());
    for job in jobs {
        scheduler.add_job(job);
    }

    let summary = scheduler.run_until(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.passes, 1);
    let pass = summary.last.unwrap();
    assert_eq!(pass.succeeded, 1);
    assert_eq!(pass.failed, 1);
    assert!(pass.failures[0].to_string().contains("b-broken"));

    assert_eq!(ids(&target.documents("users")), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_invalid_definition_stops_loading() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a-copy.yaml"), COPY).unwrap();
    fs::write(
        dir.path().join("b-typo.yaml"),
        COPY.replace("    dst: { use: upsert", "    dest: { use: upsert"),
    )
    .unwrap();

    let source = users();
    let err = DefinitionLoader::default()
        .with_memory_store("source", source.clone())
        .load_paths(&[dir.path().to_path_buf()])
        .unwrap_err();

    assert!(err.to_string().contains("undefined store for load: dest"), "{err}");
    assert_eq!(source.connect_count(), 0);
}
