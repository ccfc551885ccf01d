use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::operation::{ActionError, ExtractAction, LoadAction, OperationDefinition};
use crate::pipeline::{PipelineExecutor, PipelineError, RecordSink, Registry};
use crate::store::{MemoryStore, Record, StoreHandle};

/// Extraction that takes a fixed time and records when it started.
#[derive(Clone, Default)]
struct Probe {
    duration: Duration,
    starts: Arc<Mutex<Vec<Instant>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Probe {
    fn taking(duration: Duration) -> Self {
        Probe {
            duration,
            ..Probe::default()
        }
    }

    fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    fn gaps(&self) -> Vec<Duration> {
        self.starts()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl ExtractAction for Probe {
    async fn extract(
        &self,
        _store: &StoreHandle,
        _registry: &Registry,
        _sink: &RecordSink<'_>,
    ) -> Result<(), ActionError> {
        self.starts.lock().unwrap().push(Instant::now());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl ExtractAction for Broken {
    async fn extract(
        &self,
        _store: &StoreHandle,
        _registry: &Registry,
        _sink: &RecordSink<'_>,
    ) -> Result<(), ActionError> {
        Err(ActionError::new("source unavailable"))
    }
}

struct Discard;

#[async_trait]
impl LoadAction for Discard {
    async fn load(
        &self,
        _store: &StoreHandle,
        _registry: &Registry,
        _record: &Record,
    ) -> Result<(), ActionError> {
        Ok(())
    }
}

fn executor(name: &str, store: MemoryStore, action: impl ExtractAction + 'static) -> PipelineExecutor {
    let definition = OperationDefinition::builder()
        .name(name)
        .store(StoreHandle::memory("src", store))
        .extract("src", action)
        .load("src", Discard)
        .build()
        .unwrap();
    PipelineExecutor::new(definition)
}

fn job(name: &str, action: impl ExtractAction + 'static) -> PipelineJob {
    PipelineJob::single(executor(name, MemoryStore::new(), action))
}

fn periodic(period: u64, floor: u64, passes: u64) -> ScheduleConfig {
    ScheduleConfigBuilder::default()
        .period(Some(Duration::from_secs(period)))
        .min_delay(Duration::from_secs(floor))
        .max_passes(Some(passes))
        .build()
        .unwrap()
}

#[test]
fn test_next_delay() {
    let secs = Duration::from_secs;
    assert_eq!(next_delay(secs(10), secs(2), secs(1)), secs(8));
    assert_eq!(next_delay(secs(3), secs(5), secs(1)), secs(1));
    assert_eq!(
        next_delay(secs(3), Duration::from_millis(2500), secs(1)),
        secs(1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_short_pass_keeps_period() {
    let probe = Probe::taking(Duration::from_secs(2));
    let mut scheduler = Scheduler::new(periodic(10, 1, 3));
    scheduler.add_job(job("short", probe.clone()));

    let summary = scheduler.run_until(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.passes, 3);

    let gaps = probe.gaps();
    assert_eq!(gaps.len(), 2);
    for gap in gaps {
        assert!(gap >= Duration::from_secs(10), "{gap:?}");
        assert!(gap < Duration::from_millis(10_500), "{gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_long_pass_waits_only_the_floor() {
    let probe = Probe::taking(Duration::from_secs(5));
    let mut scheduler = Scheduler::new(periodic(3, 1, 3));
    scheduler.add_job(job("long", probe.clone()));

    scheduler.run_until(&CancellationToken::new()).await.unwrap();

    for gap in probe.gaps() {
        assert!(gap >= Duration::from_secs(6), "{gap:?}");
        assert!(gap < Duration::from_millis(6_500), "{gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_matches_worker_count() {
    let probe = Probe::taking(Duration::from_secs(1));
    let config = ScheduleConfigBuilder::default()
        .worker_num(2usize)
        .build()
        .unwrap();
    let mut scheduler = Scheduler::new(config);
    for i in 0..5 {
        scheduler.add_job(job(&format!("job-{i}"), probe.clone()));
    }

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.succeeded, 5);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    assert!(report.elapsed >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_failures_do_not_stop_siblings_or_next_pass() {
    let probe = Probe::taking(Duration::from_millis(500));
    let mut scheduler = Scheduler::new(periodic(5, 1, 2));
    scheduler
        .add_job(job("first", probe.clone()))
        .add_job(job("broken", Broken))
        .add_job(job("second", probe.clone()));

    let summary = scheduler.run_until(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.passes, 2);
    assert_eq!(probe.starts().len(), 4);

    let last = summary.last.unwrap();
    assert_eq!(last.number, 2);
    assert_eq!(last.succeeded, 2);
    assert_eq!(last.failed, 1);
    assert!(!last.is_success());
    match &last.failures[0] {
        SchedulerError::Pipeline { name, source } => {
            assert_eq!(name, "broken");
            assert!(matches!(source, PipelineError::Action { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_job_stops_at_first_failing_executor() {
    let probe = Probe::taking(Duration::from_millis(10));
    let first_store = MemoryStore::new();
    let broken_store = MemoryStore::new();
    let job = PipelineJob::new(
        "file",
        vec![
            executor("one", first_store.clone(), probe.clone()),
            executor("two", broken_store.clone(), Broken),
            executor("three", MemoryStore::new(), probe.clone()),
        ],
    );

    let err = job.run().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Pipeline { ref name, .. } if name == "two"));
    assert_eq!(probe.starts().len(), 1);
    assert_eq!(first_store.close_count(), 1);
    assert_eq!(broken_store.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_period_runs_one_pass() {
    let probe = Probe::taking(Duration::from_secs(1));
    let mut scheduler = Scheduler::new(ScheduleConfig::default());
    scheduler.add_job(job("once", probe.clone()));

    let summary = scheduler.run_until(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.passes, 1);
    assert!(summary.last.unwrap().is_success());
    assert_eq!(probe.starts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_observed_between_passes() {
    let probe = Probe::taking(Duration::from_secs(2));
    let mut scheduler = Scheduler::new(
        ScheduleConfigBuilder::default()
            .period(Some(Duration::from_secs(10)))
            .build()
            .unwrap(),
    );
    scheduler.add_job(job("cancelled", probe.clone()));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let summary = scheduler.run_until(&cancel).await.unwrap();
    assert_eq!(summary.passes, 1);
    // the running pass finished despite the cancel
    assert_eq!(probe.running.load(Ordering::SeqCst), 0);
    assert!(summary.last.unwrap().elapsed >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_delay() {
    let probe = Probe::taking(Duration::from_secs(1));
    let mut scheduler = Scheduler::new(
        ScheduleConfigBuilder::default()
            .period(Some(Duration::from_secs(60)))
            .build()
            .unwrap(),
    );
    scheduler.add_job(job("idle", probe.clone()));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let summary = scheduler.run_until(&cancel).await.unwrap();
    assert_eq!(summary.passes, 1);
    assert!(started.elapsed() < Duration::from_secs(60));
}
