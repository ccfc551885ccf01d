// src/scheduler/scheduler.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ScheduleConfig;
use super::job::PipelineJob;
use super::queue::WorkQueue;
use super::types::SchedulerError;

/// Wait before the next pass: what is left of `period` after `elapsed`,
/// never shorter than `floor`.
pub fn next_delay(period: Duration, elapsed: Duration, floor: Duration) -> Duration {
    period.saturating_sub(elapsed).max(floor)
}

/// Outcome of one pass over every job.
#[derive(Debug)]
pub struct PassReport {
    pub number: u64,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<SchedulerError>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug)]
pub struct ScheduleSummary {
    pub passes: u64,
    pub last: Option<PassReport>,
}

struct ScheduleState {
    period: Option<Duration>,
    pass_start: Instant,
    passes: u64,
}

impl ScheduleState {
    fn new(period: Option<Duration>) -> Self {
        ScheduleState {
            period,
            pass_start: Instant::now(),
            passes: 0,
        }
    }

    fn begin_pass(&mut self) -> u64 {
        self.pass_start = Instant::now();
        self.passes += 1;
        self.passes
    }
}

/// Runs a fixed set of jobs through a bounded worker pool, pass after
/// pass when a period is configured.
pub struct Scheduler {
    config: ScheduleConfig,
    jobs: Vec<Arc<PipelineJob>>,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Scheduler {
            config,
            jobs: Vec::new(),
        }
    }

    pub fn add_job(&mut self, job: PipelineJob) -> &mut Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn jobs(&self) -> &[Arc<PipelineJob>] {
        &self.jobs
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Runs a single pass regardless of the configured period.
    pub async fn run_once(&self) -> Result<PassReport, SchedulerError> {
        let mut queue = WorkQueue::start(self.config.worker_num());
        let mut state = ScheduleState::new(None);
        let report = self.run_pass(&mut queue, &mut state).await;
        queue.shutdown().await;
        report
    }

    /// Runs passes until there is no period, `max_passes` is reached or
    /// `cancel` fires. Cancellation is only observed between passes.
    pub async fn run_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ScheduleSummary, SchedulerError> {
        let mut queue = WorkQueue::start(self.config.worker_num());
        let mut state = ScheduleState::new(self.config.period());
        let mut last = None;

        info!(
            jobs = self.jobs.len(),
            workers = queue.worker_num(),
            period = ?self.config.period(),
            "scheduler started"
        );

        let outcome = loop {
            let report = match self.run_pass(&mut queue, &mut state).await {
                Ok(report) => report,
                Err(err) => break Err(err),
            };
            let elapsed = report.elapsed;
            last = Some(report);

            let Some(period) = state.period else {
                break Ok(());
            };
            if self
                .config
                .max_passes()
                .is_some_and(|max| state.passes >= max)
            {
                debug!(passes = state.passes, "pass limit reached");
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Ok(());
            }

            let delay = next_delay(period, elapsed, self.config.min_delay());
            debug!(delay_ms = delay.as_millis() as u64, "next pass scheduled");
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler cancelled");
                    break Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        queue.shutdown().await;
        outcome.map(|()| ScheduleSummary {
            passes: state.passes,
            last,
        })
    }

    async fn run_pass(
        &self,
        queue: &mut WorkQueue<PipelineJob>,
        state: &mut ScheduleState,
    ) -> Result<PassReport, SchedulerError> {
        let number = state.begin_pass();
        debug!(pass = number, jobs = self.jobs.len(), "pass started");

        let finished = queue.run_pass(&self.jobs).await?;

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for job in finished {
            match job.result.and_then(|outcome| outcome) {
                Ok(_) => succeeded += 1,
                Err(err) => {
                    error!(pass = number, job = %job.name, error = %err, "job failed");
                    failures.push(err);
                }
            }
        }

        let report = PassReport {
            number,
            started_at: state.pass_start,
            elapsed: state.pass_start.elapsed(),
            succeeded,
            failed: failures.len(),
            failures,
        };
        if report.is_success() {
            info!(
                pass = number,
                succeeded,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "pass completed"
            );
        } else {
            warn!(
                pass = number,
                succeeded,
                failed = report.failed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "pass completed with failures"
            );
        }
        Ok(report)
    }
}
