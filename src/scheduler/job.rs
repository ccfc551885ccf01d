// src/scheduler/job.rs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};

use super::queue::Task;
use super::types::SchedulerError;
use crate::pipeline::{PipelineExecutor, RunReport};

/// Executors loaded from one definition file, run in series.
#[derive(Debug)]
pub struct PipelineJob {
    name: String,
    source: Option<PathBuf>,
    executors: Vec<PipelineExecutor>,
}

impl PipelineJob {
    pub fn new(name: impl Into<String>, executors: Vec<PipelineExecutor>) -> Self {
        PipelineJob {
            name: name.into(),
            source: None,
            executors,
        }
    }

    pub fn single(executor: PipelineExecutor) -> Self {
        let name = executor.name().to_string();
        Self::new(name, vec![executor])
    }

    pub fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition file this job was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn executors(&self) -> &[PipelineExecutor] {
        &self.executors
    }

    /// Runs every executor in order, closing each one after its run.
    /// Stops at the first run or close error.
    pub async fn run(&self) -> Result<Vec<RunReport>, SchedulerError> {
        let mut reports = Vec::with_capacity(self.executors.len());
        for executor in &self.executors {
            let outcome = executor.run().await;
            let closed = executor.close().await;

            let report = outcome.map_err(|source| {
                error!(job = %self.name, pipeline = executor.name(), error = %source, "pipeline failed");
                SchedulerError::Pipeline {
                    name: executor.name().to_string(),
                    source,
                }
            })?;
            closed.map_err(|source| SchedulerError::Close {
                name: executor.name().to_string(),
                source,
            })?;

            info!(
                job = %self.name,
                pipeline = executor.name(),
                skipped = report.skipped,
                writes = report.writes(),
                "pipeline finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

#[async_trait]
impl Task for PipelineJob {
    type Output = Result<Vec<RunReport>, SchedulerError>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Self::Output {
        self.run().await
    }
}
