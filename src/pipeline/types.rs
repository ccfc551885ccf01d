use std::time::Duration;

use thiserror::Error;

use crate::operation::{ActionError, Phase};
use crate::store::StoreError;

/// Failure of one record inside an extraction loop.
///
/// Terminal for the owning source: once raised, later records from the same
/// extraction action are rejected with a clone of it.
#[derive(Debug, Clone, Error)]
#[error("{phase} action {index} for store '{alias}' failed: {source}")]
pub struct RecordError {
    pub phase: Phase,
    pub alias: String,
    pub index: usize,
    pub source: ActionError,
}

impl RecordError {
    pub fn new(phase: Phase, alias: &str, index: usize, source: ActionError) -> Self {
        RecordError {
            phase,
            alias: alias.to_string(),
            index,
            source,
        }
    }
}

impl From<RecordError> for ActionError {
    fn from(err: RecordError) -> Self {
        ActionError::from_source(err)
    }
}

/// Outcome of a failed run or close.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("failed to connect store '{alias}': {source}")]
    Connect { alias: String, source: StoreError },

    #[error("{phase} action {index} for store '{alias}' failed: {source}")]
    Action {
        phase: Phase,
        alias: String,
        index: usize,
        source: ActionError,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("failed to close store '{alias}': {source}")]
    Close { alias: String, source: StoreError },
}

impl PipelineError {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PipelineError::Action { phase, .. } => Some(*phase),
            PipelineError::Record(err) => Some(err.phase),
            PipelineError::Connect { .. } | PipelineError::Close { .. } => None,
        }
    }
}

/// Counters of one extraction action after it drained.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub alias: String,
    pub index: usize,
    pub reads: u64,
    pub writes: u64,
    pub failures: u64,
    pub elapsed: Duration,
    /// Writes per second since the first read.
    pub throughput: Option<f64>,
}

/// Summary of one successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub operation: String,
    /// `true` when the operation is inactive and nothing ran.
    pub skipped: bool,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn reads(&self) -> u64 {
        self.sources.iter().map(|s| s.reads).sum()
    }

    pub fn writes(&self) -> u64 {
        self.sources.iter().map(|s| s.writes).sum()
    }
}
