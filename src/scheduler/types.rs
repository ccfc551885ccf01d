/// Errors that can occur while scheduling pipelines
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("pipeline '{name}' failed: {source}")]
    Pipeline {
        name: String,
        source: crate::pipeline::PipelineError,
    },

    #[error("pipeline '{name}' failed to close: {source}")]
    Close {
        name: String,
        source: crate::pipeline::PipelineError,
    },

    #[error("job '{0}' panicked")]
    Panicked(String),

    #[error("worker pool stopped")]
    QueueClosed,
}
