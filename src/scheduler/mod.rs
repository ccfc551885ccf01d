//! Bounded-concurrency scheduling of pipeline jobs.

pub mod config;
pub mod job;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod types;

pub use config::{ScheduleConfig, ScheduleConfigBuilder};
pub use job::PipelineJob;
pub use queue::{Finished, Task, WorkQueue};
pub use scheduler::{next_delay, PassReport, ScheduleSummary, Scheduler};
pub use types::SchedulerError;

#[cfg(test)]
mod tests;
