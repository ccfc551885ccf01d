// src/scheduler/config.rs

use derive_builder::Builder;
use std::time::Duration;

/// Scheduler settings.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ScheduleConfig {
    /// Number of jobs that may run at the same time
    #[builder(default = "4")]
    pub(crate) worker_num: usize,

    /// Target time between pass starts; a single pass when unset
    #[builder(default = "None")]
    pub(crate) period: Option<Duration>,

    /// Shortest wait between two passes
    #[builder(default = "Duration::from_secs(1)")]
    pub(crate) min_delay: Duration,

    /// Stop after this many passes
    #[builder(default = "None")]
    pub(crate) max_passes: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            worker_num: 4,
            period: None,
            min_delay: Duration::from_secs(1),
            max_passes: None,
        }
    }
}

impl ScheduleConfig {
    #[inline]
    pub fn worker_num(&self) -> usize {
        self.worker_num
    }

    #[inline]
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    #[inline]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    #[inline]
    pub fn max_passes(&self) -> Option<u64> {
        self.max_passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ScheduleConfigBuilder::default().build().unwrap();
        assert_eq!(config.worker_num(), 4);
        assert_eq!(config.period(), None);
        assert_eq!(config.min_delay(), Duration::from_secs(1));
        assert_eq!(config.max_passes(), None);
    }

    #[test]
    fn test_builder_setters() {
        let config = ScheduleConfigBuilder::default()
            .worker_num(2usize)
            .period(Some(Duration::from_secs(60)))
            .max_passes(Some(3))
            .build()
            .unwrap();
        assert_eq!(config.worker_num(), 2);
        assert_eq!(config.period(), Some(Duration::from_secs(60)));
        assert_eq!(config.max_passes(), Some(3));
    }
}
