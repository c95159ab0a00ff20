use std::time::Duration;

/// Timeout and monitoring settings for [`super::Instrumented`].
///
/// Monitoring is off by default; hooks still run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Statements running longer fail with `OrmError::Timeout`.
    pub timeout: Option<Duration>,
    /// Statements running longer are reported through `on_slow_query`.
    pub slow_query_threshold: Option<Duration>,
    pub enabled: bool,
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn is_slow(&self, duration: Duration) -> bool {
        self.slow_query_threshold
            .is_some_and(|threshold| duration > threshold)
    }
}
