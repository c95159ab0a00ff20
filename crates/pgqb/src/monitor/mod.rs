//! Hooks, monitors and timeouts around statement execution.
//!
//! [`Instrumented`] wraps any [`Adapter`](crate::adapter::Adapter). Hooks run
//! for every statement and may rewrite or abort it; monitors receive timing
//! events once monitoring is enabled in [`MonitorConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pgqb::monitor::{Instrumented, LoggingMonitor, MonitorConfig, TracingSqlHook};
//! use std::time::Duration;
//!
//! let config = MonitorConfig::new()
//!     .timeout(Duration::from_secs(30))
//!     .slow_query_threshold(Duration::from_millis(500))
//!     .enabled(true);
//!
//! let db = pgqb::Db::new(
//!     Instrumented::new(pool)
//!         .with_config(config)
//!         .with_monitor(LoggingMonitor::new())
//!         .with_hook(TracingSqlHook::new()),
//! );
//! ```

use std::borrow::Cow;

mod config;
mod instrumented;
mod monitors;
mod tracing_hook;
mod types;

#[cfg(test)]
mod tests;

pub use config::MonitorConfig;
pub use instrumented::Instrumented;
pub use monitors::{
    CompositeHook, CompositeMonitor, LoggingMonitor, NoopMonitor, QueryStats, StatsMonitor,
};
pub use tracing_hook::TracingSqlHook;
pub use types::{HookAction, QueryContext, QueryHook, QueryMonitor, QueryResult, QueryType};

/// `sql` cut to at most `max` bytes on a char boundary, with `...` appended
/// when anything was dropped.
pub(crate) fn truncate_for_log(sql: &str, max: Option<usize>) -> Cow<'_, str> {
    match max {
        Some(max) if sql.len() > max => {
            let mut end = max;
            while end > 0 && !sql.is_char_boundary(end) {
                end -= 1;
            }
            Cow::Owned(format!("{}...", &sql[..end]))
        }
        _ => Cow::Borrowed(sql),
    }
}
