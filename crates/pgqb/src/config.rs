//! Connection settings loaded from serde sources or the environment.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{OrmError, OrmResult};
use crate::monitor::MonitorConfig;

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbConfig {
    /// Postgres connection string.
    pub url: String,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-statement timeout in milliseconds.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,

    /// Statements slower than this are logged as slow queries. Setting it
    /// turns monitoring on.
    #[serde(default)]
    pub slow_query_ms: Option<u64>,

    /// Log every statement on the `pgqb.sql` target.
    #[serde(default)]
    pub log_sql: bool,
}

fn default_max_connections() -> usize {
    16
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            query_timeout_ms: None,
            slow_query_ms: None,
            log_sql: false,
        }
    }

    /// Load from the process environment.
    ///
    /// - `DATABASE_URL` (required)
    /// - `PGQB_MAX_CONNECTIONS`
    /// - `PGQB_QUERY_TIMEOUT_MS`
    /// - `PGQB_SLOW_QUERY_MS`
    /// - `PGQB_LOG_SQL` (`true` or `1` to enable)
    pub fn from_env() -> OrmResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OrmResult<Self> {
        let url = lookup("DATABASE_URL")
            .ok_or_else(|| OrmError::Connection("DATABASE_URL is not set".to_string()))?;
        let mut config = Self::new(url);

        if let Some(max) = parse(&lookup, "PGQB_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        config.query_timeout_ms = parse(&lookup, "PGQB_QUERY_TIMEOUT_MS")?;
        config.slow_query_ms = parse(&lookup, "PGQB_SLOW_QUERY_MS")?;
        if let Some(flag) = lookup("PGQB_LOG_SQL") {
            config.log_sql = matches!(flag.trim(), "true" | "1");
        }
        Ok(config)
    }

    /// Monitoring settings derived from the timeouts.
    pub fn monitor_config(&self) -> MonitorConfig {
        let mut monitor = MonitorConfig::new();
        if let Some(ms) = self.query_timeout_ms {
            monitor = monitor.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.slow_query_ms {
            monitor = monitor
                .slow_query_threshold(Duration::from_millis(ms))
                .enabled(true);
        }
        monitor
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> OrmResult<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| OrmError::validation(format!("{key}: invalid value {raw:?}")))
        })
        .transpose()
}

/// Build an instrumented pool from `config`.
///
/// Slow queries are reported through [`crate::monitor::LoggingMonitor`]; with
/// `log_sql` every statement is logged by [`crate::monitor::TracingSqlHook`].
#[cfg(feature = "pool")]
pub fn connect(
    config: &DbConfig,
) -> OrmResult<crate::transaction::Db<crate::monitor::Instrumented<deadpool_postgres::Pool>>> {
    use crate::monitor::{Instrumented, LoggingMonitor, TracingSqlHook};

    let pool = crate::pool::create_pool_with_config(&config.url, config.max_connections)?;
    let mut adapter = Instrumented::new(pool)
        .with_config(config.monitor_config())
        .with_monitor(LoggingMonitor::new());
    if config.log_sql {
        adapter = adapter.with_hook(TracingSqlHook::new());
    }
    tracing::debug!(
        target: "pgqb.monitor",
        max_connections = config.max_connections,
        "pool created"
    );
    Ok(crate::transaction::Db::new(adapter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let config = DbConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("PGQB_MAX_CONNECTIONS", "4"),
            ("PGQB_SLOW_QUERY_MS", "250"),
            ("PGQB_LOG_SQL", "1"),
        ]))
        .unwrap();

        assert_eq!(config.url, "postgres://localhost/app");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.query_timeout_ms, None);
        assert!(config.log_sql);
        assert_eq!(
            config.monitor_config(),
            MonitorConfig::new()
                .slow_query_threshold(Duration::from_millis(250))
                .enabled(true)
        );
    }

    #[test]
    fn missing_url_and_bad_numbers_fail() {
        assert!(matches!(
            DbConfig::from_lookup(env(&[])),
            Err(OrmError::Connection(_))
        ));
        assert!(matches!(
            DbConfig::from_lookup(env(&[
                ("DATABASE_URL", "postgres://localhost/app"),
                ("PGQB_QUERY_TIMEOUT_MS", "soon"),
            ])),
            Err(OrmError::Validation(_))
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: DbConfig =
            serde_json::from_str(r#"{"url": "postgres://db/app", "query_timeout_ms": 5000}"#)
                .unwrap();
        assert_eq!(config.max_connections, 16);
        assert_eq!(
            config.monitor_config(),
            MonitorConfig::new().timeout(Duration::from_millis(5000))
        );
    }
}
