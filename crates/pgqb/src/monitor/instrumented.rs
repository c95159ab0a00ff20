use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::types::ToSql;

use super::config::MonitorConfig;
use super::monitors::{CompositeHook, CompositeMonitor, NoopMonitor};
use super::types::{HookAction, QueryContext, QueryHook, QueryMonitor, QueryResult, QueryType};
use crate::adapter::{Adapter, Lease};
use crate::error::{OrmError, OrmResult};
use crate::value::QueryOutput;

/// An adapter wrapper that runs hooks, reports timings and enforces a timeout.
///
/// Connections leased through an instrumented pool are instrumented the same
/// way, so statements inside transactions are observed too.
#[derive(Clone)]
pub struct Instrumented<A> {
    inner: A,
    monitor: Arc<dyn QueryMonitor>,
    hook: Option<Arc<dyn QueryHook>>,
    config: MonitorConfig,
    tag: Option<String>,
}

impl<A> Instrumented<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            monitor: Arc::new(NoopMonitor),
            hook: None,
            config: MonitorConfig::default(),
            tag: None,
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_monitor<M: QueryMonitor + 'static>(self, monitor: M) -> Self {
        self.with_monitor_arc(Arc::new(monitor))
    }

    pub fn with_monitor_arc(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Report to `monitor` as well as the monitor already installed.
    pub fn add_monitor<M: QueryMonitor + 'static>(mut self, monitor: M) -> Self {
        let existing = std::mem::replace(&mut self.monitor, Arc::new(NoopMonitor));
        self.monitor = Arc::new(CompositeMonitor::new().add_arc(existing).add(monitor));
        self
    }

    /// Replace the hook.
    pub fn with_hook<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Add a hook after the existing ones.
    pub fn add_hook<H: QueryHook + 'static>(self, hook: H) -> Self {
        self.add_hook_arc(Arc::new(hook))
    }

    pub fn add_hook_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hook = Some(match self.hook.take() {
            None => hook,
            Some(existing) => Arc::new(CompositeHook::new().add_arc(existing).add_arc(hook)),
        });
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    fn prepare(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryContext> {
        let mut ctx = QueryContext::new(sql, params.iter().map(|p| format!("{p:?}")).collect());
        ctx.tag = self.tag.clone();

        if let Some(hook) = &self.hook {
            match hook.before_query(&ctx) {
                HookAction::Continue => {}
                HookAction::ModifySql(sql) => {
                    ctx.query_type = QueryType::from_sql(&sql);
                    ctx.sql = sql;
                }
                HookAction::Abort(reason) => {
                    return Err(OrmError::validation(format!(
                        "query aborted by hook: {reason}"
                    )));
                }
            }
        }

        if self.config.enabled {
            self.monitor.on_query_start(&ctx);
        }
        Ok(ctx)
    }

    async fn with_timeout<T, F>(&self, future: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
    {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .unwrap_or(Err(OrmError::Timeout(limit))),
            None => future.await,
        }
    }

    fn report<T>(
        &self,
        ctx: &QueryContext,
        duration: Duration,
        result: &OrmResult<T>,
        summary: impl FnOnce(&T) -> QueryResult,
    ) {
        let outcome = match result {
            Ok(value) => summary(value),
            Err(err) => {
                if let Some(hook) = &self.hook {
                    hook.on_error(ctx, err);
                }
                QueryResult::error(err)
            }
        };

        if !self.config.enabled {
            return;
        }
        if let (Some(hook), Ok(_)) = (&self.hook, result) {
            hook.after_query(ctx, duration, &outcome);
        }
        self.monitor.on_query_complete(ctx, duration, &outcome);
        if self.config.is_slow(duration) {
            self.monitor.on_slow_query(ctx, duration);
        }
    }
}

impl<A: Clone> Instrumented<A> {
    /// A copy whose statements carry `tag` in their [`QueryContext`].
    pub fn tagged(&self, tag: impl Into<String>) -> Self {
        let mut tagged = self.clone();
        tagged.tag = Some(tag.into());
        tagged
    }
}

impl<A: Adapter> Adapter for Instrumented<A> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        let ctx = self.prepare(sql, params)?;
        let query_type = ctx.query_type;

        let start = Instant::now();
        let result = self.with_timeout(self.inner.query(&ctx.sql, params)).await;
        self.report(&ctx, start.elapsed(), &result, |output| {
            if query_type == QueryType::Select || !output.rows.is_empty() {
                QueryResult::Rows(output.rows.len())
            } else {
                QueryResult::Affected(output.row_count)
            }
        });
        result
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        let ctx = self.prepare(sql, &[])?;

        let start = Instant::now();
        let result = self.with_timeout(self.inner.batch_execute(&ctx.sql)).await;
        self.report(&ctx, start.elapsed(), &result, |_| QueryResult::Affected(0));
        result
    }
}

impl<A: Lease> Lease for Instrumented<A> {
    type Conn = Instrumented<A::Conn>;

    async fn lease(&self) -> OrmResult<Self::Conn> {
        Ok(Instrumented {
            inner: self.inner.lease().await?,
            monitor: Arc::clone(&self.monitor),
            hook: self.hook.clone(),
            config: self.config.clone(),
            tag: self.tag.clone(),
        })
    }
}
