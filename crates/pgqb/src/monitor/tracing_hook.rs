use super::truncate_for_log;
use super::types::{HookAction, QueryContext, QueryHook};
use crate::error::OrmError;

/// Logs every statement at `DEBUG` before it runs (target `pgqb.sql`) and
/// every failure at `WARN`.
///
/// Only uses [`QueryHook::before_query`] and [`QueryHook::on_error`], so it
/// logs whether or not monitoring is enabled.
#[derive(Debug, Clone)]
pub struct TracingSqlHook {
    max_sql_length: Option<usize>,
    log_params: bool,
}

impl Default for TracingSqlHook {
    fn default() -> Self {
        Self {
            max_sql_length: Some(200),
            log_params: false,
        }
    }
}

impl TracingSqlHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate logged SQL to `len` bytes; `None` logs it whole.
    pub fn max_sql_length(mut self, len: Option<usize>) -> Self {
        self.max_sql_length = len;
        self
    }

    /// Include rendered bind parameters in the event.
    pub fn log_params(mut self, log_params: bool) -> Self {
        self.log_params = log_params;
        self
    }
}

impl QueryHook for TracingSqlHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let sql = truncate_for_log(&ctx.sql, self.max_sql_length);
        let params = self.log_params.then_some(&ctx.params);
        tracing::debug!(
            target: "pgqb.sql",
            query_type = ?ctx.query_type,
            tag = ctx.tag.as_deref().unwrap_or("-"),
            param_count = ctx.param_count(),
            params = ?params,
            sql = %sql,
        );
        HookAction::Continue
    }

    fn on_error(&self, ctx: &QueryContext, error: &OrmError) {
        tracing::warn!(
            target: "pgqb.sql",
            query_type = ?ctx.query_type,
            error = %error,
            sql = %truncate_for_log(&ctx.sql, self.max_sql_length),
            "statement failed"
        );
    }
}
