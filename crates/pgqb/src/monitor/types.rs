use std::fmt;
use std::time::Duration;

use crate::error::OrmError;

/// The kind of statement being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// `BEGIN`, `SAVEPOINT`, `TRUNCATE`, DDL and anything else.
    Other,
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        && sql[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_')
}

impl QueryType {
    /// Detect the statement kind from its leading keyword.
    ///
    /// For `WITH ...` the statement after the last top-level parenthesis
    /// decides.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = sql.trim_start().trim_start_matches('(').trim_start();
        if starts_with_keyword(trimmed, "WITH") {
            return Self::after_cte(trimmed);
        }
        Self::keyword(trimmed).unwrap_or(QueryType::Other)
    }

    fn keyword(sql: &str) -> Option<Self> {
        [
            ("SELECT", QueryType::Select),
            ("INSERT", QueryType::Insert),
            ("UPDATE", QueryType::Update),
            ("DELETE", QueryType::Delete),
        ]
        .into_iter()
        .find(|(keyword, _)| starts_with_keyword(sql, keyword))
        .map(|(_, ty)| ty)
    }

    fn after_cte(sql: &str) -> Self {
        let mut depth = 0_i32;
        let mut last_top_level = 0;
        let mut in_string = false;
        for (idx, ch) in sql.char_indices() {
            match ch {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        last_top_level = idx + 1;
                    }
                }
                _ => {}
            }
        }
        Self::keyword(sql[last_top_level..].trim_start()).unwrap_or(QueryType::Select)
    }
}

/// What a hook or monitor knows about one statement.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// SQL sent to the server (after hooks).
    pub sql: String,
    /// Bind parameters, rendered with `Debug`.
    pub params: Vec<String>,
    pub query_type: QueryType,
    /// Optional label set by the caller, e.g. through [`super::Instrumented::tagged`].
    pub tag: Option<String>,
}

impl QueryContext {
    pub fn new(sql: impl Into<String>, params: Vec<String>) -> Self {
        let sql = sql.into();
        Self {
            query_type: QueryType::from_sql(&sql),
            sql,
            params,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

const MAX_ERROR_LEN: usize = 512;

/// Outcome of one statement, as reported to monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// Rows returned by a statement that produced a result set.
    Rows(usize),
    /// Rows affected by a statement without a result set.
    Affected(u64),
    /// Failure message, truncated.
    Error(String),
}

impl QueryResult {
    pub fn error(msg: impl fmt::Display) -> Self {
        let msg = msg.to_string();
        Self::Error(super::truncate_for_log(&msg, Some(MAX_ERROR_LEN)).into_owned())
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(n) => write!(f, "{n} rows"),
            QueryResult::Affected(n) => write!(f, "{n} affected"),
            QueryResult::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Receives timing events for executed statements.
///
/// Events are only delivered while monitoring is enabled in
/// [`super::MonitorConfig`].
pub trait QueryMonitor: Send + Sync {
    fn on_query_start(&self, _ctx: &QueryContext) {}

    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult);

    /// Called in addition to `on_query_complete` when the statement took
    /// longer than the configured threshold.
    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {}
}

/// Decision returned by [`QueryHook::before_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    /// Execute this SQL instead. Parameters stay the same.
    ModifySql(String),
    /// Fail the statement with a validation error.
    Abort(String),
}

/// Intercepts statements around execution.
pub trait QueryHook: Send + Sync {
    /// Runs before every statement, whether or not monitoring is enabled.
    fn before_query(&self, _ctx: &QueryContext) -> HookAction {
        HookAction::Continue
    }

    /// Runs after a successful statement while monitoring is enabled.
    fn after_query(&self, _ctx: &QueryContext, _duration: Duration, _result: &QueryResult) {}

    /// Runs after every failed statement.
    fn on_error(&self, _ctx: &QueryContext, _error: &OrmError) {}
}
