use super::*;
use crate::adapter::Adapter;
use crate::error::{OrmError, OrmResult};
use crate::value::QueryOutput;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_postgres::types::ToSql;

/// Answers every statement with an empty result after `delay`.
#[derive(Default)]
struct DummyAdapter {
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
}

impl DummyAdapter {
    fn sleeping(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

impl Adapter for DummyAdapter {
    async fn query(&self, sql: &str, _: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(QueryOutput::affected(1))
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }
}

struct FailingAdapter;

impl Adapter for FailingAdapter {
    async fn query(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        Err(OrmError::Other("connection reset".to_string()))
    }

    async fn batch_execute(&self, _: &str) -> OrmResult<()> {
        Err(OrmError::Other("connection reset".to_string()))
    }
}

fn ctx(sql: &str) -> QueryContext {
    QueryContext::new(sql, Vec::new())
}

#[test]
fn query_type_detection() {
    assert_eq!(QueryType::from_sql("SELECT * FROM users"), QueryType::Select);
    assert_eq!(QueryType::from_sql("  select * FROM users"), QueryType::Select);
    assert_eq!(
        QueryType::from_sql("(SELECT 1) UNION (SELECT 2)"),
        QueryType::Select
    );
    assert_eq!(
        QueryType::from_sql("INSERT INTO users (name) VALUES ($1)"),
        QueryType::Insert
    );
    assert_eq!(QueryType::from_sql("UPDATE users SET name = $1"), QueryType::Update);
    assert_eq!(
        QueryType::from_sql("DELETE FROM users WHERE id = $1"),
        QueryType::Delete
    );
    assert_eq!(QueryType::from_sql("SAVEPOINT \"1\""), QueryType::Other);
    assert_eq!(QueryType::from_sql("SELECTED"), QueryType::Other);
}

#[test]
fn query_type_looks_past_ctes() {
    assert_eq!(
        QueryType::from_sql("WITH cte AS (SELECT 1) INSERT INTO t SELECT * FROM cte"),
        QueryType::Insert
    );
    assert_eq!(
        QueryType::from_sql("WITH cte AS (SELECT ')') DELETE FROM t"),
        QueryType::Delete
    );
    assert_eq!(
        QueryType::from_sql("WITH a AS (SELECT 1), b AS (SELECT 2) SELECT * FROM a, b"),
        QueryType::Select
    );
}

#[test]
fn log_truncation_respects_char_boundaries() {
    assert_eq!(truncate_for_log("SELECT * FROM users", Some(10)), "SELECT * F...");
    assert_eq!(truncate_for_log("SELECT 1", Some(10)), "SELECT 1");
    assert_eq!(truncate_for_log("SELECT 'héé'", Some(10)), "SELECT 'h...");
    assert_eq!(truncate_for_log("SELECT * FROM users", None), "SELECT * FROM users");
}

#[test]
fn query_result_error_truncation() {
    assert_eq!(QueryResult::error("short"), QueryResult::Error("short".to_string()));

    match QueryResult::error("x".repeat(1000)) {
        QueryResult::Error(s) => {
            assert_eq!(s.len(), 515);
            assert!(s.ends_with("..."));
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[test]
fn query_result_display() {
    assert_eq!(QueryResult::Rows(5).to_string(), "5 rows");
    assert_eq!(QueryResult::Affected(3).to_string(), "3 affected");
    assert_eq!(QueryResult::Error("oops".to_string()).to_string(), "error: oops");
}

#[test]
fn stats_monitor_counts_by_kind() {
    let monitor = StatsMonitor::new();
    let ms = Duration::from_millis;

    monitor.on_query_complete(&ctx("SELECT 1"), ms(1), &QueryResult::Rows(1));
    monitor.on_query_complete(&ctx("INSERT INTO t DEFAULT VALUES"), ms(2), &QueryResult::Affected(1));
    monitor.on_query_complete(&ctx("UPDATE t SET x = 1"), ms(3), &QueryResult::Affected(1));
    monitor.on_query_complete(&ctx("DELETE FROM t"), ms(4), &QueryResult::Affected(1));
    monitor.on_query_complete(&ctx("BEGIN"), ms(5), &QueryResult::Affected(0));
    monitor.on_query_complete(&ctx("SELECT bad"), ms(1), &QueryResult::error("boom"));

    let stats = monitor.stats();
    assert_eq!(stats.total_queries, 6);
    assert_eq!(stats.select_count, 2);
    assert_eq!(stats.insert_count, 1);
    assert_eq!(stats.update_count, 1);
    assert_eq!(stats.delete_count, 1);
    assert_eq!(stats.failed_queries, 1);
    assert_eq!(stats.total_duration, ms(16));
    assert_eq!(stats.max_duration, ms(5));
    assert_eq!(stats.slowest_query.as_deref(), Some("BEGIN"));

    monitor.reset();
    assert_eq!(monitor.stats(), QueryStats::default());
}

#[test]
fn stats_monitor_duration_saturates() {
    let monitor = StatsMonitor::new();
    monitor.on_query_complete(
        &ctx("SELECT 1"),
        Duration::from_nanos(u64::MAX - 10),
        &QueryResult::Rows(0),
    );
    monitor.on_query_complete(&ctx("SELECT 2"), Duration::from_nanos(100), &QueryResult::Rows(0));
    assert_eq!(monitor.stats().total_duration, Duration::from_nanos(u64::MAX));
}

struct Prefix(&'static str);

impl QueryHook for Prefix {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        HookAction::ModifySql(format!("{}{}", self.0, ctx.sql))
    }
}

struct Block;

impl QueryHook for Block {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        if ctx.query_type == QueryType::Delete {
            HookAction::Abort("DELETE not allowed".to_string())
        } else {
            HookAction::Continue
        }
    }
}

#[test]
fn composite_hook_chains_rewrites() {
    let hook = CompositeHook::new().add(Prefix("/* a */ ")).add(Prefix("/* b */ "));
    assert_eq!(
        hook.before_query(&ctx("SELECT 1")),
        HookAction::ModifySql("/* b */ /* a */ SELECT 1".to_string())
    );

    let hook = CompositeHook::new().add(Block).add(Block);
    assert_eq!(hook.before_query(&ctx("SELECT 1")), HookAction::Continue);
    assert_eq!(
        hook.before_query(&ctx("DELETE FROM t")),
        HookAction::Abort("DELETE not allowed".to_string())
    );
}

#[derive(Default)]
struct Capture {
    completed: Mutex<Vec<(String, Vec<String>, Option<String>, QueryResult)>>,
    slow: Mutex<usize>,
    errors: Mutex<Vec<String>>,
}

impl QueryMonitor for Capture {
    fn on_query_complete(&self, ctx: &QueryContext, _: Duration, result: &QueryResult) {
        self.completed.lock().unwrap().push((
            ctx.sql.clone(),
            ctx.params.clone(),
            ctx.tag.clone(),
            result.clone(),
        ));
    }

    fn on_slow_query(&self, _: &QueryContext, _: Duration) {
        *self.slow.lock().unwrap() += 1;
    }
}

impl QueryHook for Capture {
    fn on_error(&self, ctx: &QueryContext, error: &OrmError) {
        self.errors
            .lock()
            .unwrap()
            .push(format!("{}: {error}", ctx.sql));
    }
}

#[tokio::test]
async fn instrumented_reports_sql_params_and_tag() {
    let capture = Arc::new(Capture::default());
    let db = Instrumented::new(DummyAdapter::default())
        .with_config(MonitorConfig::new().enabled(true))
        .with_monitor_arc(capture.clone());

    let id = 7_i64;
    db.query("UPDATE t SET x = 1 WHERE id = $1", &[&id]).await.unwrap();

    let tagged = Instrumented::new(Arc::new(DummyAdapter::default()))
        .with_config(MonitorConfig::new().enabled(true))
        .with_monitor_arc(capture.clone())
        .tagged("users.list");
    tagged.query("SELECT 1", &[]).await.unwrap();

    let completed = capture.completed.lock().unwrap();
    assert_eq!(
        completed[0],
        (
            "UPDATE t SET x = 1 WHERE id = $1".to_string(),
            vec!["7".to_string()],
            None,
            QueryResult::Affected(1),
        )
    );
    assert_eq!(completed[1].2.as_deref(), Some("users.list"));
    assert_eq!(completed[1].3, QueryResult::Rows(0));
}

#[tokio::test]
async fn instrumented_hook_rewrites_and_aborts() {
    let adapter = Arc::new(DummyAdapter::default());
    let db = Instrumented::new(adapter.clone())
        .with_hook(Prefix("/* traced */ "))
        .add_hook(Block);

    db.query("SELECT 1", &[]).await.unwrap();
    let err = db.query("DELETE FROM t", &[]).await.unwrap_err();

    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(
        *adapter.executed.lock().unwrap(),
        vec!["/* traced */ SELECT 1".to_string()]
    );
}

#[tokio::test]
async fn monitoring_disabled_skips_monitor_but_reports_errors_to_hooks() {
    struct Fail;
    impl QueryMonitor for Fail {
        fn on_query_complete(&self, _: &QueryContext, _: Duration, _: &QueryResult) {
            panic!("monitor called while monitoring is disabled");
        }
    }

    let capture = Arc::new(Capture::default());
    let db = Instrumented::new(DummyAdapter::default()).with_monitor(Fail);
    db.query("SELECT 1", &[]).await.unwrap();

    let db = Instrumented::new(FailingAdapter)
        .with_monitor(Fail)
        .add_hook_arc(capture.clone());
    assert!(db.batch_execute("BEGIN").await.is_err());
    assert_eq!(
        *capture.errors.lock().unwrap(),
        vec!["BEGIN: connection reset".to_string()]
    );
}

#[tokio::test]
async fn timeout_fails_with_timeout_error() {
    let capture = Arc::new(Capture::default());
    let db = Instrumented::new(DummyAdapter::sleeping(Duration::from_secs(60)))
        .with_config(
            MonitorConfig::new()
                .timeout(Duration::from_millis(10))
                .enabled(true),
        )
        .with_monitor_arc(capture.clone());

    let err = db.query("SELECT pg_sleep(60)", &[]).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(
        capture.completed.lock().unwrap()[0].3,
        QueryResult::Error(_)
    ));
}

#[tokio::test]
async fn slow_queries_are_reported() {
    let capture = Arc::new(Capture::default());
    let db = Instrumented::new(DummyAdapter::sleeping(Duration::from_millis(30)))
        .with_config(
            MonitorConfig::new()
                .slow_query_threshold(Duration::from_millis(5))
                .enabled(true),
        )
        .with_monitor_arc(capture.clone());

    db.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(*capture.slow.lock().unwrap(), 1);
}

#[tokio::test]
async fn added_monitors_all_receive_events() {
    let first = Arc::new(Capture::default());
    let second = StatsMonitor::new();
    let db = Instrumented::new(DummyAdapter::default())
        .with_config(MonitorConfig::new().enabled(true))
        .with_monitor_arc(first.clone())
        .add_monitor(second)
        .add_hook(TracingSqlHook::new().log_params(true))
        .add_monitor(LoggingMonitor::new().max_sql_length(None));

    db.query("SELECT 1", &[]).await.unwrap();
    db.query("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap();

    assert_eq!(first.completed.lock().unwrap().len(), 2);
}
