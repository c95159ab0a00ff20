//! Recording adapter shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use pgqb::{Adapter, DbError, OrmError, OrmResult, QueryOutput};
use tokio_postgres::types::ToSql;

#[derive(Clone)]
enum Failure {
    Message(String),
    Engine(DbError),
}

/// Records every statement and answers queries from a script.
///
/// Queries without a scripted answer return an empty result. A statement
/// containing a registered failure needle fails.
#[derive(Default)]
pub struct MockAdapter {
    statements: Mutex<Vec<String>>,
    params: Mutex<Vec<Vec<String>>>,
    responses: Mutex<VecDeque<QueryOutput>>,
    failures: Mutex<Vec<(String, Failure)>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the answer for the next `query` call.
    pub fn respond(&self, output: QueryOutput) {
        self.responses.lock().unwrap().push_back(output);
    }

    /// Fail every statement containing `needle` with `OrmError::Other`.
    pub fn fail_when(&self, needle: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), Failure::Message(message.to_string())));
    }

    /// Fail every statement containing `needle` with an engine error.
    pub fn fail_with_db(&self, needle: &str, error: DbError) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), Failure::Engine(error)));
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Rendered parameters of every `query` call, in order.
    pub fn params(&self) -> Vec<Vec<String>> {
        self.params.lock().unwrap().clone()
    }

    fn record(&self, sql: &str) -> OrmResult<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        let failures = self.failures.lock().unwrap();
        match failures.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            Some((_, Failure::Message(message))) => Err(OrmError::Other(message.clone())),
            Some((_, Failure::Engine(error))) => Err(OrmError::Database(error.clone())),
            None => Ok(()),
        }
    }
}

impl Adapter for MockAdapter {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        self.params
            .lock()
            .unwrap()
            .push(params.iter().map(|p| format!("{p:?}")).collect());
        self.record(sql)?;
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.record(sql)
    }
}
