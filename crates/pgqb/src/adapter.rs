//! Execution boundary between compiled descriptors and a database connection.

use std::future::Future;
use std::sync::Arc;

use futures_util::{TryStreamExt, pin_mut};
use tokio_postgres::types::ToSql;

use crate::error::{OrmError, OrmResult};
use crate::row;
use crate::value::QueryOutput;

/// Something that runs SQL.
///
/// Implemented for `tokio_postgres::Client`, pools and pooled clients, shared
/// handles, transaction handles and instrumented wrappers, so a descriptor
/// runs the same way against any of them.
pub trait Adapter: Send + Sync {
    /// Execute one statement and return its rows plus the affected row count.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl Future<Output = OrmResult<QueryOutput>> + Send;

    /// Execute parameterless statements (transaction control).
    fn batch_execute(&self, sql: &str) -> impl Future<Output = OrmResult<()>> + Send;
}

/// Hands out a dedicated connection, e.g. for the lifetime of a transaction.
pub trait Lease: Adapter {
    type Conn: Adapter + 'static;

    fn lease(&self) -> impl Future<Output = OrmResult<Self::Conn>> + Send;
}

/// Run `sql` on a plain driver client.
pub(crate) async fn run_query(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> OrmResult<QueryOutput> {
    let stream = client
        .query_raw(sql, params.iter().copied())
        .await
        .map_err(OrmError::from_db_error)?;
    pin_mut!(stream);

    let mut columns = None;
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await.map_err(OrmError::from_db_error)? {
        if columns.is_none() {
            columns = Some(row::columns(&row));
        }
        rows.push(row::values(&row)?);
    }
    let row_count = stream.rows_affected().unwrap_or(rows.len() as u64);

    Ok(QueryOutput {
        columns: columns.unwrap_or_default(),
        rows,
        row_count,
    })
}

impl Adapter for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        run_query(self, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl<A: Adapter> Adapter for Arc<A> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        self.as_ref().query(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.as_ref().batch_execute(sql).await
    }
}

/// A shared single connection leases itself.
impl<A: Adapter + 'static> Lease for Arc<A> {
    type Conn = Arc<A>;

    async fn lease(&self) -> OrmResult<Arc<A>> {
        Ok(Arc::clone(self))
    }
}
