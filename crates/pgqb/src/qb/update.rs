//! UPDATE capability.
//!
//! Tables with a tracked timestamp column get `"<col>" = now()` appended at
//! compile time unless the assignments already set that column.

use tokio_postgres::types::ToSql;

use crate::qb::expr::Expr;
use crate::qb::param::Param;
use crate::qb::query::{Assign, Data, Query, StatementKind};
use crate::qb::traits::QueryBuilder;

pub trait UpdateBuilder: QueryBuilder {
    /// Merge `data` into the SET list; later assignments to a column win.
    fn push_update(&mut self, data: Data) -> &mut Self {
        let query = self.as_query_mut();
        query.kind = StatementKind::Update;
        for (column, value) in data.values {
            query.set = std::mem::take(&mut query.set).assign(column, value);
        }
        self
    }

    fn update(&self, data: Data) -> Self {
        self.with(|q| {
            q.push_update(data);
        })
    }

    fn push_update_raw(&mut self, sql: impl Into<String>, params: Vec<Param>) -> &mut Self {
        let query = self.as_query_mut();
        query.kind = StatementKind::Update;
        query.set_sql.push(Expr::template(sql, params));
        self
    }

    /// Trusted SET fragment such as `"count" = "count" * ?`.
    fn update_raw(&self, sql: impl Into<String>, params: Vec<Param>) -> Self {
        self.with(|q| {
            q.push_update_raw(sql, params);
        })
    }

    /// `"column" = "column" + by`
    fn increment<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, by: T) -> Self {
        self.with(|q| {
            q.push_update(Data::new().assign(column, Assign::Increment(Param::new(by))));
        })
    }

    /// `"column" = "column" - by`
    fn decrement<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, by: T) -> Self {
        self.with(|q| {
            q.push_update(Data::new().assign(column, Assign::Decrement(Param::new(by))));
        })
    }

    fn set_all_rows(&mut self, all: bool) -> &mut Self {
        self.as_query_mut().all_rows = all;
        self
    }

    /// Allow UPDATE/DELETE without a WHERE clause.
    fn all_rows(&self) -> Self {
        self.with(|q| {
            q.set_all_rows(true);
        })
    }
}

impl UpdateBuilder for Query {}
