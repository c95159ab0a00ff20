//! INSERT capability, including upserts and column defaults.

use tokio_postgres::types::ToSql;

use crate::qb::param::Param;
use crate::qb::query::{ConflictAction, Data, OnConflict, Query, StatementKind};
use crate::qb::traits::QueryBuilder;
use crate::result::ResultMode;

fn column_list<I, S>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    columns.into_iter().map(Into::into).collect()
}

pub trait InsertBuilder: QueryBuilder {
    fn push_insert(&mut self, row: Data) -> &mut Self {
        let query = self.as_query_mut();
        query.kind = StatementKind::Insert;
        query.rows.push(row);
        self
    }

    /// Insert one row. Columns missing from a row render as `DEFAULT`.
    fn insert(&self, row: Data) -> Self {
        self.with(|q| {
            q.push_insert(row);
        })
    }

    fn push_insert_many(&mut self, rows: Vec<Data>) -> &mut Self {
        let query = self.as_query_mut();
        query.kind = StatementKind::Insert;
        query.rows.extend(rows);
        self
    }

    /// Insert several rows in one statement.
    fn insert_many(&self, rows: Vec<Data>) -> Self {
        self.with(|q| {
            q.push_insert_many(rows);
        })
    }

    /// Insert one row and return it.
    fn create(&self, row: Data) -> Self {
        self.with(|q| {
            q.push_insert(row)
                .push_returning(["*"])
                .set_mode(ResultMode::One);
        })
    }

    fn push_default(&mut self, column: impl Into<String>, value: Param) -> &mut Self {
        self.as_query_mut().defaults.insert(column.into(), value);
        self
    }

    /// Value used for `column` in rows that do not set it.
    fn default_value<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, value: T) -> Self {
        self.with(|q| {
            q.push_default(column, Param::new(value));
        })
    }

    fn set_on_conflict(&mut self, on_conflict: OnConflict) -> &mut Self {
        self.as_query_mut().on_conflict = Some(on_conflict);
        self
    }

    /// `ON CONFLICT (target) DO NOTHING`; an empty target catches any conflict.
    fn on_conflict_ignore<I, S>(&self, target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(|q| {
            q.set_on_conflict(OnConflict {
                target: column_list(target),
                action: ConflictAction::DoNothing,
            });
        })
    }

    /// `ON CONFLICT (target) DO UPDATE SET c = excluded.c` for every inserted
    /// column outside the target.
    fn on_conflict_merge<I, S>(&self, target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_conflict_merge_columns(target, Vec::<String>::new())
    }

    /// Like [`on_conflict_merge`](Self::on_conflict_merge) for the listed columns only.
    fn on_conflict_merge_columns<I, S, C, T>(&self, target: I, columns: C) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        C: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.with(|q| {
            q.set_on_conflict(OnConflict {
                target: column_list(target),
                action: ConflictAction::Merge(column_list(columns)),
            });
        })
    }

    /// `ON CONFLICT (target) DO UPDATE SET` with explicit assignments.
    fn on_conflict_set<I, S>(&self, target: I, set: Data) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(|q| {
            q.set_on_conflict(OnConflict {
                target: column_list(target),
                action: ConflictAction::Set(set),
            });
        })
    }
}

impl InsertBuilder for Query {}
