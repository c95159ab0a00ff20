//! Base trait shared by all clause builders.
//!
//! Every capability trait comes in two shapes per operation:
//!
//! - `op(&self, ..) -> Self` clones the descriptor and returns the changed copy,
//!   so the receiver stays usable as a base for other queries;
//! - `push_op(&mut self, ..) -> &mut Self` changes a descriptor the caller
//!   already owns and has not shared.

use crate::qb::query::{ColumnParser, Query};
use crate::result::ResultMode;

/// Access to the descriptor behind a builder.
pub trait QueryBuilder: Clone {
    fn as_query(&self) -> &Query;

    fn as_query_mut(&mut self) -> &mut Query;

    /// Clone, apply `f` to the clone, return it.
    fn with(&self, f: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    /// Select the result mode. Single-row modes imply `LIMIT 1`; the others drop it.
    fn set_mode(&mut self, mode: ResultMode) -> &mut Self {
        self.as_query_mut().apply_mode(mode);
        self
    }

    fn with_mode(&self, mode: ResultMode) -> Self {
        self.with(|q| {
            q.set_mode(mode);
        })
    }

    /// Merge `other` into this descriptor in place.
    fn push_merge(&mut self, other: &Query) -> &mut Self {
        self.as_query_mut().merge_in(other);
        self
    }

    fn set_alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.as_query_mut().alias = Some(alias.into());
        self
    }

    /// Refer to the target table as `alias`; bare columns follow the alias.
    fn alias(&self, alias: impl Into<String>) -> Self {
        self.with(|q| {
            q.set_alias(alias);
        })
    }

    fn push_returning<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.as_query_mut()
            .returning
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// `RETURNING` columns of INSERT/UPDATE/DELETE; `*` returns whole rows.
    fn returning<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(|q| {
            q.push_returning(columns);
        })
    }

    fn push_parser(&mut self, column: impl Into<String>, parser: ColumnParser) -> &mut Self {
        self.as_query_mut().parsers.insert(column.into(), parser);
        self
    }

    /// Convert values of `column` when shaping results.
    fn parse(&self, column: impl Into<String>, parser: ColumnParser) -> Self {
        self.with(|q| {
            q.push_parser(column, parser);
        })
    }
}

impl QueryBuilder for Query {
    fn as_query(&self) -> &Query {
        self
    }

    fn as_query_mut(&mut self) -> &mut Query {
        self
    }
}
