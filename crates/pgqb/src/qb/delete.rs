//! DELETE and TRUNCATE capability.

use crate::qb::query::{Query, StatementKind, TruncateOptions};
use crate::qb::traits::QueryBuilder;

pub trait DeleteBuilder: QueryBuilder {
    fn push_delete(&mut self) -> &mut Self {
        self.as_query_mut().kind = StatementKind::Delete;
        self
    }

    /// Turn the descriptor into a DELETE; joins render as `USING`.
    fn delete(&self) -> Self {
        self.with(|q| {
            q.push_delete();
        })
    }

    fn push_truncate(&mut self, options: TruncateOptions) -> &mut Self {
        let query = self.as_query_mut();
        query.kind = StatementKind::Truncate;
        query.truncate = options;
        self
    }

    fn truncate(&self) -> Self {
        self.truncate_with(TruncateOptions::default())
    }

    /// `TRUNCATE "table" [RESTART IDENTITY] [CASCADE]`
    fn truncate_with(&self, options: TruncateOptions) -> Self {
        self.with(|q| {
            q.push_truncate(options);
        })
    }
}

impl DeleteBuilder for Query {}
