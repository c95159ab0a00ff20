//! Set operations between selects.

use crate::qb::query::{Query, UnionItem, UnionKind};
use crate::qb::traits::QueryBuilder;

pub trait UnionBuilder: QueryBuilder {
    /// Append `<kind> (<query>)`; ORDER BY and LIMIT of this query apply to the whole set.
    fn push_union(&mut self, kind: UnionKind, query: Query) -> &mut Self {
        self.as_query_mut().unions.push(UnionItem {
            kind,
            query: Box::new(query),
        });
        self
    }

    fn union(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::Union, query);
        })
    }

    fn union_all(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::UnionAll, query);
        })
    }

    fn intersect(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::Intersect, query);
        })
    }

    fn intersect_all(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::IntersectAll, query);
        })
    }

    fn except(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::Except, query);
        })
    }

    fn except_all(&self, query: Query) -> Self {
        self.with(|q| {
            q.push_union(UnionKind::ExceptAll, query);
        })
    }
}

impl UnionBuilder for Query {}
