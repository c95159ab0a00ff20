//! JOIN capability: plain tables, declared relations and lateral sub-queries.

use crate::error::OrmResult;
use crate::qb::expr::Expr;
use crate::qb::query::{Join, JoinKind, JoinTarget, Query};
use crate::qb::traits::QueryBuilder;
use crate::relation::ResolvedRelation;

pub trait JoinBuilder: QueryBuilder {
    /// Append a join; bare columns in `on` refer to the joined table.
    fn push_join(&mut self, kind: JoinKind, target: JoinTarget, on: Expr) -> &mut Self {
        self.as_query_mut().joins.push(Join { kind, target, on });
        self
    }

    /// `JOIN "table" ON "table"."left" = "<scope>"."right"`
    ///
    /// A bare `right` column belongs to this query's table.
    fn join_columns(
        &self,
        kind: JoinKind,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        let right = right.into();
        let right = if right.contains('.') {
            right
        } else {
            format!("{}.{right}", self.as_query().scope())
        };
        self.with(|q| {
            q.push_join(
                kind,
                JoinTarget::Table {
                    name: table.into(),
                    alias: None,
                },
                Expr::columns_eq(left, right),
            );
        })
    }

    fn join(&self, table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.join_columns(JoinKind::Inner, table, left, right)
    }

    fn left_join(
        &self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.join_columns(JoinKind::Left, table, left, right)
    }

    fn right_join(
        &self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.join_columns(JoinKind::Right, table, left, right)
    }

    fn full_join(
        &self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.join_columns(JoinKind::Full, table, left, right)
    }

    /// Join with an arbitrary condition, optionally aliasing the table.
    fn join_on(
        &self,
        kind: JoinKind,
        table: impl Into<String>,
        alias: Option<&str>,
        on: Expr,
    ) -> Self {
        self.with(|q| {
            q.push_join(
                kind,
                JoinTarget::Table {
                    name: table.into(),
                    alias: alias.map(str::to_string),
                },
                on,
            );
        })
    }

    fn push_join_rel(&mut self, kind: JoinKind, relation: &str) -> OrmResult<&mut Self> {
        let resolved = ResolvedRelation::resolve(self.as_query(), relation)?;
        let (name, alias, on) = resolved.join_target(&self.as_query().scope())?;
        Ok(self.push_join(kind, JoinTarget::Table { name, alias }, on))
    }

    /// Inner join a declared relation.
    fn join_rel(&self, relation: &str) -> OrmResult<Self> {
        let mut next = self.clone();
        next.push_join_rel(JoinKind::Inner, relation)?;
        Ok(next)
    }

    fn left_join_rel(&self, relation: &str) -> OrmResult<Self> {
        let mut next = self.clone();
        next.push_join_rel(JoinKind::Left, relation)?;
        Ok(next)
    }

    /// `<kind> LATERAL (<query>) AS "alias" ON true`
    fn join_lateral(&self, kind: JoinKind, query: Query, alias: impl Into<String>) -> Self {
        self.with(|q| {
            q.push_join(
                kind,
                JoinTarget::Lateral {
                    query: Box::new(query),
                    alias: alias.into(),
                },
                Expr::True,
            );
        })
    }
}

impl JoinBuilder for Query {}
