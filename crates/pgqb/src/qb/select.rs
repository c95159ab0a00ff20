//! SELECT list, ordering, grouping, paging and result-mode shortcuts.

use crate::error::OrmResult;
use crate::qb::expr::Expr;
use crate::qb::param::Param;
use crate::qb::query::{OrderItem, Query, SelectItem};
use crate::qb::traits::QueryBuilder;
use crate::relation::ResolvedRelation;
use crate::result::ResultMode;

pub trait SelectBuilder: QueryBuilder {
    /// Append columns to the SELECT list. Duplicates are kept in call order.
    fn push_select<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.as_query_mut()
            .select
            .extend(columns.into_iter().map(|name| SelectItem::Column {
                name: name.into(),
                alias: None,
            }));
        self
    }

    fn select<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(|q| {
            q.push_select(columns);
        })
    }

    /// `"scope"."column" AS "alias"`
    fn select_as(&self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.with(|q| {
            q.as_query_mut().select.push(SelectItem::Column {
                name: column.into(),
                alias: Some(alias.into()),
            });
        })
    }

    fn push_select_expr(&mut self, expr: Expr, alias: Option<String>) -> &mut Self {
        self.as_query_mut().select.push(SelectItem::Expr { expr, alias });
        self
    }

    fn select_expr(&self, expr: Expr, alias: impl Into<String>) -> Self {
        self.with(|q| {
            q.push_select_expr(expr, Some(alias.into()));
        })
    }

    /// Trusted SQL in the SELECT list, `?` binding `params`.
    fn select_raw(&self, sql: impl Into<String>, params: Vec<Param>) -> Self {
        self.with(|q| {
            q.push_select_expr(Expr::template(sql, params), None);
        })
    }

    fn push_select_relation(&mut self, relation: &str) -> OrmResult<&mut Self> {
        let resolved = ResolvedRelation::resolve(self.as_query(), relation)?;
        let query = resolved.subquery(&self.as_query().scope())?;
        self.as_query_mut().select.push(SelectItem::Relation {
            alias: relation.to_string(),
            query: Box::new(query),
            many: resolved.rel.is_many(),
        });
        Ok(self)
    }

    /// Embed related rows as a JSON column named after the relation:
    /// an object (or null) for single relations, an array for `hasMany`.
    fn select_relation(&self, relation: &str) -> OrmResult<Self> {
        let mut next = self.clone();
        next.push_select_relation(relation)?;
        Ok(next)
    }

    fn set_distinct(&mut self, distinct: bool) -> &mut Self {
        self.as_query_mut().distinct = distinct;
        self
    }

    fn distinct(&self) -> Self {
        self.with(|q| {
            q.set_distinct(true);
        })
    }

    fn push_order(&mut self, item: OrderItem) -> &mut Self {
        self.as_query_mut().order.push(item);
        self
    }

    fn order(&self, column: impl Into<String>) -> Self {
        self.with(|q| {
            q.push_order(OrderItem::Column {
                name: column.into(),
                desc: false,
                nulls_last: None,
            });
        })
    }

    fn order_desc(&self, column: impl Into<String>) -> Self {
        self.with(|q| {
            q.push_order(OrderItem::Column {
                name: column.into(),
                desc: true,
                nulls_last: None,
            });
        })
    }

    /// Trusted ORDER BY fragment.
    fn order_raw(&self, sql: impl Into<String>) -> Self {
        self.with(|q| {
            q.push_order(OrderItem::Raw(Expr::raw(sql)));
        })
    }

    fn push_group<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.as_query_mut()
            .group
            .extend(columns.into_iter().map(Into::into));
        self
    }

    fn group<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(|q| {
            q.push_group(columns);
        })
    }

    fn push_having(&mut self, expr: Expr) -> &mut Self {
        self.as_query_mut().having.push(expr);
        self
    }

    fn having(&self, expr: Expr) -> Self {
        self.with(|q| {
            q.push_having(expr);
        })
    }

    fn set_limit(&mut self, limit: i64) -> &mut Self {
        self.as_query_mut().limit = Some(limit);
        self
    }

    fn limit(&self, limit: i64) -> Self {
        self.with(|q| {
            q.set_limit(limit);
        })
    }

    fn set_offset(&mut self, offset: i64) -> &mut Self {
        self.as_query_mut().offset = Some(offset);
        self
    }

    fn offset(&self, offset: i64) -> Self {
        self.with(|q| {
            q.set_offset(offset);
        })
    }

    /// First row; not-found error when there is none.
    fn take(&self) -> Self {
        self.with_mode(ResultMode::One)
    }

    fn take_optional(&self) -> Self {
        self.with_mode(ResultMode::OneOptional)
    }

    /// Every row as a record; drops an implicit single-row limit.
    fn all(&self) -> Self {
        self.with_mode(ResultMode::All)
    }

    /// Raw row tuples without column parsing.
    fn rows(&self) -> Self {
        self.with_mode(ResultMode::Rows)
    }

    /// Values of one column.
    fn pluck(&self, column: impl Into<String>) -> Self {
        self.only_column(column).with_mode(ResultMode::Pluck)
    }

    /// One column of the first row; not-found error when there is no row.
    fn get(&self, column: impl Into<String>) -> Self {
        self.only_column(column).with_mode(ResultMode::Value)
    }

    fn get_optional(&self, column: impl Into<String>) -> Self {
        self.only_column(column).with_mode(ResultMode::ValueOptional)
    }

    /// Replace the SELECT list with one column.
    fn only_column(&self, column: impl Into<String>) -> Self {
        self.with(|q| {
            q.as_query_mut().select = vec![SelectItem::Column {
                name: column.into(),
                alias: None,
            }];
        })
    }

    /// `SELECT 1 AS "exists" ... LIMIT 1`, shaped as a boolean.
    fn exists(&self) -> Self {
        self.with(|q| {
            q.set_mode(ResultMode::Exists);
            q.as_query_mut().take = true;
        })
    }

    fn void(&self) -> Self {
        self.with_mode(ResultMode::Void)
    }

    fn row_count(&self) -> Self {
        self.with_mode(ResultMode::RowCount)
    }
}

impl SelectBuilder for Query {}
