//! Predicate tree for WHERE/HAVING/ON conditions.
//!
//! This module provides the `Expr` enum which supports:
//! - AND/OR/NOT grouping
//! - Column-value comparisons and column-column correlations
//! - `EXISTS (subquery)`
//! - Template expressions with `?` placeholders
//! - Raw SQL fragments
//!
//! `Expr::build()` numbers placeholders as it renders, pushing each value into
//! the shared [`ParamList`], so `$n` always matches the bind position.
//! Bare column names are qualified with the scope (table name or alias) of
//! the statement being rendered.

use tokio_postgres::types::ToSql;

use crate::error::OrmResult;
use crate::ident::quote_column;
use crate::qb::compile;
use crate::qb::param::{Param, ParamList};
use crate::qb::query::Query;

/// Expression node for building WHERE/HAVING/ON clauses.
#[derive(Clone, Debug)]
pub enum Expr {
    /// AND group: all conditions must be true.
    And(Vec<Expr>),

    /// OR group: at least one condition must be true.
    Or(Vec<Expr>),

    /// NOT: negate the inner expression.
    Not(Box<Expr>),

    /// Simple comparison: column op $n
    Compare {
        column: String,
        op: &'static str,
        value: Param,
    },

    /// Column-to-column comparison: left op right
    Columns {
        left: String,
        op: &'static str,
        right: String,
    },

    /// NULL check: column IS NULL or column IS NOT NULL
    NullCheck { column: String, is_null: bool },

    /// IN list: column IN ($1, $2, ...) or column NOT IN (...)
    InList {
        column: String,
        values: Vec<Param>,
        negated: bool,
    },

    /// BETWEEN: column BETWEEN $n AND $m
    Between {
        column: String,
        from: Param,
        to: Param,
        negated: bool,
    },

    /// EXISTS (subquery)
    Exists(Box<Query>),

    /// Render the inner expression with bare columns qualified by `scope`.
    Within { scope: String, expr: Box<Expr> },

    /// Template with `?` placeholders that get replaced with `$n`.
    Template { sql: String, params: Vec<Param> },

    /// Raw SQL fragment without parameters.
    Raw(String),

    /// Always true (used for empty NOT IN lists).
    True,

    /// Always false (used for empty IN lists).
    False,
}

macro_rules! compare_ctor {
    ($(#[$doc:meta] $name:ident => $op:literal),* $(,)?) => {
        $(
            #[$doc]
            pub fn $name<T: ToSql + Send + Sync + 'static>(column: impl Into<String>, value: T) -> Self {
                Expr::Compare {
                    column: column.into(),
                    op: $op,
                    value: Param::new(value),
                }
            }
        )*
    };
}

impl Expr {
    /// Create an AND expression from a list of expressions.
    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    /// Create an OR expression from a list of expressions.
    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    /// Create a NOT expression.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    compare_ctor! {
        /// column = value
        eq => "=",
        /// column <> value
        ne => "<>",
        /// column > value
        gt => ">",
        /// column >= value
        gte => ">=",
        /// column < value
        lt => "<",
        /// column <= value
        lte => "<=",
        /// column LIKE pattern
        like => "LIKE",
        /// column ILIKE pattern
        ilike => "ILIKE",
        /// column NOT LIKE pattern
        not_like => "NOT LIKE",
        /// column NOT ILIKE pattern
        not_ilike => "NOT ILIKE",
    }

    /// Equality against an already-wrapped parameter.
    pub fn eq_param(column: impl Into<String>, value: Param) -> Self {
        Expr::Compare {
            column: column.into(),
            op: "=",
            value,
        }
    }

    /// Correlate two columns: left = right
    pub fn columns_eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Expr::Columns {
            left: left.into(),
            op: "=",
            right: right.into(),
        }
    }

    /// Correlate two columns with an arbitrary comparison operator.
    pub fn columns(left: impl Into<String>, op: &'static str, right: impl Into<String>) -> Self {
        Expr::Columns {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    /// column IS NULL
    pub fn is_null(column: impl Into<String>) -> Self {
        Expr::NullCheck {
            column: column.into(),
            is_null: true,
        }
    }

    /// column IS NOT NULL
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Expr::NullCheck {
            column: column.into(),
            is_null: false,
        }
    }

    /// column IN (values...)
    pub fn in_list<T: ToSql + Send + Sync + 'static>(
        column: impl Into<String>,
        values: Vec<T>,
    ) -> Self {
        if values.is_empty() {
            return Expr::False;
        }
        Expr::InList {
            column: column.into(),
            values: values.into_iter().map(Param::new).collect(),
            negated: false,
        }
    }

    /// column NOT IN (values...)
    pub fn not_in<T: ToSql + Send + Sync + 'static>(
        column: impl Into<String>,
        values: Vec<T>,
    ) -> Self {
        if values.is_empty() {
            return Expr::True;
        }
        Expr::InList {
            column: column.into(),
            values: values.into_iter().map(Param::new).collect(),
            negated: true,
        }
    }

    /// column BETWEEN from AND to
    pub fn between<T: ToSql + Send + Sync + 'static>(
        column: impl Into<String>,
        from: T,
        to: T,
    ) -> Self {
        Expr::Between {
            column: column.into(),
            from: Param::new(from),
            to: Param::new(to),
            negated: false,
        }
    }

    /// column NOT BETWEEN from AND to
    pub fn not_between<T: ToSql + Send + Sync + 'static>(
        column: impl Into<String>,
        from: T,
        to: T,
    ) -> Self {
        Expr::Between {
            column: column.into(),
            from: Param::new(from),
            to: Param::new(to),
            negated: true,
        }
    }

    /// EXISTS (query)
    pub fn exists(query: Query) -> Self {
        Expr::Exists(Box::new(query))
    }

    /// Qualify bare columns inside `expr` with `scope` instead of the enclosing statement's.
    pub fn within(scope: impl Into<String>, expr: Expr) -> Self {
        Expr::Within {
            scope: scope.into(),
            expr: Box::new(expr),
        }
    }

    /// Create a template expression with `?` placeholders.
    ///
    /// # Example
    /// ```ignore
    /// Expr::template("a = ? OR b = ?", vec![Param::new(1), Param::new(2)])
    /// ```
    pub fn template(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Expr::Template {
            sql: sql.into(),
            params,
        }
    }

    /// Create a template expression from values of one type.
    pub fn template_values<T: ToSql + Send + Sync + 'static>(
        sql: impl Into<String>,
        values: Vec<T>,
    ) -> Self {
        Expr::Template {
            sql: sql.into(),
            params: values.into_iter().map(Param::new).collect(),
        }
    }

    /// Create a trusted raw SQL fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Check if this expression is empty (contains no conditions).
    pub fn is_empty(&self) -> bool {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().all(|e| e.is_empty()),
            Expr::Not(inner) => inner.is_empty(),
            Expr::Within { expr, .. } => expr.is_empty(),
            _ => false,
        }
    }

    /// Literal SQL text of raw and template nodes (used for assignment detection).
    pub(crate) fn literal_text(&self) -> Option<&str> {
        match self {
            Expr::Raw(sql) | Expr::Template { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Build the SQL fragment with proper `$n` placeholders.
    ///
    /// Bare column names are qualified with `scope`; pass `""` to leave them bare.
    pub fn build(&self, scope: &str, params: &mut ParamList) -> OrmResult<String> {
        Ok(match self {
            Expr::And(exprs) => Self::join_group(exprs, " AND ", scope, params)?,
            Expr::Or(exprs) => Self::join_group(exprs, " OR ", scope, params)?,
            Expr::Not(inner) => {
                let sql = inner.build(scope, params)?;
                if sql.is_empty() {
                    String::new()
                } else {
                    format!("NOT ({sql})")
                }
            }
            Expr::Compare { column, op, value } => {
                let column = quote_column(scope, column)?;
                format!("{column} {op} {}", params.placeholder(value))
            }
            Expr::Columns { left, op, right } => {
                format!(
                    "{} {op} {}",
                    quote_column(scope, left)?,
                    quote_column(scope, right)?
                )
            }
            Expr::NullCheck { column, is_null } => {
                let column = quote_column(scope, column)?;
                if *is_null {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                }
            }
            Expr::InList {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return Ok(if *negated { "true" } else { "false" }.to_string());
                }
                let column = quote_column(scope, column)?;
                let placeholders: Vec<String> =
                    values.iter().map(|v| params.placeholder(v)).collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {op} ({})", placeholders.join(", "))
            }
            Expr::Between {
                column,
                from,
                to,
                negated,
            } => {
                let column = quote_column(scope, column)?;
                let from = params.placeholder(from);
                let to = params.placeholder(to);
                let op = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                format!("{column} {op} {from} AND {to}")
            }
            Expr::Exists(query) => format!("EXISTS ({})", compile::write_query(query, params)?),
            Expr::Within { scope, expr } => expr.build(scope, params)?,
            Expr::Template {
                sql,
                params: template_params,
            } => {
                let mut result = String::with_capacity(sql.len());
                let mut values = template_params.iter();
                for ch in sql.chars() {
                    if ch == '?' {
                        if let Some(value) = values.next() {
                            result.push_str(&params.placeholder(value));
                            continue;
                        }
                    }
                    result.push(ch);
                }
                result
            }
            Expr::Raw(sql) => sql.clone(),
            Expr::True => "true".to_string(),
            Expr::False => "false".to_string(),
        })
    }

    fn unscoped(&self) -> &Expr {
        match self {
            Expr::Within { expr, .. } => expr.unscoped(),
            other => other,
        }
    }

    fn non_empty(exprs: &[Expr]) -> usize {
        exprs.iter().filter(|e| !e.is_empty()).count()
    }

    pub(crate) fn join_group(
        exprs: &[Expr],
        separator: &str,
        scope: &str,
        params: &mut ParamList,
    ) -> OrmResult<String> {
        let grouped = Self::non_empty(exprs) > 1;
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs.iter().filter(|e| !e.is_empty()) {
            let sql = expr.build(scope, params)?;
            if sql.is_empty() {
                continue;
            }
            // OR inside AND and AND inside OR keep their own grouping; trusted
            // fragments may carry their own operators.
            let nested = match expr.unscoped() {
                Expr::Or(inner) => separator == " AND " && Self::non_empty(inner) > 1,
                Expr::And(inner) => separator == " OR " && Self::non_empty(inner) > 1,
                Expr::Template { .. } | Expr::Raw(_) => grouped,
                _ => false,
            };
            if nested {
                parts.push(format!("({sql})"));
            } else {
                parts.push(sql);
            }
        }
        Ok(parts.join(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(expr: &Expr) -> (String, usize) {
        let mut params = ParamList::new();
        let sql = expr.build("user", &mut params).unwrap();
        (sql, params.len())
    }

    #[test]
    fn simple_eq_is_qualified() {
        assert_eq!(render(&Expr::eq("name", "alice")), (r#""user"."name" = $1"#.into(), 1));
    }

    #[test]
    fn nested_groups_are_parenthesized() {
        let expr = Expr::and(vec![
            Expr::eq("status", "active"),
            Expr::or(vec![
                Expr::eq("role", "admin"),
                Expr::and(vec![Expr::eq("role", "user"), Expr::gt("reputation", 100i32)]),
            ]),
        ]);
        let (sql, count) = render(&expr);
        assert_eq!(
            sql,
            r#""user"."status" = $1 AND ("user"."role" = $2 OR ("user"."role" = $3 AND "user"."reputation" > $4))"#
        );
        assert_eq!(count, 4);
    }

    #[test]
    fn empty_in_lists_fold_to_booleans() {
        assert_eq!(render(&Expr::in_list::<i32>("id", vec![])).0, "false");
        assert_eq!(render(&Expr::not_in::<i32>("id", vec![])).0, "true");
        assert_eq!(
            render(&Expr::in_list("id", vec![1, 2, 3])),
            (r#""user"."id" IN ($1, $2, $3)"#.into(), 3)
        );
    }

    #[test]
    fn template_numbers_only_bound_placeholders() {
        let expr = Expr::template_values("data ? 'key' OR score > ?", vec![5i32]);
        // The first `?` consumes the only value; later ones stay literal.
        assert_eq!(render(&expr), ("data $1 'key' OR score > ?".into(), 1));
    }

    #[test]
    fn trusted_fragments_are_grouped_among_siblings() {
        let expr = Expr::and(vec![
            Expr::raw("a = 1 OR b = 2"),
            Expr::template_values("c = ? OR d", vec![3i32]),
            Expr::eq("e", 4i32),
        ]);
        assert_eq!(
            render(&expr),
            (r#"(a = 1 OR b = 2) AND (c = $1 OR d) AND "user"."e" = $2"#.into(), 2)
        );
        assert_eq!(render(&Expr::and(vec![Expr::raw("a = 1 OR b = 2")])).0, "a = 1 OR b = 2");
    }

    #[test]
    fn within_overrides_scope() {
        let expr = Expr::and(vec![
            Expr::within("profile", Expr::eq("active", true)),
            Expr::columns_eq("profile.userId", "id"),
        ]);
        assert_eq!(
            render(&expr).0,
            r#""profile"."active" = $1 AND "profile"."userId" = "user"."id""#
        );
    }

    #[test]
    fn not_and_null_checks() {
        let expr = Expr::not(Expr::or(vec![Expr::is_null("deletedAt"), Expr::is_not_null("bannedAt")]));
        assert_eq!(
            render(&expr).0,
            r#"NOT ("user"."deletedAt" IS NULL OR "user"."bannedAt" IS NOT NULL)"#
        );
    }

    #[test]
    fn invalid_column_is_a_build_error() {
        let mut params = ParamList::new();
        let err = Expr::eq("id = 1 OR 1", 1).build("user", &mut params).unwrap_err();
        assert!(err.is_build());
    }
}
