//! WHERE clause capability shared by SELECT, UPDATE and DELETE.

use tokio_postgres::types::ToSql;

use crate::error::OrmResult;
use crate::qb::expr::Expr;
use crate::qb::param::Param;
use crate::qb::query::Query;
use crate::qb::traits::QueryBuilder;
use crate::relation::ResolvedRelation;
use crate::result::ResultMode;

/// Values for a primary-key lookup, matched positionally to the key columns.
pub trait KeyValues {
    fn into_params(self) -> Vec<Param>;
}

macro_rules! scalar_keys {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KeyValues for $ty {
                fn into_params(self) -> Vec<Param> {
                    vec![Param::new(self)]
                }
            }
        )*
    };
}

scalar_keys!(
    bool,
    i16,
    i32,
    i64,
    u32,
    String,
    &'static str,
    uuid::Uuid,
    rust_decimal::Decimal,
    chrono::NaiveDate,
    chrono::DateTime<chrono::Utc>,
);

impl KeyValues for serde_json::Value {
    fn into_params(self) -> Vec<Param> {
        vec![Param::cell(self)]
    }
}

impl KeyValues for Param {
    fn into_params(self) -> Vec<Param> {
        vec![self]
    }
}

impl KeyValues for Vec<Param> {
    fn into_params(self) -> Vec<Param> {
        self
    }
}

macro_rules! tuple_keys {
    ($($name:ident),+) => {
        impl<$($name: ToSql + Send + Sync + 'static),+> KeyValues for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_params(self) -> Vec<Param> {
                let ($($name,)+) = self;
                vec![$(Param::new($name)),+]
            }
        }
    };
}

tuple_keys!(A, B);
tuple_keys!(A, B, C);
tuple_keys!(A, B, C, D);

/// Conditions AND together at the top level; OR and NOT come from nested [`Expr`] groups.
pub trait WhereBuilder: QueryBuilder {
    fn push_filter(&mut self, expr: Expr) -> &mut Self {
        self.as_query_mut().filters.push(expr);
        self
    }

    /// Add a WHERE condition.
    fn filter(&self, expr: Expr) -> Self {
        self.with(|q| {
            q.push_filter(expr);
        })
    }

    fn where_eq<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, value: T) -> Self {
        self.filter(Expr::eq(column, value))
    }

    fn where_ne<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, value: T) -> Self {
        self.filter(Expr::ne(column, value))
    }

    fn where_in<T: ToSql + Send + Sync + 'static>(&self, column: impl Into<String>, values: Vec<T>) -> Self {
        self.filter(Expr::in_list(column, values))
    }

    fn where_null(&self, column: impl Into<String>) -> Self {
        self.filter(Expr::is_null(column))
    }

    fn where_not_null(&self, column: impl Into<String>) -> Self {
        self.filter(Expr::is_not_null(column))
    }

    /// Trusted SQL with `?` placeholders.
    fn where_raw(&self, sql: impl Into<String>, params: Vec<Param>) -> Self {
        self.filter(Expr::template(sql, params))
    }

    fn where_not(&self, expr: Expr) -> Self {
        self.filter(Expr::not(expr))
    }

    /// `(<existing conditions>) OR expr`
    fn push_or_where(&mut self, expr: Expr) -> &mut Self {
        let query = self.as_query_mut();
        let existing = std::mem::take(&mut query.filters);
        query.filters.push(if existing.is_empty() {
            expr
        } else {
            Expr::or(vec![Expr::and(existing), expr])
        });
        self
    }

    fn or_where(&self, expr: Expr) -> Self {
        self.with(|q| {
            q.push_or_where(expr);
        })
    }

    /// `EXISTS (<query>)`
    fn where_exists_query(&self, query: Query) -> Self {
        self.filter(Expr::exists(query))
    }

    fn push_where_exists(&mut self, relation: &str) -> OrmResult<&mut Self> {
        let resolved = ResolvedRelation::resolve(self.as_query(), relation)?;
        let cond = resolved.exists(&self.as_query().scope())?;
        Ok(self.push_filter(cond))
    }

    /// Keep rows that have at least one related row.
    fn where_exists(&self, relation: &str) -> OrmResult<Self> {
        let mut next = self.clone();
        next.push_where_exists(relation)?;
        Ok(next)
    }

    /// Keep rows without related rows.
    fn where_not_exists(&self, relation: &str) -> OrmResult<Self> {
        let resolved = ResolvedRelation::resolve(self.as_query(), relation)?;
        let cond = resolved.exists(&self.as_query().scope())?;
        Ok(self.filter(Expr::not(cond)))
    }

    /// Primary-key lookup returning exactly one record.
    ///
    /// A key count different from the table's primary key is a build error.
    fn push_find(&mut self, keys: impl KeyValues) -> &mut Self {
        let keys = keys.into_params();
        let query = self.as_query_mut();
        let Some(columns) = query.table.as_ref().map(|t| t.primary_keys().to_vec()) else {
            query.fail("find needs a target table");
            return self;
        };
        if columns.len() != keys.len() {
            let message = format!(
                "find expects {} key value(s) for {}, got {}",
                columns.len(),
                query.scope(),
                keys.len()
            );
            query.fail(message);
            return self;
        }
        let conds: Vec<Expr> = columns
            .into_iter()
            .zip(keys)
            .map(|(column, key)| Expr::eq_param(column, key))
            .collect();
        query.filters.extend(conds);
        self.set_mode(ResultMode::One)
    }

    fn find(&self, keys: impl KeyValues) -> Self {
        self.with(|q| {
            q.push_find(keys);
        })
    }

    /// Like [`find`](Self::find) but yields `None` when no row matches.
    fn find_optional(&self, keys: impl KeyValues) -> Self {
        self.find(keys).with_mode(ResultMode::OneOptional)
    }

    /// First row matching `expr`.
    fn find_by(&self, expr: Expr) -> Self {
        self.filter(expr).with_mode(ResultMode::One)
    }

    fn find_by_optional(&self, expr: Expr) -> Self {
        self.filter(expr).with_mode(ResultMode::OneOptional)
    }
}

impl WhereBuilder for Query {}
