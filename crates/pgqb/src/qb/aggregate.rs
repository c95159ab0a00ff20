//! Aggregate shortcuts: replace the SELECT list with one aggregate and
//! shape the result as a single value.

use crate::qb::query::{Query, SelectItem};
use crate::qb::traits::QueryBuilder;
use crate::result::ResultMode;

pub trait AggregateBuilder: QueryBuilder {
    /// Replace the SELECT list with `function([DISTINCT] column)` in value mode.
    fn push_aggregate(&mut self, function: &str, column: &str, distinct: bool) -> &mut Self {
        let query = self.as_query_mut();
        query.select = vec![SelectItem::Function {
            name: function.to_string(),
            args: vec![column.to_string()],
            distinct,
            over: None,
            alias: None,
        }];
        query.order.clear();
        self.set_mode(ResultMode::Value)
    }

    fn aggregate(&self, function: &str, column: &str) -> Self {
        self.with(|q| {
            q.push_aggregate(function, column, false);
        })
    }

    /// `count(*)`
    fn count(&self) -> Self {
        self.aggregate("count", "*")
    }

    fn count_column(&self, column: &str) -> Self {
        self.aggregate("count", column)
    }

    fn count_distinct(&self, column: &str) -> Self {
        self.with(|q| {
            q.push_aggregate("count", column, true);
        })
    }

    fn min(&self, column: &str) -> Self {
        self.aggregate("min", column)
    }

    fn max(&self, column: &str) -> Self {
        self.aggregate("max", column)
    }

    fn sum(&self, column: &str) -> Self {
        self.aggregate("sum", column)
    }

    fn avg(&self, column: &str) -> Self {
        self.aggregate("avg", column)
    }
}

impl AggregateBuilder for Query {}
