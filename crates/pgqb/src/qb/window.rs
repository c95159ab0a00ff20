//! Named windows and window-function selects.

use crate::qb::query::{Query, SelectItem, WindowDef};
use crate::qb::traits::QueryBuilder;

pub trait WindowBuilder: QueryBuilder {
    fn push_window(&mut self, window: WindowDef) -> &mut Self {
        self.as_query_mut().windows.push(window);
        self
    }

    /// `WINDOW "name" AS (PARTITION BY .. ORDER BY ..)`
    fn window(&self, window: WindowDef) -> Self {
        self.with(|q| {
            q.push_window(window);
        })
    }

    fn push_select_over(
        &mut self,
        function: &str,
        args: &[&str],
        window: &str,
        alias: &str,
    ) -> &mut Self {
        self.as_query_mut().select.push(SelectItem::Function {
            name: function.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            distinct: false,
            over: Some(window.to_string()),
            alias: Some(alias.to_string()),
        });
        self
    }

    /// `function(args) OVER "window" AS "alias"`
    fn select_over(&self, function: &str, args: &[&str], window: &str, alias: &str) -> Self {
        self.with(|q| {
            q.push_select_over(function, args, window, alias);
        })
    }
}

impl WindowBuilder for Query {}
