//! Query descriptors and their clause builders.
//!
//! A [`Query`] is a plain value describing one statement. Capability traits
//! add clauses to it; each operation has a copying form that leaves the
//! receiver untouched and a `push_`/`set_` form for descriptors the caller
//! owns exclusively.
//!
//! # Usage
//!
//! ```ignore
//! use pgqb::prelude::*;
//!
//! let active = users.query().where_eq("status", "active");
//!
//! // `active` is unchanged by the calls below.
//! let admins = active.where_eq("role", "admin").order_desc("createdAt").limit(20);
//! let newest = active.order_desc("createdAt").take();
//!
//! let compiled = admins.to_sql()?;
//! assert_eq!(
//!     compiled.text,
//!     r#"SELECT * FROM "user" WHERE "user"."status" = $1 AND "user"."role" = $2 ORDER BY "user"."createdAt" DESC LIMIT $3"#
//! );
//!
//! let row = newest.exec(&db).await?.into_record()?;
//! ```

mod aggregate;
pub(crate) mod compile;
mod delete;
mod expr;
mod insert;
mod join;
mod param;
mod query;
mod select;
mod traits;
mod union;
mod update;
mod where_builder;
mod window;

pub use aggregate::AggregateBuilder;
pub use compile::{Compiled, compile};
pub use delete::DeleteBuilder;
pub use expr::Expr;
pub use insert::InsertBuilder;
pub use join::JoinBuilder;
pub use param::{Param, ParamList};
pub use query::{
    Assign, ColumnParser, ConflictAction, Data, Join, JoinKind, JoinTarget, OnConflict, OrderItem,
    Query, SelectItem, StatementKind, TruncateOptions, UnionItem, UnionKind, WindowDef,
};
pub use select::SelectBuilder;
pub use traits::QueryBuilder;
pub use union::UnionBuilder;
pub use update::UpdateBuilder;
pub use where_builder::{KeyValues, WhereBuilder};
pub use window::WindowBuilder;

/// Start a descriptor for an ad-hoc table (primary key `id`, no relations).
pub fn table(name: impl Into<String>) -> Query {
    Query::table(name)
}

/// A raw statement; `?` placeholders bind `params` in order.
pub fn raw(sql: impl Into<String>, params: Vec<Param>) -> Query {
    Query::raw(sql, params)
}
