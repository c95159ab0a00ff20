//! # pgqb
//!
//! Composable Postgres query descriptors with nested transactions and
//! relation traversal.
//!
//! ## Features
//!
//! - **Descriptors are values**: every builder call returns a new [`Query`];
//!   the `push_*` forms mutate one you own
//! - **Deterministic SQL**: placeholders are numbered in clause order, so the
//!   same descriptor always compiles to the same text
//! - **Result modes**: a descriptor decides how its rows are shaped (all rows,
//!   one record, a single value, a column, a row count, ...)
//! - **Relations**: `belongsTo` / `hasOne` / `hasMany` (optionally through a
//!   join table) compile to correlated sub-queries, joins and nested JSON
//! - **Nested transactions**: savepoints for inner scopes and after-commit
//!   hooks that only run when the outermost transaction commits
//! - **Safe defaults**: UPDATE and DELETE require WHERE unless `all_rows()`
//! - **Query monitoring**: hooks, timings and timeouts around any adapter
//!
//! ## Example
//!
//! ```ignore
//! use pgqb::prelude::*;
//!
//! let schema = Schema::builder()
//!     .table(TableDef::new("user").timestamps().has_many("posts", "post", "authorId"))
//!     .table(TableDef::new("post").timestamps().belongs_to("author", "user", "authorId"))
//!     .build()?;
//!
//! let users = schema.table("user")?;
//! let db = pgqb::connect(&DbConfig::from_env()?)?;
//!
//! let active = users
//!     .query()
//!     .where_eq("active", true)
//!     .select_relation("posts")?
//!     .order("name");
//!
//! let rows = active.exec(&db).await?.into_records()?;
//!
//! db.transaction(|tx| async move {
//!     users.query().find(1).update(Data::new().set("active", false)).exec(&tx).await?;
//!     tx.after_commit(async { Ok(()) }).await
//! })
//! .await?;
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod ident;
pub mod monitor;
pub mod prelude;
pub mod qb;
pub mod relation;
pub mod result;
pub mod row;
pub mod schema;
pub mod transaction;
pub mod value;

#[cfg(feature = "pool")]
pub mod pool;

pub use adapter::{Adapter, Lease};
pub use config::DbConfig;
pub use error::{DbError, OrmError, OrmResult};
pub use ident::Ident;
pub use monitor::{
    CompositeHook, CompositeMonitor, HookAction, Instrumented, LoggingMonitor, MonitorConfig,
    NoopMonitor, QueryContext, QueryHook, QueryMonitor, QueryResult, QueryStats, QueryType,
    StatsMonitor, TracingSqlHook,
};
pub use qb::{Compiled, Data, Expr, Param, Query, compile, raw, table};
pub use relation::{RelationDef, RelationKind};
pub use result::{QueryValue, ResultMode};
pub use schema::{Schema, SchemaBuilder, Table, TableDef};
pub use transaction::{Db, Executor, TransactionIsolation, TransactionOptions, Tx};
pub use value::{Cell, QueryOutput, Record};

#[cfg(feature = "pool")]
pub use config::connect;
#[cfg(feature = "pool")]
pub use deadpool_postgres::Pool;
#[cfg(feature = "pool")]
pub use pool::{
    create_pool, create_pool_with_config, create_pool_with_manager_config, create_pool_with_tls,
};
