//! Common imports for descriptor building and execution.
//!
//! ```ignore
//! use pgqb::prelude::*;
//! ```

pub use crate::adapter::{Adapter, Lease};
pub use crate::config::DbConfig;
pub use crate::error::{OrmError, OrmResult};
pub use crate::qb::{
    AggregateBuilder, Data, DeleteBuilder, Expr, InsertBuilder, JoinBuilder, JoinKind, Param,
    Query, QueryBuilder, SelectBuilder, UnionBuilder, UpdateBuilder, WhereBuilder, WindowBuilder,
    WindowDef,
};
pub use crate::relation::RelationDef;
pub use crate::result::{QueryValue, ResultMode};
pub use crate::schema::{Schema, Table, TableDef};
pub use crate::transaction::{Db, Executor, TransactionIsolation, TransactionOptions, Tx};
pub use crate::value::Record;

#[cfg(feature = "pool")]
pub use crate::{connect, create_pool, create_pool_with_config};
