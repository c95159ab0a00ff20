//! Transaction manager: nested scopes on top of `BEGIN` / `SAVEPOINT`.
//!
//! [`Db`] is the entry point over a [`Lease`]able adapter. Opening a
//! transaction leases one connection, emits `BEGIN` and hands the work a
//! [`Tx`]. Calling [`Executor::transaction`] on a `Tx` opens a savepoint;
//! savepoints are named by a counter that only grows for the lifetime of the
//! outermost transaction.
//!
//! A transaction whose future is dropped before it finishes (cancelled task,
//! timeout, panic in the work) is rolled back on the runtime before its
//! connection is released.
//!
//! # Example
//!
//! ```ignore
//! use pgqb::prelude::*;
//!
//! # async fn demo(db: &Db<pgqb::Pool>, accounts: &Table) -> OrmResult<()> {
//! db.transaction(|tx| async move {
//!     accounts.query().find(1).decrement("balance", 100).exec(&tx).await?;
//!
//!     // Rolls back to its own savepoint only.
//!     let _ = tx
//!         .transaction(|inner| async move {
//!             accounts.query().find(2).increment("balance", 100).exec(&inner).await?;
//!             Err::<(), _>(OrmError::validation("limit exceeded"))
//!         })
//!         .await;
//!
//!     tx.after_commit(async { Ok(()) }).await
//! })
//! .await
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio_postgres::types::ToSql;

use crate::adapter::{Adapter, Lease};
use crate::error::{OrmError, OrmResult};
use crate::value::QueryOutput;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    fn as_sql(self) -> &'static str {
        match self {
            TransactionIsolation::ReadUncommitted => "READ UNCOMMITTED",
            TransactionIsolation::ReadCommitted => "READ COMMITTED",
            TransactionIsolation::RepeatableRead => "REPEATABLE READ",
            TransactionIsolation::Serializable => "SERIALIZABLE",
        }
    }
}

/// Characteristics applied right after `BEGIN`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    isolation: Option<TransactionIsolation>,
    read_only: Option<bool>,
    deferrable: Option<bool>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, isolation: TransactionIsolation) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    /// The `SET TRANSACTION` statement, or `None` when nothing was requested.
    pub(crate) fn statement(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(isolation) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", isolation.as_sql()));
        }
        match self.read_only {
            Some(true) => modes.push("READ ONLY".to_string()),
            Some(false) => modes.push("READ WRITE".to_string()),
            None => {}
        }
        match self.deferrable {
            Some(true) => modes.push("DEFERRABLE".to_string()),
            Some(false) => modes.push("NOT DEFERRABLE".to_string()),
            None => {}
        }
        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

/// Something descriptors execute on that can also scope a transaction.
pub trait Executor: Adapter {
    /// The connection a transaction opened here runs on.
    type Conn: Adapter + 'static;

    /// Run `work` in a new transaction scope: a real transaction from a
    /// [`Db`], a savepoint from a [`Tx`].
    ///
    /// `Ok` commits (or releases) the scope. `Err` rolls it back and is
    /// returned unchanged.
    fn transaction<T, F, Fut>(&self, work: F) -> impl Future<Output = OrmResult<T>> + Send
    where
        F: FnOnce(Tx<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send;

    /// Run `work` in the current transaction, opening one only when there is
    /// none.
    fn ensure_transaction<T, F, Fut>(&self, work: F) -> impl Future<Output = OrmResult<T>> + Send
    where
        F: FnOnce(Tx<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send;

    /// Run `hook` once the outermost transaction commits. Outside a
    /// transaction the hook runs immediately.
    fn after_commit<H>(&self, hook: H) -> impl Future<Output = OrmResult<()>> + Send
    where
        H: Future<Output = OrmResult<()>> + Send + 'static;
}

/// Database handle: runs statements on any connection and opens transactions
/// on a leased one.
#[derive(Clone)]
pub struct Db<A> {
    adapter: A,
}

impl<A> Db<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

impl<A: fmt::Debug> fmt::Debug for Db<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db").field("adapter", &self.adapter).finish()
    }
}

impl<A: Lease> Db<A> {
    /// Like [`Executor::transaction`], applying `options` right after `BEGIN`.
    pub async fn transaction_with<T, F, Fut>(
        &self,
        options: TransactionOptions,
        work: F,
    ) -> OrmResult<T>
    where
        F: FnOnce(Tx<A::Conn>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        let conn = self.adapter.lease().await?;
        conn.batch_execute("BEGIN").await?;
        let tx = Tx::begin(conn);

        if let Some(statement) = options.statement() {
            if let Err(err) = tx.inner.conn.batch_execute(&statement).await {
                rollback(&tx.inner.conn, "ROLLBACK").await;
                tx.inner.finish();
                return Err(err);
            }
        }

        match work(tx.clone()).await {
            Ok(value) => {
                if let Err(err) = tx.inner.conn.batch_execute("COMMIT").await {
                    tx.inner.finish();
                    return Err(err);
                }
                let hooks = tx.inner.finish();
                for hook in hooks {
                    if let Err(err) = hook.await {
                        tracing::error!(
                            target: "pgqb.transaction",
                            error = %err,
                            "after-commit hook failed"
                        );
                    }
                }
                Ok(value)
            }
            Err(err) => {
                rollback(&tx.inner.conn, "ROLLBACK").await;
                tx.inner.finish();
                Err(err)
            }
        }
    }
}

impl<A: Adapter> Adapter for Db<A> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        self.adapter.query(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.adapter.batch_execute(sql).await
    }
}

impl<A: Lease> Executor for Db<A> {
    type Conn = A::Conn;

    async fn transaction<T, F, Fut>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Tx<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        self.transaction_with(TransactionOptions::new(), work).await
    }

    async fn ensure_transaction<T, F, Fut>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Tx<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        self.transaction_with(TransactionOptions::new(), work).await
    }

    async fn after_commit<H>(&self, hook: H) -> OrmResult<()>
    where
        H: Future<Output = OrmResult<()>> + Send + 'static,
    {
        hook.await
    }
}

/// Log and swallow a failed rollback; the caller re-raises the original error.
async fn rollback<C: Adapter>(conn: &C, sql: &str) {
    if let Err(err) = conn.batch_execute(sql).await {
        tracing::warn!(target: "pgqb.transaction", error = %err, sql, "rollback failed");
    }
}

/// Roll back an abandoned transaction in the background; the connection is
/// released once the rollback has run.
fn spawn_rollback<C: Adapter + 'static>(conn: Arc<C>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                rollback(conn.as_ref(), "ROLLBACK").await;
            });
        }
        Err(_) => tracing::error!(
            target: "pgqb.transaction",
            "no runtime to roll back an abandoned transaction"
        ),
    }
}

type Hook = BoxFuture<'static, OrmResult<()>>;

struct TxState {
    savepoints: u64,
    hooks: Vec<(usize, Hook)>,
    closed: bool,
}

struct TxInner<C> {
    conn: Arc<C>,
    state: Mutex<TxState>,
    abandon: fn(Arc<C>),
}

impl<C> TxInner<C> {
    fn lock(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the context and hand back the queued hooks in registration order.
    fn finish(&self) -> Vec<Hook> {
        let mut state = self.lock();
        state.closed = true;
        std::mem::take(&mut state.hooks)
            .into_iter()
            .map(|(_, hook)| hook)
            .collect()
    }
}

impl<C> Drop for TxInner<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.closed = true;
        tracing::warn!(
            target: "pgqb.transaction",
            pending_hooks = state.hooks.len(),
            "transaction dropped before commit or rollback; rolling back"
        );
        (self.abandon)(Arc::clone(&self.conn));
    }
}

/// Handle to an open transaction at one nesting depth.
///
/// Clones share the same context. Statements run through a `Tx` execute on the
/// transaction's connection.
pub struct Tx<C> {
    inner: Arc<TxInner<C>>,
    depth: usize,
}

impl<C> Clone for Tx<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            depth: self.depth,
        }
    }
}

impl<C> fmt::Debug for Tx<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Tx")
            .field("depth", &self.depth)
            .field("savepoints", &state.savepoints)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<C: Adapter + 'static> Tx<C> {
    fn begin(conn: C) -> Self {
        Self {
            inner: Arc::new(TxInner {
                conn: Arc::new(conn),
                state: Mutex::new(TxState {
                    savepoints: 0,
                    hooks: Vec::new(),
                    closed: false,
                }),
                abandon: spawn_rollback::<C>,
            }),
            depth: 1,
        }
    }
}

impl<C> Tx<C> {

    /// Nesting depth: 1 for the outermost transaction, +1 per savepoint.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the outermost transaction has committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().closed
    }

    fn ensure_open(&self) -> OrmResult<()> {
        if self.is_finished() {
            Err(OrmError::Transaction(
                "transaction already finished".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl<C: Adapter> Adapter for Tx<C> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<QueryOutput> {
        self.ensure_open()?;
        self.inner.conn.query(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        self.ensure_open()?;
        self.inner.conn.batch_execute(sql).await
    }
}

impl<C: Adapter + 'static> Executor for Tx<C> {
    type Conn = C;

    async fn transaction<T, F, Fut>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Tx<C>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        let savepoint = {
            let mut state = self.inner.lock();
            state.savepoints += 1;
            state.savepoints
        };
        self.batch_execute(&format!("SAVEPOINT \"{savepoint}\"")).await?;

        let nested = Tx {
            inner: Arc::clone(&self.inner),
            depth: self.depth + 1,
        };
        match work(nested).await {
            Ok(value) => {
                self.batch_execute(&format!("RELEASE SAVEPOINT \"{savepoint}\""))
                    .await?;
                let mut state = self.inner.lock();
                for (depth, _) in state.hooks.iter_mut() {
                    if *depth > self.depth {
                        *depth = self.depth;
                    }
                }
                Ok(value)
            }
            Err(err) => {
                rollback(
                    &self.inner.conn,
                    &format!("ROLLBACK TO SAVEPOINT \"{savepoint}\""),
                )
                .await;
                let depth = self.depth;
                self.inner.lock().hooks.retain(|(d, _)| *d <= depth);
                Err(err)
            }
        }
    }

    async fn ensure_transaction<T, F, Fut>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Tx<C>) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        work(self.clone()).await
    }

    async fn after_commit<H>(&self, hook: H) -> OrmResult<()>
    where
        H: Future<Output = OrmResult<()>> + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(OrmError::Transaction(
                "transaction already finished".to_string(),
            ));
        }
        state.hooks.push((self.depth, Box::pin(hook)));
        Ok(())
    }
}
