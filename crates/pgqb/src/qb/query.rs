//! The query descriptor: one value type describing a statement in progress.
//!
//! Builder traits clone a `Query` and change the fields they own; nothing in
//! here performs I/O until [`Query::exec`] hands the compiled SQL to an adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_postgres::types::ToSql;

use crate::adapter::Adapter;
use crate::error::{OrmError, OrmResult};
use crate::qb::compile::{self, Compiled};
use crate::qb::expr::Expr;
use crate::qb::param::Param;
use crate::result::{self, QueryValue, ResultMode};
use crate::schema::{Schema, TableDef};

/// Statement kind of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    Raw,
}

/// One entry of the SELECT list.
#[derive(Debug, Clone)]
pub enum SelectItem {
    /// Column reference; `*` and `table.*` are allowed.
    Column { name: String, alias: Option<String> },
    /// Trusted expression, optionally aliased.
    Expr { expr: Expr, alias: Option<String> },
    /// `name([DISTINCT] args) [OVER "window"]`; a `*` argument stays bare.
    Function {
        name: String,
        args: Vec<String>,
        distinct: bool,
        over: Option<String>,
        alias: Option<String>,
    },
    /// Correlated sub-select returning a related record (or list) as JSON.
    Relation {
        alias: String,
        query: Box<Query>,
        many: bool,
    },
}

/// JOIN flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

/// What a JOIN attaches: a table or a lateral sub-query.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    Table { name: String, alias: Option<String> },
    Lateral { query: Box<Query>, alias: String },
}

impl JoinTarget {
    /// Name that bare columns of the ON condition are qualified with.
    pub(crate) fn scope(&self) -> String {
        match self {
            JoinTarget::Table { alias: Some(alias), .. } => alias.clone(),
            JoinTarget::Table { name, .. } => crate::schema::scope_of(name),
            JoinTarget::Lateral { alias, .. } => alias.clone(),
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub target: JoinTarget,
    /// Rendered with the join target as the scope of bare columns.
    pub on: Expr,
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub enum OrderItem {
    Column {
        name: String,
        desc: bool,
        nulls_last: Option<bool>,
    },
    Raw(Expr),
}

/// A named WINDOW definition.
#[derive(Debug, Clone, Default)]
pub struct WindowDef {
    pub name: String,
    pub partition_by: Vec<String>,
    pub order: Vec<OrderItem>,
}

impl WindowDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn partition_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderItem::Column {
            name: column.into(),
            desc: false,
            nulls_last: None,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderItem::Column {
            name: column.into(),
            desc: true,
            nulls_last: None,
        });
        self
    }
}

/// Set operator joining two selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionKind {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl UnionKind {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            UnionKind::Union => "UNION",
            UnionKind::UnionAll => "UNION ALL",
            UnionKind::Intersect => "INTERSECT",
            UnionKind::IntersectAll => "INTERSECT ALL",
            UnionKind::Except => "EXCEPT",
            UnionKind::ExceptAll => "EXCEPT ALL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnionItem {
    pub kind: UnionKind,
    pub query: Box<Query>,
}

/// Right-hand side of a column assignment in INSERT values or UPDATE SET.
#[derive(Debug, Clone)]
pub enum Assign {
    Value(Param),
    /// Trusted SQL expression (`now()`, `"count" + ?`).
    Expr(Expr),
    Increment(Param),
    Decrement(Param),
}

/// Column values for one row to insert or update, plus nested relation payloads.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub(crate) values: Vec<(String, Assign)>,
    pub(crate) related: Vec<(String, Vec<Data>)>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; every field becomes a bound cell.
    pub fn from_json(value: Value) -> OrmResult<Self> {
        let Value::Object(map) = value else {
            return Err(OrmError::build("row data must be a JSON object"));
        };
        Ok(map
            .into_iter()
            .fold(Self::new(), |data, (k, v)| data.set_param(k, Param::cell(v))))
    }

    /// Build from any serializable struct or map.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> OrmResult<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Assign a bound value; a later assignment to the same column replaces the earlier one.
    pub fn set<T: ToSql + Send + Sync + 'static>(self, column: impl Into<String>, value: T) -> Self {
        self.assign(column, Assign::Value(Param::new(value)))
    }

    pub fn set_param(self, column: impl Into<String>, value: Param) -> Self {
        self.assign(column, Assign::Value(value))
    }

    /// Assign a trusted SQL expression.
    pub fn set_raw(self, column: impl Into<String>, sql: impl Into<String>) -> Self {
        self.assign(column, Assign::Expr(Expr::raw(sql)))
    }

    /// Assign a SQL template with `?` placeholders.
    pub fn set_template(self, column: impl Into<String>, sql: impl Into<String>, params: Vec<Param>) -> Self {
        self.assign(column, Assign::Expr(Expr::template(sql, params)))
    }

    /// `"column" = "column" + $n`
    pub fn increment<T: ToSql + Send + Sync + 'static>(self, column: impl Into<String>, by: T) -> Self {
        self.assign(column, Assign::Increment(Param::new(by)))
    }

    /// `"column" = "column" - $n`
    pub fn decrement<T: ToSql + Send + Sync + 'static>(self, column: impl Into<String>, by: T) -> Self {
        self.assign(column, Assign::Decrement(Param::new(by)))
    }

    /// Attach one related row to create along with this one.
    pub fn with_one(mut self, relation: impl Into<String>, data: Data) -> Self {
        self.related.push((relation.into(), vec![data]));
        self
    }

    /// Attach several related rows to create along with this one.
    pub fn with_many(mut self, relation: impl Into<String>, rows: Vec<Data>) -> Self {
        self.related.push((relation.into(), rows));
        self
    }

    pub fn assign(mut self, column: impl Into<String>, value: Assign) -> Self {
        let column = column.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Assign> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.related.is_empty()
    }
}

/// `ON CONFLICT` action.
#[derive(Debug, Clone)]
pub enum ConflictAction {
    DoNothing,
    /// `DO UPDATE SET col = excluded.col` for the listed columns; empty means
    /// every inserted column outside the conflict target.
    Merge(Vec<String>),
    /// `DO UPDATE SET` with explicit assignments.
    Set(Data),
}

#[derive(Debug, Clone)]
pub struct OnConflict {
    pub target: Vec<String>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncateOptions {
    pub restart_identity: bool,
    pub cascade: bool,
}

/// Converts a column's raw JSON value into its caller-visible form.
#[derive(Clone)]
pub struct ColumnParser(Arc<dyn Fn(Value) -> Value + Send + Sync>);

impl ColumnParser {
    pub fn new(f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn parse(&self, value: Value) -> Value {
        (self.0)(value)
    }
}

impl fmt::Debug for ColumnParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ColumnParser(..)")
    }
}

/// Descriptor of one statement in progress.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) schema: Option<Arc<Schema>>,
    pub(crate) table: Option<Arc<TableDef>>,
    pub(crate) kind: StatementKind,
    pub(crate) alias: Option<String>,
    pub(crate) distinct: bool,
    pub(crate) select: Vec<SelectItem>,
    pub(crate) joins: Vec<Join>,
    pub(crate) filters: Vec<Expr>,
    pub(crate) group: Vec<String>,
    pub(crate) having: Vec<Expr>,
    pub(crate) windows: Vec<WindowDef>,
    pub(crate) unions: Vec<UnionItem>,
    pub(crate) order: Vec<OrderItem>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    /// Implicit `LIMIT 1` of single-row result modes.
    pub(crate) take: bool,
    pub(crate) returning: Vec<String>,
    pub(crate) rows: Vec<Data>,
    pub(crate) on_conflict: Option<OnConflict>,
    pub(crate) set: Data,
    pub(crate) set_sql: Vec<Expr>,
    pub(crate) truncate: TruncateOptions,
    pub(crate) raw: Option<Expr>,
    /// Permit UPDATE/DELETE without a WHERE clause.
    pub(crate) all_rows: bool,
    pub(crate) result_mode: Option<ResultMode>,
    pub(crate) parsers: BTreeMap<String, ColumnParser>,
    pub(crate) defaults: BTreeMap<String, Param>,
    pub(crate) build_error: Option<String>,
}

impl Query {
    /// Start a descriptor for an ad-hoc table (primary key `id`, no relations).
    pub fn table(name: impl Into<String>) -> Self {
        Self::for_table(None, Arc::new(TableDef::new(name)))
    }

    /// Start a descriptor for a declared table.
    pub fn for_table(schema: Option<Arc<Schema>>, table: Arc<TableDef>) -> Self {
        Self {
            parsers: table.parsers.clone(),
            schema,
            table: Some(table),
            ..Self::default()
        }
    }

    /// A raw statement; `?` placeholders bind `params` in order.
    pub fn raw(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            kind: StatementKind::Raw,
            raw: Some(Expr::template(sql, params)),
            ..Self::default()
        }
    }

    /// Statement kind.
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Table definition this descriptor targets.
    pub fn table_def(&self) -> Option<&Arc<TableDef>> {
        self.table.as_ref()
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Name bare columns are qualified with: the alias, else the table name.
    pub fn scope(&self) -> String {
        match (&self.alias, &self.table) {
            (Some(alias), _) => alias.clone(),
            (None, Some(table)) => table.scope(),
            (None, None) => String::new(),
        }
    }

    /// Effective result mode.
    pub fn mode(&self) -> ResultMode {
        self.result_mode.unwrap_or(match self.kind {
            StatementKind::Select | StatementKind::Raw => ResultMode::All,
            StatementKind::Truncate => ResultMode::Void,
            _ if self.returning.is_empty() => ResultMode::RowCount,
            _ => ResultMode::All,
        })
    }

    /// Whether a single-row mode added the implicit `LIMIT 1`.
    pub fn takes_one(&self) -> bool {
        self.take
    }

    pub(crate) fn apply_mode(&mut self, mode: ResultMode) {
        self.result_mode = Some(mode);
        self.take = mode.is_single_row();
    }

    /// Record a build error; the first one wins and fails compilation.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        if self.build_error.is_none() {
            self.build_error = Some(message.into());
        }
    }

    /// Combine with `other` into a new descriptor; see [`Query::merge_in`].
    pub fn merge(&self, other: &Query) -> Query {
        let mut merged = self.clone();
        merged.merge_in(other);
        merged
    }

    /// Merge `other` into this descriptor.
    ///
    /// Scalars set on `other` overwrite, list clauses concatenate (`self`
    /// first), parsers and defaults merge key-wise. The result mode and the
    /// implicit single-row limit move over when `other` defines a mode.
    pub fn merge_in(&mut self, other: &Query) -> &mut Self {
        if other.schema.is_some() {
            self.schema.clone_from(&other.schema);
        }
        if other.table.is_some() {
            self.table.clone_from(&other.table);
        }
        if other.kind != StatementKind::Select {
            self.kind = other.kind;
        }
        if other.alias.is_some() {
            self.alias.clone_from(&other.alias);
        }
        self.distinct |= other.distinct;
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        if other.offset.is_some() {
            self.offset = other.offset;
        }
        if other.on_conflict.is_some() {
            self.on_conflict.clone_from(&other.on_conflict);
        }
        if other.truncate != TruncateOptions::default() {
            self.truncate = other.truncate;
        }
        if other.raw.is_some() {
            self.raw.clone_from(&other.raw);
        }
        self.all_rows |= other.all_rows;

        self.select.extend(other.select.iter().cloned());
        self.joins.extend(other.joins.iter().cloned());
        self.filters.extend(other.filters.iter().cloned());
        self.group.extend(other.group.iter().cloned());
        self.having.extend(other.having.iter().cloned());
        self.windows.extend(other.windows.iter().cloned());
        self.unions.extend(other.unions.iter().cloned());
        self.order.extend(other.order.iter().cloned());
        self.returning.extend(other.returning.iter().cloned());
        self.rows.extend(other.rows.iter().cloned());
        for (column, value) in &other.set.values {
            self.set = std::mem::take(&mut self.set).assign(column.clone(), value.clone());
        }
        self.set_sql.extend(other.set_sql.iter().cloned());

        self.parsers
            .extend(other.parsers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.defaults
            .extend(other.defaults.iter().map(|(k, v)| (k.clone(), v.clone())));

        if other.result_mode.is_some() {
            self.result_mode = other.result_mode;
            self.take = other.take;
        }
        if let Some(err) = &other.build_error {
            self.fail(err.clone());
        }
        self
    }

    /// Compile to SQL text and bind parameters.
    pub fn to_sql(&self) -> OrmResult<Compiled> {
        compile::compile(self)
    }

    /// Execute through `db` and shape the rows according to the result mode.
    pub async fn exec<A: Adapter + ?Sized>(&self, db: &A) -> OrmResult<QueryValue> {
        let compiled = self.to_sql()?;
        let params = compiled.params.as_refs();
        let output = db
            .query(&compiled.text, &params)
            .await
            .map_err(|err| self.map_error(err))?;
        if self.writes_without_returning() {
            result::shape_write(self.mode(), output, &self.parsers, &self.scope())
        } else {
            result::shape(self.mode(), output, &self.parsers, &self.scope())
        }
    }

    fn writes_without_returning(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        ) && self.returning.is_empty()
    }

    /// Execute and decode the shaped value into `T`.
    pub async fn fetch<T: DeserializeOwned, A: Adapter + ?Sized>(&self, db: &A) -> OrmResult<T> {
        self.exec(db).await?.decode()
    }

    /// Map constraint violations on the target table to [`OrmError::Conflict`].
    pub(crate) fn map_error(&self, err: OrmError) -> OrmError {
        match (&err, &self.table) {
            (OrmError::Database(db), Some(table)) if matches!(db.code.as_str(), "23505" | "23503") => {
                table.conflict(db)
            }
            _ => err,
        }
    }
}
