//! Row values exchanged with adapters, and the JSON-backed bind cell.

use std::error::Error;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// A decoded row keyed by column name.
pub type Record = serde_json::Map<String, Value>;

/// Raw result of one statement as returned by an [`Adapter`](crate::Adapter).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Column names in projection order.
    pub columns: Vec<String>,
    /// Row tuples; each has one value per column.
    pub rows: Vec<Vec<Value>>,
    /// Rows returned or affected.
    pub row_count: u64,
}

impl QueryOutput {
    /// Build an output from column names and row tuples; `row_count` is the row count.
    pub fn new<C: Into<String>>(columns: impl IntoIterator<Item = C>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len() as u64;
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            row_count,
        }
    }

    /// An output with no rows, reporting `row_count` affected rows.
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            ..Self::default()
        }
    }

    /// Zip a row tuple with the column names.
    pub fn record(&self, row: &[Value]) -> Record {
        self.columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect()
    }
}

/// A bind value carried as JSON; the target SQL type is whatever the server
/// infers for its placeholder.
///
/// Keys copied out of returned rows (relation accessors, nested create) travel
/// as cells because their Rust type is not known statically.
#[derive(Clone, PartialEq)]
pub struct Cell(pub Value);

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

impl ToSql for Cell {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            value if matches!(*ty, Type::JSON | Type::JSONB) => value.to_sql(ty, out),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Number(n) => number_to_sql(n, ty, out),
            Value::String(s) => string_to_sql(s, ty, out),
            other => Err(format!("cannot bind {other} as {ty}").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn integer(n: &Number) -> Result<i64, BoxError> {
    n.as_i64()
        .ok_or_else(|| format!("{n} is not an integer").into())
}

fn float(n: &Number) -> Result<f64, BoxError> {
    n.as_f64()
        .ok_or_else(|| format!("{n} is not representable as f64").into())
}

fn number_to_sql(n: &Number, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(integer(n)?)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(integer(n)?)?.to_sql(ty, out),
        Type::INT8 => integer(n)?.to_sql(ty, out),
        Type::OID => u32::try_from(integer(n)?)?.to_sql(ty, out),
        Type::FLOAT4 => (float(n)? as f32).to_sql(ty, out),
        Type::FLOAT8 => float(n)?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(&n.to_string())?.to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => n.to_string().to_sql(ty, out),
        _ => Err(format!("cannot bind number {n} as {ty}").into()),
    }
}

fn string_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        Type::TIMESTAMP => NaiveDateTime::from_str(s)?.to_sql(ty, out),
        Type::DATE => NaiveDate::from_str(s)?.to_sql(ty, out),
        Type::TIME => NaiveTime::from_str(s)?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(s)?.to_sql(ty, out),
        Type::INT2 => s.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.parse::<i64>()?.to_sql(ty, out),
        Type::BOOL => s.parse::<bool>()?.to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}
