//! Decoding of driver rows into JSON cells.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};

use crate::error::{OrmError, OrmResult};

/// Column names of a row, in order.
pub(crate) fn columns(row: &Row) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Every cell of `row` as JSON, in column order.
pub(crate) fn values(row: &Row) -> OrmResult<Vec<Value>> {
    (0..row.len()).map(|idx| cell(row, idx)).collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> OrmResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| OrmError::decode(row.columns()[idx].name(), e.to_string()))
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Numbers when JSON can hold them exactly enough, strings otherwise.
fn decimal(value: Decimal) -> Value {
    let text = value.to_string();
    match text.parse::<Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(text),
    }
}

fn cell(row: &Row, idx: usize) -> OrmResult<Value> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|f| float(f64::from(f))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::String)
        }
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|u| Value::String(u.to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(|t| Value::String(t.to_rfc3339())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(|d| Value::String(d.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx)?.map(|t| Value::String(t.to_string())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::BOOL_ARRAY => get::<Vec<bool>>(row, idx)?.map(Value::from),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, idx)?.map(Value::from),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, idx)?.map(Value::from),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<String>>(row, idx)?.map(Value::from),
        Type::UUID_ARRAY => get::<Vec<uuid::Uuid>>(row, idx)?.map(|ids| {
            Value::Array(ids.into_iter().map(|u| Value::String(u.to_string())).collect())
        }),
        Type::JSONB_ARRAY | Type::JSON_ARRAY => get::<Vec<Value>>(row, idx)?.map(Value::Array),
        _ => {
            return Err(OrmError::decode(
                row.columns()[idx].name(),
                format!("unsupported column type {ty}"),
            ));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
