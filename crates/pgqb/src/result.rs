//! Result shaping: how raw adapter output becomes the caller-visible value.
//!
//! Every descriptor carries a [`ResultMode`]; [`shape`] dispatches on it
//! through a fixed table of handlers.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{OrmError, OrmResult};
use crate::qb::ColumnParser;
use crate::value::{QueryOutput, Record};

/// How rows returned by a statement are reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// Every row as a parsed record.
    All,
    /// First row; `NotFound` when there is none.
    One,
    /// First row or `None`.
    OneOptional,
    /// Raw row tuples, unparsed.
    Rows,
    /// First column of every row.
    Pluck,
    /// First column of the first row; `NotFound` when there is no row.
    Value,
    /// First column of the first row or `None`.
    ValueOptional,
    /// Whether any row came back.
    Exists,
    /// Number of rows returned or affected.
    RowCount,
    /// Discard the result.
    Void,
}

impl ResultMode {
    /// Single-row modes imply `LIMIT 1` on selects.
    pub fn is_single_row(self) -> bool {
        matches!(
            self,
            ResultMode::One | ResultMode::OneOptional | ResultMode::Value | ResultMode::ValueOptional
        )
    }
}

/// The shaped result of executing a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Records(Vec<Record>),
    Record(Record),
    OptionalRecord(Option<Record>),
    Rows(Vec<Vec<Value>>),
    Values(Vec<Value>),
    Value(Value),
    OptionalValue(Option<Value>),
    Exists(bool),
    RowCount(u64),
    Void,
}

impl QueryValue {
    /// Convert into a plain JSON value (`None` becomes `null`).
    pub fn into_json(self) -> Value {
        match self {
            QueryValue::Records(records) => {
                Value::Array(records.into_iter().map(Value::Object).collect())
            }
            QueryValue::Record(record) => Value::Object(record),
            QueryValue::OptionalRecord(record) => record.map_or(Value::Null, Value::Object),
            QueryValue::Rows(rows) => Value::Array(rows.into_iter().map(Value::Array).collect()),
            QueryValue::Values(values) => Value::Array(values),
            QueryValue::Value(value) => value,
            QueryValue::OptionalValue(value) => value.unwrap_or(Value::Null),
            QueryValue::Exists(found) => Value::Bool(found),
            QueryValue::RowCount(count) => Value::from(count),
            QueryValue::Void => Value::Null,
        }
    }

    /// Deserialize the shaped value into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> OrmResult<T> {
        serde_json::from_value(self.into_json()).map_err(|e| OrmError::Serialization(e.to_string()))
    }

    pub fn into_records(self) -> OrmResult<Vec<Record>> {
        match self {
            QueryValue::Records(records) => Ok(records),
            QueryValue::Record(record) => Ok(vec![record]),
            QueryValue::OptionalRecord(record) => Ok(record.into_iter().collect()),
            other => Err(OrmError::decode("*", format!("expected records, got {other:?}"))),
        }
    }

    pub fn into_record(self) -> OrmResult<Record> {
        match self {
            QueryValue::Record(record) | QueryValue::OptionalRecord(Some(record)) => Ok(record),
            QueryValue::Records(records) => records
                .into_iter()
                .next()
                .ok_or_else(|| OrmError::not_found("no record returned")),
            other => Err(OrmError::decode("*", format!("expected a record, got {other:?}"))),
        }
    }

    pub fn row_count(&self) -> Option<u64> {
        match self {
            QueryValue::RowCount(n) => Some(*n),
            _ => None,
        }
    }
}

type Parsers = BTreeMap<String, ColumnParser>;

fn parse_record(output: &QueryOutput, row: Vec<Value>, parsers: &Parsers) -> Record {
    output
        .columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            let value = match parsers.get(column) {
                Some(parser) => parser.parse(value),
                None => value,
            };
            (column.clone(), value)
        })
        .collect()
}

fn first_column(output: &QueryOutput, row: Vec<Value>, parsers: &Parsers) -> Value {
    let value = row.into_iter().next().unwrap_or(Value::Null);
    match output.columns.first().and_then(|c| parsers.get(c)) {
        Some(parser) => parser.parse(value),
        None => value,
    }
}

fn all(output: QueryOutput, parsers: &Parsers, _: &str) -> OrmResult<QueryValue> {
    let records = output
        .rows
        .iter()
        .cloned()
        .map(|row| parse_record(&output, row, parsers))
        .collect();
    Ok(QueryValue::Records(records))
}

fn one(output: QueryOutput, parsers: &Parsers, table: &str) -> OrmResult<QueryValue> {
    match one_optional(output, parsers, table)? {
        QueryValue::OptionalRecord(Some(record)) => Ok(QueryValue::Record(record)),
        _ => Err(OrmError::not_found(format!("{table}: record not found"))),
    }
}

fn one_optional(mut output: QueryOutput, parsers: &Parsers, _: &str) -> OrmResult<QueryValue> {
    let row = (!output.rows.is_empty()).then(|| output.rows.swap_remove(0));
    Ok(QueryValue::OptionalRecord(
        row.map(|row| parse_record(&output, row, parsers)),
    ))
}

fn rows(output: QueryOutput, _: &Parsers, _: &str) -> OrmResult<QueryValue> {
    Ok(QueryValue::Rows(output.rows))
}

fn pluck(output: QueryOutput, parsers: &Parsers, _: &str) -> OrmResult<QueryValue> {
    let values = output
        .rows
        .iter()
        .cloned()
        .map(|row| first_column(&output, row, parsers))
        .collect();
    Ok(QueryValue::Values(values))
}

fn value(output: QueryOutput, parsers: &Parsers, table: &str) -> OrmResult<QueryValue> {
    match value_optional(output, parsers, table)? {
        QueryValue::OptionalValue(Some(value)) => Ok(QueryValue::Value(value)),
        _ => Err(OrmError::not_found(format!("{table}: value not found"))),
    }
}

fn value_optional(mut output: QueryOutput, parsers: &Parsers, _: &str) -> OrmResult<QueryValue> {
    let row = (!output.rows.is_empty()).then(|| output.rows.swap_remove(0));
    Ok(QueryValue::OptionalValue(
        row.map(|row| first_column(&output, row, parsers)),
    ))
}

fn exists(output: QueryOutput, _: &Parsers, _: &str) -> OrmResult<QueryValue> {
    Ok(QueryValue::Exists(!output.rows.is_empty()))
}

fn row_count(output: QueryOutput, _: &Parsers, _: &str) -> OrmResult<QueryValue> {
    Ok(QueryValue::RowCount(output.row_count))
}

fn void(_: QueryOutput, _: &Parsers, _: &str) -> OrmResult<QueryValue> {
    Ok(QueryValue::Void)
}

type Handler = fn(QueryOutput, &Parsers, &str) -> OrmResult<QueryValue>;

fn handler(mode: ResultMode) -> Handler {
    match mode {
        ResultMode::All => all,
        ResultMode::One => one,
        ResultMode::OneOptional => one_optional,
        ResultMode::Rows => rows,
        ResultMode::Pluck => pluck,
        ResultMode::Value => value,
        ResultMode::ValueOptional => value_optional,
        ResultMode::Exists => exists,
        ResultMode::RowCount => row_count,
        ResultMode::Void => void,
    }
}

/// Reshape adapter output for `mode`, applying column parsers by name.
///
/// `table` only labels not-found errors.
pub fn shape(
    mode: ResultMode,
    output: QueryOutput,
    parsers: &BTreeMap<String, ColumnParser>,
    table: &str,
) -> OrmResult<QueryValue> {
    handler(mode)(output, parsers, table)
}

/// Shape the output of an INSERT/UPDATE/DELETE without `RETURNING`.
///
/// No rows come back, so single-row and exists modes read the affected row
/// count: a required mode fails with `NotFound` when nothing was written.
pub fn shape_write(
    mode: ResultMode,
    output: QueryOutput,
    parsers: &BTreeMap<String, ColumnParser>,
    table: &str,
) -> OrmResult<QueryValue> {
    let affected = output.row_count;
    match mode {
        ResultMode::One | ResultMode::Value if affected == 0 => {
            Err(OrmError::not_found(format!("{table}: no rows affected")))
        }
        ResultMode::One | ResultMode::OneOptional | ResultMode::Value | ResultMode::ValueOptional => {
            Ok(QueryValue::RowCount(affected))
        }
        ResultMode::Exists => Ok(QueryValue::Exists(affected > 0)),
        _ => shape(mode, output, parsers, table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> QueryOutput {
        QueryOutput::new(
            ["id", "name"],
            vec![vec![json!(1), json!("ann")], vec![json!(2), json!("bob")]],
        )
    }

    fn upper() -> Parsers {
        let mut parsers = Parsers::new();
        parsers.insert(
            "name".to_string(),
            ColumnParser::new(|v| match v {
                Value::String(s) => Value::String(s.to_uppercase()),
                other => other,
            }),
        );
        parsers
    }

    #[test]
    fn all_parses_every_row() {
        let value = shape(ResultMode::All, users(), &upper(), "user").unwrap();
        assert_eq!(
            value.into_json(),
            json!([{"id": 1, "name": "ANN"}, {"id": 2, "name": "BOB"}])
        );
    }

    #[test]
    fn rows_skip_parsers() {
        let value = shape(ResultMode::Rows, users(), &upper(), "user").unwrap();
        assert_eq!(value.into_json(), json!([[1, "ann"], [2, "bob"]]));
    }

    #[test]
    fn one_errors_on_empty() {
        let empty = QueryOutput::new(["id"], vec![]);
        let err = shape(ResultMode::One, empty.clone(), &Parsers::new(), "user").unwrap_err();
        assert!(err.is_not_found());
        let opt = shape(ResultMode::OneOptional, empty, &Parsers::new(), "user").unwrap();
        assert_eq!(opt, QueryValue::OptionalRecord(None));
    }

    #[test]
    fn value_and_pluck_use_first_column() {
        let output = QueryOutput::new(["name"], vec![vec![json!("ann")], vec![json!("bob")]]);
        let plucked = shape(ResultMode::Pluck, output.clone(), &upper(), "user").unwrap();
        assert_eq!(plucked.into_json(), json!(["ANN", "BOB"]));
        let value = shape(ResultMode::Value, output, &upper(), "user").unwrap();
        assert_eq!(value, QueryValue::Value(json!("ANN")));

        let empty = QueryOutput::new(["name"], vec![]);
        assert!(shape(ResultMode::Value, empty.clone(), &upper(), "user").unwrap_err().is_not_found());
        assert_eq!(
            shape(ResultMode::ValueOptional, empty, &upper(), "user").unwrap(),
            QueryValue::OptionalValue(None)
        );
    }

    #[test]
    fn exists_row_count_and_void() {
        assert_eq!(
            shape(ResultMode::Exists, users(), &Parsers::new(), "user").unwrap(),
            QueryValue::Exists(true)
        );
        assert_eq!(
            shape(ResultMode::RowCount, QueryOutput::affected(3), &Parsers::new(), "user").unwrap(),
            QueryValue::RowCount(3)
        );
        assert_eq!(
            shape(ResultMode::Void, users(), &Parsers::new(), "user").unwrap(),
            QueryValue::Void
        );
    }

    #[test]
    fn writes_without_returning_count_affected_rows() {
        let none = &Parsers::new();
        assert_eq!(
            shape_write(ResultMode::One, QueryOutput::affected(1), none, "account").unwrap(),
            QueryValue::RowCount(1)
        );
        assert!(
            shape_write(ResultMode::One, QueryOutput::affected(0), none, "account")
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(
            shape_write(ResultMode::OneOptional, QueryOutput::affected(0), none, "account").unwrap(),
            QueryValue::RowCount(0)
        );
        assert_eq!(
            shape_write(ResultMode::Exists, QueryOutput::affected(2), none, "account").unwrap(),
            QueryValue::Exists(true)
        );
        assert_eq!(
            shape_write(ResultMode::RowCount, QueryOutput::affected(4), none, "account").unwrap(),
            QueryValue::RowCount(4)
        );
    }

    #[test]
    fn decode_into_typed_rows() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            id: i64,
            name: String,
        }
        let users: Vec<User> = shape(ResultMode::All, users(), &Parsers::new(), "user")
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(users[1], User { id: 2, name: "bob".into() });
    }
}
