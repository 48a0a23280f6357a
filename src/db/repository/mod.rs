//! Row-producing query functions.
//!
//! Every function takes an already-open connection plus named parameters and
//! never opens, commits or closes anything itself; scoping is the caller's job.

pub mod demographics;

pub use demographics::*;

use rusqlite::types::ValueRef;
use serde_json::Value;
use thiserror::Error;

use super::varid::UnknownVarId;
use super::DatabaseError;
use crate::models::{QueryParams, Row};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unknown fields requested: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error(transparent)]
    UnknownVarId(#[from] UnknownVarId),
}

impl QueryError {
    fn invalid(name: &str, reason: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Read a list-of-identifiers parameter. Numbers are accepted and stringified.
pub(crate) fn id_list(params: &QueryParams, name: &str) -> Result<Vec<String>, QueryError> {
    match params.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(QueryError::invalid(name, "identifiers must be strings or numbers")),
            })
            .collect(),
        Some(Value::Null) | None => Err(QueryError::invalid(name, "missing identifier list")),
        Some(_) => Err(QueryError::invalid(name, "expected a list of identifiers")),
    }
}

/// Read the optional `fields` parameter; `None` means "use the defaults".
pub(crate) fn field_list(params: &QueryParams) -> Result<Option<Vec<String>>, QueryError> {
    match params.get("fields") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.is_empty() => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| QueryError::invalid("fields", "field names must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(QueryError::invalid("fields", "expected a list of field names")),
    }
}

/// Convert one SQLite cell into JSON.
pub(crate) fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Run `sql` and collect every row as a column-name keyed map.
pub(crate) fn query_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[String],
) -> Result<Vec<Row>, QueryError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), value_to_json(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> QueryParams {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn id_list_accepts_strings_and_numbers() {
        let p = params(json!({ "ids": ["a", 7] }));
        assert_eq!(id_list(&p, "ids").unwrap(), vec!["a", "7"]);
    }

    #[test]
    fn id_list_rejects_scalars_and_missing() {
        assert!(matches!(
            id_list(&params(json!({ "ids": "a" })), "ids"),
            Err(QueryError::InvalidParameter { .. })
        ));
        assert!(id_list(&params(json!({})), "ids").is_err());
    }

    #[test]
    fn field_list_treats_null_and_empty_as_defaults() {
        assert_eq!(field_list(&params(json!({}))).unwrap(), None);
        assert_eq!(field_list(&params(json!({ "fields": null }))).unwrap(), None);
        assert_eq!(field_list(&params(json!({ "fields": [] }))).unwrap(), None);
        assert_eq!(
            field_list(&params(json!({ "fields": ["a", "b"] }))).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn cells_convert_to_json() {
        assert_eq!(value_to_json(ValueRef::Null), Value::Null);
        assert_eq!(value_to_json(ValueRef::Integer(3)), json!(3));
        assert_eq!(value_to_json(ValueRef::Real(1.5)), json!(1.5));
        assert_eq!(value_to_json(ValueRef::Text(b"x")), json!("x"));
    }

    #[test]
    fn unknown_fields_message_lists_names() {
        let err = QueryError::UnknownFields(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Unknown fields requested: a, b");
    }
}
