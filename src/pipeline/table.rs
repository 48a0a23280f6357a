//! Shaped tabular result.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use serde_json::Value;

use crate::models::Record;
use crate::schema::{FieldKind, SchemaSpec};

/// Ordered columns over rows of JSON values.
///
/// Every row has exactly one value per column; missing values are `Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Shape `records` to `columns`, in that order.
    ///
    /// With `None`, the columns are every key seen, in first-seen order.
    pub fn from_records(records: &[Record], columns: Option<&[String]>) -> Self {
        let columns: Vec<String> = match columns {
            Some(cols) => cols.to_vec(),
            None => {
                let mut seen: Vec<String> = Vec::new();
                for key in records.iter().flat_map(|r| r.keys()) {
                    if !seen.contains(key) {
                        seen.push(key.clone());
                    }
                }
                seen
            }
        };
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Rows as column-keyed maps.
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Convert to Arrow. Column types come from `schema` when it declares the
    /// column, otherwise they are inferred from the values.
    pub fn to_record_batch(&self, schema: Option<&SchemaSpec>) -> Result<RecordBatch, ArrowError> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());

        for name in &self.columns {
            let values = self.column(name).unwrap_or_default();
            let data_type = schema
                .and_then(|s| s.kind_of(name))
                .map(arrow_type)
                .unwrap_or_else(|| infer_type(&values));
            arrays.push(build_array(&data_type, &values));
            fields.push(Field::new(name, data_type, true));
        }

        let options = RecordBatchOptions::new().with_row_count(Some(self.rows.len()));
        RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)
    }
}

fn arrow_type(kind: FieldKind) -> DataType {
    match kind {
        FieldKind::Integer => DataType::Int64,
        FieldKind::Float => DataType::Float64,
        FieldKind::Text | FieldKind::Date | FieldKind::DateTime => DataType::Utf8,
    }
}

fn infer_type(values: &[&Value]) -> DataType {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    if present.is_empty() || !present.iter().all(|v| v.is_number()) {
        DataType::Utf8
    } else if present.iter().all(|v| v.is_i64()) {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

fn build_array(data_type: &DataType, values: &[&Value]) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(values.iter().map(|v| v.as_i64()).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(values.iter().map(|v| v.as_f64()).collect::<Float64Array>()),
        _ => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}
