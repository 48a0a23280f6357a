//! File writers for shaped tables.

use std::fs::{self, File};
use std::path::Path;

use arrow::error::ArrowError;
use arrow::json::writer::LineDelimited;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use thiserror::Error;

use super::table::Table;
use crate::models::OutputFormat;
use crate::schema::SchemaSpec;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

/// Write `table` to `path` in `format`, creating parent directories.
///
/// CSV carries a header row; JSONL writes one object per row with explicit
/// nulls; Parquet stores the Arrow schema derived from `schema`.
pub fn write_table(
    table: &Table,
    schema: Option<&SchemaSpec>,
    path: &Path,
    format: OutputFormat,
) -> Result<(), OutputError> {
    ensure_parent_dir(path)?;
    let batch = table.to_record_batch(schema)?;
    let file = File::create(path)?;

    match format {
        OutputFormat::Csv => {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(file);
            writer.write(&batch)?;
        }
        OutputFormat::Jsonl => {
            let mut writer = arrow::json::WriterBuilder::new()
                .with_explicit_nulls(true)
                .build::<_, LineDelimited>(file);
            writer.write(&batch)?;
            writer.finish()?;
        }
        OutputFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
            writer.write(&batch)?;
            writer.close()?;
        }
    }

    tracing::info!(format = %format, rows = table.num_rows(), "Output written");
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
