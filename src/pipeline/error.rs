use thiserror::Error;

use super::audit::AuditError;
use super::output::OutputError;
use crate::db::repository::QueryError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Invalid grouping mode '{0}': expected 'cases' or 'patients'")]
    InvalidGroupingMode(String),

    #[error("Fields {fields:?} of resource '{resource}' require grouping by cases")]
    GroupingModeFieldMismatch { resource: String, fields: Vec<String> },

    #[error("Resource '{resource}' does not support grouping by {by}")]
    UnsupportedGroupingMode { resource: String, by: String },

    #[error("Unsupported output format: {0}")]
    UnsupportedOutputFormat(String),

    #[error("Invalid resource spec '{resource}': {reason}")]
    InvalidResourceSpec { resource: String, reason: String },

    #[error("Upstream query failed: {0}")]
    UpstreamQuery(#[from] QueryError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
