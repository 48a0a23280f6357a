//! Extraction pipeline.
//!
//! ```text
//! registry → planner → fetcher → schema validation → table → output / audit
//! ```
//!
//! `orchestrator::ExtractionPipeline` is the entry point; the other modules
//! are usable on their own.

pub mod audit;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod output;
pub mod planner;
pub mod registry;
pub mod table;

pub use audit::{read_audit_log, AccessEvent, AuditError, AuditLogger, AuditOptions, AuditRecord, IdSummary};
pub use error::PipelineError;
pub use fetcher::{query_fn, Fetcher, QueryFn, RowStream};
pub use orchestrator::{ExtractRequest, ExtractionPipeline};
pub use output::{write_table, OutputError};
pub use planner::{plan_fetch, FetchPlan};
pub use registry::{demographics_resource, ModeFetcher, Registry, ResourceSpec};
pub use table::Table;
pub use crate::db::repository::QueryError;
