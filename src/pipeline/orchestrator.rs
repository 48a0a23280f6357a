//! Extraction entry point: PLAN, FETCH, VALIDATE, SHAPE, PERSIST, AUDIT.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde_json::Value;

use super::audit::{AccessEvent, AuditLogger};
use super::error::PipelineError;
use super::fetcher::Fetcher;
use super::output::write_table;
use super::planner::{derived_added, plan_fetch};
use super::registry::Registry;
use super::table::Table;
use crate::config::{AppConfig, DEFAULT_BATCH_SIZE};
use crate::db::{provider_for, shared_provider, ConnectionProvider};
use crate::models::{GroupingMode, OutputFormat, QueryParams};
use crate::schema::{log_validation_issues, validate_stream, DumpOptions};

/// One extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractRequest {
    pub resource: String,
    /// Grouping mode name, `"cases"` or `"patients"`.
    pub by: String,
    pub ids: Vec<String>,
    pub fields: Option<Vec<String>>,
    pub hash_salt: Option<String>,
    pub out: Option<PathBuf>,
    pub out_format: Option<String>,
    pub actor: Option<String>,
}

impl ExtractRequest {
    pub fn new<I, S>(resource: &str, by: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource: resource.to_string(),
            by: by.to_string(),
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_hash_salt(mut self, salt: &str) -> Self {
        self.hash_salt = Some(salt.to_string());
        self
    }

    /// Persist to `path`; `format` overrides inference from the extension.
    pub fn with_output(mut self, path: impl Into<PathBuf>, format: Option<&str>) -> Self {
        self.out = Some(path.into());
        self.out_format = format.map(str::to_string);
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }
}

pub struct ExtractionPipeline {
    registry: Registry,
    provider: Arc<dyn ConnectionProvider>,
    batch_size: usize,
    reference_date: Option<NaiveDate>,
}

impl ExtractionPipeline {
    /// Pipeline over the built-in resources.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Result<Self, PipelineError> {
        Ok(Self {
            registry: Registry::builtin()?,
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            reference_date: None,
        })
    }

    /// Pipeline over a private provider for `config.db`.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(provider_for(&config.db))?.with_batch_size(config.batch_size))
    }

    /// Pipeline configured from the environment, on the process-wide provider.
    ///
    /// Every pipeline built this way shares one provider, initialised on first
    /// use even when several threads race to build one.
    pub fn from_env() -> Result<Self, PipelineError> {
        let config = AppConfig::from_env();
        Ok(Self::new(shared_provider())?.with_batch_size(config.batch_size))
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Identifiers per query call; zero disables chunking.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Fix "today" for derived ages instead of using the local date.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one extraction and return the shaped table.
    ///
    /// Planning, format and upstream failures abort before any output or
    /// audit record is produced. Rows failing validation are dropped and
    /// logged. When `audit` is given, exactly one record is appended.
    pub fn extract(
        &self,
        request: &ExtractRequest,
        audit: Option<&AuditLogger>,
    ) -> Result<Table, PipelineError> {
        // PLAN
        let spec = self.registry.get(&request.resource)?;
        let mode: GroupingMode = request.by.parse()?;
        let plan = plan_fetch(spec, mode, request.fields.as_deref())?;
        let mode_fetcher = spec.fetcher(mode)?;
        let out_format = match &request.out {
            Some(path) => Some(OutputFormat::resolve(path, request.out_format.as_deref())?),
            None => None,
        };

        let columns: Vec<String> = match &plan.include_fields {
            Some(fields) => fields.clone(),
            None => mode_fetcher
                .default_fields
                .iter()
                .map(|f| f.to_string())
                .collect(),
        };
        let include: BTreeSet<String> = columns.iter().cloned().collect();

        let mut params = QueryParams::new();
        params.insert(
            mode_fetcher.id_param.to_string(),
            Value::Array(request.ids.iter().cloned().map(Value::String).collect()),
        );
        params.insert(
            "fields".to_string(),
            plan.fetch_fields
                .as_ref()
                .map_or(Value::Null, |f| Value::from(f.clone())),
        );

        tracing::info!(
            resource = spec.name,
            by = %mode,
            id_count = request.ids.len(),
            "Extraction started"
        );
        let started = Instant::now();

        // FETCH + VALIDATE
        let fetcher = Fetcher::new(
            format!("{}:{}", spec.name, mode),
            Arc::clone(&self.provider),
            Arc::clone(&mode_fetcher.query),
        );
        let rows = fetcher.batched_stream(&params, mode_fetcher.id_param, self.batch_size);

        let mut options = DumpOptions::new()
            .with_salt(request.hash_salt.as_deref())
            .with_include(Some(&include));
        if let Some(date) = self.reference_date {
            options = options.with_today(date);
        }
        let outcome = validate_stream(&spec.schema, rows, &options)?;
        log_validation_issues(spec.name, &outcome.errors);

        // SHAPE
        let table = Table::from_records(&outcome.records, Some(&columns));
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        // PERSIST
        if let (Some(path), Some(format)) = (&request.out, out_format) {
            write_table(&table, Some(&spec.schema), path, format)?;
        }

        // AUDIT
        if let Some(audit) = audit {
            let added = derived_added(request.fields.as_deref(), plan.fetch_fields.as_deref());
            let out = request.out.as_ref().map(|p| p.display().to_string());
            audit.log_access(AccessEvent {
                actor: request.actor.as_deref(),
                action: "fetch",
                resource: spec.name,
                by: mode.as_str(),
                ids: &request.ids,
                fields: request.fields.as_deref(),
                fetch_fields: plan.fetch_fields.as_deref(),
                include_fields: plan.include_fields.as_deref(),
                derived_added: &added,
                hashed: options.hashing_active(),
                out: out.as_deref(),
                out_format: out_format.map(|f| f.as_str()),
                rows: Some(table.num_rows()),
                duration_ms: Some(duration_ms),
                extra: None,
            })?;
        }

        tracing::info!(
            resource = spec.name,
            by = %mode,
            rows = table.num_rows(),
            dropped = outcome.dropped(),
            duration_ms,
            "Extraction finished"
        );
        Ok(table)
    }
}
