//! Extractable resources: schema, field dependencies and query functions.
//!
//! A `Registry` is populated once at startup and then only read.

use std::collections::{BTreeMap, BTreeSet};

use super::error::PipelineError;
use super::fetcher::{query_fn, QueryFn};
use crate::db::repository::{
    fetch_demography_for_cases, fetch_demography_for_patients, CASE_DEFAULT_FIELDS,
    CASE_ID_PARAM, PATIENT_DEFAULT_FIELDS, PATIENT_ID_PARAM,
};
use crate::models::GroupingMode;
use crate::schema::demographics::demographics_schema;
use crate::schema::SchemaSpec;

/// How to query a resource for one grouping mode.
#[derive(Clone)]
pub struct ModeFetcher {
    /// Parameter carrying the identifier list; also the chunking parameter.
    pub id_param: &'static str,
    /// Columns the query returns when no fields are requested.
    pub default_fields: &'static [&'static str],
    pub query: QueryFn,
}

impl std::fmt::Debug for ModeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeFetcher")
            .field("id_param", &self.id_param)
            .field("default_fields", &self.default_fields)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub name: &'static str,
    pub schema: SchemaSpec,
    /// Derived field -> base fields it is computed from, in fetch order.
    pub derived_deps: BTreeMap<&'static str, Vec<&'static str>>,
    /// Fields only meaningful when grouping by case.
    pub requires_cases: BTreeSet<&'static str>,
    pub fetchers: BTreeMap<GroupingMode, ModeFetcher>,
}

impl ResourceSpec {
    pub fn new(name: &'static str, schema: SchemaSpec) -> Self {
        Self {
            name,
            schema,
            derived_deps: BTreeMap::new(),
            requires_cases: BTreeSet::new(),
            fetchers: BTreeMap::new(),
        }
    }

    pub fn with_derived(mut self, field: &'static str, deps: &[&'static str]) -> Self {
        self.derived_deps.insert(field, deps.to_vec());
        self
    }

    pub fn with_requires_cases(mut self, fields: &[&'static str]) -> Self {
        self.requires_cases.extend(fields.iter().copied());
        self
    }

    pub fn with_fetcher(
        mut self,
        mode: GroupingMode,
        id_param: &'static str,
        default_fields: &'static [&'static str],
        query: QueryFn,
    ) -> Self {
        self.fetchers.insert(
            mode,
            ModeFetcher {
                id_param,
                default_fields,
                query,
            },
        );
        self
    }

    pub fn is_derived(&self, field: &str) -> bool {
        self.derived_deps.contains_key(field)
    }

    pub fn fetcher(&self, mode: GroupingMode) -> Result<&ModeFetcher, PipelineError> {
        self.fetchers
            .get(&mode)
            .ok_or_else(|| PipelineError::UnsupportedGroupingMode {
                resource: self.name.to_string(),
                by: mode.to_string(),
            })
    }

    /// Every dependency, case-only field and schema rule must name a field
    /// the schema declares, and at least one fetcher must exist.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut unknown: BTreeSet<&str> = self
            .derived_deps
            .iter()
            .flat_map(|(field, deps)| std::iter::once(*field).chain(deps.iter().copied()))
            .chain(self.requires_cases.iter().copied())
            .filter(|name| !self.schema.recognizes(name))
            .collect();
        unknown.extend(self.schema.undeclared_references());

        if !unknown.is_empty() {
            let names: Vec<&str> = unknown.into_iter().collect();
            return Err(self.invalid(format!("unrecognised fields: {}", names.join(", "))));
        }
        if self.fetchers.is_empty() {
            return Err(self.invalid("no fetchers registered".to_string()));
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> PipelineError {
        PipelineError::InvalidResourceSpec {
            resource: self.name.to_string(),
            reason,
        }
    }
}

/// The `demographics` resource.
pub fn demographics_resource() -> ResourceSpec {
    ResourceSpec::new("demographics", demographics_schema())
        .with_derived("patient_age_today", &["patient_date_of_birth"])
        .with_derived(
            "patient_age_at_admission",
            &["patient_date_of_birth", "case_admission_time"],
        )
        .with_requires_cases(&[
            "case_number",
            "case_admission_time",
            "case_discharge_time",
            "patient_age_at_admission",
        ])
        .with_fetcher(
            GroupingMode::Cases,
            CASE_ID_PARAM,
            CASE_DEFAULT_FIELDS,
            query_fn(fetch_demography_for_cases),
        )
        .with_fetcher(
            GroupingMode::Patients,
            PATIENT_ID_PARAM,
            PATIENT_DEFAULT_FIELDS,
            query_fn(fetch_demography_for_patients),
        )
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<&'static str, ResourceSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in resource.
    pub fn builtin() -> Result<Self, PipelineError> {
        let mut registry = Self::new();
        registry.register(demographics_resource())?;
        Ok(registry)
    }

    /// Add a resource after checking its invariants. Re-registering a name
    /// replaces the earlier entry.
    pub fn register(&mut self, spec: ResourceSpec) -> Result<(), PipelineError> {
        spec.validate()?;
        tracing::debug!(resource = spec.name, "Resource registered");
        self.resources.insert(spec.name, spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ResourceSpec, PipelineError> {
        self.resources
            .get(name)
            .ok_or_else(|| PipelineError::UnknownResource(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }
}
