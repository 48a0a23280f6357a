//! Turns a requested field list into what to fetch and what to show.

use std::collections::BTreeSet;

use super::error::PipelineError;
use super::registry::ResourceSpec;
use crate::models::GroupingMode;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    /// Base fields passed to the query; `None` lets the query use its defaults.
    pub fetch_fields: Option<Vec<String>>,
    /// Output columns in caller order; `None` means everything produced.
    pub include_fields: Option<Vec<String>>,
}

/// Plan one extraction.
///
/// Derived fields are swapped for their dependencies in `fetch_fields`
/// (appended in request order); `include_fields` is the deduplicated request.
/// Case-only fields under any other grouping fail before anything is queried.
pub fn plan_fetch(
    spec: &ResourceSpec,
    mode: GroupingMode,
    requested: Option<&[String]>,
) -> Result<FetchPlan, PipelineError> {
    let requested = match requested {
        Some(fields) if !fields.is_empty() => dedup(fields),
        _ => return Ok(FetchPlan::default()),
    };

    if mode != GroupingMode::Cases {
        let offending: Vec<String> = requested
            .iter()
            .filter(|f| spec.requires_cases.contains(f.as_str()))
            .cloned()
            .collect();
        if !offending.is_empty() {
            return Err(PipelineError::GroupingModeFieldMismatch {
                resource: spec.name.to_string(),
                fields: offending,
            });
        }
    }

    let mut fetch: Vec<String> = requested
        .iter()
        .filter(|f| !spec.is_derived(f))
        .cloned()
        .collect();
    for name in &requested {
        if let Some(deps) = spec.derived_deps.get(name.as_str()) {
            for dep in deps {
                if !fetch.iter().any(|f| f == dep) {
                    fetch.push(dep.to_string());
                }
            }
        }
    }

    Ok(FetchPlan {
        fetch_fields: Some(fetch),
        include_fields: Some(requested),
    })
}

/// Fields fetched but never asked for, sorted.
pub fn derived_added(requested: Option<&[String]>, fetched: Option<&[String]>) -> Vec<String> {
    let requested: BTreeSet<&str> = requested
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();
    let fetched: BTreeSet<&str> = fetched
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();
    fetched
        .difference(&requested)
        .map(|f| f.to_string())
        .collect()
}

fn dedup(fields: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    fields
        .iter()
        .filter(|f| seen.insert(f.as_str()))
        .cloned()
        .collect()
}
