use std::collections::BTreeSet;
use std::convert::Infallible;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::{DeriveContext, FieldKind, SchemaSpec};
use crate::config::MAX_REPORTED_VALIDATION_ISSUES;
use crate::crypto::hash_value;
use crate::models::{Record, Row};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Output-time settings for turning rows into records.
#[derive(Debug, Clone, Copy)]
pub struct DumpOptions<'a> {
    /// Non-empty salt switches hashing of the schema's hashable fields on.
    pub hash_salt: Option<&'a str>,
    /// Fields kept even when excluded by default or by `exclude`.
    pub include: Option<&'a BTreeSet<String>>,
    pub exclude: Option<&'a BTreeSet<String>>,
    /// Reference date for "today"-based derivations.
    pub today: NaiveDate,
}

impl<'a> DumpOptions<'a> {
    pub fn new() -> Self {
        Self {
            hash_salt: None,
            include: None,
            exclude: None,
            today: Local::now().date_naive(),
        }
    }

    pub fn with_salt(mut self, salt: Option<&'a str>) -> Self {
        self.hash_salt = salt;
        self
    }

    pub fn with_include(mut self, include: Option<&'a BTreeSet<String>>) -> Self {
        self.include = include;
        self
    }

    pub fn with_exclude(mut self, exclude: Option<&'a BTreeSet<String>>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn hashing_active(&self) -> bool {
        self.hash_salt.is_some_and(|s| !s.is_empty())
    }
}

impl Default for DumpOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row}: {message}")]
pub struct RowValidationError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub records: Vec<Record>,
    pub errors: Vec<RowValidationError>,
}

impl ValidationOutcome {
    pub fn dropped(&self) -> usize {
        self.errors.len()
    }
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

/// Validate a single row: normalise, coerce, derive, exclude, then hash.
///
/// The error message names the failing field and the expected kind only.
pub fn validate_record(
    schema: &SchemaSpec,
    row: &Row,
    options: &DumpOptions<'_>,
) -> Result<Record, String> {
    let excluded = schema.effective_exclude(options.include, options.exclude);
    dump_row(schema, row, &excluded, options)
}

/// Validate every row, collecting failures instead of stopping.
pub fn validate_rows<I>(schema: &SchemaSpec, rows: I, options: &DumpOptions<'_>) -> ValidationOutcome
where
    I: IntoIterator<Item = Row>,
{
    match validate_stream(schema, rows.into_iter().map(Ok::<Row, Infallible>), options) {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    }
}

/// Validate a fallible row stream.
///
/// Per-row validation failures are collected; an `Err` from the stream itself
/// aborts and is returned as-is.
pub fn validate_stream<I, E>(
    schema: &SchemaSpec,
    rows: I,
    options: &DumpOptions<'_>,
) -> Result<ValidationOutcome, E>
where
    I: IntoIterator<Item = Result<Row, E>>,
{
    let excluded = schema.effective_exclude(options.include, options.exclude);
    tracing::debug!(
        schema = schema.name,
        excluded = ?excluded,
        hashing_active = options.hashing_active(),
        "Validating rows"
    );

    let mut outcome = ValidationOutcome::default();
    for (index, row) in rows.into_iter().enumerate() {
        let row = row?;
        match dump_row(schema, &row, &excluded, options) {
            Ok(record) => outcome.records.push(record),
            Err(message) => outcome.errors.push(RowValidationError {
                row: index,
                message,
            }),
        }
    }
    Ok(outcome)
}

/// Log the first few validation issues, then a count of the rest.
pub fn log_validation_issues(schema: &str, errors: &[RowValidationError]) {
    for issue in errors.iter().take(MAX_REPORTED_VALIDATION_ISSUES) {
        tracing::warn!(schema, row = issue.row, issue = %issue.message, "Validation issue");
    }
    if errors.len() > MAX_REPORTED_VALIDATION_ISSUES {
        tracing::warn!(
            schema,
            remaining = errors.len() - MAX_REPORTED_VALIDATION_ISSUES,
            "Further validation issues suppressed"
        );
    }
}

fn dump_row(
    schema: &SchemaSpec,
    row: &Row,
    excluded: &BTreeSet<String>,
    options: &DumpOptions<'_>,
) -> Result<Record, String> {
    let mut record = Record::new();

    for field in &schema.fields {
        let Some(raw) = row.get(field.name) else {
            continue;
        };
        let value = match schema.normalization_maps.get(field.name) {
            Some(map) => map.normalize(raw),
            None => raw.clone(),
        };
        if value.is_null() {
            continue;
        }
        let coerced = coerce(field.kind, &value)
            .ok_or_else(|| format!("{}: expected {}", field.name, field.kind.as_str()))?;
        record.insert(field.name.to_string(), coerced);
    }

    let ctx = DeriveContext {
        today: options.today,
    };
    for derivation in &schema.derivations {
        if record.get(derivation.field).is_some_and(|v| !v.is_null()) {
            continue;
        }
        if let Some(value) = (derivation.compute)(&record, &ctx) {
            record.insert(derivation.field.to_string(), value);
        }
    }

    for name in excluded {
        record.remove(name);
    }

    if let Some(salt) = options.hash_salt.filter(|s| !s.is_empty()) {
        for field in &schema.hashable_fields {
            if let Some(Value::String(text)) = record.get_mut(*field) {
                *text = hash_value(text, Some(salt));
            }
        }
    }

    Ok(record)
}

// ═══════════════════════════════════════════════════════════
// Coercion
// ═══════════════════════════════════════════════════════════

fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Integer => coerce_integer(value).map(Value::from),
        FieldKind::Float => coerce_float(value).map(Value::from),
        FieldKind::Date => match value {
            Value::String(s) => {
                parse_date(s).map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            }
            _ => None,
        },
        FieldKind::DateTime => match value {
            Value::String(s) => parse_datetime(s).map(|dt| Value::String(dt.to_canonical())),
            _ => None,
        },
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn coerce_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

/// A parsed timestamp, zoned when the source carried an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedDateTime {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl ParsedDateTime {
    /// Calendar date in the timestamp's own zone.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Zoned(dt) => dt.date_naive(),
            Self::Naive(dt) => dt.date(),
        }
    }

    fn to_canonical(self) -> String {
        match self {
            Self::Zoned(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            Self::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn parse_datetime(s: &str) -> Option<ParsedDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ParsedDateTime::Zoned(dt));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ParsedDateTime::Zoned(dt));
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(ParsedDateTime::Naive)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

/// Whole years between `dob` and `reference`.
pub fn age_on(dob: NaiveDate, reference: NaiveDate) -> i64 {
    use chrono::Datelike;

    let mut years = i64::from(reference.year() - dob.year());
    if (reference.month(), reference.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    years
}
