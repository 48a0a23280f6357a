//! Per-entity record schemas.
//!
//! A `SchemaSpec` is plain configuration: the declared fields and their
//! kinds, which fields are hashable, which are hidden unless asked for, the
//! value normalisation tables and the derived fields. `validate` runs any
//! schema over raw rows; nothing here is entity-specific except the
//! descriptors in the sub-modules.

pub mod demographics;
pub mod validate;

pub use validate::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde_json::Value;

use crate::models::Record;

// ═══════════════════════════════════════════════════════════
// Field declarations
// ═══════════════════════════════════════════════════════════

/// Semantic type a field is coerced to during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Date,
    DateTime,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::DateTime => "datetime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

// ═══════════════════════════════════════════════════════════
// Normalisation
// ═══════════════════════════════════════════════════════════

/// Case-insensitive value table with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct NormalizationMap {
    entries: HashMap<String, String>,
    default: Option<String>,
}

impl NormalizationMap {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let entries = pairs
            .iter()
            .map(|(k, v)| (fold_key(k), v.to_string()))
            .collect();
        Self {
            entries,
            default: None,
        }
    }

    /// Value used for inputs not found in the table.
    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    /// Map a raw value.
    ///
    /// Null and blank strings become `Null`. Hits return the mapped value;
    /// misses return the default, or the input untouched when there is none.
    pub fn normalize(&self, value: &Value) -> Value {
        let raw = match value {
            Value::Null => return Value::Null,
            Value::String(s) if s.trim().is_empty() => return Value::Null,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match self.entries.get(&fold_key(&raw)) {
            Some(mapped) => Value::String(mapped.clone()),
            None => match &self.default {
                Some(default) => Value::String(default.clone()),
                None => value.clone(),
            },
        }
    }
}

/// Trimmed, lowercased, with `ß` expanded to `ss`. Other multi-character
/// foldings (ligatures, long s) are not applied.
fn fold_key(s: &str) -> String {
    s.trim().to_lowercase().replace('ß', "ss")
}

// ═══════════════════════════════════════════════════════════
// Derivations
// ═══════════════════════════════════════════════════════════

/// Inputs to derivations that do not come from the row itself.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext {
    pub today: NaiveDate,
}

pub type DeriveFn = fn(&Record, &DeriveContext) -> Option<Value>;

/// A field computed from already-validated fields of the same record.
#[derive(Clone, Copy)]
pub struct Derivation {
    pub field: &'static str,
    pub compute: DeriveFn,
}

impl std::fmt::Debug for Derivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivation").field("field", &self.field).finish()
    }
}

// ═══════════════════════════════════════════════════════════
// Schema
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SchemaSpec {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
    /// Replaced by a salted digest when a salt is given at dump time.
    pub hashable_fields: BTreeSet<&'static str>,
    /// Dropped from output unless explicitly included.
    pub excluded_by_default: BTreeSet<&'static str>,
    pub normalization_maps: BTreeMap<&'static str, NormalizationMap>,
    pub derivations: Vec<Derivation>,
}

impl SchemaSpec {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name,
            fields,
            hashable_fields: BTreeSet::new(),
            excluded_by_default: BTreeSet::new(),
            normalization_maps: BTreeMap::new(),
            derivations: Vec::new(),
        }
    }

    pub fn with_hashable(mut self, fields: &[&'static str]) -> Self {
        self.hashable_fields.extend(fields.iter().copied());
        self
    }

    pub fn with_excluded_by_default(mut self, fields: &[&'static str]) -> Self {
        self.excluded_by_default.extend(fields.iter().copied());
        self
    }

    pub fn with_normalization(mut self, field: &'static str, map: NormalizationMap) -> Self {
        self.normalization_maps.insert(field, map);
        self
    }

    pub fn with_derivation(mut self, field: &'static str, compute: DeriveFn) -> Self {
        self.derivations.push(Derivation { field, compute });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn recognizes(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.field(name).map(|f| f.kind)
    }

    /// `(excluded_by_default ∪ exclude) − include`: include always wins.
    pub fn effective_exclude(
        &self,
        include: Option<&BTreeSet<String>>,
        exclude: Option<&BTreeSet<String>>,
    ) -> BTreeSet<String> {
        let mut effective: BTreeSet<String> = self
            .excluded_by_default
            .iter()
            .map(|f| f.to_string())
            .collect();
        if let Some(exclude) = exclude {
            effective.extend(exclude.iter().cloned());
        }
        if let Some(include) = include {
            effective.retain(|f| !include.contains(f));
        }
        effective
    }

    /// Names used by hashing, exclusion, normalisation or derivation that
    /// the schema does not declare.
    pub fn undeclared_references(&self) -> Vec<&'static str> {
        let referenced = self
            .hashable_fields
            .iter()
            .chain(self.excluded_by_default.iter())
            .chain(self.normalization_maps.keys())
            .copied()
            .chain(self.derivations.iter().map(|d| d.field));
        let mut missing: Vec<&'static str> =
            referenced.filter(|name| !self.recognizes(name)).collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sex_map() -> NormalizationMap {
        NormalizationMap::new(&[("m", "M"), ("männlich", "M"), ("f", "F")]).with_default("U")
    }

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        let map = sex_map();
        assert_eq!(map.normalize(&json!("  M ")), json!("M"));
        assert_eq!(map.normalize(&json!("MÄNNLICH")), json!("M"));
        assert_eq!(map.normalize(&json!("f")), json!("F"));
    }

    #[test]
    fn normalization_falls_back_to_default() {
        assert_eq!(sex_map().normalize(&json!("robot")), json!("U"));
    }

    #[test]
    fn normalization_passes_through_without_default() {
        let map = NormalizationMap::new(&[("m", "M")]);
        assert_eq!(map.normalize(&json!("robot")), json!("robot"));
        assert_eq!(map.normalize(&json!(42)), json!(42));
    }

    #[test]
    fn empty_and_null_normalize_to_absent() {
        let map = sex_map();
        assert_eq!(map.normalize(&Value::Null), Value::Null);
        assert_eq!(map.normalize(&json!("")), Value::Null);
        assert_eq!(map.normalize(&json!("   ")), Value::Null);
    }

    #[test]
    fn non_string_values_are_looked_up_by_text() {
        let map = NormalizationMap::new(&[("1", "M"), ("2", "F")]);
        assert_eq!(map.normalize(&json!(2)), json!("F"));
    }

    fn schema() -> SchemaSpec {
        SchemaSpec::new(
            "sample",
            vec![
                FieldSpec::new("a", FieldKind::Text),
                FieldSpec::new("b", FieldKind::Text),
                FieldSpec::new("c", FieldKind::Text),
            ],
        )
        .with_excluded_by_default(&["a"])
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_exclusion_applies_without_include() {
        assert_eq!(schema().effective_exclude(None, None), set(&["a"]));
    }

    #[test]
    fn include_overrides_default_exclusion() {
        let include = set(&["a"]);
        assert!(schema().effective_exclude(Some(&include), None).is_empty());
    }

    #[test]
    fn exclude_is_unioned_with_defaults() {
        let exclude = set(&["b"]);
        assert_eq!(schema().effective_exclude(None, Some(&exclude)), set(&["a", "b"]));
    }

    #[test]
    fn include_wins_over_exclude() {
        let include = set(&["b"]);
        let exclude = set(&["b", "c"]);
        assert_eq!(
            schema().effective_exclude(Some(&include), Some(&exclude)),
            set(&["a", "c"])
        );
    }

    #[test]
    fn undeclared_references_are_reported() {
        let spec = schema()
            .with_hashable(&["zz"])
            .with_normalization("yy", NormalizationMap::default());
        assert_eq!(spec.undeclared_references(), vec!["yy", "zz"]);
        assert!(schema().undeclared_references().is_empty());
    }

    #[test]
    fn sharp_s_folds_like_double_s() {
        let map = NormalizationMap::new(&[("Straße", "street")]);
        for input in ["STRASSE", "strasse", " straße ", "STRAẞE"] {
            assert_eq!(map.normalize(&json!(input)), json!("street"), "{input}");
        }
    }
}
