//! Demographics schema: one patient (optionally within one case).

use serde_json::Value;

use super::{age_on, parse_date, DeriveContext, FieldKind, FieldSpec, NormalizationMap, SchemaSpec};
use crate::models::Record;

pub const SCHEMA_NAME: &str = "demographics";

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("patient_id", FieldKind::Text),
    FieldSpec::new("case_number", FieldKind::Text),
    FieldSpec::new("patient_sex", FieldKind::Text),
    FieldSpec::new("patient_date_of_birth", FieldKind::Date),
    FieldSpec::new("patient_body_weight", FieldKind::Float),
    FieldSpec::new("patient_body_height", FieldKind::Float),
    FieldSpec::new("case_admission_time", FieldKind::DateTime),
    FieldSpec::new("case_discharge_time", FieldKind::DateTime),
    FieldSpec::new("patient_age_today", FieldKind::Integer),
    FieldSpec::new("patient_age_at_admission", FieldKind::Integer),
];

fn sex_normalization() -> NormalizationMap {
    NormalizationMap::new(&[
        ("m", "M"),
        ("male", "M"),
        ("männlich", "M"),
        ("f", "F"),
        ("female", "F"),
        ("w", "F"),
        ("weiblich", "F"),
        ("d", "D"),
        ("divers", "D"),
        ("u", "U"),
        ("unknown", "U"),
    ])
    .with_default("U")
}

pub fn demographics_schema() -> SchemaSpec {
    SchemaSpec::new(SCHEMA_NAME, FIELDS.to_vec())
        .with_hashable(&["case_number"])
        .with_excluded_by_default(&["patient_date_of_birth"])
        .with_normalization("patient_sex", sex_normalization())
        .with_derivation("patient_age_today", age_today)
        .with_derivation("patient_age_at_admission", age_at_admission)
}

fn birth_date(record: &Record) -> Option<chrono::NaiveDate> {
    record
        .get("patient_date_of_birth")
        .and_then(Value::as_str)
        .and_then(parse_date)
}

fn age_today(record: &Record, ctx: &DeriveContext) -> Option<Value> {
    let dob = birth_date(record)?;
    Some(Value::from(age_on(dob, ctx.today)))
}

fn age_at_admission(record: &Record, _ctx: &DeriveContext) -> Option<Value> {
    let dob = birth_date(record)?;
    let admitted = record
        .get("case_admission_time")
        .and_then(Value::as_str)
        .and_then(parse_date)?;
    Some(Value::from(age_on(dob, admitted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_value;
    use crate::models::Row;
    use crate::schema::{validate_record, validate_rows, DumpOptions};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row fixtures must be objects"),
        }
    }

    fn sample() -> Row {
        row(json!({
            "patient_id": "P1",
            "case_number": "007",
            "patient_sex": "weiblich",
            "patient_date_of_birth": "1980-05-20",
            "case_admission_time": "2024-03-01T10:15:00",
        }))
    }

    fn opts() -> DumpOptions<'static> {
        DumpOptions::new().with_today(NaiveDate::from_ymd_opt(2025, 10, 16).unwrap())
    }

    #[test]
    fn schema_references_only_declared_fields() {
        assert!(demographics_schema().undeclared_references().is_empty());
    }

    #[test]
    fn salted_dump_hashes_case_number() {
        let record = validate_record(&demographics_schema(), &sample(), &opts().with_salt(Some("secret"))).unwrap();
        let hashed = record["case_number"].as_str().unwrap();
        assert_eq!(hashed.len(), 12);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hashed, hash_value("007", Some("secret")));
        assert_eq!(record["patient_id"], json!("P1"), "patient ids are not hashable");
    }

    #[test]
    fn birth_date_hidden_unless_included() {
        let schema = demographics_schema();
        let hidden = validate_record(&schema, &sample(), &opts()).unwrap();
        assert!(!hidden.contains_key("patient_date_of_birth"));

        let include: BTreeSet<String> = ["patient_date_of_birth".to_string()].into();
        let shown = validate_record(&schema, &sample(), &opts().with_include(Some(&include))).unwrap();
        assert_eq!(shown["patient_date_of_birth"], json!("1980-05-20"));
    }

    #[test]
    fn ages_are_derived_from_birth_date() {
        let record = validate_record(&demographics_schema(), &sample(), &opts()).unwrap();
        assert_eq!(record["patient_age_today"], json!(45));
        assert_eq!(record["patient_age_at_admission"], json!(43));
        assert!(record["patient_age_at_admission"].as_i64().unwrap() >= 0);
    }

    #[test]
    fn age_at_admission_needs_admission_time() {
        let mut raw = sample();
        raw.remove("case_admission_time");
        let record = validate_record(&demographics_schema(), &raw, &opts()).unwrap();
        assert!(!record.contains_key("patient_age_at_admission"));
        assert!(record.contains_key("patient_age_today"));
    }

    #[test]
    fn sex_values_are_normalised() {
        let schema = demographics_schema();
        let cases = [("weiblich", "F"), ("Male", "M"), (" d ", "D"), ("x", "U")];
        for (raw, expected) in cases {
            let mut r = sample();
            r.insert("patient_sex".into(), json!(raw));
            let record = validate_record(&schema, &r, &opts()).unwrap();
            assert_eq!(record["patient_sex"], json!(expected), "input {raw:?}");
        }
    }

    #[test]
    fn malformed_birth_date_drops_only_that_row() {
        let mut bad = sample();
        bad.insert("patient_date_of_birth".into(), json!("20.05.1980"));
        let outcome = validate_rows(&demographics_schema(), vec![sample(), bad, sample()], &opts());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "patient_date_of_birth: expected date");
    }
}
