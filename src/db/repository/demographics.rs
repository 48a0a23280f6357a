use rusqlite::Connection;

use super::{field_list, id_list, query_rows, QueryError};
use crate::db::varid::varid;
use crate::models::{GroupingMode, QueryParams, Row};

/// Columns returned by the cases query when no fields are requested.
pub const CASE_DEFAULT_FIELDS: &[&str] = &[
    "patient_id",
    "case_number",
    "patient_date_of_birth",
    "patient_sex",
    "case_admission_time",
    "case_discharge_time",
];

/// Columns returned by the patients query when no fields are requested.
pub const PATIENT_DEFAULT_FIELDS: &[&str] = &["patient_id", "patient_date_of_birth", "patient_sex"];

/// Identifier parameter of each query.
pub const CASE_ID_PARAM: &str = "case_numbers";
pub const PATIENT_ID_PARAM: &str = "patient_ids";

/// Demographics for the given cases, one row per case.
///
/// Params: `case_numbers` (list), `fields` (list or null). Body metrics come
/// from the observation closest in time to the admission.
pub fn fetch_demography_for_cases(
    conn: &Connection,
    params: &QueryParams,
) -> Result<Vec<Row>, QueryError> {
    fetch(conn, params, GroupingMode::Cases)
}

/// Demographics for the given patients, one row per patient.
///
/// Params: `patient_ids` (list), `fields` (list or null). Body metrics are
/// the latest current observation. Case fields are not available here.
pub fn fetch_demography_for_patients(
    conn: &Connection,
    params: &QueryParams,
) -> Result<Vec<Row>, QueryError> {
    fetch(conn, params, GroupingMode::Patients)
}

fn fetch(conn: &Connection, params: &QueryParams, mode: GroupingMode) -> Result<Vec<Row>, QueryError> {
    let id_param = match mode {
        GroupingMode::Cases => CASE_ID_PARAM,
        GroupingMode::Patients => PATIENT_ID_PARAM,
    };
    let ids = id_list(params, id_param)?;
    let fields = field_list(params)?;
    let sql = build_select(fields.as_deref(), mode, ids.len())?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    query_rows(conn, &sql, &ids)
}

fn build_select(
    fields: Option<&[String]>,
    mode: GroupingMode,
    id_count: usize,
) -> Result<String, QueryError> {
    let defaults = match mode {
        GroupingMode::Cases => CASE_DEFAULT_FIELDS,
        GroupingMode::Patients => PATIENT_DEFAULT_FIELDS,
    };
    let requested: Vec<&str> = match fields {
        Some(list) => list.iter().map(String::as_str).collect(),
        None => defaults.to_vec(),
    };

    let mut columns = Vec::with_capacity(requested.len());
    let mut unknown = Vec::new();
    for field in &requested {
        match column_expr(field, mode)? {
            Some(expr) => columns.push(format!("{expr} AS \"{field}\"")),
            None => unknown.push(field.to_string()),
        }
    }
    if !unknown.is_empty() {
        return Err(QueryError::UnknownFields(unknown));
    }

    let placeholders = vec!["?"; id_count.max(1)].join(", ");
    let sql = match mode {
        GroupingMode::Cases => format!(
            "SELECT DISTINCT {}
             FROM cases c
             JOIN patients p ON p.id = c.patient_id
             WHERE c.deleted = 0 AND p.deleted = 0 AND c.case_number IN ({placeholders})",
            columns.join(", ")
        ),
        GroupingMode::Patients => format!(
            "SELECT DISTINCT {}
             FROM patients p
             WHERE p.deleted = 0 AND p.id IN ({placeholders})",
            columns.join(", ")
        ),
    };
    Ok(sql)
}

/// SQL expression for `field`, or `None` when the mode cannot provide it.
fn column_expr(field: &str, mode: GroupingMode) -> Result<Option<String>, QueryError> {
    let by_case = mode == GroupingMode::Cases;
    let expr = match field {
        "patient_id" => "p.id".to_string(),
        "patient_date_of_birth" => "p.date_of_birth".to_string(),
        "patient_sex" => "p.sex".to_string(),
        "patient_body_weight" => observation(varid("BODY_WEIGHT")?, mode),
        "patient_body_height" => observation(varid("BODY_HEIGHT")?, mode),
        "case_number" if by_case => "c.case_number".to_string(),
        "case_admission_time" if by_case => "c.admission_time".to_string(),
        "case_discharge_time" if by_case => "c.discharge_time".to_string(),
        _ => return Ok(None),
    };
    Ok(Some(expr))
}

fn observation(var_id: i64, mode: GroupingMode) -> String {
    match mode {
        // SQLite cannot see the outer `c` from a subquery's ORDER BY, so the
        // nearest distance is matched in WHERE; ties go to the later reading.
        GroupingMode::Cases => format!(
            "(SELECT o.value FROM observations o
              WHERE o.patient_id = p.id AND o.var_id = {var_id} AND o.deleted = 0
                AND ABS(julianday(o.recorded_at) - julianday(c.admission_time)) = (
                  SELECT MIN(ABS(julianday(o2.recorded_at) - julianday(c.admission_time)))
                  FROM observations o2
                  WHERE o2.patient_id = p.id AND o2.var_id = {var_id} AND o2.deleted = 0)
              ORDER BY o.recorded_at DESC
              LIMIT 1)"
        ),
        GroupingMode::Patients => format!(
            "(SELECT o.value FROM observations o
              WHERE o.patient_id = p.id AND o.var_id = {var_id} AND o.deleted = 0 AND o.is_current = 1
              ORDER BY o.recorded_at DESC
              LIMIT 1)"
        ),
    }
}
