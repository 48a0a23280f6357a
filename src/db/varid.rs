//! Numeric variable ids used by the `observations` table.

/// Known measurement variables and their store ids.
pub const VARIDS: &[(&str, i64)] = &[("BODY_WEIGHT", 6), ("BODY_HEIGHT", 7)];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown VARID: {0}")]
pub struct UnknownVarId(pub String);

/// Resolve a variable name (case-insensitive) to its id.
pub fn varid(name: &str) -> Result<i64, UnknownVarId> {
    let wanted = name.to_uppercase();
    VARIDS
        .iter()
        .find(|(n, _)| *n == wanted)
        .map(|(_, id)| *id)
        .ok_or_else(|| UnknownVarId(name.to_string()))
}
