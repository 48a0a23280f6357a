pub mod enums;

pub use enums::*;

use serde_json::{Map, Value};

/// One entity as produced by a query function: field name to raw value.
pub type Row = Map<String, Value>;

/// A validated, normalised (and possibly hashed) entity ready for shaping.
pub type Record = Map<String, Value>;

/// Named parameters passed to a query function.
pub type QueryParams = Map<String, Value>;
