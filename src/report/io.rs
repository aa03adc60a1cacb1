use polars::{frame::DataFrame, prelude::SchemaRef};
use serde_json::Value;

use crate::{error::ChurnResult, report::polars_ext::DataFrameExt};

// ================================================================================================
// Traits
// ================================================================================================

/// Defines a common interface for all table types (records, features, scores).
pub trait Report {
    /// Access the underlying DataFrame (Immutable).
    fn as_df(&self) -> &DataFrame;

    /// Access the underlying DataFrame (Mutable).
    fn as_df_mut(&mut self) -> &mut DataFrame;
}

pub trait ToSchema {
    /// Returns the canonical schema for this table type.
    fn to_schema() -> SchemaRef;
}

pub trait ToJson {
    /// Serializes the table to a generic JSON Value.
    /// Returns a `Value::Array` containing row objects.
    fn to_json(&self) -> ChurnResult<serde_json::Value>;
}

// ================================================================================================
// Blanket Implementations
// ================================================================================================

impl<T> ToJson for T
where
    T: Report,
{
    fn to_json(&self) -> ChurnResult<serde_json::Value> {
        let rows = self.as_df().to_json_rows()?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }
}

/// Checks that every column of `expected` exists in `df` with the same dtype.
pub(crate) fn conforms_to(df: &DataFrame, expected: &SchemaRef) -> bool {
    let actual = df.schema();
    expected
        .iter()
        .all(|(name, dtype)| actual.get(name).is_some_and(|d| d == dtype))
}
