use polars::prelude::{DataFrame, Expr, JsonFormat, JsonWriter, SerWriter, lit, when};
use serde_json::Value;

use crate::error::{ChurnError, ChurnResult, DataError, IoError};

pub(crate) fn polars_to_churn_error(target: &str, e: polars::error::PolarsError) -> ChurnError {
    ChurnError::Data(DataError::DataFrame(format!(
        "Error while building {target}: {e}"
    )))
}

pub trait ExprExt {
    /// Divides two expressions, substituting a denominator of zero with one.
    ///
    /// A zero denominator therefore yields the numerator itself, which is zero
    /// for every ratio whose numerator vanishes together with its denominator
    /// (e.g. net revenue over stake for a player who never staked).
    fn div_zero_as_one(self, denominator: Expr) -> Expr;
}

impl ExprExt for Expr {
    fn div_zero_as_one(self, denominator: Expr) -> Expr {
        let denominator = denominator.cast(polars::prelude::DataType::Float64);
        let safe = when(denominator.clone().eq(lit(0.0)))
            .then(lit(1.0))
            .otherwise(denominator);
        self.cast(polars::prelude::DataType::Float64) / safe
    }
}

pub trait DataFrameExt {
    fn to_json_rows(&self) -> ChurnResult<Vec<serde_json::Map<String, Value>>>;
}

impl DataFrameExt for DataFrame {
    fn to_json_rows(&self) -> ChurnResult<Vec<serde_json::Map<String, Value>>> {
        let height = self.height();
        if height == 0 {
            return Ok(Vec::new());
        }

        // Heuristic: approx 2^6 bytes per cell
        let estimated_row_size = self.width() * (1 << 6);
        let mut buf = Vec::with_capacity(height * estimated_row_size);

        JsonWriter::new(&mut buf)
            .with_json_format(JsonFormat::Json)
            .finish(&mut self.clone())
            .map_err(|e| DataError::DataFrame(e.to_string()))?;

        let json_val: Value = serde_json::from_slice(&buf).map_err(IoError::Json)?;

        match json_val {
            Value::Array(rows) => {
                let mut out_vec = Vec::with_capacity(rows.len());
                for v in rows {
                    if let Value::Object(map) = v {
                        out_vec.push(map);
                    }
                }
                Ok(out_vec)
            }
            _ => {
                Err(DataError::DataFrame("Polars JSON output was not an array".to_string()).into())
            }
        }
    }
}
