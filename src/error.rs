use thiserror::Error;

pub type ChurnResult<T> = Result<T, ChurnError>;

#[derive(Debug, Error)]
pub enum ChurnError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Errors raised while classifying or cleaning an input table.
///
/// Both variants carry the table identity so the caller can point the user
/// at the offending file.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(
        "Table '{table}' does not match the required game or wallet column structure (found: {columns:?})"
    )]
    Mismatch { table: String, columns: Vec<String> },

    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },
}

/// Errors related to data frames, value conversion and domain types.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Data frame error: {0}")]
    DataFrame(String),

    #[error("Failed timestamp conversion: {0}")]
    TimestampConversion(String),

    #[error("Failed to parse enum: {0}")]
    ParseEnum(#[from] strum::ParseError),
}

/// Errors related to feature configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid feature configuration: {0}")]
    InvalidFeatureConfig(String),
}

/// Errors related to file ingestion and serialization.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read file '{source_name}': {reason}")]
    ParseFailure { source_name: String, reason: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// Errors surfaced by the feature-building pipeline and the classifier seam.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Feature computation failed during '{stage}': {reason}")]
    Computation { stage: String, reason: String },

    #[error("Classifier failure: {0}")]
    Classifier(String),
}

impl PipelineError {
    pub(crate) fn computation(stage: &str, err: impl std::fmt::Display) -> Self {
        Self::Computation {
            stage: stage.to_string(),
            reason: err.to_string(),
        }
    }
}
