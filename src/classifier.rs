//! Seam to an externally trained churn model.
//!
//! The pipeline never trains anything. A model is consumed as a pure function
//! from a [`FeatureMatrix`] to one [`Prediction`] per player; loading it once
//! and reusing it is the caller's business.

use std::{path::Path, sync::Arc};

use ndarray::{Array1, Array2, ArrayView1};
use polars::{
    frame::DataFrame,
    prelude::{Column, DataType, Field, PlSmallStr, Schema, SchemaRef},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, info};

use crate::{
    error::{ChurnError, ChurnResult, DataError, IoError, PipelineError},
    features::player_features::{FeatureCol, PlayerFeatures},
    report::{
        io::{Report, ToSchema, conforms_to},
        polars_ext::polars_to_churn_error,
    },
};

// ================================================================================================
// Model interface
// ================================================================================================

/// Output of the model for a single player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// `1` = churn, `0` = retained.
    pub label: u8,
    /// Probability of the churn class.
    pub probability: f64,
}

pub trait ChurnClassifier {
    /// Returns exactly one prediction per matrix row, in row order.
    fn classify(&self, features: &FeatureMatrix) -> ChurnResult<Vec<Prediction>>;

    /// Feature names the model was fitted on, in fitting order.
    ///
    /// `None` lets [`FeatureMatrix::from_features`] pick every numeric column.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }
}

/// Dense numeric model input: one row per player, one column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Prepares model input from the feature table.
    ///
    /// Columns follow `expected` when given; a name the table lacks becomes a
    /// column of zeros. Without `expected`, every numeric or boolean column
    /// except `player_id` is used in table order. Values are coerced to `f64`
    /// and anything that does not coerce (nulls, text, non-finite) becomes 0.
    pub fn from_features(
        features: &PlayerFeatures,
        expected: Option<&[String]>,
    ) -> ChurnResult<Self> {
        let df = features.as_df();
        let names = match expected {
            Some(names) => names.to_vec(),
            None => default_feature_names(df),
        };

        let mut values = Array2::<f64>::zeros((df.height(), names.len()));
        for (j, name) in names.iter().enumerate() {
            let Ok(column) = df.column(name) else {
                continue;
            };
            let coerced = column
                .cast(&DataType::Float64)
                .and_then(|c| c.f64().cloned())
                .map_err(convert_err)?;
            for (i, v) in coerced.into_iter().enumerate() {
                values[[i, j]] = v.filter(|x| x.is_finite()).unwrap_or(0.0);
            }
        }

        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|j| self.values.column(j))
    }
}

fn default_feature_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|c| c.name().as_str() != FeatureCol::PlayerId.as_str())
        .filter(|c| {
            matches!(
                c.dtype(),
                DataType::Boolean
                    | DataType::UInt32
                    | DataType::UInt64
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::Float32
                    | DataType::Float64
            )
        })
        .map(|c| c.name().to_string())
        .collect()
}

// ================================================================================================
// Logistic model
// ================================================================================================

fn default_threshold() -> f64 {
    0.5
}

/// A fitted logistic regression, typically exported from a training notebook
/// as JSON.
///
/// # Example
/// ```json
/// {
///   "feature_names": ["days_since_last_play", "num_plays"],
///   "coefficients": [0.4, -0.1],
///   "intercept": -1.5
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
    /// Probability at or above which a player is labelled as churn.
    #[serde(default = "default_threshold")]
    threshold: f64,
}

impl LogisticModel {
    /// # Validation
    /// Returns error if names and coefficients differ in length.
    pub fn new(
        feature_names: Vec<String>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> ChurnResult<Self> {
        Self {
            feature_names,
            coefficients,
            intercept,
            threshold: default_threshold(),
        }
        .validated()
    }

    /// # Validation
    /// Returns error if `threshold` lies outside `[0, 1]`.
    pub fn with_threshold(self, threshold: f64) -> ChurnResult<Self> {
        Self { threshold, ..self }.validated()
    }

    pub fn from_json(json: &str) -> ChurnResult<Self> {
        let model: Self = serde_json::from_str(json).map_err(IoError::Json)?;
        model.validated()
    }

    pub fn from_path(path: impl AsRef<Path>) -> ChurnResult<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(IoError::Io)?;
        let model = Self::from_json(&json)?;
        info!(
            path = %path.as_ref().display(),
            features = model.feature_names.len(),
            "Loaded logistic churn model"
        );
        Ok(model)
    }

    fn validated(self) -> ChurnResult<Self> {
        if self.feature_names.len() != self.coefficients.len() {
            return Err(PipelineError::Classifier(format!(
                "Model has {} feature names but {} coefficients",
                self.feature_names.len(),
                self.coefficients.len()
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PipelineError::Classifier(format!(
                "Decision threshold must lie in [0, 1], got {}",
                self.threshold
            ))
            .into());
        }
        Ok(self)
    }
}

impl ChurnClassifier for LogisticModel {
    fn classify(&self, features: &FeatureMatrix) -> ChurnResult<Vec<Prediction>> {
        if features.ncols() != self.coefficients.len() {
            return Err(PipelineError::Classifier(format!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                features.ncols()
            ))
            .into());
        }

        let weights = Array1::from(self.coefficients.clone());
        let logits = features.values().dot(&weights) + self.intercept;

        Ok(logits
            .iter()
            .map(|&z| {
                let probability = 1.0 / (1.0 + (-z).exp());
                Prediction {
                    label: u8::from(probability >= self.threshold),
                    probability,
                }
            })
            .collect())
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.feature_names)
    }
}

// ================================================================================================
// Scored players
// ================================================================================================

/// Columns appended to the feature table by [`score`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScoreCol {
    Prediction,
    PredictionProba,
}

impl From<ScoreCol> for PlSmallStr {
    fn from(value: ScoreCol) -> Self {
        value.as_str().into()
    }
}

impl ScoreCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Feature table extended with the model's `prediction` and
/// `prediction_proba` columns.
#[derive(Debug, Clone)]
pub struct ScoredPlayers {
    df: DataFrame,
}

impl Report for ScoredPlayers {
    fn as_df(&self) -> &DataFrame {
        &self.df
    }

    fn as_df_mut(&mut self) -> &mut DataFrame {
        &mut self.df
    }
}

impl ToSchema for ScoredPlayers {
    fn to_schema() -> SchemaRef {
        let mut fields: Vec<Field> = PlayerFeatures::to_schema()
            .iter()
            .map(|(name, dtype)| Field::new(name.clone(), dtype.clone()))
            .collect();
        fields.extend(ScoreCol::iter().map(|c| {
            let dtype = match c {
                ScoreCol::Prediction => DataType::Int32,
                ScoreCol::PredictionProba => DataType::Float64,
            };
            Field::new(c.into(), dtype)
        }));

        Arc::new(Schema::from_iter(fields))
    }
}

impl Default for ScoredPlayers {
    fn default() -> Self {
        Self {
            df: DataFrame::empty_with_schema(&Self::to_schema()),
        }
    }
}

impl ScoredPlayers {
    pub fn from_df(df: DataFrame) -> ChurnResult<Self> {
        if !conforms_to(&df, &Self::to_schema()) {
            return Err(DataError::DataFrame(format!(
                "Scored players do not conform to the canonical schema: {:?}",
                df.schema()
            ))
            .into());
        }
        Ok(Self { df })
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Number of players the model labelled as churn.
    pub fn churn_count(&self) -> ChurnResult<usize> {
        let labels = self
            .df
            .column(ScoreCol::Prediction.as_str())
            .and_then(|c| c.i32().cloned())
            .map_err(convert_err)?;
        Ok(labels.into_iter().flatten().filter(|&l| l == 1).count())
    }
}

/// Runs the model over the feature table and attaches its output.
///
/// # Errors
/// [`PipelineError::Classifier`] if the model fails, returns a different
/// number of predictions than players, or emits a label other than 0 or 1.
#[tracing::instrument(skip_all, fields(players = features.height()))]
pub fn score(
    features: &PlayerFeatures,
    classifier: &impl ChurnClassifier,
) -> ChurnResult<ScoredPlayers> {
    let mut df = features.as_df().clone();

    let (labels, probabilities): (Vec<i32>, Vec<f64>) = if features.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let matrix = FeatureMatrix::from_features(features, classifier.feature_names())?;
        debug!(rows = matrix.nrows(), cols = matrix.ncols(), "Prepared model input");

        let predictions = classifier.classify(&matrix)?;
        if predictions.len() != features.height() {
            return Err(PipelineError::Classifier(format!(
                "Model returned {} predictions for {} players",
                predictions.len(),
                features.height()
            ))
            .into());
        }
        if let Some(p) = predictions.iter().find(|p| p.label > 1) {
            return Err(
                PipelineError::Classifier(format!("Unexpected label {}", p.label)).into(),
            );
        }

        predictions
            .iter()
            .map(|p| (i32::from(p.label), p.probability))
            .unzip()
    };

    df.with_column(Column::new(ScoreCol::Prediction.name(), labels))
        .map_err(convert_err)?;
    df.with_column(Column::new(ScoreCol::PredictionProba.name(), probabilities))
        .map_err(convert_err)?;

    ScoredPlayers::from_df(df)
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("classifier input", e)
}
