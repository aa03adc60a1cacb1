use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, ChurnResult, ConfigError};

/// Upper bound on RFM quantiles; scores never exceed 5.
pub const MAX_RFM_QUANTILES: usize = 5;

// ================================================================================================
// Feature Engineering Configuration
// ================================================================================================

/// Thresholds used while deriving churn metrics and RFM scores.
///
/// # Defaults
/// - A player counts as churned after more than `7` days without play.
/// - A churn likelihood score above `0.6` flags `likely_to_churn`.
/// - RFM dimensions are cut into `5` quantiles; degenerate dimensions score `3`.
///
/// Deserialized configs go through the same validation as the builders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureConfigFields")]
pub struct FeatureConfig {
    /// Days of inactivity after which a player is flagged as churned
    /// (strictly greater than).
    churn_threshold_days: u32,

    /// Cut-off on `churn_likelihood_score`, in `[0, 1]`.
    likely_to_churn_threshold: f64,

    /// Number of quantile bins attempted per RFM dimension.
    rfm_quantiles: usize,

    /// Score assigned to every player when a dimension cannot be binned.
    neutral_score: u8,
}

#[derive(Deserialize)]
struct FeatureConfigFields {
    churn_threshold_days: u32,
    likely_to_churn_threshold: f64,
    rfm_quantiles: usize,
    neutral_score: u8,
}

impl TryFrom<FeatureConfigFields> for FeatureConfig {
    type Error = ChurnError;

    fn try_from(fields: FeatureConfigFields) -> ChurnResult<Self> {
        let cfg = Self::new(fields.churn_threshold_days)?
            .with_likely_to_churn_threshold(fields.likely_to_churn_threshold)?;
        // The neutral score is checked against the final quantile count.
        Self {
            neutral_score: 1,
            ..cfg
        }
        .with_rfm_quantiles(fields.rfm_quantiles)?
        .with_neutral_score(fields.neutral_score)
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            churn_threshold_days: 7,
            likely_to_churn_threshold: 0.6,
            rfm_quantiles: 5,
            neutral_score: 3,
        }
    }
}

impl FeatureConfig {
    /// Creates a config with a custom churn threshold.
    ///
    /// # Validation
    /// Returns error if `churn_threshold_days` is 0.
    pub fn new(churn_threshold_days: u32) -> ChurnResult<Self> {
        if churn_threshold_days == 0 {
            return Err(ConfigError::InvalidFeatureConfig(
                "Churn threshold must be at least one day".to_string(),
            )
            .into());
        }

        Ok(Self {
            churn_threshold_days,
            ..Default::default()
        })
    }

    /// # Validation
    /// Returns error if `threshold` lies outside `[0, 1]`.
    pub fn with_likely_to_churn_threshold(self, threshold: f64) -> ChurnResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidFeatureConfig(format!(
                "Likely-to-churn threshold must lie in [0, 1], got {threshold}"
            ))
            .into());
        }

        Ok(Self {
            likely_to_churn_threshold: threshold,
            ..self
        })
    }

    /// # Validation
    /// Returns error unless `2 <= quantiles <= 5`, or if the neutral score
    /// would fall outside the new score range.
    pub fn with_rfm_quantiles(self, quantiles: usize) -> ChurnResult<Self> {
        if !(2..=MAX_RFM_QUANTILES).contains(&quantiles) {
            return Err(ConfigError::InvalidFeatureConfig(format!(
                "RFM quantiles must lie in [2, {MAX_RFM_QUANTILES}], got {quantiles}"
            ))
            .into());
        }
        if usize::from(self.neutral_score) > quantiles {
            return Err(ConfigError::InvalidFeatureConfig(format!(
                "Neutral score {} exceeds {quantiles} quantiles",
                self.neutral_score
            ))
            .into());
        }

        Ok(Self {
            rfm_quantiles: quantiles,
            ..self
        })
    }

    /// # Validation
    /// Returns error unless `1 <= score <= rfm_quantiles`.
    pub fn with_neutral_score(self, score: u8) -> ChurnResult<Self> {
        if score == 0 || usize::from(score) > self.rfm_quantiles {
            return Err(ConfigError::InvalidFeatureConfig(format!(
                "Neutral score must lie in [1, {}], got {score}",
                self.rfm_quantiles
            ))
            .into());
        }

        Ok(Self {
            neutral_score: score,
            ..self
        })
    }

    pub fn churn_threshold_days(&self) -> u32 {
        self.churn_threshold_days
    }

    pub fn likely_to_churn_threshold(&self) -> f64 {
        self.likely_to_churn_threshold
    }

    pub fn rfm_quantiles(&self) -> usize {
        self.rfm_quantiles
    }

    pub fn neutral_score(&self) -> u8 {
        self.neutral_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChurnError;

    #[test]
    fn test_defaults() {
        let cfg = FeatureConfig::default();
        assert_eq!(cfg.churn_threshold_days(), 7);
        assert_eq!(cfg.likely_to_churn_threshold(), 0.6);
        assert_eq!(cfg.rfm_quantiles(), 5);
        assert_eq!(cfg.neutral_score(), 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            FeatureConfig::new(0),
            Err(ChurnError::Config(ConfigError::InvalidFeatureConfig(_)))
        ));
        assert!(
            FeatureConfig::default()
                .with_likely_to_churn_threshold(1.5)
                .is_err()
        );
        assert!(FeatureConfig::default().with_rfm_quantiles(1).is_err());
        assert!(FeatureConfig::default().with_rfm_quantiles(2).is_err());
        assert!(FeatureConfig::default().with_rfm_quantiles(10).is_err());
        assert!(FeatureConfig::default().with_neutral_score(0).is_err());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = FeatureConfig::new(14)
            .and_then(|c| c.with_likely_to_churn_threshold(0.8))
            .and_then(|c| c.with_neutral_score(2))
            .and_then(|c| c.with_rfm_quantiles(4))
            .expect("Valid config");

        assert_eq!(cfg.churn_threshold_days(), 14);
        assert_eq!(cfg.likely_to_churn_threshold(), 0.8);
        assert_eq!(cfg.rfm_quantiles(), 4);
        assert_eq!(cfg.neutral_score(), 2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let cfg = FeatureConfig::new(10).expect("Valid config");
        let json = serde_json::to_string(&cfg).expect("Failed to serialize");
        let back: FeatureConfig = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"churn_threshold_days":7,"likely_to_churn_threshold":0.6,"rfm_quantiles":10,"neutral_score":3}"#;
        assert!(serde_json::from_str::<FeatureConfig>(json).is_err());

        let json = r#"{"churn_threshold_days":0,"likely_to_churn_threshold":0.6,"rfm_quantiles":5,"neutral_score":3}"#;
        assert!(serde_json::from_str::<FeatureConfig>(json).is_err());

        let json = r#"{"churn_threshold_days":3,"likely_to_churn_threshold":0.5,"rfm_quantiles":4,"neutral_score":2}"#;
        let cfg: FeatureConfig = serde_json::from_str(json).expect("Valid config");
        assert_eq!(cfg.rfm_quantiles(), 4);
        assert_eq!(cfg.neutral_score(), 2);

        let json = r#"{"churn_threshold_days":3,"likely_to_churn_threshold":0.5,"rfm_quantiles":2,"neutral_score":1}"#;
        let cfg: FeatureConfig = serde_json::from_str(json).expect("Valid config");
        assert_eq!(cfg.rfm_quantiles(), 2);
    }
}
