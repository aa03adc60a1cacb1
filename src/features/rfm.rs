use std::collections::BTreeSet;

use itertools::izip;
use ordered_float::OrderedFloat;
use polars::{
    df,
    error::PolarsError,
    prelude::{IntoLazy, QuantileMethod, col, lit},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    data::records::required,
    error::{ChurnError, ChurnResult},
    features::config::FeatureConfig,
    report::polars_ext::polars_to_churn_error,
};

const VALUE: &str = "value";

/// Named customer-value segment derived from the R, F and M scores.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
pub enum RfmSegment {
    #[strum(serialize = "Champions")]
    #[serde(rename = "Champions")]
    Champions,
    #[strum(serialize = "Loyal Customers")]
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[strum(serialize = "Potential Loyalists")]
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[strum(serialize = "New Customers")]
    #[serde(rename = "New Customers")]
    NewCustomers,
    #[strum(serialize = "At Risk")]
    #[serde(rename = "At Risk")]
    AtRisk,
    #[strum(serialize = "Hibernating")]
    #[serde(rename = "Hibernating")]
    Hibernating,
    #[strum(serialize = "Others")]
    #[serde(rename = "Others")]
    Others,
}

impl RfmSegment {
    /// Decision table over `(R, F, M)`; the first matching rule wins.
    pub fn from_scores(r: i32, f: i32, m: i32) -> Self {
        if r >= 4 && f >= 4 && m >= 4 {
            Self::Champions
        } else if r >= 3 && f >= 4 && m >= 3 {
            Self::LoyalCustomers
        } else if r >= 4 && f >= 2 && m >= 2 {
            Self::PotentialLoyalists
        } else if r == 5 && f == 1 && m == 1 {
            Self::NewCustomers
        } else if r <= 2 && f >= 3 && m >= 3 {
            Self::AtRisk
        } else if r <= 2 && f <= 2 && m <= 2 {
            Self::Hibernating
        } else {
            Self::Others
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Which end of a dimension earns the top score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDirection {
    /// Larger values score higher (frequency, monetary).
    Ascending,
    /// Smaller values score higher (recency in days).
    Descending,
}

/// Scores for every player, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RfmScores {
    pub recency: Vec<i32>,
    pub frequency: Vec<i32>,
    pub monetary: Vec<i32>,
    pub segments: Vec<RfmSegment>,
}

/// Scores recency (days since last play), frequency (play count) and monetary
/// value (net revenue) and assigns a segment per player.
///
/// All three slices must describe the same players in the same order.
pub fn rfm_scores(
    days_since_last_play: &[f64],
    num_plays: &[f64],
    net_revenue: &[f64],
    cfg: &FeatureConfig,
) -> ChurnResult<RfmScores> {
    let recency = score_dimension(days_since_last_play, ScoreDirection::Descending, cfg)?;
    let frequency = score_dimension(num_plays, ScoreDirection::Ascending, cfg)?;
    let monetary = score_dimension(&monetary_basis(net_revenue), ScoreDirection::Ascending, cfg)?;

    let segments = izip!(&recency, &frequency, &monetary)
        .map(|(&r, &f, &m)| RfmSegment::from_scores(r, f, m))
        .collect();

    Ok(RfmScores {
        recency,
        frequency,
        monetary,
        segments,
    })
}

/// Quantile-bins one dimension into integer scores.
///
/// # Fallback ladder
/// 1. Fewer than 2 distinct values: every player gets the neutral score.
/// 2. Otherwise edges are taken at `rfm_quantiles` equal-probability cuts and
///    duplicate edges are dropped. The surviving bin count `nb` is used as is.
/// 3. If `nb < 2` every player gets the neutral score.
/// 4. Otherwise bins are `[e0, e1], (e1, e2], ...` and scores run `1..=nb`,
///    reversed for [`ScoreDirection::Descending`].
pub fn score_dimension(
    values: &[f64],
    direction: ScoreDirection,
    cfg: &FeatureConfig,
) -> ChurnResult<Vec<i32>> {
    let neutral = vec![i32::from(cfg.neutral_score()); values.len()];

    let distinct = values.iter().copied().map(OrderedFloat).collect::<BTreeSet<_>>();
    if distinct.len() < 2 {
        return Ok(neutral);
    }

    let edges = quantile_edges(values, cfg.rfm_quantiles())?;
    let num_bins = edges.len().saturating_sub(1);
    if num_bins < 2 {
        return Ok(neutral);
    }

    Ok(values
        .iter()
        .map(|&v| {
            let bin = bin_index(&edges, v);
            let score = match direction {
                ScoreDirection::Ascending => bin + 1,
                ScoreDirection::Descending => num_bins - bin,
            };
            // `score` is bounded by `rfm_quantiles`, a small count.
            score as i32
        })
        .collect())
}

/// Distinct quantile cut points at `0, 1/q, ..., 1`, linearly interpolated.
pub fn quantile_edges(values: &[f64], quantiles: usize) -> ChurnResult<Vec<f64>> {
    if values.is_empty() || quantiles == 0 {
        return Ok(Vec::new());
    }

    let cuts = (0..=quantiles)
        .map(|k| {
            col(VALUE)
                .quantile(lit(k as f64 / quantiles as f64), QuantileMethod::Linear)
                .alias(format!("q{k}"))
        })
        .collect::<Vec<_>>();
    let row = df!(VALUE => values)
        .map_err(convert_err)?
        .lazy()
        .select(cuts)
        .collect()
        .map_err(convert_err)?;

    let mut edges = row
        .get_columns()
        .iter()
        .map(|c| {
            let edge = c.f64().map(|ca| ca.get(0)).map_err(convert_err)?;
            required(edge, c.name())
        })
        .collect::<ChurnResult<Vec<_>>>()?;
    edges.dedup();
    Ok(edges)
}

/// Shifts net revenue so the smallest value becomes 1 when any value is not
/// positive. Binning is unaffected by the shift; scores stay ascending.
pub fn monetary_basis(net_revenue: &[f64]) -> Vec<f64> {
    let min = net_revenue
        .iter()
        .copied()
        .map(OrderedFloat)
        .min()
        .map(|m| m.0);

    match min {
        Some(m) if m <= 0.0 => net_revenue.iter().map(|v| v + m.abs() + 1.0).collect(),
        _ => net_revenue.to_vec(),
    }
}

/// Index of the right-closed bin holding `v`; the first bin also holds `e0`.
pub(crate) fn bin_index(edges: &[f64], v: f64) -> usize {
    edges.iter().filter(|&&e| e < v).count().saturating_sub(1)
}

fn convert_err(e: PolarsError) -> ChurnError {
    polars_to_churn_error("rfm quantiles", e)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    fn cfg() -> FeatureConfig {
        FeatureConfig::default()
    }

    fn ascending(values: &[f64]) -> Vec<i32> {
        score_dimension(values, ScoreDirection::Ascending, &cfg()).expect("Failed to score")
    }

    fn descending(values: &[f64]) -> Vec<i32> {
        score_dimension(values, ScoreDirection::Descending, &cfg()).expect("Failed to score")
    }

    #[test]
    fn test_five_bins_ascending_and_descending() {
        let values = (1..=10).map(f64::from).collect::<Vec<_>>();

        assert_eq!(
            ascending(&values),
            vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]
        );
        assert_eq!(
            descending(&values),
            vec![5, 5, 4, 4, 3, 3, 2, 2, 1, 1]
        );
    }

    #[test]
    fn test_single_value_gets_neutral_score() {
        let values = vec![4.0; 6];
        assert_eq!(
            ascending(&values),
            vec![3; 6]
        );
    }

    #[test]
    fn test_collapsed_edges_use_surviving_bins() {
        // Edges collapse to [1, 1.2, 2]: two bins.
        let values = vec![1.0, 1.0, 1.0, 1.0, 2.0];
        assert_eq!(
            ascending(&values),
            vec![1, 1, 1, 1, 2]
        );
        assert_eq!(
            descending(&values),
            vec![2, 2, 2, 2, 1]
        );
    }

    #[test]
    fn test_single_surviving_bin_falls_back_to_neutral() {
        // Edges collapse to [0, 1]: only one bin survives.
        let mut values = vec![0.0; 9];
        values.push(1.0);
        assert_eq!(
            ascending(&values),
            vec![3; 10]
        );
    }

    #[test]
    fn test_quantile_edges_interpolate_linearly() {
        let edges = quantile_edges(&[4.0, 1.0, 3.0, 2.0, 5.0], 4).expect("Failed to cut");
        assert_eq!(edges, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let edges = quantile_edges(&[1.0, 1.0, 1.0, 1.0, 2.0], 5).expect("Failed to cut");
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0], 1.0);
        assert!((edges[1] - 1.2).abs() < 1e-9);
        assert_eq!(edges[2], 2.0);

        assert!(quantile_edges(&[], 5).expect("Failed to cut").is_empty());
    }

    #[test]
    fn test_monetary_shift_keeps_order() {
        assert_eq!(monetary_basis(&[-5.0, 0.0, 10.0]), vec![1.0, 6.0, 16.0]);
        assert_eq!(monetary_basis(&[2.0, 3.0]), vec![2.0, 3.0]);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let days = [0.0, 3.0, 3.0, 9.0, 30.0, 1.0, 7.0];
        let plays = [12.0, 1.0, 4.0, 4.0, 1.0, 40.0, 2.0];
        let net = [-20.0, 0.0, 15.0, 15.0, 300.0, 1200.0, -3.0];

        let scores = rfm_scores(&days, &plays, &net, &cfg()).expect("Failed to score");
        for s in scores
            .recency
            .iter()
            .chain(&scores.frequency)
            .chain(&scores.monetary)
        {
            assert!((1..=5).contains(s), "Score {s} out of range");
        }
        assert_eq!(scores.segments.len(), days.len());
    }

    #[test]
    fn test_segment_decision_table() {
        assert_eq!(RfmSegment::from_scores(5, 5, 5), RfmSegment::Champions);
        assert_eq!(RfmSegment::from_scores(3, 4, 3), RfmSegment::LoyalCustomers);
        assert_eq!(RfmSegment::from_scores(4, 2, 2), RfmSegment::PotentialLoyalists);
        assert_eq!(RfmSegment::from_scores(5, 1, 1), RfmSegment::NewCustomers);
        assert_eq!(RfmSegment::from_scores(2, 3, 3), RfmSegment::AtRisk);
        assert_eq!(RfmSegment::from_scores(1, 2, 2), RfmSegment::Hibernating);
        assert_eq!(RfmSegment::from_scores(3, 3, 3), RfmSegment::Others);
        // Rule order: 4,1,1 is neither a loyalist nor new.
        assert_eq!(RfmSegment::from_scores(4, 1, 1), RfmSegment::Others);
    }

    #[test]
    fn test_segment_labels() {
        let labels = RfmSegment::iter().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                "Champions",
                "Loyal Customers",
                "Potential Loyalists",
                "New Customers",
                "At Risk",
                "Hibernating",
                "Others"
            ]
        );
        assert_eq!(
            RfmSegment::from_str("At Risk").expect("Known label"),
            RfmSegment::AtRisk
        );
    }
}
