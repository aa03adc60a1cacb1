//! Views over the scored feature table that compare predicted churners with
//! retained players.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use itertools::izip;
use polars::{
    df,
    frame::DataFrame,
    prelude::{Column, IntoLazy, SortMultipleOptions, col, len},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    classifier::{ScoreCol, ScoredPlayers},
    data::records::micros_to_datetime,
    error::{ChurnError, ChurnResult},
    features::{
        player_features::FeatureCol,
        rfm::{RfmSegment, bin_index, quantile_edges},
    },
    report::{
        io::Report,
        polars_ext::polars_to_churn_error,
        view::{View, ViewCol, view_of},
    },
};

const VALUE_QUANTILES: usize = 4;

/// Net-revenue quartile label.
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
pub enum ValueSegment {
    Low,
    Medium,
    High,
    #[strum(serialize = "Very High")]
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl ValueSegment {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Splits net revenue into up to four quantile bins.
///
/// Duplicate edges are dropped and the labels are taken in order for the bins
/// that survive, so two bins read `Low`, `Medium`. With fewer than two bins
/// every player is `Medium`.
pub fn value_segments(net_revenue: &[f64]) -> ChurnResult<Vec<ValueSegment>> {
    let edges = quantile_edges(net_revenue, VALUE_QUANTILES)?;
    let num_bins = edges.len().saturating_sub(1);
    if num_bins < 2 {
        return Ok(vec![ValueSegment::Medium; net_revenue.len()]);
    }

    let labels = ValueSegment::iter().collect::<Vec<_>>();
    Ok(net_revenue
        .iter()
        .map(|&v| labels[bin_index(&edges, v)])
        .collect())
}

#[derive(Debug, Clone)]
pub struct ChurnInsights {
    /// `prediction`, `count`.
    pub prediction_distribution: View<DataFrame>,
    /// `player_id`, `net_revenue`, `prediction`, `value_segment`.
    pub value_segments: View<DataFrame>,
    /// `week`, `not_churned`, `churned`, `total_players`, `churn_rate_pct`.
    pub weekly_churn_rate: View<DataFrame>,
    /// `status`, `count`.
    pub reactivation: View<DataFrame>,
    /// `rfm_segment`, `total_players`, `churn_rate_pct`, one row per segment.
    pub rfm_segment_churn: View<DataFrame>,
}

impl ChurnInsights {
    #[tracing::instrument(skip_all, fields(players = scored.height()))]
    pub fn from_scored(scored: &ScoredPlayers) -> Self {
        let scored = Some(scored);
        Self {
            prediction_distribution: view_of("Churn Distribution", scored, prediction_distribution),
            value_segments: view_of(
                "Churn Distribution by Player Value Segmentation",
                scored,
                value_segment_view,
            ),
            weekly_churn_rate: view_of("Weekly Churn Rate", scored, weekly_churn_rate),
            reactivation: view_of(
                "Player Reactivation After First Win",
                scored,
                reactivation_counts,
            ),
            rfm_segment_churn: view_of("Churn Rate by RFM Segment", scored, rfm_segment_churn),
        }
    }

    pub fn views(&self) -> [(&'static str, &View<DataFrame>); 5] {
        [
            ("prediction_distribution", &self.prediction_distribution),
            ("value_segments", &self.value_segments),
            ("weekly_churn_rate", &self.weekly_churn_rate),
            ("reactivation", &self.reactivation),
            ("rfm_segment_churn", &self.rfm_segment_churn),
        ]
    }
}

// ================================================================================================
// Views
// ================================================================================================

pub fn prediction_distribution(scored: &ScoredPlayers) -> ChurnResult<DataFrame> {
    scored
        .as_df()
        .clone()
        .lazy()
        .group_by([col(ScoreCol::Prediction)])
        .agg([len().alias(ViewCol::Count)])
        .sort([ScoreCol::Prediction.as_str()], SortMultipleOptions::default())
        .collect()
        .map_err(convert_err)
}

fn value_segment_view(scored: &ScoredPlayers) -> ChurnResult<DataFrame> {
    let df = scored.as_df();
    let net = f64_values(df, FeatureCol::NetRevenue.as_str())?;
    let segments = value_segments(&net)?
        .into_iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>();

    let mut out = df
        .select([
            FeatureCol::PlayerId.as_str(),
            FeatureCol::NetRevenue.as_str(),
            ScoreCol::Prediction.as_str(),
        ])
        .map_err(convert_err)?;
    out.with_column(Column::new(ViewCol::ValueSegment.name(), segments))
        .map_err(convert_err)?;
    Ok(out)
}

/// Churn rate per calendar week (Monday to Sunday) of the last play.
///
/// Weeks are labelled `YYYY-MM-DD/YYYY-MM-DD`. The rate is a percentage.
pub fn weekly_churn_rate(scored: &ScoredPlayers) -> ChurnResult<DataFrame> {
    let df = scored.as_df();
    let last_play = df
        .column(FeatureCol::LastPlayDate.as_str())
        .and_then(|c| c.datetime().map(|ca| ca.physical().clone()))
        .map_err(convert_err)?;
    let labels = prediction_values(df)?;

    let mut weeks: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for (micros, label) in izip!(last_play.into_iter(), labels) {
        let Some(micros) = micros else { continue };
        let entry = weeks
            .entry(week_label(micros_to_datetime(micros)?.date()))
            .or_default();
        if label == 1 {
            entry.1 += 1;
        } else {
            entry.0 += 1;
        }
    }

    let (week, (not_churned, churned)): (Vec<String>, (Vec<u32>, Vec<u32>)) =
        weeks.into_iter().unzip();
    let total = izip!(&not_churned, &churned)
        .map(|(n, c)| n + c)
        .collect::<Vec<_>>();
    let rate = izip!(&churned, &total)
        .map(|(&c, &t)| f64::from(c) / f64::from(t.max(1)) * 100.0)
        .collect::<Vec<_>>();

    df![
        ViewCol::Week.as_str() => week,
        ViewCol::NotChurned.as_str() => not_churned,
        ViewCol::Churned.as_str() => churned,
        ViewCol::TotalPlayers.as_str() => total,
        ViewCol::ChurnRatePct.as_str() => rate,
    ]
    .map_err(convert_err)
}

fn week_label(date: NaiveDate) -> String {
    let start = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    let end = start + Duration::days(6);
    format!("{}/{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}

/// Players who did and did not play again after their first win, most
/// common status first.
pub fn reactivation_counts(scored: &ScoredPlayers) -> ChurnResult<DataFrame> {
    let flags = scored
        .as_df()
        .column(FeatureCol::Reactivated.as_str())
        .and_then(|c| c.bool().cloned())
        .map_err(convert_err)?;

    let reactivated = flags.into_iter().flatten().filter(|&f| f).count() as u32;
    let not_reactivated = scored.height() as u32 - reactivated;

    let mut counts = [
        ("Reactivated", reactivated),
        ("Not Reactivated", not_reactivated),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .collect::<Vec<_>>();
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let (status, count): (Vec<&str>, Vec<u32>) = counts.into_iter().unzip();
    df![
        ViewCol::Status.as_str() => status,
        ViewCol::Count.as_str() => count,
    ]
    .map_err(convert_err)
}

/// Percentage of predicted churners per RFM segment.
///
/// Every segment appears once, in [`RfmSegment`] order; segments without
/// players report 0.
pub fn rfm_segment_churn(scored: &ScoredPlayers) -> ChurnResult<DataFrame> {
    let df = scored.as_df();
    let segments = df
        .column(FeatureCol::RfmSegment.as_str())
        .and_then(|c| c.str().cloned())
        .map_err(convert_err)?;
    let labels = prediction_values(df)?;

    let mut tally: HashMap<&str, (u32, u32)> = HashMap::new();
    for (segment, label) in izip!(segments.into_iter(), labels) {
        let Some(segment) = segment else { continue };
        let entry = tally.entry(segment).or_default();
        entry.0 += 1;
        if label == 1 {
            entry.1 += 1;
        }
    }

    let (names, (totals, rates)): (Vec<&str>, (Vec<u32>, Vec<f64>)) = RfmSegment::iter()
        .map(|s| {
            let (total, churned) = tally.get(s.as_str()).copied().unwrap_or_default();
            let rate = if total == 0 {
                0.0
            } else {
                f64::from(churned) / f64::from(total) * 100.0
            };
            (s.as_str(), (total, rate))
        })
        .unzip();

    df![
        FeatureCol::RfmSegment.as_str() => names,
        ViewCol::TotalPlayers.as_str() => totals,
        ViewCol::ChurnRatePct.as_str() => rates,
    ]
    .map_err(convert_err)
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn prediction_values(df: &DataFrame) -> ChurnResult<Vec<i32>> {
    Ok(df
        .column(ScoreCol::Prediction.as_str())
        .and_then(|c| c.i32().cloned())
        .map_err(convert_err)?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect())
}

fn f64_values(df: &DataFrame, name: &str) -> ChurnResult<Vec<f64>> {
    Ok(df
        .column(name)
        .and_then(|c| c.f64().cloned())
        .map_err(convert_err)?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("churn insight view", e)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::{
        classifier::{ChurnClassifier, FeatureMatrix, Prediction, score},
        data::records::{GameRecord, GameRecords},
        features::player_features::build_features,
    };

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("Valid date")
    }

    /// Labels a player as churn when they have been away for more than a day.
    struct AwayClassifier;

    impl ChurnClassifier for AwayClassifier {
        fn classify(&self, features: &FeatureMatrix) -> ChurnResult<Vec<Prediction>> {
            let days = features
                .column(FeatureCol::DaysSinceLastPlay.as_str())
                .expect("Days column present");
            Ok(days
                .iter()
                .map(|&d| Prediction {
                    label: u8::from(d > 1.0),
                    probability: if d > 1.0 { 0.8 } else { 0.2 },
                })
                .collect())
        }
    }

    fn scored() -> ScoredPlayers {
        let play = |player: &str, day: u32, stake: f64, prize: f64| GameRecord {
            player_id: player.to_string(),
            timestamp: at(day),
            stake,
            prize,
            ticket_status: "SETTLED".to_string(),
            access_channel: "Web".to_string(),
            game: "LOTTO".to_string(),
        };
        // 2024-03-04 is a Monday.
        let games = GameRecords::from_records(&[
            play("a", 4, 100.0, 50.0),
            play("a", 12, 100.0, 0.0),
            play("b", 5, 10.0, 0.0),
            play("c", 11, 40.0, 0.0),
            play("d", 12, 200.0, 0.0),
        ])
        .expect("Failed to build games");
        let features = build_features(&games, None).expect("Pipeline failed");
        score(&features, &AwayClassifier).expect("Scoring failed")
    }

    #[test]
    fn test_value_segments_ladder() {
        let values = (1..=8).map(f64::from).collect::<Vec<_>>();
        let labels = value_segments(&values)
            .expect("Failed to segment")
            .into_iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["Low", "Low", "Medium", "Medium", "High", "High", "Very High", "Very High"]
        );

        assert_eq!(
            value_segments(&[5.0, 5.0, 5.0]).expect("Failed to segment"),
            vec![ValueSegment::Medium; 3]
        );
        assert_eq!(
            // Edges collapse to [0, 5, 10]: two bins.
            value_segments(&[0.0, 0.0, 0.0, 10.0, 10.0, 10.0]).expect("Failed to segment"),
            vec![
                ValueSegment::Low,
                ValueSegment::Low,
                ValueSegment::Low,
                ValueSegment::Medium,
                ValueSegment::Medium,
                ValueSegment::Medium
            ]
        );
    }

    #[test]
    fn test_weekly_churn_rate() {
        let df = weekly_churn_rate(&scored()).expect("Failed to build weekly view");

        let weeks = df
            .column(ViewCol::Week.as_str())
            .and_then(|c| c.str().cloned())
            .expect("Missing weeks")
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(weeks, vec!["2024-03-04/2024-03-10", "2024-03-11/2024-03-17"]);

        let rates = df
            .column(ViewCol::ChurnRatePct.as_str())
            .and_then(|c| c.f64().cloned())
            .expect("Missing rates")
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        // Week 1: only b, away 7 days. Week 2: a and d today, c one day ago.
        assert_eq!(rates, vec![100.0, 0.0]);
    }

    #[test]
    fn test_rfm_segment_churn_lists_every_segment() {
        let df = rfm_segment_churn(&scored()).expect("Failed to build RFM view");
        assert_eq!(df.height(), RfmSegment::iter().count());

        let totals = df
            .column(ViewCol::TotalPlayers.as_str())
            .and_then(|c| c.u32().cloned())
            .expect("Missing totals")
            .into_iter()
            .flatten()
            .sum::<u32>();
        assert_eq!(totals, 4);
    }

    #[test]
    fn test_reactivation_counts() {
        let df = reactivation_counts(&scored()).expect("Failed to count reactivation");
        let status = df
            .column(ViewCol::Status.as_str())
            .and_then(|c| c.str().cloned())
            .expect("Missing status")
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(status, vec!["Not Reactivated", "Reactivated"]);
    }

    #[test]
    fn test_empty_scores_give_empty_views() {
        let insights = ChurnInsights::from_scored(&ScoredPlayers::default());
        assert!(insights.views().iter().all(|(_, v)| !v.is_ready()));
    }
}
