use chrono::NaiveDateTime;
use polars::prelude::{DataType, LazyFrame, col, lit, when};

use crate::{
    data::records::TIMESTAMP_DTYPE,
    features::{config::FeatureConfig, player_features::FeatureCol},
    report::polars_ext::ExprExt,
};

/// Adds time-based and financial ratios to the merged per-player summary.
///
/// `now` is the reference instant, normally the latest game timestamp in the
/// batch. Day differences are whole days, truncated. Every ratio substitutes a
/// zero denominator with one.
///
/// `churn_likelihood_score` is `days_since_last_play` divided by its maximum
/// over the batch, or 0 for everybody when that maximum is 0.
pub fn with_derived_metrics(lf: LazyFrame, now: NaiveDateTime, cfg: &FeatureConfig) -> LazyFrame {
    let last = col(FeatureCol::LastPlayDate);
    let first = col(FeatureCol::FirstPlayDate);
    let days = col(FeatureCol::DaysSinceLastPlay);
    let net = col(FeatureCol::NetRevenue);
    let stake = col(FeatureCol::TotalStake);

    lf.with_columns([
        (lit(now).cast(TIMESTAMP_DTYPE) - last.clone())
            .dt()
            .total_days(false)
            .alias(FeatureCol::DaysSinceLastPlay),
        (last - first)
            .dt()
            .total_days(false)
            .fill_null(lit(0i64))
            .alias(FeatureCol::TenureDays),
        (stake.clone() - col(FeatureCol::TotalPrize)).alias(FeatureCol::NetRevenue),
    ])
    .with_columns([
        days.clone()
            .gt(lit(i64::from(cfg.churn_threshold_days())))
            .cast(DataType::Int32)
            .alias(FeatureCol::Churned),
        net.clone()
            .div_zero_as_one(stake.clone())
            .alias(FeatureCol::LossRatio),
        col(FeatureCol::TotalPrize)
            .div_zero_as_one(stake)
            .alias(FeatureCol::WinLossRatio),
        net.clone()
            .div_zero_as_one(col(FeatureCol::NumPlays))
            .alias(FeatureCol::NetRevenuePerPlay),
        net.div_zero_as_one(col(FeatureCol::TotalDaysActive))
            .alias(FeatureCol::Ltv),
        when(days.clone().max().gt(lit(0i64)))
            .then(days.clone().cast(DataType::Float64) / days.max().cast(DataType::Float64))
            .otherwise(lit(0.0))
            .alias(FeatureCol::ChurnLikelihoodScore),
    ])
    .with_column(
        col(FeatureCol::ChurnLikelihoodScore)
            .gt(lit(cfg.likely_to_churn_threshold()))
            .cast(DataType::Int32)
            .alias(FeatureCol::LikelyToChurn),
    )
}
