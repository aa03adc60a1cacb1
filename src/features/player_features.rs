use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::NaiveDateTime;
use polars::{
    frame::DataFrame,
    prelude::{
        BooleanChunked, ChunkAgg, Column, DataType, Field, Float64Chunked, Int32Chunked,
        Int64Chunked, IntoLazy, JoinArgs, JoinType, PlSmallStr, Schema, SchemaRef,
        SortMultipleOptions, StringChunked, UInt32Chunked, col, lit,
    },
};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    data::records::{
        GameCol, GameRecords, TIMESTAMP_DTYPE, WalletRecords, micros_to_datetime, required,
    },
    error::{ChurnError, ChurnResult, DataError, PipelineError},
    features::{
        aggregate::{game_summary, is_wallet_column, merge_summaries, wallet_summary},
        config::FeatureConfig,
        derived::with_derived_metrics,
        reactivation::reactivation_flags,
        rfm::{RfmSegment, rfm_scores},
    },
    report::{
        io::{Report, ToSchema, conforms_to},
        polars_ext::polars_to_churn_error,
    },
};

const STAGE_AGGREGATE: &str = "aggregate";
const STAGE_DERIVED: &str = "derived_metrics";
const STAGE_REACTIVATION: &str = "reactivation";
const STAGE_RFM: &str = "rfm";
const STAGE_ASSEMBLE: &str = "assemble";

// ================================================================================================
// Columns
// ================================================================================================

/// Canonical columns of the per-player feature table, in output order.
///
/// Wallet actions other than `deposit` and `withdrawal` add further
/// `total_amount_<action>` / `txn_count_<action>` columns right after
/// [`FeatureCol::TxnCountWithdrawal`].
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
    StrumDisplay,
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FeatureCol {
    PlayerId,

    // === Activity ===
    FirstPlayDate,
    LastPlayDate,
    /// Distinct calendar days with at least one play.
    TotalDaysActive,
    NumPlays,

    // === Spend ===
    TotalStake,
    TotalPrize,
    AvgStake,
    AvgPrize,

    // === Engagement ===
    DistinctGamesPlayed,
    MostPlayedGame,
    MostPlayedGameCount,
    MostUsedChannel,
    ChannelCount,

    // === Wallet ===
    TotalAmountDeposit,
    TxnCountDeposit,
    TotalAmountWithdrawal,
    TxnCountWithdrawal,

    // === Derived ===
    DaysSinceLastPlay,
    /// `1` when `days_since_last_play` exceeds the churn threshold.
    Churned,
    TenureDays,
    NetRevenue,
    LossRatio,
    WinLossRatio,
    NetRevenuePerPlay,
    /// Net revenue per active day.
    Ltv,
    /// Display heuristic in `[0, 1]`, unrelated to the classifier output.
    ChurnLikelihoodScore,
    LikelyToChurn,

    // === Reactivation ===
    Reactivated,

    // === RFM ===
    RScore,
    FScore,
    MScore,
    RfmSegment,
}

impl From<FeatureCol> for PlSmallStr {
    fn from(value: FeatureCol) -> Self {
        value.as_str().into()
    }
}

impl FeatureCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn dtype(&self) -> DataType {
        use FeatureCol::*;
        match self {
            PlayerId | MostPlayedGame | MostUsedChannel | RfmSegment => DataType::String,
            FirstPlayDate | LastPlayDate => TIMESTAMP_DTYPE,
            TotalDaysActive | NumPlays | DistinctGamesPlayed | MostPlayedGameCount
            | ChannelCount | TxnCountDeposit | TxnCountWithdrawal => DataType::UInt32,
            TotalStake | TotalPrize | AvgStake | AvgPrize | TotalAmountDeposit
            | TotalAmountWithdrawal | NetRevenue | LossRatio | WinLossRatio
            | NetRevenuePerPlay | Ltv | ChurnLikelihoodScore => DataType::Float64,
            DaysSinceLastPlay | TenureDays => DataType::Int64,
            Churned | LikelyToChurn | RScore | FScore | MScore => DataType::Int32,
            Reactivated => DataType::Boolean,
        }
    }

    /// Columns produced by the game summary, in order.
    pub fn game_summary_columns() -> impl Iterator<Item = FeatureCol> {
        FeatureCol::iter().take_while(|c| *c != FeatureCol::TotalAmountDeposit)
    }
}

// ================================================================================================
// Feature table
// ================================================================================================

/// One row of the feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFeatureRow {
    pub player_id: String,
    pub first_play_date: NaiveDateTime,
    pub last_play_date: NaiveDateTime,
    pub total_days_active: u32,
    pub num_plays: u32,
    pub total_stake: f64,
    pub total_prize: f64,
    pub avg_stake: f64,
    pub avg_prize: f64,
    pub distinct_games_played: u32,
    pub most_played_game: String,
    pub most_played_game_count: u32,
    pub most_used_channel: String,
    pub channel_count: u32,
    pub total_amount_deposit: f64,
    pub txn_count_deposit: u32,
    pub total_amount_withdrawal: f64,
    pub txn_count_withdrawal: u32,
    pub days_since_last_play: i64,
    pub churned: i32,
    pub tenure_days: i64,
    pub net_revenue: f64,
    pub loss_ratio: f64,
    pub win_loss_ratio: f64,
    pub net_revenue_per_play: f64,
    pub ltv: f64,
    pub churn_likelihood_score: f64,
    pub likely_to_churn: i32,
    pub reactivated: bool,
    pub r_score: i32,
    pub f_score: i32,
    pub m_score: i32,
    pub rfm_segment: RfmSegment,
    /// Pivot columns of non-standard wallet actions.
    #[serde(flatten)]
    pub other_wallet: BTreeMap<String, f64>,
}

/// Per-player feature table keyed by `player_id`, sorted by it.
#[derive(Debug, Clone)]
pub struct PlayerFeatures {
    df: DataFrame,
}

impl Report for PlayerFeatures {
    fn as_df(&self) -> &DataFrame {
        &self.df
    }

    fn as_df_mut(&mut self) -> &mut DataFrame {
        &mut self.df
    }
}

impl ToSchema for PlayerFeatures {
    fn to_schema() -> SchemaRef {
        let fields: Vec<Field> = FeatureCol::iter()
            .map(|col| Field::new(col.into(), col.dtype()))
            .collect();

        Arc::new(Schema::from_iter(fields))
    }
}

impl Default for PlayerFeatures {
    fn default() -> Self {
        Self {
            df: DataFrame::empty_with_schema(&Self::to_schema()),
        }
    }
}

impl PlayerFeatures {
    /// Wraps a frame carrying at least every canonical feature column.
    pub fn from_df(df: DataFrame) -> ChurnResult<Self> {
        if !conforms_to(&df, &Self::to_schema()) {
            return Err(DataError::DataFrame(format!(
                "Player features do not conform to the canonical schema: {:?}",
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

    /// All pivoted wallet columns, standard ones included.
    pub fn wallet_columns(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .filter(|c| is_wallet_column(c))
            .collect()
    }

    pub fn player_ids(&self) -> ChurnResult<Vec<String>> {
        let ids = str_column(&self.df, FeatureCol::PlayerId.as_str())?;
        ids.into_iter()
            .map(|v| required(v, FeatureCol::PlayerId).map(str::to_string))
            .collect()
    }

    /// Materializes the typed rows.
    pub fn rows(&self) -> ChurnResult<Vec<PlayerFeatureRow>> {
        use FeatureCol::*;
        let df = &self.df;

        let player_ids = str_column(df, PlayerId.as_str())?;
        let first_play = datetime_column(df, FirstPlayDate.as_str())?;
        let last_play = datetime_column(df, LastPlayDate.as_str())?;
        let days_active = u32_column(df, TotalDaysActive.as_str())?;
        let num_plays = u32_column(df, NumPlays.as_str())?;
        let total_stake = f64_column(df, TotalStake.as_str())?;
        let total_prize = f64_column(df, TotalPrize.as_str())?;
        let avg_stake = f64_column(df, AvgStake.as_str())?;
        let avg_prize = f64_column(df, AvgPrize.as_str())?;
        let distinct_games = u32_column(df, DistinctGamesPlayed.as_str())?;
        let top_game = str_column(df, MostPlayedGame.as_str())?;
        let top_game_count = u32_column(df, MostPlayedGameCount.as_str())?;
        let top_channel = str_column(df, MostUsedChannel.as_str())?;
        let channel_count = u32_column(df, ChannelCount.as_str())?;
        let deposit_amount = f64_column(df, TotalAmountDeposit.as_str())?;
        let deposit_count = u32_column(df, TxnCountDeposit.as_str())?;
        let withdrawal_amount = f64_column(df, TotalAmountWithdrawal.as_str())?;
        let withdrawal_count = u32_column(df, TxnCountWithdrawal.as_str())?;
        let days_since = i64_column(df, DaysSinceLastPlay.as_str())?;
        let churned = i32_column(df, Churned.as_str())?;
        let tenure = i64_column(df, TenureDays.as_str())?;
        let net_revenue = f64_column(df, NetRevenue.as_str())?;
        let loss_ratio = f64_column(df, LossRatio.as_str())?;
        let win_loss_ratio = f64_column(df, WinLossRatio.as_str())?;
        let per_play = f64_column(df, NetRevenuePerPlay.as_str())?;
        let ltv = f64_column(df, Ltv.as_str())?;
        let likelihood = f64_column(df, ChurnLikelihoodScore.as_str())?;
        let likely = i32_column(df, LikelyToChurn.as_str())?;
        let reactivated = bool_column(df, Reactivated.as_str())?;
        let r_score = i32_column(df, RScore.as_str())?;
        let f_score = i32_column(df, FScore.as_str())?;
        let m_score = i32_column(df, MScore.as_str())?;
        let segments = str_column(df, RfmSegment.as_str())?;

        let standard = FeatureCol::iter().map(|c| c.as_str()).collect::<Vec<_>>();
        let other_wallet = self
            .wallet_columns()
            .into_iter()
            .filter(|c| !standard.contains(&c.as_str()))
            .map(|c| f64_column(df, &c).map(|values| (c, values)))
            .collect::<ChurnResult<Vec<_>>>()?;

        (0..df.height())
            .map(|i| {
                let segment = required(segments.get(i), RfmSegment)?;
                Ok(PlayerFeatureRow {
                    player_id: required(player_ids.get(i), PlayerId)?.to_string(),
                    first_play_date: micros_to_datetime(required(first_play.get(i), FirstPlayDate)?)?,
                    last_play_date: micros_to_datetime(required(last_play.get(i), LastPlayDate)?)?,
                    total_days_active: required(days_active.get(i), TotalDaysActive)?,
                    num_plays: required(num_plays.get(i), NumPlays)?,
                    total_stake: required(total_stake.get(i), TotalStake)?,
                    total_prize: required(total_prize.get(i), TotalPrize)?,
                    avg_stake: required(avg_stake.get(i), AvgStake)?,
                    avg_prize: required(avg_prize.get(i), AvgPrize)?,
                    distinct_games_played: required(distinct_games.get(i), DistinctGamesPlayed)?,
                    most_played_game: required(top_game.get(i), MostPlayedGame)?.to_string(),
                    most_played_game_count: required(top_game_count.get(i), MostPlayedGameCount)?,
                    most_used_channel: required(top_channel.get(i), MostUsedChannel)?.to_string(),
                    channel_count: required(channel_count.get(i), ChannelCount)?,
                    total_amount_deposit: required(deposit_amount.get(i), TotalAmountDeposit)?,
                    txn_count_deposit: required(deposit_count.get(i), TxnCountDeposit)?,
                    total_amount_withdrawal: required(
                        withdrawal_amount.get(i),
                        TotalAmountWithdrawal,
                    )?,
                    txn_count_withdrawal: required(withdrawal_count.get(i), TxnCountWithdrawal)?,
                    days_since_last_play: required(days_since.get(i), DaysSinceLastPlay)?,
                    churned: required(churned.get(i), Churned)?,
                    tenure_days: required(tenure.get(i), TenureDays)?,
                    net_revenue: required(net_revenue.get(i), NetRevenue)?,
                    loss_ratio: required(loss_ratio.get(i), LossRatio)?,
                    win_loss_ratio: required(win_loss_ratio.get(i), WinLossRatio)?,
                    net_revenue_per_play: required(per_play.get(i), NetRevenuePerPlay)?,
                    ltv: required(ltv.get(i), Ltv)?,
                    churn_likelihood_score: required(likelihood.get(i), ChurnLikelihoodScore)?,
                    likely_to_churn: required(likely.get(i), LikelyToChurn)?,
                    reactivated: required(reactivated.get(i), Reactivated)?,
                    r_score: required(r_score.get(i), RScore)?,
                    f_score: required(f_score.get(i), FScore)?,
                    m_score: required(m_score.get(i), MScore)?,
                    rfm_segment: segment.parse().map_err(DataError::ParseEnum)?,
                    other_wallet: other_wallet
                        .iter()
                        .map(|(name, values)| {
                            required(values.get(i), name).map(|v| (name.clone(), v))
                        })
                        .collect::<ChurnResult<_>>()?,
                })
            })
            .collect()
    }
}

// ================================================================================================
// Pipeline
// ================================================================================================

/// Builds the per-player feature table with the default [`FeatureConfig`].
pub fn build_features(
    games: &GameRecords,
    wallet: Option<&WalletRecords>,
) -> ChurnResult<PlayerFeatures> {
    build_features_with(&FeatureConfig::default(), games, wallet)
}

/// Builds the per-player feature table.
///
/// Stages: aggregate game and wallet activity, derive ratios and churn flags,
/// detect reactivation, then score RFM. The call is all-or-nothing: a failure
/// in any stage surfaces as a single [`PipelineError::Computation`] naming the
/// stage, and no partial table is returned.
///
/// An empty game table yields an empty table with every canonical column.
#[tracing::instrument(
    skip_all,
    fields(games = games.height(), wallet = wallet.map(|w| w.height()).unwrap_or(0))
)]
pub fn build_features_with(
    cfg: &FeatureConfig,
    games: &GameRecords,
    wallet: Option<&WalletRecords>,
) -> ChurnResult<PlayerFeatures> {
    if games.is_empty() {
        warn!("Game table is empty; returning an empty feature table");
        return Ok(PlayerFeatures::default());
    }

    // 1. Aggregate
    let now = reference_time(games).map_err(|e| stage_err(STAGE_AGGREGATE, e))?;
    let wallet_df = wallet_summary(wallet).map_err(|e| stage_err(STAGE_AGGREGATE, e))?;
    let merged = merge_summaries(game_summary(games), &wallet_df)
        .sort(
            [FeatureCol::PlayerId.as_str()],
            SortMultipleOptions::default(),
        )
        .collect()
        .map_err(|e| stage_err(STAGE_AGGREGATE, e))?;
    debug!(rows = merged.height(), cols = merged.width(), "Merged game and wallet summaries");

    // 2. Derived metrics
    let derived = with_derived_metrics(merged.lazy(), now, cfg)
        .collect()
        .map_err(|e| stage_err(STAGE_DERIVED, e))?;
    debug!(rows = derived.height(), cols = derived.width(), %now, "Derived metrics");

    // 3. Reactivation
    let with_flags = derived
        .lazy()
        .join(
            reactivation_flags(games),
            [col(FeatureCol::PlayerId)],
            [col(FeatureCol::PlayerId)],
            JoinArgs {
                how: JoinType::Left,
                ..Default::default()
            },
        )
        .with_column(col(FeatureCol::Reactivated).fill_null(lit(false)))
        .sort(
            [FeatureCol::PlayerId.as_str()],
            SortMultipleOptions::default(),
        )
        .collect()
        .map_err(|e| stage_err(STAGE_REACTIVATION, e))?;

    // 4. RFM
    let scored = append_rfm(with_flags, cfg).map_err(|e| stage_err(STAGE_RFM, e))?;

    // 5. Assemble
    let features = assemble(scored).map_err(|e| stage_err(STAGE_ASSEMBLE, e))?;
    info!(
        players = features.height(),
        cols = features.as_df().width(),
        "Built player features"
    );
    Ok(features)
}

/// Latest game timestamp in the batch.
fn reference_time(games: &GameRecords) -> ChurnResult<NaiveDateTime> {
    let latest = games
        .as_df()
        .column(GameCol::Timestamp.as_str())
        .and_then(|c| c.datetime().map(|ca| ca.physical().max()))
        .map_err(convert_err)?;
    micros_to_datetime(required(latest, GameCol::Timestamp)?)
}

fn append_rfm(mut df: DataFrame, cfg: &FeatureConfig) -> ChurnResult<DataFrame> {
    let dense = |c: FeatureCol| -> ChurnResult<Vec<f64>> {
        f64_column(&df, c.as_str())?
            .into_iter()
            .map(|v| required(v, c))
            .collect()
    };
    let scores = rfm_scores(
        &dense(FeatureCol::DaysSinceLastPlay)?,
        &dense(FeatureCol::NumPlays)?,
        &dense(FeatureCol::NetRevenue)?,
        cfg,
    )?;

    let segments = scores
        .segments
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>();
    for column in [
        Column::new(FeatureCol::RScore.name(), scores.recency),
        Column::new(FeatureCol::FScore.name(), scores.frequency),
        Column::new(FeatureCol::MScore.name(), scores.monetary),
        Column::new(FeatureCol::RfmSegment.name(), segments),
    ] {
        df.with_column(column).map_err(convert_err)?;
    }
    Ok(df)
}

/// Orders columns canonically; extra wallet pivots follow the standard ones.
fn assemble(df: DataFrame) -> ChurnResult<PlayerFeatures> {
    let canonical = FeatureCol::iter().map(|c| c.as_str()).collect::<Vec<_>>();
    let extra_wallet = df
        .get_column_names()
        .into_iter()
        .map(|c| c.as_str())
        .filter(|c| is_wallet_column(c) && !canonical.contains(c))
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut order: Vec<String> = Vec::with_capacity(canonical.len() + extra_wallet.len());
    for c in FeatureCol::iter() {
        order.push(c.as_str().to_string());
        if c == FeatureCol::TxnCountWithdrawal {
            order.extend(extra_wallet.iter().cloned());
        }
    }

    let df = df.select(order).map_err(convert_err)?;
    PlayerFeatures::from_df(df)
}

fn stage_err(stage: &str, e: impl Display) -> ChurnError {
    PipelineError::computation(stage, e).into()
}

// ================================================================================================
// Column accessors
// ================================================================================================

fn str_column(df: &DataFrame, name: &str) -> ChurnResult<StringChunked> {
    df.column(name)
        .and_then(|c| c.str().cloned())
        .map_err(convert_err)
}

fn datetime_column(df: &DataFrame, name: &str) -> ChurnResult<Int64Chunked> {
    df.column(name)
        .and_then(|c| c.datetime().map(|ca| ca.physical().clone()))
        .map_err(convert_err)
}

fn f64_column(df: &DataFrame, name: &str) -> ChurnResult<Float64Chunked> {
    df.column(name)
        .and_then(|c| c.cast(&DataType::Float64))
        .and_then(|c| c.f64().cloned())
        .map_err(convert_err)
}

fn u32_column(df: &DataFrame, name: &str) -> ChurnResult<UInt32Chunked> {
    df.column(name)
        .and_then(|c| c.u32().cloned())
        .map_err(convert_err)
}

fn i64_column(df: &DataFrame, name: &str) -> ChurnResult<Int64Chunked> {
    df.column(name)
        .and_then(|c| c.i64().cloned())
        .map_err(convert_err)
}

fn i32_column(df: &DataFrame, name: &str) -> ChurnResult<Int32Chunked> {
    df.column(name)
        .and_then(|c| c.i32().cloned())
        .map_err(convert_err)
}

fn bool_column(df: &DataFrame, name: &str) -> ChurnResult<BooleanChunked> {
    df.column(name)
        .and_then(|c| c.bool().cloned())
        .map_err(convert_err)
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("player features", e)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        data::records::{GameRecord, WalletRecord},
        report::io::ToJson,
    };

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .expect("Valid date")
    }

    fn play(player: &str, ts: NaiveDateTime, stake: f64, prize: f64) -> GameRecord {
        GameRecord {
            player_id: player.to_string(),
            timestamp: ts,
            stake,
            prize,
            ticket_status: if prize > 0.0 { "WON" } else { "LOST" }.to_string(),
            access_channel: "Web".to_string(),
            game: "LOTTO".to_string(),
        }
    }

    fn two_player_batch() -> GameRecords {
        GameRecords::from_records(&[
            play("P1", at(1, 10), 100.0, 0.0),
            play("P1", at(3, 10), 200.0, 50.0),
            play("P2", at(1, 10), 50.0, 0.0),
        ])
        .expect("Failed to build games")
    }

    #[test]
    fn test_two_player_scenario() {
        let features = build_features(&two_player_batch(), None).expect("Pipeline failed");
        let rows = features.rows().expect("Failed to read rows");

        assert_eq!(rows.len(), 2);
        let (p1, p2) = (&rows[0], &rows[1]);

        assert_eq!(p1.player_id, "P1");
        assert_eq!(p1.num_plays, 2);
        assert_eq!(p1.total_stake, 300.0);
        assert_eq!(p1.total_prize, 50.0);
        assert_eq!(p1.net_revenue, 250.0);
        assert_eq!(p1.days_since_last_play, 0);
        assert_eq!(p1.churned, 0);
        assert_eq!(p1.churn_likelihood_score, 0.0);
        assert_eq!(p1.total_amount_deposit, 0.0);

        assert_eq!(p2.days_since_last_play, 2);
        assert_eq!(p2.churned, 0);
        assert_eq!(p2.churn_likelihood_score, 1.0);
        assert_eq!(p2.likely_to_churn, 1);
        assert!(!p2.reactivated);
    }

    #[test]
    fn test_wallet_only_players_are_excluded() {
        let wallet = WalletRecords::from_records(&[
            WalletRecord {
                player_id: "P1".to_string(),
                timestamp: at(1, 8),
                channel: "bank".to_string(),
                amount: 500.0,
                action: "deposit".to_string(),
            },
            WalletRecord {
                player_id: "W9".to_string(),
                timestamp: at(1, 8),
                channel: "bank".to_string(),
                amount: 10.0,
                action: "cashback".to_string(),
            },
        ])
        .expect("Failed to build wallet");

        let features =
            build_features(&two_player_batch(), Some(&wallet)).expect("Pipeline failed");

        assert_eq!(
            features.player_ids().expect("Missing ids"),
            vec!["P1", "P2"]
        );
        assert!(
            features
                .wallet_columns()
                .contains(&"total_amount_cashback".to_string())
        );

        let rows = features.rows().expect("Failed to read rows");
        assert_eq!(rows[0].total_amount_deposit, 500.0);
        assert_eq!(rows[0].txn_count_deposit, 1);
        assert_eq!(rows[1].other_wallet.get("txn_count_cashback"), Some(&0.0));
    }

    #[test]
    fn test_empty_games_yield_empty_shaped_table() {
        let features =
            build_features(&GameRecords::default(), None).expect("Empty input must not fail");

        assert!(features.is_empty());
        let names = features
            .as_df()
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        let expected = FeatureCol::iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_features_have_no_nulls_and_valid_rfm() {
        let features = build_features(&two_player_batch(), None).expect("Pipeline failed");

        for column in features.as_df().get_columns() {
            assert_eq!(column.null_count(), 0, "Column {} has nulls", column.name());
        }
        for row in features.rows().expect("Failed to read rows") {
            for score in [row.r_score, row.f_score, row.m_score] {
                assert!((1..=5).contains(&score));
            }
        }
    }

    #[test]
    fn test_to_json_emits_one_object_per_player() {
        let features = build_features(&two_player_batch(), None).expect("Pipeline failed");
        let json = features.to_json().expect("Failed to serialize");

        let rows = json.as_array().expect("Records array");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["player_id"], "P1");
        assert!(rows[1]["rfm_segment"].is_string());
    }

    #[test]
    fn test_from_df_rejects_foreign_frame() {
        let df = polars::df!["player_id" => ["P1"]].expect("Failed to create DF");
        assert!(PlayerFeatures::from_df(df).is_err());
    }
}
