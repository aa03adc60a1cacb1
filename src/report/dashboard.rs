//! Headline KPIs and activity views over the cleaned input tables.
//!
//! Every view is computed on its own: a missing table or a failure in one
//! view leaves that view [`View::Empty`] and the rest untouched.

use std::collections::BTreeSet;

use polars::{
    frame::DataFrame,
    prelude::{ChunkAgg, DataType, IntoLazy, SortMultipleOptions, col, len, lit},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    data::records::{GameCol, GameRecords, WalletCol, WalletRecords},
    error::{ChurnError, ChurnResult},
    report::{
        io::Report,
        polars_ext::polars_to_churn_error,
        view::{View, ViewCol, view_of},
    },
};

/// Channels listed first in the engagement view, in this order.
pub const PRIMARY_CHANNELS: [&str; 2] = ["Web", "USSD"];

const TOP_GAMES: u32 = 10;

// ================================================================================================
// KPIs
// ================================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    /// Distinct players in the game table.
    pub total_players: usize,
    /// Rows in the game table.
    pub total_plays: usize,
    /// Sum of all wallet amounts regardless of action.
    pub total_wallet_amount: f64,
}

impl Kpis {
    pub fn compute(games: Option<&GameRecords>, wallet: Option<&WalletRecords>) -> Self {
        let total_players = games
            .map(|g| {
                g.as_df()
                    .column(GameCol::PlayerId.as_str())
                    .and_then(|c| c.as_materialized_series().n_unique())
                    .map_err(convert_err)
            })
            .transpose()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count players");
                None
            })
            .unwrap_or(0);

        let total_wallet_amount = wallet
            .map(|w| {
                w.as_df()
                    .column(WalletCol::Amount.as_str())
                    .and_then(|c| c.f64().map(|ca| ca.sum()))
                    .map_err(convert_err)
            })
            .transpose()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to sum wallet amounts");
                None
            })
            .flatten()
            .unwrap_or(0.0);

        Self {
            total_players,
            total_plays: games.map_or(0, GameRecords::height),
            total_wallet_amount,
        }
    }
}

// ================================================================================================
// Dashboard
// ================================================================================================

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub kpis: Kpis,
    /// `game`, `count`: plays per game product, most played first.
    pub game_distribution: View<DataFrame>,
    /// `action`, `channel`, `amount`: summed wallet amounts.
    pub wallet_by_action_channel: View<DataFrame>,
    /// `date`, `active_players`: distinct players per calendar day.
    pub daily_active_users: View<DataFrame>,
    pub top_games_by_net_revenue: View<DataFrame>,
    pub top_games_by_plays: View<DataFrame>,
    /// `date`, `total_stake`, `total_prize` per calendar day.
    pub daily_stake_vs_prize: View<DataFrame>,
    /// `hour` plus one play-count column per access channel.
    pub engagement_by_hour_channel: View<DataFrame>,
    /// `access_channel`, `count`.
    pub access_channel_distribution: View<DataFrame>,
}

impl Dashboard {
    #[tracing::instrument(skip_all)]
    pub fn from_records(games: Option<&GameRecords>, wallet: Option<&WalletRecords>) -> Self {
        Self {
            kpis: Kpis::compute(games, wallet),
            game_distribution: view_of("Game Product Distribution", games, game_distribution),
            wallet_by_action_channel: view_of(
                "Wallet Transactions by Action & Channel",
                wallet,
                wallet_by_action_channel,
            ),
            daily_active_users: view_of("Daily Active Users Over Time", games, daily_active_users),
            top_games_by_net_revenue: view_of("Top 10 Games by Net Revenue", games, |g| {
                top_games(g, ViewCol::NetRevenue)
            }),
            top_games_by_plays: view_of("Top 10 Games by Total Plays", games, |g| {
                top_games(g, ViewCol::NumPlays)
            }),
            daily_stake_vs_prize: view_of(
                "Daily Total Stake vs. Prize Over Time",
                games,
                daily_stake_vs_prize,
            ),
            engagement_by_hour_channel: view_of(
                "Player Engagement by Hour of Day and Access Channel",
                games,
                engagement_by_hour_channel,
            ),
            access_channel_distribution: view_of(
                "Access Channel Distribution",
                games,
                access_channel_distribution,
            ),
        }
    }

    /// Views keyed by a stable identifier, in display order.
    pub fn views(&self) -> [(&'static str, &View<DataFrame>); 8] {
        [
            ("game_distribution", &self.game_distribution),
            ("wallet_by_action_channel", &self.wallet_by_action_channel),
            ("daily_active_users", &self.daily_active_users),
            ("top_games_by_net_revenue", &self.top_games_by_net_revenue),
            ("top_games_by_plays", &self.top_games_by_plays),
            ("daily_stake_vs_prize", &self.daily_stake_vs_prize),
            ("engagement_by_hour_channel", &self.engagement_by_hour_channel),
            ("access_channel_distribution", &self.access_channel_distribution),
        ]
    }
}

// ================================================================================================
// Views
// ================================================================================================

pub fn game_distribution(games: &GameRecords) -> ChurnResult<DataFrame> {
    value_counts(games.as_df(), GameCol::Game.as_str())
}

pub fn access_channel_distribution(games: &GameRecords) -> ChurnResult<DataFrame> {
    value_counts(games.as_df(), GameCol::AccessChannel.as_str())
}

pub fn wallet_by_action_channel(wallet: &WalletRecords) -> ChurnResult<DataFrame> {
    wallet
        .as_df()
        .clone()
        .lazy()
        .group_by([col(WalletCol::Action), col(WalletCol::Channel)])
        .agg([col(WalletCol::Amount).sum()])
        .sort(
            [WalletCol::Action.as_str(), WalletCol::Channel.as_str()],
            SortMultipleOptions::default(),
        )
        .collect()
        .map_err(convert_err)
}

pub fn daily_active_users(games: &GameRecords) -> ChurnResult<DataFrame> {
    games
        .as_df()
        .clone()
        .lazy()
        .group_by([col(GameCol::Timestamp).dt().date().alias(ViewCol::Date)])
        .agg([col(GameCol::PlayerId)
            .n_unique()
            .alias(ViewCol::ActivePlayers)])
        .sort([ViewCol::Date.as_str()], SortMultipleOptions::default())
        .collect()
        .map_err(convert_err)
}

/// Per-game totals: `game`, `total_stake`, `total_prize`, `num_plays`,
/// `net_revenue`.
pub fn game_totals(games: &GameRecords) -> ChurnResult<DataFrame> {
    games
        .as_df()
        .clone()
        .lazy()
        .group_by([col(GameCol::Game)])
        .agg([
            col(GameCol::Stake).sum().alias(ViewCol::TotalStake),
            col(GameCol::Prize).sum().alias(ViewCol::TotalPrize),
            len().alias(ViewCol::NumPlays),
        ])
        .with_column(
            (col(ViewCol::TotalStake) - col(ViewCol::TotalPrize)).alias(ViewCol::NetRevenue),
        )
        .collect()
        .map_err(convert_err)
}

/// The ten games with the largest `by`, ties broken by game name.
pub fn top_games(games: &GameRecords, by: ViewCol) -> ChurnResult<DataFrame> {
    game_totals(games)?
        .lazy()
        .sort_by_exprs(
            [col(by), col(GameCol::Game)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .limit(TOP_GAMES)
        .select([col(GameCol::Game), col(by)])
        .collect()
        .map_err(convert_err)
}

pub fn daily_stake_vs_prize(games: &GameRecords) -> ChurnResult<DataFrame> {
    games
        .as_df()
        .clone()
        .lazy()
        .group_by([col(GameCol::Timestamp).dt().date().alias(ViewCol::Date)])
        .agg([
            col(GameCol::Stake).sum().alias(ViewCol::TotalStake),
            col(GameCol::Prize).sum().alias(ViewCol::TotalPrize),
        ])
        .sort([ViewCol::Date.as_str()], SortMultipleOptions::default())
        .collect()
        .map_err(convert_err)
}

/// Play counts per hour of day (rows) and access channel (columns).
///
/// Channel columns follow [`PRIMARY_CHANNELS`] then the remaining channels in
/// lexical order. Hours without plays are absent.
pub fn engagement_by_hour_channel(games: &GameRecords) -> ChurnResult<DataFrame> {
    let df = games.as_df();
    let channels = df
        .column(GameCol::AccessChannel.as_str())
        .and_then(|c| c.str().cloned())
        .map_err(convert_err)?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect::<BTreeSet<_>>();

    let counts = ordered_channels(channels)
        .into_iter()
        .map(|channel| {
            col(GameCol::AccessChannel)
                .eq(lit(channel.clone()))
                .sum()
                .cast(DataType::UInt32)
                .alias(channel)
        })
        .collect::<Vec<_>>();

    df.clone()
        .lazy()
        .group_by([col(GameCol::Timestamp)
            .dt()
            .hour()
            .cast(DataType::Int32)
            .alias(ViewCol::Hour)])
        .agg(counts)
        .sort([ViewCol::Hour.as_str()], SortMultipleOptions::default())
        .collect()
        .map_err(convert_err)
}

fn ordered_channels(channels: BTreeSet<String>) -> Vec<String> {
    let primary = PRIMARY_CHANNELS
        .iter()
        .filter(|c| channels.contains(**c))
        .map(|c| c.to_string());
    let rest = channels
        .iter()
        .filter(|c| !PRIMARY_CHANNELS.contains(&c.as_str()))
        .cloned();

    primary.chain(rest).collect()
}

/// Occurrences per distinct value, most frequent first, ties in lexical order.
fn value_counts(df: &DataFrame, column: &str) -> ChurnResult<DataFrame> {
    df.clone()
        .lazy()
        .group_by([col(column)])
        .agg([len().alias(ViewCol::Count)])
        .sort_by_exprs(
            [col(ViewCol::Count), col(column)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()
        .map_err(convert_err)
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("dashboard view", e)
}
