use std::collections::BTreeSet;

use polars::{
    frame::DataFrame,
    prelude::{
        Column, DataType, Expr, IntoLazy, JoinArgs, JoinType, LazyFrame, SortMultipleOptions, col,
        len, lit,
    },
};
use tracing::{debug, warn};

use crate::{
    data::records::{GameCol, GameRecords, WalletCol, WalletRecords},
    error::{ChurnError, ChurnResult},
    features::player_features::FeatureCol,
    report::{io::Report, polars_ext::polars_to_churn_error},
};

/// Wallet actions whose pivot columns are always emitted.
pub const STANDARD_ACTIONS: [&str; 2] = ["deposit", "withdrawal"];

const TOTAL_AMOUNT_PREFIX: &str = "total_amount_";
const TXN_COUNT_PREFIX: &str = "txn_count_";

/// Scratch column holding per-channel play counts.
const CHANNEL_USES: &str = "channel_uses";

pub fn total_amount_column(action: &str) -> String {
    format!("{TOTAL_AMOUNT_PREFIX}{action}")
}

pub fn txn_count_column(action: &str) -> String {
    format!("{TXN_COUNT_PREFIX}{action}")
}

/// Whether `name` is one of the pivoted wallet columns.
pub fn is_wallet_column(name: &str) -> bool {
    name.starts_with(TOTAL_AMOUNT_PREFIX) || name.starts_with(TXN_COUNT_PREFIX)
}

// ================================================================================================
// Game summary
// ================================================================================================

/// Per-player activity summary over the cleaned game table.
///
/// Produces `player_id`, first/last play timestamps, distinct active days,
/// play count, stake and prize sums and means, distinct games, the most played
/// game with its play count, the most used access channel and the distinct
/// channel count. Modes break ties by the lexicographically smallest value.
pub fn game_summary(games: &GameRecords) -> LazyFrame {
    let lf = games.as_df().clone().lazy();
    let ts = col(GameCol::Timestamp);

    let base = lf.clone().group_by([col(GameCol::PlayerId)]).agg([
        ts.clone().min().alias(FeatureCol::FirstPlayDate),
        ts.clone().max().alias(FeatureCol::LastPlayDate),
        ts.dt().date().n_unique().alias(FeatureCol::TotalDaysActive),
        col(GameCol::Stake).count().alias(FeatureCol::NumPlays),
        col(GameCol::Stake).sum().alias(FeatureCol::TotalStake),
        col(GameCol::Prize).sum().alias(FeatureCol::TotalPrize),
        col(GameCol::Stake).mean().alias(FeatureCol::AvgStake),
        col(GameCol::Prize).mean().alias(FeatureCol::AvgPrize),
        col(GameCol::Game)
            .n_unique()
            .alias(FeatureCol::DistinctGamesPlayed),
        col(GameCol::AccessChannel)
            .n_unique()
            .alias(FeatureCol::ChannelCount),
    ]);

    let top_game = mode_by_player(
        lf.clone(),
        GameCol::Game,
        FeatureCol::MostPlayedGame,
        FeatureCol::MostPlayedGameCount.as_str(),
    );
    let top_channel = mode_by_player(
        lf,
        GameCol::AccessChannel,
        FeatureCol::MostUsedChannel,
        CHANNEL_USES,
    )
    .select([
        col(GameCol::PlayerId),
        col(FeatureCol::MostUsedChannel),
    ]);

    base.join(
        top_game,
        [col(GameCol::PlayerId)],
        [col(GameCol::PlayerId)],
        left_join(),
    )
    .join(
        top_channel,
        [col(GameCol::PlayerId)],
        [col(GameCol::PlayerId)],
        left_join(),
    )
    .select(
        FeatureCol::game_summary_columns()
            .map(col)
            .collect::<Vec<_>>(),
    )
}

/// Most frequent `value` per player and how often it occurred.
fn mode_by_player(
    lf: LazyFrame,
    value: GameCol,
    value_alias: FeatureCol,
    count_alias: &str,
) -> LazyFrame {
    lf.group_by([col(GameCol::PlayerId), col(value)])
        .agg([len().alias(count_alias)])
        .sort_by_exprs(
            [col(GameCol::PlayerId), col(count_alias), col(value)],
            SortMultipleOptions::default().with_order_descending_multi([false, true, false]),
        )
        .group_by_stable([col(GameCol::PlayerId)])
        .agg([
            col(value).first().alias(value_alias),
            col(count_alias).first(),
        ])
}

// ================================================================================================
// Wallet summary
// ================================================================================================

/// Pivots wallet transactions into one row per player.
///
/// For every action (trimmed, lowercased) two columns are emitted:
/// `total_amount_<action>` (sum of amounts) and `txn_count_<action>`
/// (transaction count). `deposit` and `withdrawal` are always present.
/// An absent or empty wallet table yields the standard columns with no rows.
pub fn wallet_summary(wallet: Option<&WalletRecords>) -> ChurnResult<DataFrame> {
    let Some(wallet) = wallet.filter(|w| !w.is_empty()) else {
        warn!("Wallet table is absent or empty; wallet features default to 0");
        return empty_wallet_summary();
    };

    let mut df = wallet.as_df().clone();
    let actions = df
        .column(WalletCol::Action.as_str())
        .and_then(|c| c.str().cloned())
        .map_err(convert_err)?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_lowercase()))
        .collect::<Vec<_>>();

    let distinct = actions.iter().flatten().cloned().collect::<BTreeSet<_>>();
    let ordered = ordered_actions(distinct.iter().map(String::as_str));

    df.with_column(Column::new(WalletCol::Action.name(), actions))
        .map_err(convert_err)?;

    let aggs = ordered
        .iter()
        .flat_map(|action| {
            let is_action = col(WalletCol::Action).eq(lit(action.as_str()));
            [
                col(WalletCol::Amount)
                    .filter(is_action.clone())
                    .sum()
                    .alias(total_amount_column(action)),
                col(WalletCol::Amount)
                    .filter(is_action)
                    .count()
                    .alias(txn_count_column(action)),
            ]
        })
        .collect::<Vec<Expr>>();

    let out = df
        .lazy()
        .group_by([col(WalletCol::PlayerId)])
        .agg(aggs)
        .sort(
            [WalletCol::PlayerId.as_str()],
            SortMultipleOptions::default(),
        )
        .collect()
        .map_err(convert_err)?;

    debug!(rows = out.height(), cols = out.width(), "Built wallet summary");
    Ok(out)
}

/// Standard actions first, then any other action in lexical order.
fn ordered_actions<'a>(actions: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let extra = actions
        .into_iter()
        .filter(|a| !STANDARD_ACTIONS.contains(a))
        .map(str::to_string)
        .collect::<BTreeSet<_>>();

    STANDARD_ACTIONS
        .iter()
        .map(|a| a.to_string())
        .chain(extra)
        .collect()
}

fn empty_wallet_summary() -> ChurnResult<DataFrame> {
    let mut columns = vec![Column::new(
        WalletCol::PlayerId.name(),
        Vec::<String>::new(),
    )];
    for action in STANDARD_ACTIONS {
        columns.push(Column::new(
            total_amount_column(action).into(),
            Vec::<f64>::new(),
        ));
        columns.push(Column::new(
            txn_count_column(action).into(),
            Vec::<u32>::new(),
        ));
    }
    DataFrame::new(columns).map_err(convert_err)
}

// ================================================================================================
// Merge
// ================================================================================================

/// Left-joins the wallet pivot onto the game summary.
///
/// Game players are authoritative: wallet-only players are discarded and any
/// wallet column a game player lacks is filled with 0.
pub fn merge_summaries(game: LazyFrame, wallet: &DataFrame) -> LazyFrame {
    let fills = wallet
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != WalletCol::PlayerId.as_str())
        .map(|c| {
            let zero = match c.dtype() {
                DataType::Float64 => lit(0.0),
                _ => lit(0u32),
            };
            col(c.name().clone()).fill_null(zero)
        })
        .collect::<Vec<_>>();

    game.join(
        wallet.clone().lazy(),
        [col(FeatureCol::PlayerId)],
        [col(WalletCol::PlayerId)],
        left_join(),
    )
    .with_columns(fills)
}

fn left_join() -> JoinArgs {
    JoinArgs {
        how: JoinType::Left,
        ..Default::default()
    }
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("player aggregates", e)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use polars::prelude::AnyValue;

    use super::*;
    use crate::data::records::{GameRecord, WalletRecord};

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .expect("Valid date")
    }

    fn play(
        player: &str,
        at: NaiveDateTime,
        stake: f64,
        prize: f64,
        game: &str,
        channel: &str,
    ) -> GameRecord {
        GameRecord {
            player_id: player.to_string(),
            timestamp: at,
            stake,
            prize,
            ticket_status: "LOST".to_string(),
            access_channel: channel.to_string(),
            game: game.to_string(),
        }
    }

    fn txn(player: &str, amount: f64, action: &str) -> WalletRecord {
        WalletRecord {
            player_id: player.to_string(),
            timestamp: ts(1, 9),
            channel: "bank".to_string(),
            amount,
            action: action.to_string(),
        }
    }

    fn cell<'a>(df: &'a DataFrame, column: &str, row: usize) -> AnyValue<'a> {
        df.column(column)
            .and_then(|c| c.get(row))
            .expect("Missing cell")
    }

    #[test]
    fn test_game_summary_counts_and_modes() {
        let games = GameRecords::from_records(&[
            play("p1", ts(1, 10), 100.0, 0.0, "LOTTO", "Web"),
            play("p1", ts(1, 12), 50.0, 0.0, "SCRATCH", "USSD"),
            play("p1", ts(3, 8), 200.0, 50.0, "SCRATCH", "Web"),
            play("p1", ts(3, 9), 10.0, 0.0, "LOTTO", "USSD"),
            play("p2", ts(2, 8), 20.0, 0.0, "KENO", "Web"),
        ])
        .expect("Failed to build games");

        let df = game_summary(&games)
            .sort([FeatureCol::PlayerId.as_str()], SortMultipleOptions::default())
            .collect()
            .expect("Failed to collect summary");

        assert_eq!(df.height(), 2);
        assert_eq!(
            df.get_column_names()
                .into_iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>(),
            FeatureCol::game_summary_columns()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
        );
        assert_eq!(cell(&df, FeatureCol::NumPlays.as_str(), 0), AnyValue::UInt32(4));
        assert_eq!(cell(&df, FeatureCol::TotalDaysActive.as_str(), 0), AnyValue::UInt32(2));
        assert_eq!(cell(&df, FeatureCol::TotalStake.as_str(), 0), AnyValue::Float64(360.0));
        assert_eq!(cell(&df, FeatureCol::AvgPrize.as_str(), 0), AnyValue::Float64(12.5));
        assert_eq!(cell(&df, FeatureCol::DistinctGamesPlayed.as_str(), 0), AnyValue::UInt32(2));
        // LOTTO and SCRATCH both occur twice; the smaller name wins.
        assert_eq!(
            cell(&df, FeatureCol::MostPlayedGame.as_str(), 0),
            AnyValue::String("LOTTO")
        );
        assert_eq!(cell(&df, FeatureCol::MostPlayedGameCount.as_str(), 0), AnyValue::UInt32(2));
        assert_eq!(
            cell(&df, FeatureCol::MostUsedChannel.as_str(), 0),
            AnyValue::String("USSD")
        );
        assert_eq!(cell(&df, FeatureCol::ChannelCount.as_str(), 1), AnyValue::UInt32(1));
    }

    #[test]
    fn test_wallet_summary_pivots_actions() {
        let wallet = WalletRecords::from_records(&[
            txn("p1", 100.0, "Deposit"),
            txn("p1", 50.0, "deposit"),
            txn("p1", 30.0, "withdrawal"),
            txn("p2", 5.0, "bonus"),
        ])
        .expect("Failed to build wallet");

        let df = wallet_summary(Some(&wallet)).expect("Failed to pivot");
        let names = df
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![
                "player_id",
                "total_amount_deposit",
                "txn_count_deposit",
                "total_amount_withdrawal",
                "txn_count_withdrawal",
                "total_amount_bonus",
                "txn_count_bonus",
            ]
        );
        assert_eq!(cell(&df, "total_amount_deposit", 0), AnyValue::Float64(150.0));
        assert_eq!(cell(&df, "txn_count_deposit", 0), AnyValue::UInt32(2));
        assert_eq!(cell(&df, "txn_count_deposit", 1), AnyValue::UInt32(0));
        assert_eq!(cell(&df, "total_amount_bonus", 1), AnyValue::Float64(5.0));
    }

    #[test]
    fn test_merge_fills_missing_wallet_values_and_drops_wallet_only_players() {
        let games = GameRecords::from_records(&[
            play("p1", ts(1, 10), 10.0, 0.0, "LOTTO", "Web"),
            play("p3", ts(1, 11), 10.0, 0.0, "LOTTO", "Web"),
        ])
        .expect("Failed to build games");
        let wallet = WalletRecords::from_records(&[
            txn("p1", 100.0, "deposit"),
            txn("ghost", 999.0, "deposit"),
        ])
        .expect("Failed to build wallet");

        let wallet_df = wallet_summary(Some(&wallet)).expect("Failed to pivot");
        let df = merge_summaries(game_summary(&games), &wallet_df)
            .sort([FeatureCol::PlayerId.as_str()], SortMultipleOptions::default())
            .collect()
            .expect("Failed to merge");

        let ids = df
            .column(FeatureCol::PlayerId.as_str())
            .and_then(|c| c.str().cloned())
            .expect("Missing ids")
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(cell(&df, "total_amount_deposit", 1), AnyValue::Float64(0.0));
        assert_eq!(cell(&df, "txn_count_withdrawal", 0), AnyValue::UInt32(0));
    }

    #[test]
    fn test_absent_wallet_yields_standard_columns() {
        let df = wallet_summary(None).expect("Empty summary must build");
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 1 + 2 * STANDARD_ACTIONS.len());
    }
}
