use polars::prelude::{IntoLazy, JoinArgs, JoinType, LazyFrame, col, lit};

use crate::{
    data::records::{GameCol, GameRecords},
    features::player_features::FeatureCol,
    report::io::Report,
};

const FIRST_WIN_DATE: &str = "first_win_date";
const PLAYS_AFTER_WIN: &str = "plays_after_win";

/// Flags players who played again after their first winning ticket.
///
/// A win is a row with `prize > 0`. Only players with at least one win
/// appear in the output; everybody else is treated as not reactivated by the
/// caller. Output columns: `player_id`, `reactivated` (boolean).
pub fn reactivation_flags(games: &GameRecords) -> LazyFrame {
    let plays = games.as_df().clone().lazy();

    let first_win = plays
        .clone()
        .filter(col(GameCol::Prize).gt(lit(0.0)))
        .group_by([col(GameCol::PlayerId)])
        .agg([col(GameCol::Timestamp).min().alias(FIRST_WIN_DATE)]);

    plays
        .join(
            first_win,
            [col(GameCol::PlayerId)],
            [col(GameCol::PlayerId)],
            JoinArgs {
                how: JoinType::Inner,
                ..Default::default()
            },
        )
        .group_by([col(GameCol::PlayerId)])
        .agg([col(GameCol::Timestamp)
            .filter(col(GameCol::Timestamp).gt(col(FIRST_WIN_DATE)))
            .count()
            .alias(PLAYS_AFTER_WIN)])
        .select([
            col(GameCol::PlayerId).alias(FeatureCol::PlayerId),
            col(PLAYS_AFTER_WIN).gt(lit(0)).alias(FeatureCol::Reactivated),
        ])
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use polars::prelude::SortMultipleOptions;

    use super::*;
    use crate::data::records::GameRecord;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("Valid date")
    }

    fn play(player: &str, day: u32, prize: f64) -> GameRecord {
        GameRecord {
            player_id: player.to_string(),
            timestamp: at(day),
            stake: 10.0,
            prize,
            ticket_status: if prize > 0.0 { "WON" } else { "LOST" }.to_string(),
            access_channel: "Web".to_string(),
            game: "LOTTO".to_string(),
        }
    }

    #[test]
    fn test_play_after_first_win_reactivates() {
        let games = GameRecords::from_records(&[
            // Won at t=5, played again at t=7.
            play("back", 3, 0.0),
            play("back", 5, 20.0),
            play("back", 7, 0.0),
            // Won at t=5 and never played afterwards.
            play("gone", 2, 0.0),
            play("gone", 5, 20.0),
            // Never won.
            play("never", 1, 0.0),
            play("never", 9, 0.0),
        ])
        .expect("Failed to build games");

        let df = reactivation_flags(&games)
            .sort([FeatureCol::PlayerId.as_str()], SortMultipleOptions::default())
            .collect()
            .expect("Failed to detect reactivation");

        let ids = df
            .column(FeatureCol::PlayerId.as_str())
            .and_then(|c| c.str().cloned())
            .expect("Missing ids")
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let flags = df
            .column(FeatureCol::Reactivated.as_str())
            .and_then(|c| c.bool().cloned())
            .expect("Missing flags")
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        assert_eq!(ids, vec!["back", "gone"]);
        assert_eq!(flags, vec![true, false]);
    }
}
