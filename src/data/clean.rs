use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::izip;
use polars::{
    frame::DataFrame,
    prelude::{Column, DataType, IntoColumn, TimeUnit},
};
use tracing::{debug, warn};

use crate::{
    data::{
        raw::RawTable,
        records::{GameCol, GameRecord, GameRecords, WalletCol, WalletRecord, WalletRecords},
        schema::{TableKind, classify, normalize_columns},
    },
    error::{ChurnError, ChurnResult, SchemaError},
    report::polars_ext::polars_to_churn_error,
};

/// Columns that may arrive duplicated (e.g. `playerid`, `playerid_1`) and are
/// merged before cleaning.
const COALESCED_BASES: [&str; 2] = ["playerid", "timestamp"];

/// Timestamp layouts accepted besides RFC 3339, tried in order.
///
/// Ambiguous slash dates read month first; day-first layouts only match when
/// the leading field cannot be a month.
const DATETIME_FORMATS: [&str; 11] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// A cleaned table of either kind.
#[derive(Debug, Clone)]
pub enum CleanTable {
    Game(GameRecords),
    Wallet(WalletRecords),
}

impl CleanTable {
    pub fn kind(&self) -> TableKind {
        match self {
            CleanTable::Game(_) => TableKind::Game,
            CleanTable::Wallet(_) => TableKind::Wallet,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            CleanTable::Game(t) => t.height(),
            CleanTable::Wallet(t) => t.height(),
        }
    }
}

/// Classifies a raw table and cleans it into strongly typed records.
///
/// # Errors
/// - [`SchemaError::Mismatch`] if the table is neither a game nor a wallet table.
/// - [`SchemaError::MissingColumn`] if a required column is absent after coalescing.
#[tracing::instrument(skip(table), fields(table = %table.name(), rows = table.height()))]
pub fn clean(table: RawTable) -> ChurnResult<CleanTable> {
    match classify(&table)? {
        TableKind::Game => clean_game(table).map(CleanTable::Game),
        TableKind::Wallet => clean_wallet(table).map(CleanTable::Wallet),
    }
}

/// Cleans a table known to hold gameplay events.
pub fn clean_game(table: RawTable) -> ChurnResult<GameRecords> {
    let (name, df) = table.into_parts();
    let input_rows = df.height();
    let df = prepare(df)?;

    let column = |c: GameCol| source_column(&df, &name, game_source(c));
    let player_ids = text_values(column(GameCol::PlayerId)?)?;
    let timestamps = timestamp_values(column(GameCol::Timestamp)?)?;
    let stakes = numeric_values(column(GameCol::Stake)?)?;
    let prizes = numeric_values(column(GameCol::Prize)?)?;
    let statuses = text_values(column(GameCol::TicketStatus)?)?;
    let channels = text_values(column(GameCol::AccessChannel)?)?;
    let games = text_values(column(GameCol::Game)?)?;

    let records = izip!(
        player_ids, timestamps, stakes, prizes, statuses, channels, games
    )
    .filter_map(|(player_id, ts, stake, prize, status, channel, game)| {
        Some(GameRecord {
            player_id: player_id?,
            timestamp: ts?,
            stake: stake?,
            prize: prize?,
            ticket_status: status?,
            access_channel: channel?,
            game: game?.to_uppercase(),
        })
    })
    .collect::<Vec<_>>();

    report_dropped(&name, input_rows, records.len());
    GameRecords::from_records(&records)
}

/// Cleans a table known to hold wallet transactions.
pub fn clean_wallet(table: RawTable) -> ChurnResult<WalletRecords> {
    let (name, df) = table.into_parts();
    let input_rows = df.height();
    let df = prepare(df)?;

    let column = |c: WalletCol| source_column(&df, &name, wallet_source(c));
    let player_ids = text_values(column(WalletCol::PlayerId)?)?;
    let timestamps = timestamp_values(column(WalletCol::Timestamp)?)?;
    let channels = text_values(column(WalletCol::Channel)?)?;
    let amounts = numeric_values(column(WalletCol::Amount)?)?;
    let actions = text_values(column(WalletCol::Action)?)?;

    let records = izip!(player_ids, timestamps, channels, amounts, actions)
        .filter_map(|(player_id, ts, channel, amount, action)| {
            Some(WalletRecord {
                player_id: player_id?,
                timestamp: ts?,
                channel: channel?,
                amount: amount?,
                action: action?,
            })
        })
        .collect::<Vec<_>>();

    report_dropped(&name, input_rows, records.len());
    WalletRecords::from_records(&records)
}

/// Parses a timestamp cell; `None` if no accepted layout matches.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parses a numeric cell; non-finite values count as unparseable.
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// ================================================================================================
// Helper Functions
// ================================================================================================

/// Normalizes the header and merges duplicated identity/time columns.
fn prepare(mut df: DataFrame) -> ChurnResult<DataFrame> {
    let names = df
        .get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    df.set_column_names(normalize_columns(&names))
        .map_err(convert_err)?;

    COALESCED_BASES
        .iter()
        .try_fold(df, |df, base| coalesce_duplicate_columns(df, base))
}

/// Merges `base`, `base_1`, `base_2`, ... into `base` by taking, row by row,
/// the first non-null value from left to right. The variants are dropped.
fn coalesce_duplicate_columns(df: DataFrame, base: &str) -> ChurnResult<DataFrame> {
    let similar = df
        .get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .filter(|c| is_variant_of(c, base))
        .collect::<Vec<_>>();

    if similar.len() < 2 {
        return Ok(df);
    }

    let columns = similar
        .iter()
        .map(|c| df.column(c).cloned())
        .collect::<Result<Vec<_>, _>>()
        .map_err(convert_err)?;

    let same_dtype = columns.iter().all(|c| c.dtype() == columns[0].dtype());
    let columns = if same_dtype {
        columns
    } else {
        columns
            .iter()
            .map(|c| c.cast(&DataType::String))
            .collect::<Result<Vec<_>, _>>()
            .map_err(convert_err)?
    };

    let mut merged = columns[0].as_materialized_series().clone();
    for next in &columns[1..] {
        let mask = merged.is_not_null();
        merged = merged
            .zip_with(&mask, next.as_materialized_series())
            .map_err(convert_err)?;
    }
    merged.rename(base.into());

    let mut out = df.drop_many(similar.iter().map(String::as_str).filter(|c| *c != base));
    out.with_column(merged.into_column()).map_err(convert_err)?;
    Ok(out)
}

fn is_variant_of(name: &str, base: &str) -> bool {
    name == base
        || name
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn game_source(col: GameCol) -> &'static str {
    match col {
        GameCol::PlayerId => "playerid",
        GameCol::Timestamp => "timestamp",
        GameCol::Stake => "price",
        GameCol::Prize => "prize",
        GameCol::TicketStatus => "ticketstatus",
        GameCol::AccessChannel => "accesschannel",
        GameCol::Game => "game",
    }
}

fn wallet_source(col: WalletCol) -> &'static str {
    match col {
        WalletCol::PlayerId => "playerid",
        WalletCol::Timestamp => "timestamp",
        WalletCol::Channel => "channel",
        WalletCol::Amount => "amount",
        WalletCol::Action => "action",
    }
}

fn source_column<'a>(df: &'a DataFrame, table: &str, name: &str) -> ChurnResult<&'a Column> {
    df.column(name).map_err(|_| {
        SchemaError::MissingColumn {
            table: table.to_string(),
            column: name.to_string(),
        }
        .into()
    })
}

/// Trimmed text values. Blank cells count as null.
fn text_values(column: &Column) -> ChurnResult<Vec<Option<String>>> {
    let as_text = column.cast(&DataType::String).map_err(convert_err)?;
    let values = as_text
        .str()
        .map_err(convert_err)?
        .into_iter()
        .map(|v| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

fn timestamp_values(column: &Column) -> ChurnResult<Vec<Option<NaiveDateTime>>> {
    let micros: Vec<Option<i64>> = match column.dtype() {
        DataType::Datetime(_, tz) => column
            .cast(&DataType::Datetime(TimeUnit::Microseconds, tz.clone()))
            .and_then(|c| c.datetime().map(|ca| ca.physical().into_iter().collect()))
            .map_err(convert_err)?,
        DataType::Date => column
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .and_then(|c| c.datetime().map(|ca| ca.physical().into_iter().collect()))
            .map_err(convert_err)?,
        _ => {
            return Ok(text_values(column)?
                .into_iter()
                .map(|v| v.and_then(|s| parse_timestamp(&s)))
                .collect());
        }
    };

    Ok(micros
        .into_iter()
        .map(|v| v.and_then(DateTime::from_timestamp_micros).map(|dt| dt.naive_utc()))
        .collect())
}

fn numeric_values(column: &Column) -> ChurnResult<Vec<Option<f64>>> {
    if matches!(column.dtype(), DataType::String) {
        return Ok(text_values(column)?
            .into_iter()
            .map(|v| v.and_then(|s| parse_number(&s)))
            .collect());
    }

    let values = column
        .cast(&DataType::Float64)
        .and_then(|c| {
            c.f64()
                .map(|ca| ca.into_iter().map(|v| v.filter(|x| x.is_finite())).collect())
        })
        .map_err(convert_err)?;
    Ok(values)
}

fn report_dropped(table: &str, input_rows: usize, kept: usize) {
    let dropped = input_rows - kept;
    if dropped > 0 {
        warn!(table, dropped, kept, "Dropped rows with unparseable or missing fields");
    } else {
        debug!(table, kept, "All rows survived cleaning");
    }
}

fn convert_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("clean table", e)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};
    use polars::df;

    use super::*;
    use crate::report::io::Report;

    fn raw_game() -> RawTable {
        let df = df![
            "@timestamp" => [
                Some("2024-03-01 10:00:00"),
                Some("not a date"),
                Some("2024-03-02T12:30:00Z"),
                Some("2024-03-03 08:15:00"),
            ],
            "PLAYER ID" => [Some(" p1 "), Some("p2"), None, Some("p4")],
            "Player Id" => [None, None, Some("p3"), None],
            "Price" => [Some("100"), Some("50"), Some("20"), Some("abc")],
            "Prize" => [Some("0"), Some("0"), Some("40"), Some("0")],
            "ticketStatus" => ["LOST", "LOST", "WON", "LOST"],
            "Access Channel" => ["Web", "USSD", "Web", "Web"],
            "Game" => [" lotto ", "Scratch", "lotto", "lotto"],
        ]
        .expect("Failed to create raw game DF");
        RawTable::new("game.csv", df)
    }

    #[test]
    fn test_clean_game_drops_invalid_rows_and_coalesces() {
        let cleaned = match clean(raw_game()).expect("Cleaning failed") {
            CleanTable::Game(g) => g,
            other => panic!("Expected game table, got {:?}", other.kind()),
        };

        let records = cleaned.records().expect("Failed to read rows");
        let ids: Vec<&str> = records.iter().map(|r| r.player_id.as_str()).collect();

        // Row 2 has an unparseable timestamp, row 4 an unparseable price.
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(records[0].game, "LOTTO");
        assert_eq!(records[0].stake, 100.0);
        assert_eq!(records[1].prize, 40.0);
        assert_eq!(records[1].timestamp.hour(), 12);

        for column in cleaned.as_df().get_columns() {
            assert_eq!(column.null_count(), 0, "Column {} has nulls", column.name());
        }
    }

    #[test]
    fn test_clean_wallet_from_numeric_columns() {
        let df = df![
            "timestamp" => ["2024-03-01 10:00:00", "2024-03-01 11:00:00", ""],
            "channel" => ["bank", "card", "bank"],
            "player id" => ["p1", "p1", "p2"],
            "amount" => [Some(500.0), Some(f64::NAN), Some(20.0)],
            "action" => ["deposit", "withdrawal", "deposit"],
        ]
        .expect("Failed to create raw wallet DF");

        let cleaned = clean_wallet(RawTable::new("wallet.csv", df)).expect("Cleaning failed");
        let records = cleaned.records().expect("Failed to read rows");

        assert_eq!(records.len(), 1, "NaN amount and blank timestamp rows must be dropped");
        assert_eq!(records[0].amount, 500.0);
        assert_eq!(records[0].action, "deposit");
    }

    #[test]
    fn test_clean_unclassified_table_is_schema_mismatch() {
        let df = df!["foo" => ["bar"]].expect("Failed to create DF");
        let err = clean(RawTable::new("random.csv", df)).expect_err("Must be rejected");
        assert!(matches!(
            err,
            ChurnError::Schema(SchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_clean_game_missing_column_is_reported() {
        let df = df![
            "timestamp" => ["2024-03-01 10:00:00"],
            "channel" => ["web"],
            "player id" => ["p1"],
            "amount" => [10.0],
            "action" => ["deposit"],
        ]
        .expect("Failed to create DF");

        let err = clean_game(RawTable::new("wallet_as_game.csv", df)).expect_err("Must fail");
        match err {
            ChurnError::Schema(SchemaError::MissingColumn { table, column }) => {
                assert_eq!(table, "wallet_as_game.csv");
                assert_eq!(column, "price");
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_table_cleans_to_empty_records() {
        let df = df![
            "timestamp" => Vec::<&str>::new(),
            "channel" => Vec::<&str>::new(),
            "player id" => Vec::<&str>::new(),
            "amount" => Vec::<&str>::new(),
            "action" => Vec::<&str>::new(),
        ]
        .expect("Failed to create DF");

        let cleaned = clean_wallet(RawTable::new("empty.csv", df)).expect("Empty must clean");
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        assert!(parse_timestamp("2024-03-01T10:00:00.123Z").is_some());
        assert!(parse_timestamp("2024-03-01 10:00:00.250").is_some());
        assert!(parse_timestamp("25/03/2024 10:00").is_some());
        assert!(parse_timestamp("03/25/2024 10:00:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_ambiguous_slash_dates_read_month_first() {
        let ts = parse_timestamp("03/04/2024 10:00:00").expect("Valid timestamp");
        assert_eq!((ts.month(), ts.day()), (3, 4));

        let date = parse_timestamp("03/04/2024").expect("Valid date");
        assert_eq!((date.month(), date.day()), (3, 4));

        let day_first = parse_timestamp("25/03/2024 10:00").expect("Valid timestamp");
        assert_eq!((day_first.month(), day_first.day()), (3, 25));
    }

    #[test]
    fn test_parse_number_rejects_non_finite() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("1,000"), None);
    }
}
