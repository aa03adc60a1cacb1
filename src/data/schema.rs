use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    data::raw::RawTable,
    error::{ChurnResult, SchemaError},
};

/// Header token emitted by log shippers for the event time.
const TIMESTAMP_ALIAS: &str = "@timestamp";
const TIMESTAMP: &str = "timestamp";

/// Source column names a game table must carry (before normalization).
pub const REQUIRED_GAME_COLUMNS: [&str; 7] = [
    "timestamp",
    "PLAYER ID",
    "price",
    "prize",
    "ticketStatus",
    "accessChannel",
    "Game",
];

/// Source column names a wallet table must carry (before normalization).
pub const REQUIRED_WALLET_COLUMNS: [&str; 5] =
    ["timestamp", "channel", "player id", "amount", "Action"];

/// The two table shapes the pipeline understands.
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
pub enum TableKind {
    Game,
    Wallet,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The required column set for this kind, already normalized.
    pub fn required_columns(&self) -> Vec<String> {
        match self {
            TableKind::Game => normalize_columns(&REQUIRED_GAME_COLUMNS),
            TableKind::Wallet => normalize_columns(&REQUIRED_WALLET_COLUMNS),
        }
    }
}

/// Canonicalizes a sequence of column names.
///
/// Each name is trimmed, lowercased, stripped of interior spaces and the
/// `@timestamp` alias is folded into `timestamp`. A name that was already
/// produced earlier in the sequence receives a `_1`, `_2`, ... suffix in
/// encounter order; the first occurrence keeps the bare name.
///
/// # Example
/// `["Player ID", "player id", "PlayerID "]` becomes
/// `["playerid", "playerid_1", "playerid_2"]`.
pub fn normalize_columns<S: AsRef<str>>(cols: &[S]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(cols.len());

    cols.iter()
        .map(|c| {
            let norm = normalize_name(c.as_ref());
            match seen.get_mut(&norm) {
                Some(count) => {
                    *count += 1;
                    format!("{norm}_{count}")
                }
                None => {
                    seen.insert(norm.clone(), 0);
                    norm
                }
            }
        })
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "")
        .replace(TIMESTAMP_ALIAS, TIMESTAMP)
}

/// Decides whether a raw table is a game table or a wallet table.
///
/// The game column set is checked first, so a table carrying both sets is
/// classified as [`TableKind::Game`].
///
/// # Errors
/// [`SchemaError::Mismatch`] if neither required column set is present.
#[tracing::instrument(skip(table), fields(table = %table.name()))]
pub fn classify(table: &RawTable) -> ChurnResult<TableKind> {
    let columns = normalize_columns(&table.column_names());
    classify_columns(&columns).ok_or_else(|| {
        SchemaError::Mismatch {
            table: table.name().to_string(),
            columns,
        }
        .into()
    })
}

/// Classification over an already-normalized column list.
pub fn classify_columns<S: AsRef<str>>(normalized: &[S]) -> Option<TableKind> {
    let contains_all = |kind: TableKind| {
        kind.required_columns()
            .iter()
            .all(|req| normalized.iter().any(|c| c.as_ref() == req))
    };

    if contains_all(TableKind::Game) {
        Some(TableKind::Game)
    } else if contains_all(TableKind::Wallet) {
        Some(TableKind::Wallet)
    } else {
        None
    }
}
