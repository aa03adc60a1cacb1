use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use polars::{
    df,
    frame::DataFrame,
    prelude::{DataType, Field, IntoLazy, PlSmallStr, Schema, SchemaRef, TimeUnit, col},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    error::{ChurnError, ChurnResult, DataError},
    report::{
        io::{Report, ToSchema, conforms_to},
        polars_ext::polars_to_churn_error,
    },
};

/// Timestamps are stored as naive UTC microseconds.
pub(crate) const TIMESTAMP_DTYPE: DataType = DataType::Datetime(TimeUnit::Microseconds, None);

// ================================================================================================
// Game records
// ================================================================================================

/// Canonical column names of a cleaned game table.
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
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum GameCol {
    /// Identifier of the player who bought the ticket.
    PlayerId,
    /// When the ticket was played.
    Timestamp,
    /// Ticket price paid by the player.
    Stake,
    /// Prize paid out for the ticket (0 for a losing ticket).
    Prize,
    /// Ticket lifecycle status as reported by the game server.
    TicketStatus,
    /// Channel the ticket was bought through (e.g. `Web`, `USSD`).
    AccessChannel,
    /// Game product, uppercased.
    Game,
}

impl From<GameCol> for PlSmallStr {
    fn from(value: GameCol) -> Self {
        value.as_str().into()
    }
}

impl GameCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A single cleaned gameplay event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub player_id: String,
    pub timestamp: NaiveDateTime,
    pub stake: f64,
    pub prize: f64,
    pub ticket_status: String,
    pub access_channel: String,
    pub game: String,
}

/// Cleaned game table. Every row satisfies [`GameRecord`]; no nulls survive.
#[derive(Debug, Clone)]
pub struct GameRecords {
    df: DataFrame,
}

impl Report for GameRecords {
    fn as_df(&self) -> &DataFrame {
        &self.df
    }

    fn as_df_mut(&mut self) -> &mut DataFrame {
        &mut self.df
    }
}

impl ToSchema for GameRecords {
    fn to_schema() -> SchemaRef {
        let fields: Vec<Field> = GameCol::iter()
            .map(|col| {
                let dtype = match col {
                    GameCol::PlayerId
                    | GameCol::TicketStatus
                    | GameCol::AccessChannel
                    | GameCol::Game => DataType::String,
                    GameCol::Timestamp => TIMESTAMP_DTYPE,
                    GameCol::Stake | GameCol::Prize => DataType::Float64,
                };
                Field::new(col.into(), dtype)
            })
            .collect();

        Arc::new(Schema::from_iter(fields))
    }
}

impl Default for GameRecords {
    fn default() -> Self {
        Self {
            df: DataFrame::empty_with_schema(&Self::to_schema()),
        }
    }
}

impl GameRecords {
    /// Wraps a frame that already conforms to the game schema.
    pub fn from_df(df: DataFrame) -> ChurnResult<Self> {
        let df = df
            .select(GameCol::iter().map(|c| c.name()))
            .map_err(|e| polars_to_churn_error("game records", e))?;
        if !conforms_to(&df, &Self::to_schema()) {
            return Err(DataError::DataFrame(format!(
                "Game records do not conform to the canonical schema: {:?}",
                df.schema()
            ))
            .into());
        }
        Ok(Self { df })
    }

    pub fn from_records(records: &[GameRecord]) -> ChurnResult<Self> {
        let df = df![
            GameCol::PlayerId.as_str()      => records.iter().map(|r| r.player_id.as_str()).collect::<Vec<_>>(),
            GameCol::Timestamp.as_str()     => records.iter().map(|r| r.timestamp.and_utc().timestamp_micros()).collect::<Vec<_>>(),
            GameCol::Stake.as_str()         => records.iter().map(|r| r.stake).collect::<Vec<_>>(),
            GameCol::Prize.as_str()         => records.iter().map(|r| r.prize).collect::<Vec<_>>(),
            GameCol::TicketStatus.as_str()  => records.iter().map(|r| r.ticket_status.as_str()).collect::<Vec<_>>(),
            GameCol::AccessChannel.as_str() => records.iter().map(|r| r.access_channel.as_str()).collect::<Vec<_>>(),
            GameCol::Game.as_str()          => records.iter().map(|r| r.game.as_str()).collect::<Vec<_>>(),
        ]
        .map_err(convert_game_err)?;

        let df = df
            .lazy()
            .with_column(col(GameCol::Timestamp).cast(TIMESTAMP_DTYPE))
            .collect()
            .map_err(convert_game_err)?;

        Ok(Self { df })
    }

    /// Materializes the typed rows.
    pub fn records(&self) -> ChurnResult<Vec<GameRecord>> {
        let player_ids = self
            .df
            .column(GameCol::PlayerId.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_game_err)?;
        let timestamps = self
            .df
            .column(GameCol::Timestamp.as_str())
            .and_then(|c| c.datetime().map(|ca| ca.physical().clone()))
            .map_err(convert_game_err)?;
        let stakes = self
            .df
            .column(GameCol::Stake.as_str())
            .and_then(|c| c.f64().cloned())
            .map_err(convert_game_err)?;
        let prizes = self
            .df
            .column(GameCol::Prize.as_str())
            .and_then(|c| c.f64().cloned())
            .map_err(convert_game_err)?;
        let statuses = self
            .df
            .column(GameCol::TicketStatus.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_game_err)?;
        let channels = self
            .df
            .column(GameCol::AccessChannel.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_game_err)?;
        let games = self
            .df
            .column(GameCol::Game.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_game_err)?;

        (0..self.df.height())
            .map(|i| {
                Ok(GameRecord {
                    player_id: required(player_ids.get(i), GameCol::PlayerId)?.to_string(),
                    timestamp: micros_to_datetime(required(
                        timestamps.get(i),
                        GameCol::Timestamp,
                    )?)?,
                    stake: required(stakes.get(i), GameCol::Stake)?,
                    prize: required(prizes.get(i), GameCol::Prize)?,
                    ticket_status: required(statuses.get(i), GameCol::TicketStatus)?
                        .to_string(),
                    access_channel: required(channels.get(i), GameCol::AccessChannel)?
                        .to_string(),
                    game: required(games.get(i), GameCol::Game)?.to_string(),
                })
            })
            .collect()
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Stacks several cleaned game tables into one.
    pub fn concat(tables: impl IntoIterator<Item = GameRecords>) -> ChurnResult<Self> {
        let mut out = Self::default();
        for t in tables {
            out.df.vstack_mut(&t.df).map_err(convert_game_err)?;
        }
        Ok(out)
    }
}

// ================================================================================================
// Wallet records
// ================================================================================================

/// Canonical column names of a cleaned wallet table.
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
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum WalletCol {
    PlayerId,
    Timestamp,
    /// Payment channel of the transaction.
    Channel,
    Amount,
    /// Transaction type, e.g. `deposit` or `withdrawal`.
    Action,
}

impl From<WalletCol> for PlSmallStr {
    fn from(value: WalletCol) -> Self {
        value.as_str().into()
    }
}

impl WalletCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A single cleaned wallet transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub player_id: String,
    pub timestamp: NaiveDateTime,
    pub channel: String,
    pub amount: f64,
    pub action: String,
}

/// Cleaned wallet table. Every row satisfies [`WalletRecord`]; no nulls survive.
#[derive(Debug, Clone)]
pub struct WalletRecords {
    df: DataFrame,
}

impl Report for WalletRecords {
    fn as_df(&self) -> &DataFrame {
        &self.df
    }

    fn as_df_mut(&mut self) -> &mut DataFrame {
        &mut self.df
    }
}

impl ToSchema for WalletRecords {
    fn to_schema() -> SchemaRef {
        let fields: Vec<Field> = WalletCol::iter()
            .map(|col| {
                let dtype = match col {
                    WalletCol::PlayerId | WalletCol::Channel | WalletCol::Action => {
                        DataType::String
                    }
                    WalletCol::Timestamp => TIMESTAMP_DTYPE,
                    WalletCol::Amount => DataType::Float64,
                };
                Field::new(col.into(), dtype)
            })
            .collect();

        Arc::new(Schema::from_iter(fields))
    }
}

impl Default for WalletRecords {
    fn default() -> Self {
        Self {
            df: DataFrame::empty_with_schema(&Self::to_schema()),
        }
    }
}

impl WalletRecords {
    /// Wraps a frame that already conforms to the wallet schema.
    pub fn from_df(df: DataFrame) -> ChurnResult<Self> {
        let df = df
            .select(WalletCol::iter().map(|c| c.name()))
            .map_err(|e| polars_to_churn_error("wallet records", e))?;
        if !conforms_to(&df, &Self::to_schema()) {
            return Err(DataError::DataFrame(format!(
                "Wallet records do not conform to the canonical schema: {:?}",
                df.schema()
            ))
            .into());
        }
        Ok(Self { df })
    }

    pub fn from_records(records: &[WalletRecord]) -> ChurnResult<Self> {
        let df = df![
            WalletCol::PlayerId.as_str()  => records.iter().map(|r| r.player_id.as_str()).collect::<Vec<_>>(),
            WalletCol::Timestamp.as_str() => records.iter().map(|r| r.timestamp.and_utc().timestamp_micros()).collect::<Vec<_>>(),
            WalletCol::Channel.as_str()   => records.iter().map(|r| r.channel.as_str()).collect::<Vec<_>>(),
            WalletCol::Amount.as_str()    => records.iter().map(|r| r.amount).collect::<Vec<_>>(),
            WalletCol::Action.as_str()    => records.iter().map(|r| r.action.as_str()).collect::<Vec<_>>(),
        ]
        .map_err(convert_wallet_err)?;

        let df = df
            .lazy()
            .with_column(col(WalletCol::Timestamp).cast(TIMESTAMP_DTYPE))
            .collect()
            .map_err(convert_wallet_err)?;

        Ok(Self { df })
    }

    /// Materializes the typed rows.
    pub fn records(&self) -> ChurnResult<Vec<WalletRecord>> {
        let player_ids = self
            .df
            .column(WalletCol::PlayerId.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_wallet_err)?;
        let timestamps = self
            .df
            .column(WalletCol::Timestamp.as_str())
            .and_then(|c| c.datetime().map(|ca| ca.physical().clone()))
            .map_err(convert_wallet_err)?;
        let channels = self
            .df
            .column(WalletCol::Channel.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_wallet_err)?;
        let amounts = self
            .df
            .column(WalletCol::Amount.as_str())
            .and_then(|c| c.f64().cloned())
            .map_err(convert_wallet_err)?;
        let actions = self
            .df
            .column(WalletCol::Action.as_str())
            .and_then(|c| c.str().cloned())
            .map_err(convert_wallet_err)?;

        (0..self.df.height())
            .map(|i| {
                Ok(WalletRecord {
                    player_id: required(player_ids.get(i), WalletCol::PlayerId)?.to_string(),
                    timestamp: micros_to_datetime(required(
                        timestamps.get(i),
                        WalletCol::Timestamp,
                    )?)?,
                    channel: required(channels.get(i), WalletCol::Channel)?.to_string(),
                    amount: required(amounts.get(i), WalletCol::Amount)?,
                    action: required(actions.get(i), WalletCol::Action)?.to_string(),
                })
            })
            .collect()
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Stacks several cleaned wallet tables into one.
    pub fn concat(tables: impl IntoIterator<Item = WalletRecords>) -> ChurnResult<Self> {
        let mut out = Self::default();
        for t in tables {
            out.df.vstack_mut(&t.df).map_err(convert_wallet_err)?;
        }
        Ok(out)
    }
}

// ================================================================================================
// Helper Functions
// ================================================================================================

pub(crate) fn micros_to_datetime(micros: i64) -> ChurnResult<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| {
            DataError::TimestampConversion(format!("{micros} is out of range for a timestamp"))
                .into()
        })
}

pub(crate) fn required<T>(value: Option<T>, column: impl std::fmt::Display) -> ChurnResult<T> {
    value.ok_or_else(|| {
        DataError::DataFrame(format!("Unexpected null in cleaned column '{column}'")).into()
    })
}

fn convert_game_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("game records", e)
}

fn convert_wallet_err(e: polars::error::PolarsError) -> ChurnError {
    polars_to_churn_error("wallet records", e)
}
