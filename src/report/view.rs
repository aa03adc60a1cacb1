use polars::{frame::DataFrame, prelude::PlSmallStr};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::warn;

use crate::{
    error::ChurnResult,
    report::{io::Report, polars_ext::DataFrameExt},
};

/// Outcome of one independently computed derived view.
///
/// A view either holds its data or says why it has none. Building one view
/// never aborts a sibling view.
#[derive(Debug, Clone, PartialEq)]
pub enum View<T> {
    Ready(T),
    Empty(String),
}

impl<T> View<T> {
    pub fn empty(reason: impl Into<String>) -> Self {
        Self::Empty(reason.into())
    }

    /// Folds a fallible computation into a view, logging the failure.
    pub fn from_result(title: &str, result: ChurnResult<T>) -> Self {
        match result {
            Ok(data) => Self::Ready(data),
            Err(e) => {
                warn!(view = title, error = %e, "View computation failed");
                Self::Empty(format!("{title} (Error: {e})"))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(data) => Some(data),
            Self::Empty(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Empty(reason) => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> View<U> {
        match self {
            Self::Ready(data) => View::Ready(f(data)),
            Self::Empty(reason) => View::Empty(reason),
        }
    }
}

impl View<DataFrame> {
    /// Runs `f` and treats a frame without rows like missing data.
    pub fn build(title: &str, f: impl FnOnce() -> ChurnResult<DataFrame>) -> Self {
        match Self::from_result(title, f()) {
            Self::Ready(df) if df.height() == 0 => Self::Empty(format!("{title} (No Data)")),
            view => view,
        }
    }

    /// `{"status": "ready", "rows": [...]}` or `{"status": "empty", "reason": "..."}`.
    pub fn to_json(&self) -> ChurnResult<Value> {
        Ok(match self {
            Self::Ready(df) => json!({
                "status": "ready",
                "rows": df.to_json_rows()?,
            }),
            Self::Empty(reason) => json!({
                "status": "empty",
                "reason": reason,
            }),
        })
    }
}

/// Builds a view over an optional table; a missing or empty table yields
/// [`View::Empty`] without running `f`.
pub(crate) fn view_of<R: Report>(
    title: &str,
    table: Option<&R>,
    f: impl FnOnce(&R) -> ChurnResult<DataFrame>,
) -> View<DataFrame> {
    match table.filter(|t| t.as_df().height() > 0) {
        Some(t) => View::build(title, || f(t)),
        None => View::empty(format!("{title} (No Data)")),
    }
}

/// Column names of the dashboard and churn insight frames that are not
/// already game, wallet or feature columns.
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
pub enum ViewCol {
    Count,
    Date,
    ActivePlayers,
    Hour,
    NumPlays,
    NetRevenue,
    TotalStake,
    TotalPrize,
    ValueSegment,
    Week,
    NotChurned,
    Churned,
    TotalPlayers,
    ChurnRatePct,
    Status,
}

impl From<ViewCol> for PlSmallStr {
    fn from(value: ViewCol) -> Self {
        value.as_str().into()
    }
}

impl ViewCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}
