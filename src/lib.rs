//! Player churn feature pipeline.
//!
//! Raw gameplay and wallet tables are classified, cleaned and reduced to one
//! feature row per player, scored with RFM segments, and handed to an external
//! classifier. The [`report`] module derives dashboard views from the same
//! data.
//!
//! ```no_run
//! use churnscope::prelude::*;
//!
//! # fn main() -> ChurnResult<()> {
//! let ingested = ingest([read_csv("games.csv")?, read_csv("wallet.csv")?])?;
//! let games = ingested.game.unwrap_or_default();
//! let features = build_features(&games, ingested.wallet.as_ref())?;
//! let rows = features.to_json()?;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod data;
pub mod error;
pub mod features;
pub mod prelude;
pub mod report;
