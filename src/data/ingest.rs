use tracing::{info, warn};

use crate::{
    data::{
        clean::{CleanTable, clean},
        raw::RawTable,
        records::{GameRecords, WalletRecords},
    },
    error::{ChurnError, ChurnResult},
};

/// Outcome of cleaning a batch of uploaded tables.
///
/// Tables that fail classification or cleaning are listed in `rejected` with
/// their name; they never abort the remaining tables.
#[derive(Debug, Default)]
pub struct Ingested {
    pub game: Option<GameRecords>,
    pub wallet: Option<WalletRecords>,
    pub rejected: Vec<(String, ChurnError)>,
}

impl Ingested {
    /// Features can be built once at least one game table was accepted.
    pub fn is_ready(&self) -> bool {
        self.game.is_some()
    }
}

#[tracing::instrument(skip_all)]
pub fn ingest(tables: impl IntoIterator<Item = RawTable>) -> ChurnResult<Ingested> {
    let mut games = Vec::new();
    let mut wallets = Vec::new();
    let mut rejected = Vec::new();

    for table in tables {
        let name = table.name().to_string();
        match clean(table) {
            Ok(CleanTable::Game(g)) => {
                info!(table = %name, rows = g.height(), "Accepted game table");
                games.push(g);
            }
            Ok(CleanTable::Wallet(w)) => {
                info!(table = %name, rows = w.height(), "Accepted wallet table");
                wallets.push(w);
            }
            Err(e) => {
                warn!(table = %name, error = %e, "Rejected table");
                rejected.push((name, e));
            }
        }
    }

    let game = if games.is_empty() {
        None
    } else {
        Some(GameRecords::concat(games)?)
    };
    let wallet = if wallets.is_empty() {
        None
    } else {
        Some(WalletRecords::concat(wallets)?)
    };

    Ok(Ingested {
        game,
        wallet,
        rejected,
    })
}
