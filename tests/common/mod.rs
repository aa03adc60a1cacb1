use std::path::PathBuf;

use churnscope::prelude::*;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn input(name: &str) -> RawTable {
    read_table(fixture("input").join(name)).expect("Failed to read fixture")
}

/// Game and wallet fixtures cleaned and merged.
pub fn setup_ingested() -> Ingested {
    ingest([input("game.csv"), input("wallet.csv"), input("unknown.csv")])
        .expect("Failed to ingest fixtures")
}

pub fn setup_features() -> PlayerFeatures {
    let ingested = setup_ingested();
    let games = ingested.game.expect("Game fixture accepted");
    build_features(&games, ingested.wallet.as_ref()).expect("Failed to build features")
}

pub fn setup_model() -> LogisticModel {
    LogisticModel::from_path(fixture("model.json")).expect("Failed to load model")
}
