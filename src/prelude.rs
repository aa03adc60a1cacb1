// 1. Traits
pub use crate::classifier::ChurnClassifier;
pub use crate::report::io::{Report, ToJson, ToSchema};

// 2. Pipeline Entry Points
pub use crate::classifier::score;
pub use crate::data::clean::clean;
pub use crate::data::ingest::ingest;
pub use crate::data::loader::{read_csv, read_csv_bytes, read_excel, read_table};
pub use crate::data::schema::{classify, normalize_columns};
pub use crate::features::player_features::{build_features, build_features_with};

// 3. Tables & Records
pub use crate::classifier::{FeatureMatrix, LogisticModel, Prediction, ScoreCol, ScoredPlayers};
pub use crate::data::clean::CleanTable;
pub use crate::data::ingest::Ingested;
pub use crate::data::raw::RawTable;
pub use crate::data::records::{
    GameCol, GameRecord, GameRecords, WalletCol, WalletRecord, WalletRecords,
};
pub use crate::data::schema::TableKind;
pub use crate::features::player_features::{FeatureCol, PlayerFeatureRow, PlayerFeatures};
pub use crate::features::rfm::RfmSegment;

// 4. Configuration
pub use crate::features::config::FeatureConfig;

// 5. Views
pub use crate::report::churn_insights::{ChurnInsights, ValueSegment};
pub use crate::report::dashboard::{Dashboard, Kpis};
pub use crate::report::view::{View, ViewCol};

// 6. Errors
pub use crate::error::{
    ChurnError, ChurnResult, ConfigError, DataError, IoError, PipelineError, SchemaError,
};
