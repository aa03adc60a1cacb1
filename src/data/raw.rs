use polars::frame::DataFrame;

/// An uploaded table of unknown kind, as handed over by the ingestion layer.
///
/// Column names are taken verbatim from the source. The `name` identifies the
/// table (usually the file name) in error reports.
#[derive(Debug, Clone)]
pub struct RawTable {
    name: String,
    df: DataFrame,
}

impl RawTable {
    pub fn new(name: impl Into<String>, df: DataFrame) -> Self {
        Self {
            name: name.into(),
            df,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_df(&self) -> &DataFrame {
        &self.df
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub(crate) fn into_parts(self) -> (String, DataFrame) {
        (self.name, self.df)
    }
}
