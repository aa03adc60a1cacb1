pub mod churn_insights;
pub mod dashboard;
pub mod io;
pub mod polars_ext;
pub mod view;
