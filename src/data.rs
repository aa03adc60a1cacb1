pub mod clean;
pub mod ingest;
pub mod loader;
pub mod raw;
pub mod records;
pub mod schema;
