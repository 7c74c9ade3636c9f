pub mod ingestion;
pub mod queries;
