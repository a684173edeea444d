//! Job handler implementations.

pub mod ingest;

pub use ingest::IngestJobHandler;
