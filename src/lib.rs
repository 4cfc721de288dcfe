//! Per-tenant email search core: MBOX ingestion, durable queueing,
//! materialization, and hybrid retrieval.

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod search;
pub mod stores;

pub use error::CoreError;
pub use ingest::Consumer;
pub use search::SearchService;
