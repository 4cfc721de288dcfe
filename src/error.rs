//! Error taxonomy for the ingestion and retrieval core.
//!
//! One enum per subsystem, each converting from the underlying store errors
//! it touches via `#[from]`. `CoreError` aggregates them for callers (the
//! queue consumer loop, a one-shot CLI-less search invocation) that need a
//! single propagation type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("blob store error: {0}")]
    Blob(#[from] object_store::Error),
    #[error("blob store configuration error: {0}")]
    BlobConfig(String),
    #[error("vector store error: {0}")]
    Vector(String),
    #[error("kv store error: {0}")]
    Kv(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chunk {index} missing for source {source_id}")]
    ChunkMissing { source_id: i64, index: i32 },
    #[error("no messages found in source {source_id}")]
    NoMessagesFound { source_id: i64 },
    #[error("queue payload too large: {size} bytes exceeds cap of {cap} bytes")]
    PayloadTooLarge { size: usize, cap: usize },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("tenant mismatch for entity {entity}")]
    TenantMismatch { entity: String },
    #[error("embedding call failed: {0}")]
    Embedding(#[from] crate::search::model_client::EmbeddingError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("embedding call failed: {0}")]
    Embedding(#[from] crate::search::model_client::EmbeddingError),
    #[error("llm call failed: {0}")]
    Llm(#[from] crate::search::model_client::LlmError),
    #[error("empty or whitespace-only query")]
    EmptyQuery,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Top-level error type for callers that cut across subsystems.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Ingest(IngestError::Store(StoreError::Database(err)))
    }
}
