//! Background worker entrypoint: connects every store, runs migrations, and
//! spawns the two ingestion consumer loops.
//!
//! Generalizes the teacher's `AdHoc::on_liftoff("Spawn Sync Dispatcher", ...)`
//! `tokio::spawn` pattern, minus the Rocket lifecycle it was attached to
//! (this crate has no HTTP surface).

use mailfind_core::config::{
    BlobStoreConfig, DatabaseConfig, EmbeddingConfig, KvStoreConfig, LlmConfig, MaterializerConfig,
    QueueConfig, SearchConfig, VectorStoreConfig, init_logging,
};
use mailfind_core::db;
use mailfind_core::ingest::Consumer;
use mailfind_core::ingest::queue::Queue;
use mailfind_core::search::{EmbeddingClient, LlmClient, SearchService};
use mailfind_core::stores::{BlobStore, KvStore, VectorStore};

#[tokio::main]
async fn main() {
    init_logging();
    log::info!("starting mailfind worker");

    let db_config = DatabaseConfig::from_env();
    let pool = db::connect(&db_config)
        .await
        .expect("failed to connect to database and run migrations");

    let blob_store = BlobStore::new(&BlobStoreConfig::from_env().url).expect("failed to initialize blob store");
    let kv_store = KvStore::new(&KvStoreConfig::from_env().url).expect("failed to initialize kv store");

    let vector_config = VectorStoreConfig::from_env();
    let vectors = VectorStore::new(&vector_config.url, &vector_config.collection)
        .expect("failed to initialize vector store");

    let embeddings = EmbeddingClient::new(EmbeddingConfig::from_env()).expect("failed to initialize embedding client");
    let llm = LlmClient::new(LlmConfig::from_env()).expect("failed to initialize llm client");

    if let Err(e) = embeddings.healthcheck().await {
        log::error!("embedding service healthcheck failed at startup: {}", e);
    }
    if let Err(e) = llm.healthcheck().await {
        log::error!("llm service healthcheck failed at startup: {}", e);
    }

    let queue = Queue::new(pool.clone(), blob_store.clone(), QueueConfig::from_env());

    let consumer = std::sync::Arc::new(Consumer::new(
        pool.clone(),
        queue,
        blob_store,
        kv_store,
        embeddings.clone(),
        vectors.clone(),
        MaterializerConfig::from_env(),
    ));

    let chunk_consumer = consumer.clone();
    tokio::spawn(async move {
        chunk_consumer.run_chunk_loop().await;
    });

    let email_consumer = consumer.clone();
    tokio::spawn(async move {
        email_consumer.run_email_loop().await;
    });

    // The retrieval pipeline is exercised in-process by callers embedding
    // this crate; constructing it here only validates that every store this
    // worker connects to is also sufficient to serve search.
    let _search_service = SearchService::new(pool, embeddings, llm, vectors, SearchConfig::from_env());

    log::info!("mailfind worker ready");
    std::future::pending::<()>().await;
}
