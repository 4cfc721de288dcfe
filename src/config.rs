//! Environment-driven configuration for every subsystem.
//!
//! Each `*Config::from_env()` reads a handful of `MAILFIND_*` variables with
//! sensible defaults, following the same `env_string`/`env_usize`/`env_bool`
//! helpers across every config struct so new knobs stay consistent.

use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Connection settings for the relational store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_string("DATABASE_URL", "postgres://localhost/mailfind"),
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 10),
        }
    }
}

/// Configuration for the blob store (upload chunks, attachment bytes, spills).
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub url: String,
}

impl BlobStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_string("BLOB_STORE_URL", "file:///var/lib/mailfind/blobs"),
        }
    }
}

/// Configuration for the vector store.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
    pub dimension: usize,
}

impl VectorStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_string("VECTOR_STORE_URL", "http://localhost:6334"),
            collection: env_string("VECTOR_STORE_COLLECTION", "messages"),
            dimension: env_usize("VECTOR_STORE_DIM", 768),
        }
    }
}

/// Configuration for the ephemeral key-value store (chunk carryover).
#[derive(Debug, Clone)]
pub struct KvStoreConfig {
    pub url: String,
    pub carryover_ttl: Duration,
}

impl KvStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_string("KV_STORE_URL", "redis://localhost:6379"),
            carryover_ttl: env_duration_secs("KV_CARRYOVER_TTL_SECS", 3600),
        }
    }
}

/// Configuration governing queue batching and retry behavior.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub email_batch_size: usize,
    pub batch_timeout: Duration,
    pub max_attempts: i32,
    pub payload_cap_bytes: usize,
    pub spill_threshold_bytes: usize,
    pub poll_idle_sleep: Duration,
    pub poll_error_sleep: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            email_batch_size: 50,
            batch_timeout: Duration::from_secs(30),
            max_attempts: 3,
            payload_cap_bytes: 256 * 1024,
            spill_threshold_bytes: 200 * 1024,
            poll_idle_sleep: Duration::from_secs(5),
            poll_error_sleep: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            email_batch_size: env_usize("QUEUE_EMAIL_BATCH_SIZE", default.email_batch_size),
            batch_timeout: env_duration_secs(
                "QUEUE_BATCH_TIMEOUT_SECS",
                default.batch_timeout.as_secs(),
            ),
            max_attempts: env_u32("QUEUE_MAX_ATTEMPTS", default.max_attempts as u32) as i32,
            payload_cap_bytes: env_usize("QUEUE_PAYLOAD_CAP_BYTES", default.payload_cap_bytes),
            spill_threshold_bytes: env_usize(
                "QUEUE_SPILL_THRESHOLD_BYTES",
                default.spill_threshold_bytes,
            ),
            poll_idle_sleep: env_duration_secs(
                "QUEUE_POLL_IDLE_SLEEP_SECS",
                default.poll_idle_sleep.as_secs(),
            ),
            poll_error_sleep: env_duration_secs(
                "QUEUE_POLL_ERROR_SLEEP_SECS",
                default.poll_error_sleep.as_secs(),
            ),
        }
    }
}

/// Configuration for the materializer's bounded concurrency.
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    pub contact_creation_concurrency: usize,
    pub persistence_concurrency: usize,
    pub contact_lookup_chunk_size: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            contact_creation_concurrency: 10,
            persistence_concurrency: 10,
            contact_lookup_chunk_size: 50,
        }
    }
}

impl MaterializerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            contact_creation_concurrency: env_usize(
                "MATERIALIZER_CONTACT_CONCURRENCY",
                default.contact_creation_concurrency,
            ),
            persistence_concurrency: env_usize(
                "MATERIALIZER_PERSISTENCE_CONCURRENCY",
                default.persistence_concurrency,
            ),
            contact_lookup_chunk_size: env_usize(
                "MATERIALIZER_CONTACT_LOOKUP_CHUNK",
                default.contact_lookup_chunk_size,
            ),
        }
    }
}

/// Configuration for the embeddings model runtime client.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub document_prefix: String,
    pub query_prefix: String,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("EMBEDDINGS_URL", "http://embeddings:8080"),
            dimension: env_usize("EMBEDDINGS_DIM", 768),
            batch_size: env_usize("EMBEDDINGS_BATCH_SIZE", 32),
            request_timeout: env_duration_millis("EMBEDDINGS_TIMEOUT_MS", 30_000),
            document_prefix: env_string("SEARCH_DOCUMENT_PREFIX", "search_document:"),
            query_prefix: env_string("SEARCH_QUERY_PREFIX", "search_query:"),
        }
    }
}

/// Configuration for the instruction-following LLM client (expansion, rerank).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model_id: String,
    pub request_timeout: Duration,
    pub rerank_concurrency: usize,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("LLM_URL", "http://llm:8081"),
            model_id: env_string("LLM_MODEL_ID", "instruct-small"),
            request_timeout: env_duration_millis("LLM_TIMEOUT_MS", 15_000),
            rerank_concurrency: env_usize("LLM_RERANK_CONCURRENCY", 10),
        }
    }
}

/// Runtime configuration for the retrieval pipeline's fixed policy constants.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub lexical_top_k: usize,
    pub dense_top_k: usize,
    pub rrf_k: f64,
    pub rerank_top_n: usize,
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_top_k: 50,
            dense_top_k: 100,
            rrf_k: 60.0,
            rerank_top_n: 30,
            min_token_len: 2,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            lexical_top_k: env_usize("SEARCH_LEXICAL_TOP_K", default.lexical_top_k),
            dense_top_k: env_usize("SEARCH_DENSE_TOP_K", default.dense_top_k),
            rrf_k: env_usize("SEARCH_RRF_K", default.rrf_k as usize) as f64,
            rerank_top_n: env_usize("SEARCH_RERANK_TOP_N", default.rerank_top_n),
            min_token_len: env_usize("SEARCH_MIN_TOKEN_LEN", default.min_token_len),
        }
    }
}

/// Initialize the `log` facade from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
