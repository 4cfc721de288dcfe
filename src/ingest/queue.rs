//! At-least-once durable message queue: batched delivery, per-message
//! ack/retry, Postgres-backed.
//!
//! Generalizes the `SELECT ... FOR UPDATE SKIP LOCKED` dequeue pattern used
//! for single-job-at-a-time dequeue into two operations: a one-at-a-time
//! dequeue for `process-chunk` messages (strictly sequential, §4.1) and a
//! bounded-batch dequeue for `process-email`/`process-email-ref` messages
//! (grouped by `source_id` downstream, §4.2).

use crate::config::QueueConfig;
use crate::error::{IngestError, QueueError, StoreError};
use crate::stores::blob::{self, BlobStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_message_kind", rename_all = "snake_case")]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    ProcessChunk,
    ProcessEmail,
    ProcessEmailRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_message_status", rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Running,
    Done,
    Failed,
    Dead,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedMessage {
    pub id: i64,
    pub kind: MessageKind,
    pub source_id: i64,
    pub tenant_id: i64,
    pub payload: Value,
    pub attempts: i32,
}

/// Tagged queue message payloads (SPEC_FULL.md §4.2), one decoder per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QueueMessage {
    ProcessChunk {
        source_id: i64,
        tenant_id: i64,
        index: u32,
        total: u32,
    },
    ProcessEmail {
        source_id: i64,
        tenant_id: i64,
        email: EmailPayload,
    },
    ProcessEmailRef {
        source_id: i64,
        tenant_id: i64,
        blob_key: String,
        headers: EmailRefHeaders,
    },
}

/// Inline message payload for `process-email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub raw: Vec<u8>,
}

/// Headers carried alongside a spilled body for `process-email-ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRefHeaders {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
}

#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
    blob_store: BlobStore,
    config: QueueConfig,
}

impl Queue {
    pub fn new(pool: PgPool, blob_store: BlobStore, config: QueueConfig) -> Self {
        Self {
            pool,
            blob_store,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spill `email.raw` to the blob store and return the `process-email-ref`
    /// that replaces `process-email` when the inline payload would exceed
    /// `config.spill_threshold_bytes` (SPEC_FULL.md §4.2.1). Header extraction
    /// is best-effort: a raw body too malformed to parse still spills, just
    /// with empty ref headers, since full rejection is `parse_email`'s job.
    async fn spill(
        &self,
        source_id: i64,
        tenant_id: i64,
        email: EmailPayload,
    ) -> Result<QueueMessage, QueueError> {
        let blob_key = blob::body_spill_key(source_id, uuid::Uuid::new_v4());
        self.blob_store
            .put(&blob_key, email.raw.clone())
            .await
            .map_err(QueueError::Store)?;

        let headers = match mailparse::parse_mail(&email.raw) {
            Ok(parsed) => EmailRefHeaders {
                message_id: parsed.headers.get_first_value("Message-ID"),
                subject: parsed.headers.get_first_value("Subject"),
                from: parsed.headers.get_first_value("From"),
            },
            Err(_) => EmailRefHeaders {
                message_id: None,
                subject: None,
                from: None,
            },
        };

        Ok(QueueMessage::ProcessEmailRef {
            source_id,
            tenant_id,
            blob_key,
            headers,
        })
    }

    /// Enqueue a message, spilling the body to the blob store and enqueuing
    /// `process-email-ref` instead when the serialized payload would exceed
    /// the spill threshold (SPEC_FULL.md §4.2.1).
    pub async fn enqueue(&self, message: QueueMessage) -> Result<i64, QueueError> {
        let message = if let QueueMessage::ProcessEmail {
            source_id,
            tenant_id,
            email,
        } = message
        {
            let inline_len = email.raw.len();
            if inline_len > self.config.spill_threshold_bytes {
                self.spill(source_id, tenant_id, email).await?
            } else {
                QueueMessage::ProcessEmail {
                    source_id,
                    tenant_id,
                    email,
                }
            }
        } else {
            message
        };

        let serialized = serde_json::to_vec(&message).map_err(IngestError::Serialize)?;
        if serialized.len() > self.config.payload_cap_bytes {
            return Err(QueueError::Ingest(IngestError::PayloadTooLarge {
                size: serialized.len(),
                cap: self.config.payload_cap_bytes,
            }));
        }

        let (kind, source_id, tenant_id) = match &message {
            QueueMessage::ProcessChunk {
                source_id,
                tenant_id,
                ..
            } => (MessageKind::ProcessChunk, *source_id, *tenant_id),
            QueueMessage::ProcessEmail {
                source_id,
                tenant_id,
                ..
            } => (MessageKind::ProcessEmail, *source_id, *tenant_id),
            QueueMessage::ProcessEmailRef {
                source_id,
                tenant_id,
                ..
            } => (MessageKind::ProcessEmailRef, *source_id, *tenant_id),
        };

        let payload: Value = serde_json::from_slice(&serialized).map_err(IngestError::Serialize)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_messages (kind, source_id, tenant_id, payload, status, attempts)
             VALUES ($1, $2, $3, $4, 'queued', 0)
             RETURNING id",
        )
        .bind(kind)
        .bind(source_id)
        .bind(tenant_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        Ok(id)
    }

    /// Dequeue a single `process-chunk` message, locking it against
    /// concurrent consumers via `FOR UPDATE SKIP LOCKED`. Chunk messages are
    /// handled strictly one at a time (SPEC_FULL.md §4.2, §5).
    pub async fn dequeue_chunk(&self) -> Result<Option<QueuedMessage>, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        let row = sqlx::query_as::<_, QueuedMessage>(
            "SELECT id, kind, source_id, tenant_id, payload, attempts
             FROM queue_messages
             WHERE status = 'queued' AND kind = 'process_chunk'
             ORDER BY created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        let Some(row) = row else {
            tx.commit().await.map_err(|e| QueueError::Store(StoreError::Database(e)))?;
            return Ok(None);
        };

        sqlx::query("UPDATE queue_messages SET status = 'running' WHERE id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        tx.commit().await.map_err(|e| QueueError::Store(StoreError::Database(e)))?;
        Ok(Some(row))
    }

    /// Dequeue up to `config.email_batch_size` `process-email`/
    /// `process-email-ref` messages, locking them against concurrent
    /// consumers the same way (SPEC_FULL.md §5's "batch of size ≤50").
    pub async fn dequeue_email_batch(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        let rows = sqlx::query_as::<_, QueuedMessage>(
            "SELECT id, kind, source_id, tenant_id, payload, attempts
             FROM queue_messages
             WHERE status = 'queued' AND kind IN ('process_email', 'process_email_ref')
             ORDER BY created_at ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(self.config.email_batch_size as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        if !rows.is_empty() {
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            sqlx::query("UPDATE queue_messages SET status = 'running' WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .map_err(|e| QueueError::Store(StoreError::Database(e)))?;
        }

        tx.commit().await.map_err(|e| QueueError::Store(StoreError::Database(e)))?;
        Ok(rows)
    }

    pub async fn ack(&self, id: i64) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_messages SET status = 'done' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Store(StoreError::Database(e)))?;
        Ok(())
    }

    pub async fn ack_many(&self, ids: &[i64]) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE queue_messages SET status = 'done' WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Store(StoreError::Database(e)))?;
        Ok(())
    }

    /// Retry a message on transient failure, moving it to `dead` once
    /// `attempts` exceeds `config.max_attempts` (SPEC_FULL.md §4.2.1).
    pub async fn retry_or_kill(&self, id: i64, error: &str) -> Result<(), QueueError> {
        let attempts: i32 = sqlx::query_scalar(
            "UPDATE queue_messages
             SET attempts = attempts + 1, last_error = $2,
                 status = CASE WHEN attempts + 1 >= $3 THEN 'dead' ELSE 'queued' END
             WHERE id = $1
             RETURNING attempts",
        )
        .bind(id)
        .bind(error)
        .bind(self.config.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Store(StoreError::Database(e)))?;

        if attempts >= self.config.max_attempts {
            log::warn!("queue message {} exceeded retry budget, marked dead", id);
        }
        Ok(())
    }
}
