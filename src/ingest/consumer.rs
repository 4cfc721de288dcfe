//! Top-level ingestion consumer loop.
//!
//! Generalizes `SyncDispatcher::run`'s dequeue-sleep-on-empty-or-error
//! pattern into two independent dequeue paths: `process-chunk` messages
//! (handled strictly one at a time, SPEC_FULL.md §4.1/§5) and
//! `process-email`/`process-email-ref` batches (grouped by source,
//! materialized together, SPEC_FULL.md §4.2-§4.4).

use crate::ingest::chunker::{self, ProcessChunk};
use crate::ingest::materializer::materialize_batch;
use crate::ingest::parser::parse_email;
use crate::ingest::progress;
use crate::ingest::queue::{EmailPayload, Queue, QueueMessage, QueuedMessage};
use crate::search::model_client::EmbeddingClient;
use crate::stores::blob::BlobStore;
use crate::stores::kv::KvStore;
use crate::stores::vector::VectorStore;
use sqlx::PgPool;
use std::collections::HashMap;

pub struct Consumer {
    pool: PgPool,
    queue: Queue,
    blob_store: BlobStore,
    kv_store: KvStore,
    embeddings: EmbeddingClient,
    vectors: VectorStore,
    materializer_config: crate::config::MaterializerConfig,
}

impl Consumer {
    pub fn new(
        pool: PgPool,
        queue: Queue,
        blob_store: BlobStore,
        kv_store: KvStore,
        embeddings: EmbeddingClient,
        vectors: VectorStore,
        materializer_config: crate::config::MaterializerConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            blob_store,
            kv_store,
            embeddings,
            vectors,
            materializer_config,
        }
    }

    /// Run the chunk-processing loop forever.
    pub async fn run_chunk_loop(&self) -> ! {
        log::info!("chunk consumer started");
        loop {
            match self.queue.dequeue_chunk().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.process_chunk_message(&message).await {
                        log::error!("chunk consumer: failed to process message {}: {}", message.id, e);
                        let _ = self.queue.retry_or_kill(message.id, &e.to_string()).await;
                        continue;
                    }
                    if let Err(e) = self.queue.ack(message.id).await {
                        log::error!("chunk consumer: failed to ack message {}: {}", message.id, e);
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.queue.config().poll_idle_sleep).await;
                }
                Err(e) => {
                    log::error!("chunk consumer: dequeue failed: {}", e);
                    tokio::time::sleep(self.queue.config().poll_error_sleep).await;
                }
            }
        }
    }

    /// Run the email-materialization loop forever.
    pub async fn run_email_loop(&self) -> ! {
        log::info!("email consumer started");
        loop {
            match self.queue.dequeue_email_batch().await {
                Ok(batch) if !batch.is_empty() => {
                    self.process_email_batch(batch).await;
                }
                Ok(_) => {
                    tokio::time::sleep(self.queue.config().poll_idle_sleep).await;
                }
                Err(e) => {
                    log::error!("email consumer: dequeue failed: {}", e);
                    tokio::time::sleep(self.queue.config().poll_error_sleep).await;
                }
            }
        }
    }

    async fn process_chunk_message(&self, message: &QueuedMessage) -> Result<(), crate::error::IngestError> {
        let payload: QueueMessage = serde_json::from_value(message.payload.clone())
            .map_err(crate::error::IngestError::Serialize)?;
        let QueueMessage::ProcessChunk {
            source_id,
            tenant_id,
            index,
            total,
        } = payload
        else {
            log::warn!("chunk consumer: message {} is not a process-chunk payload", message.id);
            return Ok(());
        };

        if progress::is_cancelled(&self.pool, source_id, tenant_id)
            .await
            .map_err(crate::error::IngestError::Store)?
        {
            log::info!("chunk consumer: source {} no longer exists, dropping chunk {}", source_id, index);
            return Ok(());
        }

        let chunk_msg = ProcessChunk {
            source_id,
            tenant_id,
            index,
            total,
        };
        let outcome = chunker::process_chunk(&self.blob_store, &self.kv_store, &chunk_msg).await?;
        let emitted_this_chunk = outcome.messages.len();

        if emitted_this_chunk > 0 {
            progress::increment_expected(&self.pool, source_id, tenant_id, emitted_this_chunk as i64)
                .await
                .map_err(crate::error::IngestError::Store)?;
        }

        for raw in outcome.messages {
            self.queue
                .enqueue(QueueMessage::ProcessEmail {
                    source_id,
                    tenant_id,
                    email: EmailPayload { raw: raw.body },
                })
                .await
                .map_err(|e| match e {
                    crate::error::QueueError::Ingest(inner) => inner,
                    crate::error::QueueError::Store(store) => crate::error::IngestError::Store(store),
                })?;
        }

        if outcome.is_last_chunk && emitted_this_chunk == 0 {
            let expected_total = progress::expected_count(&self.pool, source_id, tenant_id)
                .await
                .map_err(crate::error::IngestError::Store)?;
            if expected_total == 0 {
                progress::fail_source(&self.pool, source_id, tenant_id, "No emails found in file.")
                    .await
                    .map_err(crate::error::IngestError::Store)?;
            }
        }

        if outcome.is_last_chunk {
            self.blob_store
                .delete(&crate::stores::blob::chunk_key(source_id, index))
                .await
                .map_err(crate::error::IngestError::Store)?;
        } else {
            self.queue
                .enqueue(QueueMessage::ProcessChunk {
                    source_id,
                    tenant_id,
                    index: index + 1,
                    total,
                })
                .await
                .map_err(|e| match e {
                    crate::error::QueueError::Ingest(inner) => inner,
                    crate::error::QueueError::Store(store) => crate::error::IngestError::Store(store),
                })?;
        }

        Ok(())
    }

    /// Group a dequeued batch by `(tenant_id, source_id)`, materialize each
    /// group, and ack every message in the batch regardless of per-message
    /// errors (SPEC_FULL.md §5: "batch of size ≤50" all acked together).
    async fn process_email_batch(&self, batch: Vec<QueuedMessage>) {
        let mut groups: HashMap<(i64, i64), Vec<QueuedMessage>> = HashMap::new();
        for message in batch {
            groups
                .entry((message.tenant_id, message.source_id))
                .or_default()
                .push(message);
        }

        for ((tenant_id, source_id), messages) in groups {
            let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
            let mut emails = Vec::with_capacity(messages.len());
            // Messages that never reach `materialize_batch` (parse rejections,
            // undecodable payloads, blob fetch failures) still counted against
            // `expected` when the chunk enqueued them, so they must still land
            // in `failed` here or the source's completion predicate never fires
            // (SPEC_FULL.md §8).
            let mut pre_materialize_failed: i64 = 0;

            for message in &messages {
                match self.decode_email_payload(message).await {
                    Ok(Some(raw)) => match parse_email(&raw) {
                        Ok(parsed) => emails.push(parsed),
                        Err(e) => {
                            log::debug!("email consumer: rejected message {}: {}", message.id, e);
                            pre_materialize_failed += 1;
                        }
                    },
                    Ok(None) => pre_materialize_failed += 1,
                    Err(e) => {
                        log::error!("email consumer: failed to decode message {}: {}", message.id, e);
                        pre_materialize_failed += 1;
                    }
                }
            }

            let succeeded;
            let failed;
            match materialize_batch(
                &self.pool,
                &self.blob_store,
                &self.embeddings,
                &self.vectors,
                &self.materializer_config,
                tenant_id,
                source_id,
                emails,
            )
            .await
            {
                Ok(outcome) => {
                    succeeded = outcome.processed as i64;
                    failed = outcome.failed as i64 + pre_materialize_failed;
                    for error in &outcome.errors {
                        log::warn!("email consumer: materialize error for source {}: {}", source_id, error);
                    }
                }
                Err(e) => {
                    log::error!("email consumer: materialize batch failed for source {}: {}", source_id, e);
                    succeeded = 0;
                    failed = emails.len() as i64 + pre_materialize_failed;
                }
            }

            if let Err(e) = progress::increment_processed(&self.pool, source_id, tenant_id, succeeded, failed).await {
                log::error!("email consumer: failed to update progress for source {}: {}", source_id, e);
            }

            match progress::try_complete_source(&self.pool, source_id, tenant_id).await {
                Ok(true) => log::info!("source {} completed", source_id),
                Ok(false) => {}
                Err(e) => log::error!("email consumer: completion check failed for source {}: {}", source_id, e),
            }

            if let Err(e) = self.queue.ack_many(&ids).await {
                log::error!("email consumer: failed to ack batch for source {}: {}", source_id, e);
            }
        }
    }

    async fn decode_email_payload(
        &self,
        message: &QueuedMessage,
    ) -> Result<Option<Vec<u8>>, crate::error::StoreError> {
        let payload: QueueMessage = match serde_json::from_value(message.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("email consumer: undecodable payload for message {}: {}", message.id, e);
                return Ok(None);
            }
        };

        match payload {
            QueueMessage::ProcessEmail { email, .. } => Ok(Some(email.raw)),
            QueueMessage::ProcessEmailRef { blob_key, .. } => self.blob_store.get(&blob_key).await,
            QueueMessage::ProcessChunk { .. } => {
                log::warn!("email consumer: message {} is a process-chunk payload", message.id);
                Ok(None)
            }
        }
    }
}
