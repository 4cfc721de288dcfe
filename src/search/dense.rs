//! Step 2 (dense branch) of the retrieval pipeline: embed each query variant
//! and query the vector store, deduplicating by `message_id` and verifying
//! tenant ownership against the relational store (SPEC_FULL.md §4.5 step 2).

use crate::error::{SearchError, StoreError};
use crate::search::model_client::EmbeddingClient;
use crate::search::types::RankedHit;
use crate::stores::vector::VectorStore;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    subject: String,
    body_text: String,
    from_email: String,
    from_name: String,
    sent_at: DateTime<Utc>,
}

/// Run the dense branch: embed every variant, query top `top_k` per
/// variant, dedup by `message_id` keeping the max score, then verify each
/// surviving hit actually belongs to `tenant_id` in the relational store.
pub async fn dense_search(
    pool: &PgPool,
    embeddings: &EmbeddingClient,
    vectors: &VectorStore,
    tenant_id: i64,
    variants: &[String],
    top_k: usize,
) -> Result<Vec<RankedHit>, SearchError> {
    if variants.is_empty() {
        return Ok(Vec::new());
    }

    let variant_vectors = embeddings.embed_queries(variants).await?;

    let mut best_score: HashMap<String, f32> = HashMap::new();
    for vector in variant_vectors {
        let matches = vectors
            .query(vector, top_k as u64, tenant_id)
            .await
            .map_err(SearchError::Store)?;
        for m in matches {
            best_score
                .entry(m.id)
                .and_modify(|existing| *existing = existing.max(m.score))
                .or_insert(m.score);
        }
    }

    if best_score.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = best_score.keys().cloned().collect();
    let verified: Vec<MessageRow> = sqlx::query_as(
        "SELECT m.message_id, m.subject, m.body_text, c.email AS from_email,
                COALESCE(c.name, '') AS from_name, m.sent_at
         FROM messages m
         JOIN contacts c ON c.id = m.from_contact_id
         WHERE m.tenant_id = $1 AND m.message_id = ANY($2)",
    )
    .bind(tenant_id)
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(|e| SearchError::Store(StoreError::Database(e)))?;

    let mut ranked: Vec<(f32, MessageRow)> = verified
        .into_iter()
        .filter_map(|row| best_score.get(&row.message_id).map(|score| (*score, row)))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    Ok(ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (score, row))| RankedHit {
            message_id: row.message_id,
            rank,
            score: score as f64,
            subject: row.subject,
            snippet: row.body_text.chars().take(200).collect(),
            from_email: row.from_email,
            from_name: row.from_name,
            sent_at: row.sent_at,
        })
        .collect())
}
