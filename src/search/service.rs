//! Orchestrates the five-stage retrieval pipeline end to end
//! (SPEC_FULL.md §4.5).

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::search::blend::blend_score;
use crate::search::dense::dense_search;
use crate::search::expansion::expand_query;
use crate::search::fusion::reciprocal_rank_fusion;
use crate::search::lexical::lexical_search;
use crate::search::model_client::{EmbeddingClient, LlmClient};
use crate::search::rerank::rerank;
use crate::search::types::{ScoreBreakdown, SearchHit, SearchRequest, SearchResponse};
use crate::stores::vector::VectorStore;
use sqlx::PgPool;
use std::time::Instant;

pub struct SearchService {
    pool: PgPool,
    embeddings: EmbeddingClient,
    llm: LlmClient,
    vectors: VectorStore,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        pool: PgPool,
        embeddings: EmbeddingClient,
        llm: LlmClient,
        vectors: VectorStore,
        config: SearchConfig,
    ) -> Self {
        Self {
            pool,
            embeddings,
            llm,
            vectors,
            config,
        }
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let variants = expand_query(&self.llm, query).await;

        let lexical = lexical_search(
            &self.pool,
            request.tenant_id,
            &variants,
            &request.filters,
            self.config.lexical_top_k,
            self.config.min_token_len,
        )
        .await?;

        let dense = dense_search(
            &self.pool,
            &self.embeddings,
            &self.vectors,
            request.tenant_id,
            &variants,
            self.config.dense_top_k,
        )
        .await?;

        let lexical = normalize_branch(lexical);
        let dense = normalize_branch(dense);

        let fused = reciprocal_rank_fusion(&lexical, &dense);
        let total = fused.len();

        let to_rerank: Vec<_> = fused.into_iter().take(self.config.rerank_top_n).collect();
        let reranked = rerank(&self.llm, query, to_rerank).await;

        let mut hits: Vec<SearchHit> = reranked
            .into_iter()
            .enumerate()
            .map(|(position, reranked)| {
                let final_score = blend_score(position, reranked.hit.rrf_score, reranked.rerank_score);
                SearchHit {
                    message_id: reranked.hit.hit.message_id,
                    subject: reranked.hit.hit.subject,
                    snippet: reranked.hit.hit.snippet,
                    from_email: reranked.hit.hit.from_email,
                    from_name: reranked.hit.hit.from_name,
                    sent_at: reranked.hit.hit.sent_at,
                    score: final_score,
                    breakdown: ScoreBreakdown {
                        lex: reranked.hit.lex_score.unwrap_or(0.0),
                        vec: reranked.hit.vec_score.unwrap_or(0.0),
                        rerank: reranked.rerank_score,
                    },
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        let windowed: Vec<SearchHit> = hits
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();

        Ok(SearchResponse {
            hits: windowed,
            total,
            expanded_queries: variants,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Min-max normalize a branch's raw scores to `[0, 1]` (SPEC_FULL.md §4.5
/// step 2), preserving rank order (already rank-ordered on entry).
fn normalize_branch(mut hits: Vec<crate::search::types::RankedHit>) -> Vec<crate::search::types::RankedHit> {
    if hits.is_empty() {
        return hits;
    }
    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range.abs() < f64::EPSILON {
        for h in &mut hits {
            h.score = 1.0;
        }
    } else {
        for h in &mut hits {
            h.score = (h.score - min) / range;
        }
    }
    hits
}
