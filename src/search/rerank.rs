//! Step 4 of the retrieval pipeline: LLM rerank of the top-N fused
//! candidates, bounded concurrency 10 (SPEC_FULL.md §4.5 step 4, §5).

use crate::search::fusion::FusedHit;
use crate::search::model_client::LlmClient;
use futures::stream::{self, StreamExt};

const RERANK_CONCURRENCY: usize = 10;
const SNIPPET_CHARS_FOR_RERANK: usize = 200;
const DEFAULT_RERANK_SCORE: f64 = 0.5;

pub struct RerankedHit {
    pub hit: FusedHit,
    pub rerank_score: f64,
}

/// Score each of `candidates` against `query`. On any call/parse failure the
/// default score 0.5 is used instead (SPEC_FULL.md §7).
///
/// Uses `buffered`, not `buffer_unordered`: the caller blends scores by the
/// candidate's position in this returned vector, so completion order would
/// scramble which position gets which blend weight.
pub async fn rerank(llm: &LlmClient, query: &str, candidates: Vec<FusedHit>) -> Vec<RerankedHit> {
    stream::iter(candidates.into_iter().map(|candidate| async move {
        let snippet: String = candidate
            .hit
            .snippet
            .chars()
            .take(SNIPPET_CHARS_FOR_RERANK)
            .collect();
        let document = format!("{}\n{}", candidate.hit.subject, snippet);
        let score = llm
            .rerank_score(query, &document)
            .await
            .unwrap_or(DEFAULT_RERANK_SCORE);
        RerankedHit {
            hit: candidate,
            rerank_score: score,
        }
    }))
    .buffered(RERANK_CONCURRENCY)
    .collect()
    .await
}
