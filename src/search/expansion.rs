//! Step 1 of the retrieval pipeline: query expansion (SPEC_FULL.md §4.5).

use crate::search::model_client::LlmClient;

/// Ask the instruction model for one alternative phrasing of `query`.
/// Falls back to `[query]` alone on any failure, per spec.
pub async fn expand_query(llm: &LlmClient, query: &str) -> Vec<String> {
    match llm.expand_query(query).await {
        Ok(alt) if !alt.trim().is_empty() && alt.trim() != query.trim() => {
            vec![query.to_string(), alt]
        }
        _ => vec![query.to_string()],
    }
}
