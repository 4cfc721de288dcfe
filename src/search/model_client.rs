//! HTTP clients for the model-runtime services: embeddings and the
//! instruction-following LLM used for query expansion and rerank.
//!
//! `EmbeddingClient` is carried over near-verbatim from the teacher's own
//! embedding client: same prefix/batch/chunk shape, same response envelope
//! tolerant of both a bare array and a `{embeddings: [...]}` wrapper.
//! `LlmClient` is new, built in the same idiom, since this system's
//! retrieval pipeline needs an instruction-following call the teacher never
//! made.

use crate::config::{EmbeddingConfig, LlmConfig};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding service returned status {status}: {body}")]
    Service { status: StatusCode, body: String },
    #[error("failed to decode embedding response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("embedding response count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("mailfind-core/0.1")
            .build()
            .map_err(EmbeddingError::Http)?;

        Ok(Self {
            http: client,
            config,
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub async fn healthcheck(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let response = self.http.get(url).send().await.map_err(EmbeddingError::Http)?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(EmbeddingError::Service { status, body })
        }
    }

    pub async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_with_prefix(&self.config.document_prefix, documents).await
    }

    pub async fn embed_queries(&self, queries: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_with_prefix(&self.config.query_prefix, queries).await
    }

    async fn embed_with_prefix(
        &self,
        prefix: &str,
        items: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(items.len());
        let endpoint = format!("{}/embed", self.config.base_url.trim_end_matches('/'));
        let chunk_size = self.config.batch_size.max(1);

        for chunk in items.chunks(chunk_size) {
            let prefixed: Vec<String> = chunk.iter().map(|item| format!("{prefix}{}", item)).collect();

            let payload = EmbeddingRequest {
                inputs: prefixed,
                truncate: Some(true),
                normalize: Some(true),
            };

            let response = self
                .http
                .post(&endpoint)
                .json(&payload)
                .send()
                .await
                .map_err(EmbeddingError::Http)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Service { status, body });
            }

            let body = response.bytes().await.map_err(EmbeddingError::Http)?;
            let parsed: EmbeddingResponse = serde_json::from_slice(&body)?;
            let embeddings = parsed.into_embeddings();

            if embeddings.len() != chunk.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: chunk.len(),
                    actual: embeddings.len(),
                });
            }

            for embedding in embeddings {
                if embedding.len() != self.config.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: embedding.len(),
                    });
                }
                results.push(embedding);
            }
        }

        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    normalize: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Bare(Vec<Vec<f32>>),
    Wrapped { embeddings: Vec<Vec<f32>> },
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Bare(values) => values,
            EmbeddingResponse::Wrapped { embeddings } => embeddings,
        }
    }
}

/// Parse the first run of ASCII digits in `text` as an integer (§4.5 step 4:
/// "parse the first integer in the response"), tolerating surrounding prose
/// like "Score: 8/10" or "I'd rate this a 7.".
fn first_integer(text: &str) -> Option<i64> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm service returned status {status}: {body}")]
    Service { status: StatusCode, body: String },
    #[error("failed to decode llm response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("mailfind-core/0.1")
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            http: client,
            config,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Generate one alternative phrasing of `query`, ≤200 chars (§4.5 step 1).
    pub async fn expand_query(&self, query: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Rewrite the following search query as a single alternative phrasing \
             that preserves its meaning. Respond with only the rewritten query, \
             no more than 200 characters.\n\nQuery: {query}"
        );
        let text = self.complete(&prompt).await?;
        Ok(text.trim().chars().take(200).collect())
    }

    /// Score one candidate document's relevance to `query` on a 0-10 scale
    /// (§4.5 step 4). Returns `None` on any failure, so callers can fall
    /// back to the documented default of 0.5.
    pub async fn rerank_score(&self, query: &str, document: &str) -> Option<f64> {
        let prompt = format!(
            "On a scale of 0 to 10, how relevant is the following document to \
             the search query? Respond with only the number.\n\n\
             Query: {query}\n\nDocument: {document}"
        );
        let text = self.complete(&prompt).await.ok()?;
        let score = first_integer(&text)?;
        Some((score.clamp(0, 10) as f64) / 10.0)
    }

    pub async fn healthcheck(&self) -> Result<(), LlmError> {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let response = self.http.get(url).send().await.map_err(LlmError::Http)?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(LlmError::Service { status, body })
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let endpoint = format!("{}/v1/completions", self.config.base_url.trim_end_matches('/'));
        let payload = CompletionRequest {
            model: self.config.model_id.clone(),
            prompt: prompt.to_string(),
            max_tokens: 64,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(LlmError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Service { status, body });
        }

        let body = response.bytes().await.map_err(LlmError::Http)?;
        let parsed: CompletionResponse = serde_json::from_slice(&body)?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_integer_parses_bare_number() {
        assert_eq!(first_integer("8"), Some(8));
    }

    #[test]
    fn first_integer_ignores_surrounding_prose() {
        assert_eq!(first_integer("I'd rate this a 7 out of 10."), Some(7));
        assert_eq!(first_integer("Score: 8/10"), Some(8));
    }

    #[test]
    fn first_integer_none_when_no_digits() {
        assert_eq!(first_integer("not relevant"), None);
    }
}
