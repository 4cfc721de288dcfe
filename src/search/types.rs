//! Request/response types for the retrieval pipeline.

use chrono::{DateTime, Utc};

/// Filters applied to lexical retrieval's FTS query and SQL `WHERE` clause
/// (SPEC_FULL.md §4.5 step 2).
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub from_email: Option<String>,
    pub company_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub has_attachments: Option<bool>,
    pub source_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub tenant_id: i64,
    pub query: String,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
}

/// Per-branch score contribution for one hit, surfaced for callers that
/// want to see why a result ranked where it did (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub lex: f64,
    pub vec: f64,
    pub rerank: f64,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message_id: String,
    pub subject: String,
    pub snippet: String,
    pub from_email: String,
    pub from_name: String,
    pub sent_at: DateTime<Utc>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub expanded_queries: Vec<String>,
    pub elapsed_ms: u64,
}

/// One branch's ranked result before fusion: a candidate message with its
/// rank (0-based) and normalized `[0,1]` score within that branch.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub message_id: String,
    pub rank: usize,
    pub score: f64,
    pub subject: String,
    pub snippet: String,
    pub from_email: String,
    pub from_name: String,
    pub sent_at: DateTime<Utc>,
}

/// Which branch a [`RankedHit`] came from; used to break RRF ties
/// (lexical before dense, per SPEC_FULL.md §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Branch {
    Lexical,
    Dense,
}
