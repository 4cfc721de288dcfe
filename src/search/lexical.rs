//! Step 2 (lexical branch) of the retrieval pipeline: Postgres full-text
//! search over the `tsv` generated column (SPEC_FULL.md §4.5 step 2).
//!
//! Generalizes the teacher's `to_tsvector`/FTS-column approach (see
//! `sync::database::search::backfill_fts_columns`) from a maintenance-time
//! backfill to a query-time `plainto_tsquery`/`ts_headline` lookup, scoped by
//! tenant and the same filter set the dense branch applies.

use crate::error::StoreError;
use crate::search::text::tokenize_for_lexical;
use crate::search::types::{RankedHit, SearchFilters};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(sqlx::FromRow)]
struct LexicalRow {
    message_id: String,
    subject: String,
    snippet: String,
    from_email: String,
    from_name: String,
    sent_at: DateTime<Utc>,
    rank: f64,
}

/// Build one `tsquery`-ready string per variant: tokens of length > `min_len`
/// AND-joined, then OR-joined across all variants (SPEC_FULL.md §4.5 step 2).
fn build_tsquery_expression(variants: &[String], min_len: usize) -> Option<String> {
    let clauses: Vec<String> = variants
        .iter()
        .filter_map(|variant| {
            let tokens = tokenize_for_lexical(variant, min_len);
            (!tokens.is_empty()).then(|| format!("({})", tokens.join(" & ")))
        })
        .collect();
    (!clauses.is_empty()).then(|| clauses.join(" | "))
}

/// Run the lexical branch: top `top_k` results ordered by descending rank
/// (best first), within `filters` and tenant scope, restricted to sources
/// with `included_in_search = true` unless a specific `source_id` filter set
/// is given.
pub async fn lexical_search(
    pool: &PgPool,
    tenant_id: i64,
    variants: &[String],
    filters: &SearchFilters,
    top_k: usize,
    min_token_len: usize,
) -> Result<Vec<RankedHit>, StoreError> {
    let Some(tsquery_expr) = build_tsquery_expression(variants, min_token_len) else {
        return Ok(Vec::new());
    };

    let rows: Vec<LexicalRow> = sqlx::query_as(
        r#"
        SELECT
            m.message_id,
            m.subject,
            ts_headline('english', m.body_text, query, 'MaxWords=32, MinWords=8, StartSel=<mark>, StopSel=</mark>') AS snippet,
            c.email AS from_email,
            COALESCE(c.name, '') AS from_name,
            m.sent_at,
            ts_rank(m.tsv, query) AS rank
        FROM messages m
        JOIN contacts c ON c.id = m.from_contact_id
        JOIN sources s ON s.id = m.source_id
        CROSS JOIN to_tsquery('english', $2) AS query
        WHERE m.tenant_id = $1
          AND m.tsv @@ query
          AND (s.included_in_search OR $3::bigint[] IS NOT NULL)
          AND ($3::bigint[] IS NULL OR m.source_id = ANY($3))
          AND ($4::text IS NULL OR c.email = $4)
          AND ($5::timestamptz IS NULL OR m.sent_at >= $5)
          AND ($6::timestamptz IS NULL OR m.sent_at <= $6)
          AND ($7::bool IS NULL OR m.has_attachments = $7)
          AND ($9::bigint IS NULL OR c.company_id = $9)
        ORDER BY rank DESC
        LIMIT $8
        "#,
    )
    .bind(tenant_id)
    .bind(&tsquery_expr)
    .bind(filters.source_ids.as_ref())
    .bind(filters.from_email.as_ref())
    .bind(filters.start_date)
    .bind(filters.end_date)
    .bind(filters.has_attachments)
    .bind(top_k as i64)
    .bind(filters.company_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Database)?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(rank, row)| RankedHit {
            message_id: row.message_id,
            rank,
            score: row.rank,
            subject: row.subject,
            snippet: row.snippet,
            from_email: row.from_email,
            from_name: row.from_name,
            sent_at: row.sent_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tsquery_expression_and_joins_tokens_or_joins_variants() {
        let variants = vec!["pricing plan".to_string(), "cost estimate".to_string()];
        let expr = build_tsquery_expression(&variants, 2).unwrap();
        assert_eq!(expr, "(pricing & plan) | (cost & estimate)");
    }

    #[test]
    fn build_tsquery_expression_drops_short_tokens() {
        let variants = vec!["a pricing".to_string()];
        let expr = build_tsquery_expression(&variants, 2).unwrap();
        assert_eq!(expr, "(pricing)");
    }

    #[test]
    fn build_tsquery_expression_none_when_all_variants_empty() {
        assert!(build_tsquery_expression(&["a".to_string()], 2).is_none());
    }
}
