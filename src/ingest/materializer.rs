//! Parallel email materializer (SPEC_FULL.md §4.3).
//!
//! Consumes a batch of parsed messages sharing `(tenant_id, source_id)`:
//! resolves contacts/companies, resolves threads, persists rows, and upserts
//! embeddings. Bounded concurrency (contact creation, per-message
//! persistence) uses `futures::stream::buffer_unordered`, the async-I/O
//! analogue of the Rayon `par_iter` parallelism used elsewhere in this
//! codebase for CPU-bound work.

use crate::config::MaterializerConfig;
use crate::error::{MaterializeError, StoreError};
use crate::ingest::parser::ParsedEmail;
use crate::models::Attachment;
use crate::search::model_client::EmbeddingClient;
use crate::search::text::build_embedding_text;
use crate::stores::blob::BlobStore;
use crate::stores::vector::{VectorMetadata, VectorStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

/// Domains that never yield a company (SPEC_FULL.md §4.3 step 2).
const FREE_WEBMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
];

/// Cap on the per-batch error log (SPEC_FULL.md §1.2's "bounded per-source
/// error log", generalized from the teacher's single-slot
/// `JobRecord.error_message` to a small bounded list). A batch is already
/// capped at `QueueConfig::email_batch_size` (default 50), so this mostly
/// guards against a future larger batch size rather than today's call sites.
const MAX_BATCH_ERRORS: usize = 20;

/// Outcome of materializing one batch.
#[derive(Debug, Default)]
pub struct MaterializeOutcome {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Materialize a batch of parsed messages sharing `(tenant_id, source_id)`.
pub async fn materialize_batch(
    pool: &PgPool,
    blob_store: &BlobStore,
    embeddings: &EmbeddingClient,
    vectors: &VectorStore,
    config: &MaterializerConfig,
    tenant_id: i64,
    source_id: i64,
    emails: Vec<ParsedEmail>,
) -> Result<MaterializeOutcome, MaterializeError> {
    if emails.is_empty() {
        return Ok(MaterializeOutcome::default());
    }

    let contact_ids = resolve_contacts(pool, config, tenant_id, &emails).await?;

    let mut outcome = MaterializeOutcome::default();
    let mut embed_candidates: Vec<MaterializedMessage> = Vec::new();

    let results: Vec<Result<Option<MaterializedMessage>, MaterializeError>> =
        stream::iter(emails.into_iter().map(|email| {
            let pool = pool.clone();
            let blob_store = blob_store.clone();
            let contact_ids = contact_ids.clone();
            async move {
                materialize_one(&pool, &blob_store, tenant_id, source_id, email, &contact_ids).await
            }
        }))
        .buffer_unordered(config.persistence_concurrency)
        .collect()
        .await;

    for result in results {
        match result {
            Ok(Some(materialized)) => {
                outcome.processed += 1;
                embed_candidates.push(materialized);
            }
            Ok(None) => {
                // Duplicate message_id: treated as a successful no-op (§7, §9 Open Question).
                outcome.processed += 1;
            }
            Err(e) => {
                outcome.failed += 1;
                if outcome.errors.len() < MAX_BATCH_ERRORS {
                    outcome.errors.push(e.to_string());
                }
            }
        }
    }

    if !embed_candidates.is_empty() {
        if let Err(e) = embed_and_upsert(embeddings, vectors, tenant_id, &embed_candidates).await {
            // Embedding failures are logged and do not fail the message (§4.3, §7).
            log::warn!("embedding batch failed for source {}: {}", source_id, e);
        }
    }

    Ok(outcome)
}

/// Resolve `email -> contact_id` for every address referenced in this batch,
/// creating missing contacts (and companies) with bounded concurrency
/// (§4.3 steps 1-2).
async fn resolve_contacts(
    pool: &PgPool,
    config: &MaterializerConfig,
    tenant_id: i64,
    emails: &[ParsedEmail],
) -> Result<HashMap<String, i64>, MaterializeError> {
    let mut addresses: HashSet<(String, String)> = HashSet::new();
    for email in emails {
        addresses.insert((email.from_email.clone(), email.from_name.clone()));
        for (name, addr) in email.to_addrs.iter().chain(email.cc_addrs.iter()) {
            addresses.insert((addr.clone(), name.clone()));
        }
    }

    let all_emails: Vec<String> = addresses.iter().map(|(e, _)| e.clone()).collect();
    let mut contact_ids = lookup_existing_contacts(pool, config, tenant_id, &all_emails).await?;

    let missing: Vec<(String, String)> = addresses
        .into_iter()
        .filter(|(email, _)| !contact_ids.contains_key(email))
        .collect();

    let created: Vec<Result<(String, i64), MaterializeError>> = stream::iter(missing.into_iter().map(|(email, name)| {
        let pool = pool.clone();
        async move {
            let id = create_contact(&pool, tenant_id, &email, &name).await?;
            Ok((email, id))
        }
    }))
    .buffer_unordered(config.contact_creation_concurrency)
    .collect()
    .await;

    for result in created {
        let (email, id) = result?;
        contact_ids.insert(email, id);
    }

    Ok(contact_ids)
}

/// Chunked `WHERE email IN (...) AND tenant_id = ?` lookup, ≤50 per chunk
/// (§4.3 step 1).
async fn lookup_existing_contacts(
    pool: &PgPool,
    config: &MaterializerConfig,
    tenant_id: i64,
    emails: &[String],
) -> Result<HashMap<String, i64>, MaterializeError> {
    let mut map = HashMap::new();
    for chunk in emails.chunks(config.contact_lookup_chunk_size.max(1)) {
        if chunk.is_empty() {
            continue;
        }
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, email FROM contacts WHERE tenant_id = $1 AND email = ANY($2)",
        )
        .bind(tenant_id)
        .bind(chunk)
        .fetch_all(pool)
        .await
        .map_err(StoreError::Database)?;

        for (id, email) in rows {
            map.insert(email, id);
        }
    }
    Ok(map)
}

async fn create_contact(
    pool: &PgPool,
    tenant_id: i64,
    email: &str,
    name: &str,
) -> Result<i64, MaterializeError> {
    let company_id = resolve_company(pool, tenant_id, email).await?;
    let name_opt = (!name.is_empty()).then(|| name.to_string());

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO contacts (tenant_id, email, name, company_id, first_seen, last_seen, email_count)
         VALUES ($1, $2, $3, $4, now(), now(), 0)
         ON CONFLICT (tenant_id, email) DO UPDATE SET
             name = COALESCE(contacts.name, EXCLUDED.name)
         RETURNING id",
    )
    .bind(tenant_id)
    .bind(email)
    .bind(name_opt)
    .bind(company_id)
    .fetch_one(pool)
    .await
    .map_err(StoreError::Database)?;

    Ok(id)
}

fn domain_of(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// Derive a company name from a domain by stripping the TLD-class suffix and
/// title-casing the remainder, e.g. `acme-corp.co.uk` -> `Acme Corp`.
fn company_name_from_domain(domain: &str) -> String {
    let first_label = domain.split('.').next().unwrap_or(domain);
    first_label
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn resolve_company(
    pool: &PgPool,
    tenant_id: i64,
    email: &str,
) -> Result<Option<i64>, MaterializeError> {
    let Some(domain) = domain_of(email) else {
        return Ok(None);
    };
    let domain = domain.to_lowercase();
    if FREE_WEBMAIL_DOMAINS.contains(&domain.as_str()) {
        return Ok(None);
    }

    let name = company_name_from_domain(&domain);
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO companies (tenant_id, domain, name, total_emails, first_contact, last_contact)
         VALUES ($1, $2, $3, 0, now(), now())
         ON CONFLICT (tenant_id, domain) DO UPDATE SET
             name = COALESCE(companies.name, EXCLUDED.name)
         RETURNING id",
    )
    .bind(tenant_id)
    .bind(&domain)
    .bind(name)
    .fetch_one(pool)
    .await
    .map_err(StoreError::Database)?;

    Ok(Some(id))
}

/// Resolve thread_id per SPEC_FULL.md §4.3 step 3 / §9's append-only rule:
/// adopt an existing parent's thread, never re-thread a descendant.
async fn resolve_thread(
    pool: &PgPool,
    tenant_id: i64,
    email: &ParsedEmail,
) -> Result<Option<i64>, MaterializeError> {
    if let Some(in_reply_to) = &email.in_reply_to {
        if let Some((id, thread_id)) = lookup_parent(pool, tenant_id, in_reply_to).await? {
            return Ok(Some(thread_id.unwrap_or(id)));
        }
    }

    for reference in &email.references {
        if let Some((id, thread_id)) = lookup_parent(pool, tenant_id, reference).await? {
            return Ok(Some(thread_id.unwrap_or(id)));
        }
    }

    Ok(None)
}

async fn lookup_parent(
    pool: &PgPool,
    tenant_id: i64,
    message_id: &str,
) -> Result<Option<(i64, Option<i64>)>, MaterializeError> {
    let row: Option<(i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, thread_id FROM messages WHERE tenant_id = $1 AND message_id = $2",
    )
    .bind(tenant_id)
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::Database)?;
    Ok(row)
}

/// A message that was newly inserted this batch, carrying what the
/// embedding step needs.
struct MaterializedMessage {
    message_id: String,
    subject: String,
    sent_at: DateTime<Utc>,
    from_email: String,
    embed_text: String,
}

/// Materialize a single message: thread resolution, idempotent insert,
/// recipients, sender aggregate counters. Returns `None` when the message
/// was already present (duplicate, a no-op per §7/§9).
async fn materialize_one(
    pool: &PgPool,
    blob_store: &BlobStore,
    tenant_id: i64,
    source_id: i64,
    email: ParsedEmail,
    contact_ids: &HashMap<String, i64>,
) -> Result<Option<MaterializedMessage>, MaterializeError> {
    let thread_id = resolve_thread(pool, tenant_id, &email).await?;

    let from_contact_id = *contact_ids
        .get(&email.from_email)
        .ok_or_else(|| MaterializeError::TenantMismatch {
            entity: format!("contact:{}", email.from_email),
        })?;

    let has_attachments = !email.attachments.is_empty();

    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO messages
            (tenant_id, source_id, message_id, thread_id, subject, body_text, body_html, sent_at, from_contact_id, has_attachments)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (tenant_id, message_id) DO NOTHING
         RETURNING id",
    )
    .bind(tenant_id)
    .bind(source_id)
    .bind(&email.message_id)
    .bind(thread_id)
    .bind(&email.subject)
    .bind(&email.body)
    .bind(&email.body_html)
    .bind(email.date)
    .bind(from_contact_id)
    .bind(has_attachments)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::Database)?;

    let Some(message_row_id) = inserted else {
        return Ok(None);
    };

    insert_recipients(pool, message_row_id, &email.to_addrs, contact_ids, "to").await?;
    insert_recipients(pool, message_row_id, &email.cc_addrs, contact_ids, "cc").await?;
    persist_attachments(pool, blob_store, tenant_id, message_row_id, &email.attachments).await?;

    sqlx::query(
        "UPDATE contacts SET email_count = email_count + 1, last_seen = GREATEST(last_seen, $2)
         WHERE id = $1",
    )
    .bind(from_contact_id)
    .bind(email.date)
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    sqlx::query(
        "UPDATE companies SET total_emails = total_emails + 1, last_contact = GREATEST(last_contact, $2)
         WHERE id = (SELECT company_id FROM contacts WHERE id = $1)",
    )
    .bind(from_contact_id)
    .bind(email.date)
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    let embed_text = build_embedding_text(&email.subject, &email.body);
    Ok(Some(MaterializedMessage {
        message_id: email.message_id,
        subject: email.subject,
        sent_at: email.date,
        from_email: email.from_email,
        embed_text,
    }))
}

/// Write each attachment's bytes to the blob store and insert its metadata
/// row (SPEC_FULL.md §4.3 step 6).
async fn persist_attachments(
    pool: &PgPool,
    blob_store: &BlobStore,
    tenant_id: i64,
    message_row_id: i64,
    attachments: &[crate::ingest::parser::ParsedAttachment],
) -> Result<(), MaterializeError> {
    for attachment in attachments {
        let attachment_id: i64 = sqlx::query_scalar(
            "INSERT INTO attachments (message_id, filename, content_type, size, blob_key)
             VALUES ($1, $2, $3, $4, '')
             RETURNING id",
        )
        .bind(message_row_id)
        .bind(&attachment.filename)
        .bind(&attachment.content_type)
        .bind(attachment.bytes.len() as i64)
        .fetch_one(pool)
        .await
        .map_err(StoreError::Database)?;

        let blob_key = Attachment::blob_key(tenant_id, message_row_id, attachment_id, &attachment.filename);
        blob_store
            .put(&blob_key, attachment.bytes.clone())
            .await
            .map_err(MaterializeError::Store)?;

        sqlx::query("UPDATE attachments SET blob_key = $2 WHERE id = $1")
            .bind(attachment_id)
            .bind(&blob_key)
            .execute(pool)
            .await
            .map_err(StoreError::Database)?;
    }
    Ok(())
}

async fn insert_recipients(
    pool: &PgPool,
    message_row_id: i64,
    addrs: &[(String, String)],
    contact_ids: &HashMap<String, i64>,
    role: &str,
) -> Result<(), MaterializeError> {
    for (_, email) in addrs {
        let Some(&contact_id) = contact_ids.get(email) else {
            continue;
        };
        sqlx::query(
            "INSERT INTO recipients (message_id, contact_id, role) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(message_row_id)
        .bind(contact_id)
        .bind(role)
        .execute(pool)
        .await
        .map_err(StoreError::Database)?;
    }
    Ok(())
}

/// Compose embedding input = `subject \n\n body_text[0..1000]` and upsert as
/// a single batched model call (§4.3 step 8).
async fn embed_and_upsert(
    embeddings: &EmbeddingClient,
    vectors: &VectorStore,
    tenant_id: i64,
    candidates: &[MaterializedMessage],
) -> Result<(), MaterializeError> {
    let texts: Vec<String> = candidates.iter().map(|c| c.embed_text.clone()).collect();
    let embedded = embeddings.embed_documents(&texts).await.map_err(MaterializeError::Embedding)?;

    let mut entries = Vec::with_capacity(candidates.len());
    for (candidate, values) in candidates.iter().zip(embedded.into_iter()) {
        entries.push((
            candidate.message_id.clone(),
            values,
            VectorMetadata {
                tenant_id,
                message_id: candidate.message_id.clone(),
                subject: candidate.subject.clone(),
                sent_at: candidate.sent_at.to_rfc3339(),
                from_email: candidate.from_email.clone(),
            },
        ));
    }

    vectors
        .upsert_batch(entries)
        .await
        .map_err(MaterializeError::Store)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_name_from_domain_title_cases_hyphenated_labels() {
        assert_eq!(company_name_from_domain("acme-corp.co.uk"), "Acme Corp");
        assert_eq!(company_name_from_domain("example.com"), "Example");
    }

    #[test]
    fn free_webmail_domains_are_excluded() {
        for domain in FREE_WEBMAIL_DOMAINS {
            assert!(FREE_WEBMAIL_DOMAINS.contains(domain));
        }
        assert!(!FREE_WEBMAIL_DOMAINS.contains(&"example.com"));
    }

    #[test]
    fn domain_of_extracts_host_part() {
        assert_eq!(domain_of("person@example.com"), Some("example.com"));
        assert_eq!(domain_of("no-at-sign"), None);
    }
}
