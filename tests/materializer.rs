use chrono::{TimeZone, Utc};
use mailfind_core::db::test_support::{TestDatabase, TestDatabaseError};
use mailfind_core::ingest::ParsedEmail;
use mailfind_core::ingest::materializer::materialize_batch;
use mailfind_core::ingest::progress;

fn email(message_id: &str, subject: &str, from_email: &str, in_reply_to: Option<&str>) -> ParsedEmail {
    ParsedEmail {
        message_id: message_id.to_string(),
        subject: subject.to_string(),
        date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        from_name: "Sender".to_string(),
        from_email: from_email.to_string(),
        body: format!("body of {subject}"),
        body_html: None,
        to_addrs: vec![("Recipient".to_string(), "recipient@example.com".to_string())],
        cc_addrs: Vec::new(),
        in_reply_to: in_reply_to.map(|s| s.to_string()),
        references: Vec::new(),
        attachments: Vec::new(),
    }
}

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping materializer test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn seed_tenant_and_source(pool: &sqlx::PgPool) -> (i64, i64) {
    let tenant_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (email) VALUES ('tenant@example.com') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("insert tenant");

    let source_id: i64 = sqlx::query_scalar(
        "INSERT INTO sources (tenant_id, name, kind, status)
         VALUES ($1, 'inbox.mbox', 'mbox', 'processing')
         RETURNING id",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
    .expect("insert source");

    (tenant_id, source_id)
}

#[tokio::test]
async fn duplicate_message_id_is_idempotent() {
    let Some(test_db) = provision().await else { return };
    let pool = test_db.pool_clone();
    let (tenant_id, source_id) = seed_tenant_and_source(&pool).await;

    let config = materializer_deps();

    let first = materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![email("dup-1@example.com", "Hello", "alice@example.com", None)],
    )
    .await
    .expect("first materialize succeeds");
    assert_eq!(first.processed, 1);
    assert_eq!(first.failed, 0);

    let second = materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![email("dup-1@example.com", "Hello", "alice@example.com", None)],
    )
    .await
    .expect("second materialize succeeds");
    assert_eq!(second.processed, 1, "re-ingesting the same message_id is a no-op success");
    assert_eq!(second.failed, 0);

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE tenant_id = $1 AND message_id = 'dup-1@example.com'",
    )
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .expect("count query");
    assert_eq!(count, 1, "duplicate ingestion must not create a second row");

    test_db.close().await.expect("close test database");
}

#[tokio::test]
async fn thread_resolution_single_hop() {
    let Some(test_db) = provision().await else { return };
    let pool = test_db.pool_clone();
    let (tenant_id, source_id) = seed_tenant_and_source(&pool).await;

    let config = materializer_deps();

    materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![email("root@example.com", "Question", "alice@example.com", None)],
    )
    .await
    .expect("root materializes");

    materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![email(
            "reply@example.com",
            "Re: Question",
            "bob@example.com",
            Some("root@example.com"),
        )],
    )
    .await
    .expect("reply materializes");

    materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![email(
            "reply-reply@example.com",
            "Re: Re: Question",
            "alice@example.com",
            Some("reply@example.com"),
        )],
    )
    .await
    .expect("second-hop reply materializes");

    let rows: Vec<(String, Option<i64>, i64)> = sqlx::query_as(
        "SELECT message_id, thread_id, id FROM messages WHERE tenant_id = $1 ORDER BY created_at",
    )
    .bind(tenant_id)
    .fetch_all(&pool)
    .await
    .expect("fetch messages");

    let root = rows.iter().find(|(mid, ..)| mid == "root@example.com").unwrap();
    let reply = rows.iter().find(|(mid, ..)| mid == "reply@example.com").unwrap();
    let reply_reply = rows
        .iter()
        .find(|(mid, ..)| mid == "reply-reply@example.com")
        .unwrap();

    assert_eq!(reply.1, Some(root.2), "direct reply adopts the parent's id as thread_id");
    assert_eq!(
        reply_reply.1,
        Some(root.2),
        "second-hop reply adopts the parent's already-resolved thread_id, not a new thread"
    );

    test_db.close().await.expect("close test database");
}

#[tokio::test]
async fn empty_source_transitions_to_failed() {
    let Some(test_db) = provision().await else { return };
    let pool = test_db.pool_clone();
    let (tenant_id, source_id) = seed_tenant_and_source(&pool).await;

    let expected = progress::expected_count(&pool, source_id, tenant_id)
        .await
        .expect("read expected count");
    assert_eq!(expected, 0, "no chunk ever reported a message for this source");

    progress::fail_source(&pool, source_id, tenant_id, "No emails found in file.")
        .await
        .expect("fail source");

    let (status, error): (String, Option<String>) =
        sqlx::query_as("SELECT status::text, error FROM sources WHERE id = $1")
            .bind(source_id)
            .fetch_one(&pool)
            .await
            .expect("fetch source");

    assert_eq!(status, "failed");
    assert_eq!(error.as_deref(), Some("No emails found in file."));

    test_db.close().await.expect("close test database");
}

#[tokio::test]
async fn attachment_ingestion_sets_has_attachments_and_persists_blob() {
    let Some(test_db) = provision().await else { return };
    let pool = test_db.pool_clone();
    let (tenant_id, source_id) = seed_tenant_and_source(&pool).await;

    let config = materializer_deps();

    let mut with_attachment = email("has-attachment@example.com", "Report", "alice@example.com", None);
    with_attachment.attachments.push(mailfind_core::ingest::parser::ParsedAttachment {
        filename: "report.csv".to_string(),
        content_type: "text/csv".to_string(),
        bytes: b"a,b,c".to_vec(),
    });

    materialize_batch(
        &pool,
        &config.0,
        &config.1,
        &config.2,
        &config.3,
        tenant_id,
        source_id,
        vec![with_attachment],
    )
    .await
    .expect("materializes with attachment");

    let (has_attachments, message_row_id): (bool, i64) = sqlx::query_as(
        "SELECT has_attachments, id FROM messages WHERE tenant_id = $1 AND message_id = 'has-attachment@example.com'",
    )
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .expect("fetch message");
    assert!(has_attachments);

    let (filename, blob_key): (String, String) =
        sqlx::query_as("SELECT filename, blob_key FROM attachments WHERE message_id = $1")
            .bind(message_row_id)
            .fetch_one(&pool)
            .await
            .expect("fetch attachment row");
    assert_eq!(filename, "report.csv");
    assert!(!blob_key.is_empty());

    let stored = config.0.get(&blob_key).await.expect("blob get succeeds");
    assert_eq!(stored, Some(b"a,b,c".to_vec()));

    test_db.close().await.expect("close test database");
}

fn materializer_deps() -> (
    mailfind_core::stores::BlobStore,
    mailfind_core::search::EmbeddingClient,
    mailfind_core::stores::VectorStore,
    mailfind_core::config::MaterializerConfig,
) {
    let blob_store = mailfind_core::stores::BlobStore::new("memory:///")
        .expect("blob store config is always valid");
    let embeddings = mailfind_core::search::EmbeddingClient::new(
        mailfind_core::config::EmbeddingConfig::from_env(),
    )
    .expect("embedding client config is always valid");
    let vectors = mailfind_core::stores::VectorStore::new("http://localhost:6334", "messages_test")
        .expect("vector store config is always valid");
    (
        blob_store,
        embeddings,
        vectors,
        mailfind_core::config::MaterializerConfig::default(),
    )
}
