use chrono::Utc;
use sqlx::PgPool;

use crawl_core::{content_hash, DocumentStore, DocumentUpsert, Source, ValidatorsTouch};

fn sample_doc(url_norm: &str, text: &str) -> DocumentUpsert {
    DocumentUpsert {
        source: Source::Encyclopedia,
        url_norm: url_norm.to_string(),
        raw_payload: format!("<html>{text}</html>"),
        parsed_text: text.to_string(),
        content_hash: content_hash(text),
        http_etag: Some("\"abc\"".to_string()),
        http_last_modified: None,
        status_code: 200,
        word_count: crawl_core::word_count(text),
        fetched_at: Utc::now(),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn upsert_then_get_hash(pool: PgPool) {
    let store = DocumentStore::new(pool, "crawl_documents");
    let doc = sample_doc("https://example.com/doc", "hello world");
    store.upsert_document(&doc).await.unwrap();

    let hash = store
        .get_content_hash("encyclopedia", "https://example.com/doc")
        .await
        .unwrap();
    assert_eq!(hash, Some(doc.content_hash));
}

#[sqlx::test(migrations = "./migrations")]
async fn touch_validators_leaves_content_untouched(pool: PgPool) {
    let store = DocumentStore::new(pool.clone(), "crawl_documents");
    let doc = sample_doc("https://example.com/doc", "hello world");
    store.upsert_document(&doc).await.unwrap();

    store
        .touch_validators(&ValidatorsTouch {
            source: Source::Encyclopedia,
            url_norm: "https://example.com/doc".to_string(),
            http_etag: Some("\"def\"".to_string()),
            http_last_modified: None,
            status_code: 304,
            fetched_at: Utc::now(),
        })
        .await
        .unwrap();

    let row: (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT parsed_text, http_etag FROM crawl_documents WHERE url_norm = $1",
    )
    .bind("https://example.com/doc")
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(row.0.as_deref(), Some("hello world"));
    assert_eq!(row.1.as_deref(), Some("\"def\""));
}

#[sqlx::test(migrations = "./migrations")]
async fn count_by_source_groups_correctly(pool: PgPool) {
    let store = DocumentStore::new(pool, "crawl_documents");
    store
        .upsert_document(&sample_doc("https://example.com/a", "one"))
        .await
        .unwrap();
    store
        .upsert_document(&sample_doc("https://example.com/b", "two"))
        .await
        .unwrap();

    let counts = store.count_by_source().await.unwrap();
    let enc = counts
        .iter()
        .find(|c| c.source == "encyclopedia")
        .expect("encyclopedia group present");
    assert_eq!(enc.count, 2);
}
