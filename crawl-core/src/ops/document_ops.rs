use sqlx::postgres::PgPool;

use crate::error::StoreResult;
use crate::types::{DocumentSourceCount, DocumentUpsert, ValidatorsTouch};

pub async fn get_content_hash(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
) -> StoreResult<Option<String>> {
    let sql =
        format!("SELECT content_hash FROM {table} WHERE source = $1 AND url_norm = $2");
    let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
        .bind(source)
        .bind(url_norm)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(hash,)| hash))
}

/// Reads the stored ETag/Last-Modified validators for a key, if any
/// document has ever been recorded for it.
pub async fn get_validators(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
) -> StoreResult<Option<(Option<String>, Option<String>)>> {
    let sql = format!(
        "SELECT http_etag, http_last_modified FROM {table} WHERE source = $1 AND url_norm = $2"
    );
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(&sql)
        .bind(source)
        .bind(url_norm)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn upsert_document(pool: &PgPool, table: &str, doc: &DocumentUpsert) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO {table} \
         (source, url_norm, raw_payload, parsed_text, content_hash, http_etag, \
          http_last_modified, status_code, word_count, fetched_at, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now()) \
         ON CONFLICT (source, url_norm) DO UPDATE SET \
           raw_payload = EXCLUDED.raw_payload, \
           parsed_text = EXCLUDED.parsed_text, \
           content_hash = EXCLUDED.content_hash, \
           http_etag = EXCLUDED.http_etag, \
           http_last_modified = EXCLUDED.http_last_modified, \
           status_code = EXCLUDED.status_code, \
           word_count = EXCLUDED.word_count, \
           fetched_at = EXCLUDED.fetched_at, \
           updated_at = now()"
    );
    sqlx::query(&sql)
        .bind(doc.source.as_str())
        .bind(&doc.url_norm)
        .bind(&doc.raw_payload)
        .bind(&doc.parsed_text)
        .bind(&doc.content_hash)
        .bind(&doc.http_etag)
        .bind(&doc.http_last_modified)
        .bind(doc.status_code)
        .bind(doc.word_count)
        .bind(doc.fetched_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Updates only the HTTP validators and `fetched_at`, leaving stored
/// content untouched. Used on a 304 response and on an unchanged content
/// hash. If no document exists yet for the key, inserts a bare validators
/// row so a later conditional request still has something to compare
/// against.
pub async fn touch_validators(
    pool: &PgPool,
    table: &str,
    touch: &ValidatorsTouch,
) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO {table} \
         (source, url_norm, word_count, http_etag, http_last_modified, status_code, \
          fetched_at, created_at, updated_at) \
         VALUES ($1, $2, 0, $3, $4, $5, $6, now(), now()) \
         ON CONFLICT (source, url_norm) DO UPDATE SET \
           http_etag = EXCLUDED.http_etag, \
           http_last_modified = EXCLUDED.http_last_modified, \
           status_code = EXCLUDED.status_code, \
           fetched_at = EXCLUDED.fetched_at, \
           updated_at = now()"
    );
    sqlx::query(&sql)
        .bind(touch.source.as_str())
        .bind(&touch.url_norm)
        .bind(&touch.http_etag)
        .bind(&touch.http_last_modified)
        .bind(touch.status_code)
        .bind(touch.fetched_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_by_source(pool: &PgPool, table: &str) -> StoreResult<Vec<DocumentSourceCount>> {
    let sql =
        format!("SELECT source, COUNT(*) AS count FROM {table} GROUP BY source ORDER BY count DESC");
    let rows = sqlx::query_as::<_, DocumentSourceCount>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn count_by_content_hash(
    pool: &PgPool,
    table: &str,
) -> StoreResult<Vec<(Option<String>, i64)>> {
    let sql = format!(
        "SELECT content_hash, COUNT(*) AS count FROM {table} \
         GROUP BY content_hash ORDER BY count DESC"
    );
    let rows: Vec<(Option<String>, i64)> = sqlx::query_as(&sql).fetch_all(pool).await?;
    Ok(rows)
}
