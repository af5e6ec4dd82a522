use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use crate::error::{StoreError, StoreResult};
use crate::types::{Task, TaskStateCount, TaskUpsert};

/// Table name is config-driven, not user input, so it is interpolated
/// directly into the query text; every query here still binds all values
/// through `$n` placeholders.
fn task_columns() -> &'static str {
    "source, url_norm, state, priority, next_fetch_at, locked_until, locked_by, \
     retries, last_error, meta, created_at, started_at, finished_at, note"
}

pub async fn upsert_task(pool: &PgPool, table: &str, upsert: &TaskUpsert) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO {table} \
         (source, url_norm, state, priority, next_fetch_at, locked_until, locked_by, retries, meta, created_at) \
         VALUES ($1, $2, 'queued', $3, $4, 'epoch'::timestamptz, '', 0, $5, now()) \
         ON CONFLICT (source, url_norm) DO UPDATE SET \
           priority = EXCLUDED.priority, \
           meta = EXCLUDED.meta, \
           next_fetch_at = LEAST({table}.next_fetch_at, EXCLUDED.next_fetch_at)"
    );
    sqlx::query(&sql)
        .bind(upsert.source.as_str())
        .bind(&upsert.url_norm)
        .bind(upsert.priority)
        .bind(upsert.next_fetch_at)
        .bind(&upsert.meta)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically claims the highest-priority, earliest-eligible task for a
/// source, or returns `None` if no task is currently eligible. Eligible
/// means `queued`/`error` and due, or a `fetching` task whose lease lapsed.
pub async fn claim_task(
    pool: &PgPool,
    table: &str,
    source: &str,
    worker_id: &str,
    lease_ttl: chrono::Duration,
) -> StoreResult<Option<Task>> {
    let cols = task_columns();
    let sql = format!(
        "WITH candidate AS ( \
           SELECT source, url_norm FROM {table} \
           WHERE source = $1 \
             AND ((state IN ('queued', 'error')) OR (state = 'fetching' AND locked_until <= now())) \
             AND next_fetch_at <= now() \
           ORDER BY priority DESC, next_fetch_at ASC, created_at ASC \
           LIMIT 1 \
           FOR UPDATE SKIP LOCKED \
         ) \
         UPDATE {table} t \
         SET state = 'fetching', locked_until = $2, locked_by = $3, started_at = now() \
         FROM candidate c \
         WHERE t.source = c.source AND t.url_norm = c.url_norm \
         RETURNING t.{}",
        cols.replace(", ", ", t.")
    );
    let locked_until = Utc::now() + lease_ttl;
    let task = sqlx::query_as::<_, Task>(&sql)
        .bind(source)
        .bind(locked_until)
        .bind(worker_id)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

async fn mark_terminal(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
    state: &str,
    next_fetch_at: DateTime<Utc>,
    note: &str,
) -> StoreResult<()> {
    let sql = format!(
        "UPDATE {table} \
         SET state = $1, locked_until = 'epoch'::timestamptz, locked_by = '', \
             next_fetch_at = $2, finished_at = now(), note = $3, retries = 0 \
         WHERE source = $4 AND url_norm = $5"
    );
    let result = sqlx::query(&sql)
        .bind(state)
        .bind(next_fetch_at)
        .bind(note)
        .bind(source)
        .bind(url_norm)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::TaskNotFound {
            source: source.to_string(),
            url_norm: url_norm.to_string(),
        });
    }
    Ok(())
}

pub async fn mark_done(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
    next_fetch_at: DateTime<Utc>,
    note: &str,
) -> StoreResult<()> {
    mark_terminal(pool, table, source, url_norm, "done", next_fetch_at, note).await
}

pub async fn mark_skipped(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
    next_fetch_at: DateTime<Utc>,
    reason: &str,
) -> StoreResult<()> {
    let note = format!("skipped: {reason}");
    mark_terminal(pool, table, source, url_norm, "done", next_fetch_at, &note).await
}

pub async fn mark_error(
    pool: &PgPool,
    table: &str,
    source: &str,
    url_norm: &str,
    next_fetch_at: DateTime<Utc>,
    err: &str,
    inc_retry: bool,
) -> StoreResult<()> {
    let truncated: String = err.chars().take(5000).collect();
    let sql = format!(
        "UPDATE {table} \
         SET state = 'error', locked_until = 'epoch'::timestamptz, locked_by = '', \
             next_fetch_at = $1, last_error = $2, \
             retries = retries + CASE WHEN $3 THEN 1 ELSE 0 END \
         WHERE source = $4 AND url_norm = $5"
    );
    let result = sqlx::query(&sql)
        .bind(next_fetch_at)
        .bind(&truncated)
        .bind(inc_retry)
        .bind(source)
        .bind(url_norm)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::TaskNotFound {
            source: source.to_string(),
            url_norm: url_norm.to_string(),
        });
    }
    Ok(())
}

/// Upserts a task for the canonical URL, then marks the original task done
/// with an alias note, as one transaction.
pub async fn mark_alias(
    pool: &PgPool,
    table: &str,
    original: &TaskUpsert,
    canonical: &TaskUpsert,
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO {table} \
         (source, url_norm, state, priority, next_fetch_at, locked_until, locked_by, retries, meta, created_at) \
         VALUES ($1, $2, 'queued', $3, $4, 'epoch'::timestamptz, '', 0, $5, now()) \
         ON CONFLICT (source, url_norm) DO UPDATE SET \
           priority = EXCLUDED.priority, \
           meta = EXCLUDED.meta, \
           next_fetch_at = LEAST({table}.next_fetch_at, EXCLUDED.next_fetch_at)"
    );
    sqlx::query(&sql)
        .bind(canonical.source.as_str())
        .bind(&canonical.url_norm)
        .bind(canonical.priority)
        .bind(canonical.next_fetch_at)
        .bind(&canonical.meta)
        .execute(&mut *tx)
        .await?;

    let note = format!("alias->canonical {}", canonical.url_norm);
    let done_sql = format!(
        "UPDATE {table} \
         SET state = 'done', locked_until = 'epoch'::timestamptz, locked_by = '', \
             next_fetch_at = $1, finished_at = now(), note = $2, retries = 0 \
         WHERE source = $3 AND url_norm = $4"
    );
    sqlx::query(&done_sql)
        .bind(original.next_fetch_at)
        .bind(&note)
        .bind(original.source.as_str())
        .bind(&original.url_norm)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn stats_by_state(pool: &PgPool, table: &str) -> StoreResult<Vec<TaskStateCount>> {
    let sql = format!(
        "SELECT source, state, COUNT(*) AS count FROM {table} \
         GROUP BY source, state ORDER BY count DESC"
    );
    let rows = sqlx::query_as::<_, TaskStateCount>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
