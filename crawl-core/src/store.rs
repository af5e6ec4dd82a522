use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;

use crate::error::StoreResult;
use crate::ops::task_ops;
use crate::types::{Task, TaskStateCount, TaskUpsert};

/// Thin wrapper over the task-queue operations, holding the pool and the
/// configured table name so callers never see raw SQL.
#[derive(Clone)]
pub struct TaskStore {
    pool: PgPool,
    table: String,
}

impl TaskStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn upsert_task(&self, upsert: &TaskUpsert) -> StoreResult<()> {
        task_ops::upsert_task(&self.pool, &self.table, upsert).await
    }

    pub async fn claim_task(&self, source: &str, worker_id: &str, lease_ttl: Duration) -> StoreResult<Option<Task>> {
        task_ops::claim_task(&self.pool, &self.table, source, worker_id, lease_ttl).await
    }

    pub async fn mark_done(
        &self,
        source: &str,
        url_norm: &str,
        next_fetch_at: DateTime<Utc>,
        note: &str,
    ) -> StoreResult<()> {
        task_ops::mark_done(&self.pool, &self.table, source, url_norm, next_fetch_at, note).await
    }

    pub async fn mark_skipped(
        &self,
        source: &str,
        url_norm: &str,
        next_fetch_at: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<()> {
        task_ops::mark_skipped(&self.pool, &self.table, source, url_norm, next_fetch_at, reason).await
    }

    pub async fn mark_error(
        &self,
        source: &str,
        url_norm: &str,
        next_fetch_at: DateTime<Utc>,
        err: &str,
        inc_retry: bool,
    ) -> StoreResult<()> {
        task_ops::mark_error(
            &self.pool,
            &self.table,
            source,
            url_norm,
            next_fetch_at,
            err,
            inc_retry,
        )
        .await
    }

    pub async fn mark_alias(&self, original: &TaskUpsert, canonical: &TaskUpsert) -> StoreResult<()> {
        task_ops::mark_alias(&self.pool, &self.table, original, canonical).await
    }

    pub async fn stats_by_state(&self) -> StoreResult<Vec<TaskStateCount>> {
        task_ops::stats_by_state(&self.pool, &self.table).await
    }
}
