use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::StoreResult;

/// Connection-pool and table-naming configuration for the shared Postgres
/// database backing both `TaskStore` and `DocumentStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub uri: String,
    pub database: String,
    #[serde(default = "default_tasks_table")]
    pub tasks_table: String,
    #[serde(default = "default_documents_table")]
    pub documents_table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

fn default_tasks_table() -> String {
    "crawl_tasks".to_string()
}

fn default_documents_table() -> String {
    "crawl_documents".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_seconds() -> u64 {
    10
}

fn default_idle_timeout_seconds() -> u64 {
    60
}

impl PoolConfig {
    pub async fn connect(&self) -> StoreResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .connect(&self.uri)
            .await?;
        Ok(pool)
    }
}
