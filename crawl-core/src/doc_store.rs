use sqlx::postgres::PgPool;

use crate::error::StoreResult;
use crate::ops::document_ops;
use crate::types::{DocumentSourceCount, DocumentUpsert, ValidatorsTouch};

/// Thin wrapper over the document-store operations, mirroring `TaskStore`.
#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
    table: String,
}

impl DocumentStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn get_content_hash(&self, source: &str, url_norm: &str) -> StoreResult<Option<String>> {
        document_ops::get_content_hash(&self.pool, &self.table, source, url_norm).await
    }

    pub async fn get_validators(
        &self,
        source: &str,
        url_norm: &str,
    ) -> StoreResult<Option<(Option<String>, Option<String>)>> {
        document_ops::get_validators(&self.pool, &self.table, source, url_norm).await
    }

    pub async fn upsert_document(&self, doc: &DocumentUpsert) -> StoreResult<()> {
        document_ops::upsert_document(&self.pool, &self.table, doc).await
    }

    pub async fn touch_validators(&self, touch: &ValidatorsTouch) -> StoreResult<()> {
        document_ops::touch_validators(&self.pool, &self.table, touch).await
    }

    pub async fn count_by_source(&self) -> StoreResult<Vec<DocumentSourceCount>> {
        document_ops::count_by_source(&self.pool, &self.table).await
    }

    pub async fn count_by_content_hash(&self) -> StoreResult<Vec<(Option<String>, i64)>> {
        document_ops::count_by_content_hash(&self.pool, &self.table).await
    }
}
