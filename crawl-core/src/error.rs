use thiserror::Error;

/// Errors surfaced by `TaskStore`/`DocumentStore` operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no task found for {source}/{url_norm}")]
    TaskNotFound { source: String, url_norm: String },

    #[error("no document found for {source}/{url_norm}")]
    DocumentNotFound { source: String, url_norm: String },

    #[error("lease no longer held for {source}/{url_norm} by {worker_id}")]
    LeaseLost {
        source: String,
        url_norm: String,
        worker_id: String,
    },

    #[error("invalid state stored for {source}/{url_norm}: {state}")]
    InvalidState {
        source: String,
        url_norm: String,
        state: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
