mod config;
pub use config::PoolConfig;

mod error;
pub use error::{StoreError, StoreResult};

mod types;
pub use types::{
    Document, DocumentSourceCount, DocumentUpsert, Source, Task, TaskStateCount, TaskUpsert,
    TaskState, ValidatorsTouch,
};

mod ops;

mod store;
pub use store::TaskStore;

mod doc_store;
pub use doc_store::DocumentStore;

mod rate_limiter;
pub use rate_limiter::RateLimiter;

mod url_norm;
pub use url_norm::normalize_url;

mod tokenize;
pub use tokenize::{content_hash, word_count};
