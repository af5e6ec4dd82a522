use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three content origins this crawler knows how to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Encyclopedia,
    ArticleSite,
    BlogSite,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Encyclopedia => "encyclopedia",
            Source::ArticleSite => "article_site",
            Source::BlogSite => "blog_site",
        }
    }

    pub fn all() -> [Source; 3] {
        [Source::Encyclopedia, Source::ArticleSite, Source::BlogSite]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encyclopedia" => Ok(Source::Encyclopedia),
            "article_site" => Ok(Source::ArticleSite),
            "blog_site" => Ok(Source::BlogSite),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Where a task currently sits in its claim/fetch/terminate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Fetching,
    Done,
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Fetching => "fetching",
            TaskState::Done => "done",
            TaskState::Error => "error",
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "fetching" => Ok(TaskState::Fetching),
            "done" => Ok(TaskState::Done),
            "error" => Ok(TaskState::Error),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of the intent to crawl one `(source, url_norm)` key.
///
/// Mirrors the `crawl_tasks` table row-for-row; `state` is kept as plain
/// text rather than a Postgres enum so the claim query's `IN (...)` list
/// stays a simple string comparison.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    pub source: String,
    pub url_norm: String,
    pub state: String,
    pub priority: i32,
    pub next_fetch_at: DateTime<Utc>,
    pub locked_until: DateTime<Utc>,
    pub locked_by: String,
    pub retries: i32,
    pub last_error: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl Task {
    pub fn task_state(&self) -> Result<TaskState, String> {
        TaskState::from_str(&self.state)
    }
}

/// Fields needed to upsert a task; used by discoverers.
#[derive(Debug, Clone)]
pub struct TaskUpsert {
    pub source: Source,
    pub url_norm: String,
    pub next_fetch_at: DateTime<Utc>,
    pub priority: i32,
    pub meta: serde_json::Value,
}

impl TaskUpsert {
    pub fn new(source: Source, url_norm: impl Into<String>, priority: i32) -> Self {
        Self {
            source,
            url_norm: url_norm.into(),
            next_fetch_at: Utc::now(),
            priority,
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_next_fetch_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_fetch_at = at;
        self
    }
}

/// The latest persisted content for one `(source, url_norm)` key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub source: String,
    pub url_norm: String,
    pub raw_payload: Option<String>,
    pub parsed_text: Option<String>,
    pub content_hash: Option<String>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub status_code: Option<i32>,
    pub word_count: i32,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully parsed, accepted document ready to be persisted in full.
#[derive(Debug, Clone)]
pub struct DocumentUpsert {
    pub source: Source,
    pub url_norm: String,
    pub raw_payload: String,
    pub parsed_text: String,
    pub content_hash: String,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub status_code: i32,
    pub word_count: i32,
    pub fetched_at: DateTime<Utc>,
}

/// Validators-only update applied on a 304 or an unchanged content hash.
#[derive(Debug, Clone)]
pub struct ValidatorsTouch {
    pub source: Source,
    pub url_norm: String,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    pub status_code: i32,
    pub fetched_at: DateTime<Utc>,
}

/// Grouped task/document counts, backing the progress reporter.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskStateCount {
    pub source: String,
    pub state: String,
    pub count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentSourceCount {
    pub source: String,
    pub count: i64,
}
