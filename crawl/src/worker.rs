use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use reqwest::StatusCode;
use std::sync::OnceLock;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crawl_core::{
    content_hash, word_count, DocumentStore, DocumentUpsert, RateLimiter, Source, TaskStore,
    TaskUpsert, ValidatorsTouch,
};

use crate::config::LogicConfig;
use crate::fetcher::Fetcher;
use crate::health::HealthHandle;
use crate::parser;

static CANONICAL_RE: OnceLock<Regex> = OnceLock::new();

fn canonical_regex() -> &'static Regex {
    CANONICAL_RE.get_or_init(|| {
        Regex::new(r#"<link[^>]+rel=["']canonical["'][^>]+href=["']([^"']+)["']"#)
            .expect("static regex")
    })
}

fn extract_canonical(raw_html: &str) -> Option<String> {
    canonical_regex()
        .captures(raw_html)
        .map(|c| c[1].to_string())
}

fn compute_backoff_seconds(retries: i32, base: f64, cap: f64) -> f64 {
    let exp = 2f64.powi(retries.max(0));
    (base * exp).min(cap)
}

/// One worker's claim -> fetch -> parse -> dedupe -> mark loop for a single
/// source, running until `stop` is cancelled.
pub struct Worker {
    pub worker_id: String,
    pub source: Source,
    pub min_words: usize,
    pub supports_canonical: bool,
}

impl Worker {
    pub async fn run(
        &self,
        tasks: &TaskStore,
        documents: &DocumentStore,
        fetcher: &Fetcher,
        rate_limiter: &RateLimiter,
        logic: &LogicConfig,
        stop: &CancellationToken,
        health: &HealthHandle,
    ) {
        loop {
            if stop.is_cancelled() {
                break;
            }
            health.report_healthy().await;

            let claimed = match tasks
                .claim_task(
                    self.source.as_str(),
                    &self.worker_id,
                    ChronoDuration::seconds(logic.lock_ttl_seconds),
                )
                .await
            {
                Ok(task) => task,
                Err(err) => {
                    warn!(worker = %self.worker_id, error = %err, "claim failed");
                    None
                }
            };

            let Some(task) = claimed else {
                tokio::select! {
                    _ = tokio::time::sleep(StdDuration::from_millis(200)) => {}
                    _ = stop.cancelled() => break,
                }
                continue;
            };

            self.process(&task, tasks, documents, fetcher, rate_limiter, logic, stop)
                .await;
        }
    }

    async fn process(
        &self,
        task: &crawl_core::Task,
        tasks: &TaskStore,
        documents: &DocumentStore,
        fetcher: &Fetcher,
        rate_limiter: &RateLimiter,
        logic: &LogicConfig,
        stop: &CancellationToken,
    ) {
        let url_norm = task.url_norm.clone();
        let source_str = self.source.as_str();
        let recrawl_at = Utc::now() + ChronoDuration::seconds(logic.recrawl_seconds);

        let prior_hash = documents
            .get_content_hash(source_str, &url_norm)
            .await
            .unwrap_or(None);

        let validators = documents
            .get_validators(source_str, &url_norm)
            .await
            .unwrap_or(None)
            .unwrap_or((None, None));

        if !rate_limiter.wait(stop).await {
            return;
        }

        let fetch_result = self
            .fetch_effective_body(task, &validators, fetcher, stop)
            .await;

        let (raw_html, status, etag, last_modified) = match fetch_result {
            Ok(r) => r,
            Err(err) => {
                self.handle_failure(task, tasks, logic, &err.to_string()).await;
                return;
            }
        };

        if status == StatusCode::NOT_MODIFIED {
            let _ = documents
                .touch_validators(&ValidatorsTouch {
                    source: self.source,
                    url_norm: url_norm.clone(),
                    http_etag: etag,
                    http_last_modified: last_modified,
                    status_code: 304,
                    fetched_at: Utc::now(),
                })
                .await;
            let _ = tasks
                .mark_done(source_str, &url_norm, recrawl_at, "304 not modified")
                .await;
            return;
        }

        if self.supports_canonical {
            if let Some(canonical_raw) = extract_canonical(&raw_html) {
                if let Ok(canonical_norm) = crawl_core::normalize_url(&canonical_raw) {
                    if canonical_norm != url_norm {
                        let canonical_upsert =
                            TaskUpsert::new(self.source, canonical_norm.clone(), task.priority)
                                .with_next_fetch_at(Utc::now())
                                .with_meta(task.meta.clone());
                        let original_upsert =
                            TaskUpsert::new(self.source, url_norm.clone(), task.priority)
                                .with_next_fetch_at(recrawl_at);
                        let _ = tasks.mark_alias(&original_upsert, &canonical_upsert).await;
                        return;
                    }
                }
            }
        }

        let parsed_text = parser::parse(self.source, &raw_html);
        let words = word_count(&parsed_text);

        if words < self.min_words {
            let _ = tasks
                .mark_skipped(source_str, &url_norm, recrawl_at, &format!("too_short words={words}"))
                .await;
            return;
        }

        let new_hash = content_hash(&parsed_text);
        if prior_hash.as_deref() == Some(new_hash.as_str()) {
            let _ = documents
                .touch_validators(&ValidatorsTouch {
                    source: self.source,
                    url_norm: url_norm.clone(),
                    http_etag: etag,
                    http_last_modified: last_modified,
                    status_code: status.as_u16() as i32,
                    fetched_at: Utc::now(),
                })
                .await;
            let _ = tasks.mark_done(source_str, &url_norm, recrawl_at, "same_hash").await;
            return;
        }

        let upsert = DocumentUpsert {
            source: self.source,
            url_norm: url_norm.clone(),
            raw_payload: raw_html,
            parsed_text,
            content_hash: new_hash,
            http_etag: etag,
            http_last_modified: last_modified,
            status_code: status.as_u16() as i32,
            word_count: words as i32,
            fetched_at: Utc::now(),
        };
        if let Err(err) = documents.upsert_document(&upsert).await {
            self.handle_failure(task, tasks, logic, &err.to_string()).await;
            return;
        }

        if let Err(err) = tasks.mark_done(source_str, &url_norm, recrawl_at, "updated").await {
            warn!(url = %url_norm, error = %err, "mark_done failed after upsert_document");
        }
    }

    /// Performs the conditional fetch; for the encyclopedia source with a
    /// `meta.title` hint, replaces the body with a second fetch against the
    /// render endpoint for that title (the two-phase fetch).
    async fn fetch_effective_body(
        &self,
        task: &crawl_core::Task,
        validators: &(Option<String>, Option<String>),
        fetcher: &Fetcher,
        stop: &CancellationToken,
    ) -> Result<(String, StatusCode, Option<String>, Option<String>), crate::fetcher::FetchError>
    {
        let prior_etag = validators.0.as_deref();
        let prior_last_modified = validators.1.as_deref();

        let response = fetcher
            .get(&task.url_norm, prior_etag, prior_last_modified, stop)
            .await?;

        if response.not_modified() {
            return Ok((String::new(), response.status, response.etag, response.last_modified));
        }

        if self.source == Source::Encyclopedia {
            if let Some(title) = task.meta.get("title").and_then(|v| v.as_str()) {
                let render_url = format!(
                    "{}?action=parse&format=json&prop=text&page={}",
                    task.url_norm.split('?').next().unwrap_or(&task.url_norm),
                    title.replace(' ', "_")
                );
                if let Ok(rendered) = fetcher.get(&render_url, None, None, stop).await {
                    if rendered.status == StatusCode::OK {
                        let body = extract_rendered_html(&rendered.body).unwrap_or(rendered.body);
                        return Ok((
                            wrap_fragment(&body),
                            response.status,
                            response.etag,
                            response.last_modified,
                        ));
                    }
                }
            }
        }

        Ok((response.body, response.status, response.etag, response.last_modified))
    }

    async fn handle_failure(
        &self,
        task: &crawl_core::Task,
        tasks: &TaskStore,
        logic: &LogicConfig,
        err: &str,
    ) {
        let next_retries = task.retries + 1;
        let backoff = compute_backoff_seconds(
            task.retries,
            logic.retry_backoff_base_seconds,
            logic.retry_backoff_max_seconds,
        );
        let next_fetch_at = Utc::now() + ChronoDuration::milliseconds((backoff * 1000.0) as i64);
        let _ = tasks
            .mark_error(self.source.as_str(), &task.url_norm, next_fetch_at, err, true)
            .await;

        if next_retries >= logic.max_retries {
            let park_at =
                Utc::now() + ChronoDuration::milliseconds((logic.retry_backoff_max_seconds * 1000.0) as i64);
            let _ = tasks
                .mark_error(self.source.as_str(), &task.url_norm, park_at, err, false)
                .await;
            info!(url = %task.url_norm, "task parked after exhausting retries");
        }
    }
}

fn extract_rendered_html(api_json_body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(api_json_body).ok()?;
    parsed["parse"]["text"]["*"].as_str().map(|s| s.to_string())
}

fn wrap_fragment(fragment: &str) -> String {
    format!("<!doctype html><html><head></head><body>{fragment}</body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(compute_backoff_seconds(0, 2.0, 3600.0), 2.0);
        assert_eq!(compute_backoff_seconds(1, 2.0, 3600.0), 4.0);
        assert_eq!(compute_backoff_seconds(2, 2.0, 3600.0), 8.0);
        assert_eq!(compute_backoff_seconds(20, 2.0, 3600.0), 3600.0);
    }

    #[test]
    fn extracts_canonical_link() {
        let html = r#"<html><head><link rel="canonical" href="https://example.com/c"></head></html>"#;
        assert_eq!(extract_canonical(html), Some("https://example.com/c".to_string()));
    }

    #[test]
    fn no_canonical_link_returns_none() {
        let html = "<html><head></head></html>";
        assert_eq!(extract_canonical(html), None);
    }

    fn test_logic() -> LogicConfig {
        LogicConfig {
            delay_seconds: 0.0,
            lock_ttl_seconds: 300,
            recrawl_seconds: 604_800,
            max_retries: 5,
            user_agent: "test-agent/1.0".to_string(),
            worker_threads_per_source: 1,
            retry_backoff_base_seconds: 2.0,
            retry_backoff_max_seconds: 3600.0,
            timeout_seconds: 5,
            progress_log_seconds: 30,
        }
    }

    #[sqlx::test(migrations = "../crawl-core/migrations")]
    async fn processes_article_end_to_end_and_marks_done(pool: sqlx::PgPool) {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/a");
            then.status(200).body(
                "<html><body><article><p>This article paragraph is long enough to be kept \
                 in the final output easily.</p></article></body></html>",
            );
        });

        let tasks = TaskStore::new(pool.clone(), "crawl_tasks");
        let documents = DocumentStore::new(pool, "crawl_documents");
        let url = server.url("/a");
        tasks
            .upsert_task(&TaskUpsert::new(Source::ArticleSite, url.clone(), 5))
            .await
            .unwrap();

        let task = tasks
            .claim_task("article_site", "w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let rate_limiter = RateLimiter::new(std::time::Duration::from_millis(0));
        let stop = CancellationToken::new();
        let logic = test_logic();
        let worker = Worker {
            worker_id: "w".to_string(),
            source: Source::ArticleSite,
            min_words: 5,
            supports_canonical: false,
        };

        worker
            .process(&task, &tasks, &documents, &fetcher, &rate_limiter, &logic, &stop)
            .await;

        let hash = documents.get_content_hash("article_site", &url).await.unwrap();
        assert!(hash.is_some(), "a document should have been stored");

        let reclaimed = tasks
            .claim_task("article_site", "w2", ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(reclaimed.is_none(), "task should be done, not re-claimable immediately");
    }

    #[sqlx::test(migrations = "../crawl-core/migrations")]
    async fn skips_task_when_parsed_content_is_too_short(pool: sqlx::PgPool) {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/short");
            then.status(200)
                .body("<html><body><article><p>Too short.</p></article></body></html>");
        });

        let tasks = TaskStore::new(pool.clone(), "crawl_tasks");
        let documents = DocumentStore::new(pool, "crawl_documents");
        let url = server.url("/short");
        tasks
            .upsert_task(&TaskUpsert::new(Source::ArticleSite, url.clone(), 5))
            .await
            .unwrap();
        let task = tasks
            .claim_task("article_site", "w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let rate_limiter = RateLimiter::new(std::time::Duration::from_millis(0));
        let stop = CancellationToken::new();
        let worker = Worker {
            worker_id: "w".to_string(),
            source: Source::ArticleSite,
            min_words: 40,
            supports_canonical: false,
        };

        worker
            .process(&task, &tasks, &documents, &fetcher, &rate_limiter, &test_logic(), &stop)
            .await;

        let hash = documents.get_content_hash("article_site", &url).await.unwrap();
        assert!(hash.is_none(), "too-short content must not be persisted");
    }

    #[sqlx::test(migrations = "../crawl-core/migrations")]
    async fn not_modified_response_touches_validators_without_new_document(pool: sqlx::PgPool) {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/cached")
                .header("if-none-match", "\"seen\"");
            then.status(304).header("etag", "\"seen\"");
        });

        let tasks = TaskStore::new(pool.clone(), "crawl_tasks");
        let documents = DocumentStore::new(pool, "crawl_documents");
        let url = server.url("/cached");

        documents
            .upsert_document(&crawl_core::DocumentUpsert {
                source: Source::ArticleSite,
                url_norm: url.clone(),
                raw_payload: "<html>old</html>".to_string(),
                parsed_text: "old content that is long enough to pass the minimum word count gate here"
                    .to_string(),
                content_hash: content_hash("old content"),
                http_etag: Some("\"seen\"".to_string()),
                http_last_modified: None,
                status_code: 200,
                word_count: 10,
                fetched_at: Utc::now(),
            })
            .await
            .unwrap();

        tasks
            .upsert_task(&TaskUpsert::new(Source::ArticleSite, url.clone(), 5))
            .await
            .unwrap();
        let task = tasks
            .claim_task("article_site", "w", ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let rate_limiter = RateLimiter::new(std::time::Duration::from_millis(0));
        let stop = CancellationToken::new();
        let worker = Worker {
            worker_id: "w".to_string(),
            source: Source::ArticleSite,
            min_words: 5,
            supports_canonical: false,
        };

        worker
            .process(&task, &tasks, &documents, &fetcher, &rate_limiter, &test_logic(), &stop)
            .await;

        let reclaimed = tasks
            .claim_task("article_site", "w2", ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(reclaimed.is_none(), "304 response should mark the task done");
    }
}
