use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("fetch cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FetchResponse {
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

/// HTTP client wrapper with a bounded transport-retry and conditional-header
/// support. Individual non-2xx status codes are passed through to the
/// caller rather than treated as errors here (worker-level policy).
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff_base: Duration,
    retry_backoff_cap: Duration,
}

impl Fetcher {
    pub fn new(user_agent: &str, timeout: Duration, max_retries: u32) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            max_retries,
            retry_backoff_base: Duration::from_millis(500),
            retry_backoff_cap: Duration::from_secs(5),
        })
    }

    /// Fetches `url`, optionally setting `If-None-Match`/`If-Modified-Since`
    /// from the last known validators. Retries transport-level errors (not
    /// HTTP status codes) with capped exponential backoff, interruptible by
    /// `stop`.
    pub async fn get(
        &self,
        url: &str,
        prior_etag: Option<&str>,
        prior_last_modified: Option<&str>,
        stop: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = prior_etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(HeaderName::from_static("if-none-match"), value);
            }
        }
        if let Some(last_modified) = prior_last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(HeaderName::from_static("if-modified-since"), value);
            }
        }

        let mut attempt = 0u32;
        loop {
            if stop.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match self.client.get(url).headers(headers.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    let etag = response
                        .headers()
                        .get("etag")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let last_modified = response
                        .headers()
                        .get("last-modified")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let body = response.text().await.unwrap_or_default();
                    return Ok(FetchResponse {
                        status,
                        body,
                        etag,
                        last_modified,
                    });
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(FetchError::Request(err));
                    }
                    let delay = self
                        .retry_backoff_base
                        .saturating_mul(1 << (attempt - 1).min(10))
                        .min(self.retry_backoff_cap);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.cancelled() => return Err(FetchError::Cancelled),
                    }
                }
            }
        }
    }
}
