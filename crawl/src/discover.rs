use chrono::Utc;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crawl_core::{normalize_url, RateLimiter, Source, TaskStore, TaskUpsert};

use crate::config::{EncyclopediaConfig, ListingSourceConfig};
use crate::fetcher::Fetcher;
use crate::health::HealthHandle;

const ENCYCLOPEDIA_DISCOVERY_PRIORITY: i32 = 10;
const LISTING_DISCOVERY_PRIORITY: i32 = 5;

/// Breadth-first walk of the encyclopedia's category graph, seeded from
/// `config.seed_categories`. Enqueues a task (with `meta.title` set) for
/// every page member encountered, and recurses into subcategories up to
/// `max_depth`. Runs to completion, then returns.
pub async fn discover_encyclopedia(
    fetcher: &Fetcher,
    rate_limiter: &RateLimiter,
    store: &TaskStore,
    config: &EncyclopediaConfig,
    stop: &CancellationToken,
    health: &HealthHandle,
) {
    let mut queue: VecDeque<(String, u32)> = config
        .seed_categories
        .iter()
        .map(|c| (c.clone(), 0))
        .collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut enqueued_pages = 0usize;

    while let Some((category, depth)) = queue.pop_front() {
        if stop.is_cancelled() || enqueued_pages >= config.discovery_max_pages {
            break;
        }
        if !visited.insert(category.clone()) {
            continue;
        }
        health.report_healthy().await;

        if depth < config.max_depth {
            if !rate_limiter.wait(stop).await {
                break;
            }
            match fetch_category_members(fetcher, &config.api_base_url, &category, "subcat", stop)
                .await
            {
                Ok(subcats) => {
                    for title in subcats {
                        queue.push_back((title, depth + 1));
                    }
                }
                Err(err) => warn!(%category, error = %err, "failed to list subcategories"),
            }
        }

        if !rate_limiter.wait(stop).await {
            break;
        }
        match fetch_category_members(fetcher, &config.api_base_url, &category, "page", stop).await
        {
            Ok(pages) => {
                for title in pages {
                    if enqueued_pages >= config.discovery_max_pages {
                        break;
                    }
                    let url = format!(
                        "{}?title={}",
                        config.api_base_url,
                        title.replace(' ', "_")
                    );
                    let Ok(url_norm) = normalize_url(&url) else {
                        continue;
                    };
                    let upsert = TaskUpsert::new(
                        Source::Encyclopedia,
                        url_norm,
                        ENCYCLOPEDIA_DISCOVERY_PRIORITY,
                    )
                    .with_meta(serde_json::json!({ "title": title }));
                    if let Err(err) = store.upsert_task(&upsert).await {
                        warn!(error = %err, "failed to upsert encyclopedia task");
                        continue;
                    }
                    enqueued_pages += 1;
                    if enqueued_pages % 500 == 0 {
                        info!(enqueued_pages, "encyclopedia discovery progress");
                    }
                }
            }
            Err(err) => warn!(%category, error = %err, "failed to list category pages"),
        }
    }

    info!(enqueued_pages, "encyclopedia discovery finished");
}

/// Calls the category-enumeration endpoint for one category and one member
/// type (`subcat` or `page`), paging through continuation tokens until
/// exhausted.
async fn fetch_category_members(
    fetcher: &Fetcher,
    api_base_url: &str,
    category: &str,
    member_type: &str,
    stop: &CancellationToken,
) -> Result<Vec<String>, String> {
    let mut titles = Vec::new();
    let mut continuation: Option<String> = None;
    let cat_title = if category.contains(':') {
        category.to_string()
    } else {
        format!("Category:{category}")
    };

    loop {
        let mut url = format!(
            "{api_base_url}?action=query&list=categorymembers&cmtitle={}&cmtype={member_type}&cmlimit=500&format=json",
            urlencoding_replace(&cat_title)
        );
        if let Some(cont) = &continuation {
            url.push_str(&format!("&cmcontinue={}", urlencoding_replace(cont)));
        }

        let response = fetcher
            .get(&url, None, None, stop)
            .await
            .map_err(|e| e.to_string())?;
        if response.status != StatusCode::OK {
            return Err(format!("unexpected status {}", response.status));
        }

        let parsed: Value = serde_json::from_str(&response.body).map_err(|e| e.to_string())?;
        if let Some(members) = parsed["query"]["categorymembers"].as_array() {
            for member in members {
                if let Some(title) = member["title"].as_str() {
                    titles.push(title.to_string());
                }
            }
        }

        continuation = parsed["continue"]["cmcontinue"]
            .as_str()
            .map(|s| s.to_string());
        if continuation.is_none() {
            break;
        }
    }

    Ok(titles)
}

fn urlencoding_replace(s: &str) -> String {
    s.replace(' ', "%20").replace(':', "%3A")
}

/// Paginated-listing discovery shared by both listing-style sources. Walks
/// `from..=to`, extracting candidate article links from each listing page
/// and upserting them with `meta.listing` set to the originating URL.
pub async fn discover_listing(
    fetcher: &Fetcher,
    rate_limiter: &RateLimiter,
    store: &TaskStore,
    source: Source,
    config: &ListingSourceConfig,
    stop: &CancellationToken,
    health: &HealthHandle,
) {
    let pattern = match Regex::new(&config.link_pattern) {
        Ok(re) => re,
        Err(err) => {
            warn!(error = %err, "invalid link_pattern, aborting listing discovery");
            return;
        }
    };
    let href_pattern = match Regex::new(r#"href\s*=\s*["']([^"']+)["']"#) {
        Ok(re) => re,
        Err(_) => return,
    };

    let mut consecutive_404 = 0u32;
    let mut enqueued = 0usize;

    for page in config.listing_pages_from..=config.listing_pages_to {
        if stop.is_cancelled() {
            break;
        }
        health.report_healthy().await;

        let listing_url = config.listing_url_template.replace("{page}", &page.to_string());
        if !rate_limiter.wait(stop).await {
            break;
        }

        let listing_base = match Url::parse(&listing_url) {
            Ok(u) => u,
            Err(err) => {
                warn!(%listing_url, error = %err, "invalid listing url, skipping page");
                continue;
            }
        };

        let response = match fetcher.get(&listing_url, None, None, stop).await {
            Ok(r) => r,
            Err(err) => {
                warn!(%listing_url, error = %err, "listing fetch failed");
                continue;
            }
        };

        if response.status == StatusCode::NOT_FOUND {
            consecutive_404 += 1;
            if config.stop_after_consecutive_404 && consecutive_404 >= 3 {
                info!(page, "stopping listing discovery after three consecutive 404s");
                break;
            }
            continue;
        }
        consecutive_404 = 0;

        for capture in href_pattern.captures_iter(&response.body) {
            let href = &capture[1];
            // Resolves root-relative (`/articles/x.html`), protocol-relative
            // (`//host/x.html`), and fully relative hrefs against the
            // listing page's own origin, same as absolute hrefs.
            let Ok(resolved) = listing_base.join(href) else {
                continue;
            };
            let absolute = resolved.to_string();
            if !pattern.is_match(&absolute) {
                continue;
            }
            let Ok(url_norm) = normalize_url(&absolute) else {
                continue;
            };
            let upsert = TaskUpsert::new(source, url_norm, LISTING_DISCOVERY_PRIORITY)
                .with_next_fetch_at(Utc::now())
                .with_meta(serde_json::json!({ "listing": listing_url }));
            if let Err(err) = store.upsert_task(&upsert).await {
                warn!(error = %err, "failed to upsert listing task");
                continue;
            }
            enqueued += 1;
        }
    }

    info!(enqueued, %source, "listing discovery finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use httpmock::MockServer;
    use sqlx::PgPool;

    fn listing_config(server: &MockServer) -> ListingSourceConfig {
        ListingSourceConfig {
            enabled: true,
            min_words: 30,
            listing_pages_from: 1,
            listing_pages_to: 3,
            listing_url_template: format!("{}/listing/{{page}}.html", server.base_url()),
            link_pattern: format!(r"^{}/articles/[^\s]+\.html$", regex::escape(&server.base_url())),
            stop_after_consecutive_404: true,
        }
    }

    #[sqlx::test(migrations = "../crawl-core/migrations")]
    async fn discover_listing_enqueues_matching_links(pool: PgPool) {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/1.html");
            then.status(200).body(format!(
                "<a href=\"{0}/articles/a.html\">A</a> <a href=\"{0}/other/x.html\">X</a>",
                server.base_url()
            ));
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/2.html");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/3.html");
            then.status(404);
        });

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let rate_limiter = RateLimiter::new(std::time::Duration::from_millis(0));
        let store = TaskStore::new(pool, "crawl_tasks");
        let stop = CancellationToken::new();
        let health = HealthRegistry::new();
        let health_handle = health.register("test", chrono::Duration::seconds(60));
        let config = listing_config(&server);

        discover_listing(
            &fetcher,
            &rate_limiter,
            &store,
            Source::ArticleSite,
            &config,
            &stop,
            &health_handle,
        )
        .await;

        let claimed = store
            .claim_task("article_site", "w", chrono::Duration::seconds(30))
            .await
            .unwrap()
            .expect("the matching article link should have been enqueued");
        assert!(claimed.url_norm.ends_with("/articles/a.html"));

        let second = store
            .claim_task("article_site", "w2", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(second.is_none(), "the non-matching link must not be enqueued");
    }

    #[sqlx::test(migrations = "../crawl-core/migrations")]
    async fn discover_listing_resolves_root_relative_hrefs(pool: PgPool) {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/1.html");
            then.status(200)
                .body("<a href=\"/articles/relative.html\">A</a>");
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/2.html");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/listing/3.html");
            then.status(404);
        });

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let rate_limiter = RateLimiter::new(std::time::Duration::from_millis(0));
        let store = TaskStore::new(pool, "crawl_tasks");
        let stop = CancellationToken::new();
        let health = HealthRegistry::new();
        let health_handle = health.register("test", chrono::Duration::seconds(60));
        let config = listing_config(&server);

        discover_listing(
            &fetcher,
            &rate_limiter,
            &store,
            Source::ArticleSite,
            &config,
            &stop,
            &health_handle,
        )
        .await;

        let claimed = store
            .claim_task("article_site", "w", chrono::Duration::seconds(30))
            .await
            .unwrap()
            .expect("the root-relative link should have been resolved against the listing origin and enqueued");
        assert!(claimed.url_norm.ends_with("/articles/relative.html"));
    }

    #[tokio::test]
    async fn fetch_category_members_follows_continuation() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .query_param("cmtype", "page")
                .query_param_is_missing("cmcontinue");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"query":{"categorymembers":[{"title":"Page One"}]},"continue":{"cmcontinue":"abc"}}"#);
        });
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .query_param("cmtype", "page")
                .query_param("cmcontinue", "abc");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"query":{"categorymembers":[{"title":"Page Two"}]}}"#);
        });

        let fetcher = Fetcher::new("test-agent/1.0", std::time::Duration::from_secs(5), 0).unwrap();
        let stop = CancellationToken::new();
        let titles = fetch_category_members(&fetcher, &server.base_url(), "Animals", "page", &stop)
            .await
            .unwrap();

        assert_eq!(titles, vec!["Page One".to_string(), "Page Two".to_string()]);
    }

    #[test]
    fn urlencoding_replace_escapes_spaces_and_colons() {
        assert_eq!(urlencoding_replace("Category:Foo Bar"), "Category%3AFoo%20Bar");
    }
}
