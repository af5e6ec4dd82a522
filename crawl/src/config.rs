use serde::Deserialize;
use std::path::Path;

use crawl_core::PoolConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_tasks_collection")]
    pub tasks_collection: String,
    #[serde(default = "default_documents_collection")]
    pub documents_collection: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database() -> String {
    "crawl".to_string()
}

fn default_tasks_collection() -> String {
    "crawl_tasks".to_string()
}

fn default_documents_collection() -> String {
    "crawl_documents".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl DbConfig {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            uri: self.uri.clone(),
            database: self.database.clone(),
            tasks_table: self.tasks_collection.clone(),
            documents_table: self.documents_collection.clone(),
            max_connections: self.max_connections,
            min_connections: 1,
            acquire_timeout_seconds: 10,
            idle_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogicConfig {
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: i64,
    #[serde(default = "default_recrawl_seconds")]
    pub recrawl_seconds: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_worker_threads_per_source")]
    pub worker_threads_per_source: usize,
    #[serde(default = "default_retry_backoff_base_seconds")]
    pub retry_backoff_base_seconds: f64,
    #[serde(default = "default_retry_backoff_max_seconds")]
    pub retry_backoff_max_seconds: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_progress_log_seconds")]
    pub progress_log_seconds: u64,
}

fn default_delay_seconds() -> f64 {
    1.0
}
fn default_lock_ttl_seconds() -> i64 {
    300
}
fn default_recrawl_seconds() -> i64 {
    7 * 24 * 3600
}
fn default_max_retries() -> i32 {
    5
}
fn default_user_agent() -> String {
    "crawl/0.1 (+https://example.invalid/bot)".to_string()
}
fn default_worker_threads_per_source() -> usize {
    2
}
fn default_retry_backoff_base_seconds() -> f64 {
    2.0
}
fn default_retry_backoff_max_seconds() -> f64 {
    3600.0
}
fn default_timeout_seconds() -> u64 {
    15
}
fn default_progress_log_seconds() -> u64 {
    30
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            recrawl_seconds: default_recrawl_seconds(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            worker_threads_per_source: default_worker_threads_per_source(),
            retry_backoff_base_seconds: default_retry_backoff_base_seconds(),
            retry_backoff_max_seconds: default_retry_backoff_max_seconds(),
            timeout_seconds: default_timeout_seconds(),
            progress_log_seconds: default_progress_log_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncyclopediaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default)]
    pub seed_categories: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_discovery_max_pages")]
    pub discovery_max_pages: usize,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_api_base_url() -> String {
    "https://example.invalid/w/api.php".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_listing_pages_from")]
    pub listing_pages_from: u32,
    #[serde(default = "default_listing_pages_to")]
    pub listing_pages_to: u32,
    /// Listing page URL template; `{page}` is replaced with the page index.
    #[serde(default = "default_listing_url_template")]
    pub listing_url_template: String,
    /// Regex matched against `href` attributes on the listing page to find
    /// candidate article links.
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,
    /// Whether to stop discovery after three consecutive 404 listing pages.
    #[serde(default)]
    pub stop_after_consecutive_404: bool,
}

fn default_listing_url_template() -> String {
    "https://example.invalid/articles/{page}.html".to_string()
}

fn default_link_pattern() -> String {
    r"^https?://[^\s]+/articles/[^\s]+\.html$".to_string()
}

fn default_min_words() -> usize {
    40
}
fn default_max_depth() -> u32 {
    3
}
fn default_discovery_max_pages() -> usize {
    20_000
}
fn default_listing_pages_from() -> u32 {
    1
}
fn default_listing_pages_to() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub encyclopedia: EncyclopediaConfig,
    #[serde(default)]
    pub article_site: ListingSourceConfig,
    #[serde(default)]
    pub blog_site: ListingSourceConfig,
}

impl Default for EncyclopediaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_words: default_min_words(),
            seed_categories: Vec::new(),
            max_depth: default_max_depth(),
            discovery_max_pages: default_discovery_max_pages(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for ListingSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_words: 30,
            listing_pages_from: default_listing_pages_from(),
            listing_pages_to: default_listing_pages_to(),
            listing_url_template: default_listing_url_template(),
            link_pattern: default_link_pattern(),
            stop_after_consecutive_404: false,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            encyclopedia: EncyclopediaConfig::default(),
            article_site: ListingSourceConfig::default(),
            blog_site: ListingSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_max_mb")]
    pub max_mb: u64,
    #[serde(default = "default_log_backups")]
    pub backups: u32,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_max_mb() -> u64 {
    50
}
fn default_log_backups() -> u32 {
    5
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
            max_mb: default_log_max_mb(),
            backups: default_log_backups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}
fn default_health_port() -> u16 {
    8080
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub db: DbConfig,
    #[serde(default)]
    pub logic: LogicConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl RootConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: RootConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }
}
