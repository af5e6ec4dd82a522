use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crawl_core::{DocumentStore, RateLimiter, Source, TaskStore};

use crate::config::{LogicConfig, RootConfig};
use crate::discover;
use crate::fetcher::Fetcher;
use crate::health::HealthRegistry;
use crate::metrics;
use crate::progress;
use crate::worker::Worker;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Owns the process lifecycle: connects the pool, spawns one discoverer and
/// `worker_threads_per_source` workers per enabled source, the progress
/// reporter, and the health/metrics HTTP listener, then waits for SIGINT or
/// SIGTERM to cancel everything cooperatively.
pub struct Supervisor {
    config: RootConfig,
}

impl Supervisor {
    pub fn new(config: RootConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let pool = self.config.db.to_pool_config().connect().await?;
        sqlx::migrate!("../crawl-core/migrations").run(&pool).await?;

        let tasks = TaskStore::new(pool.clone(), self.config.db.tasks_collection.clone());
        let documents = DocumentStore::new(pool, self.config.db.documents_collection.clone());

        let fetcher = Arc::new(Fetcher::new(
            &self.config.logic.user_agent,
            Duration::from_secs(self.config.logic.timeout_seconds),
            3,
        )?);

        let stop = CancellationToken::new();
        let health = HealthRegistry::new();

        let mut handles = Vec::new();

        if self.config.sources.encyclopedia.enabled {
            let config = self.config.sources.encyclopedia.clone();
            let min_words = config.min_words;
            let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs_f64(
                self.config.logic.delay_seconds,
            )));
            let discover_health = health.register("encyclopedia-discover", chrono::Duration::seconds(60));
            let tasks = tasks.clone();
            let documents = documents.clone();
            let fetcher = fetcher.clone();
            let logic = self.config.logic.clone();
            let stop = stop.clone();
            let health = health.clone();
            let discover_tasks = tasks.clone();
            let discover_fetcher = fetcher.clone();
            let discover_rate_limiter = rate_limiter.clone();
            let discover_stop = stop.clone();
            handles.push(tokio::spawn(async move {
                discover::discover_encyclopedia(
                    &discover_fetcher,
                    &discover_rate_limiter,
                    &discover_tasks,
                    &config,
                    &discover_stop,
                    &discover_health,
                )
                .await;
            }));

            handles.push(tokio::spawn(async move {
                spawn_workers(
                    Source::Encyclopedia,
                    min_words,
                    false,
                    tasks,
                    documents,
                    fetcher,
                    rate_limiter,
                    logic,
                    stop,
                    health,
                )
                .await;
            }));
        }

        if self.config.sources.article_site.enabled {
            handles.extend(self.spawn_listing_source(
                Source::ArticleSite,
                self.config.sources.article_site.min_words,
                tasks.clone(),
                documents.clone(),
                fetcher.clone(),
                stop.clone(),
                &health,
            ));
        }

        if self.config.sources.blog_site.enabled {
            handles.extend(self.spawn_listing_source(
                Source::BlogSite,
                self.config.sources.blog_site.min_words,
                tasks.clone(),
                documents.clone(),
                fetcher.clone(),
                stop.clone(),
                &health,
            ));
        }

        let progress_handle = {
            let tasks = tasks.clone();
            let documents = documents.clone();
            let interval = self.config.logic.progress_log_seconds;
            let stop = stop.clone();
            let progress_health =
                health.register("progress", chrono::Duration::seconds((interval * 4) as i64));
            tokio::spawn(async move {
                progress::run(&tasks, &documents, interval, &stop, &progress_health).await;
            })
        };
        handles.push(progress_handle);

        handles.push(spawn_health_server(
            self.config.health.host.clone(),
            self.config.health.port,
            health,
            stop.clone(),
        ));

        install_signal_handlers(stop.clone());

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "task join error");
            }
        }

        info!("crawl coordinator stopped");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_listing_source(
        &self,
        source: Source,
        min_words: usize,
        tasks: TaskStore,
        documents: DocumentStore,
        fetcher: Arc<Fetcher>,
        stop: CancellationToken,
        health: &HealthRegistry,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let config = match source {
            Source::ArticleSite => self.config.sources.article_site.clone(),
            Source::BlogSite => self.config.sources.blog_site.clone(),
            Source::Encyclopedia => unreachable!("encyclopedia handled separately"),
        };
        // Only the blog site advertises `<link rel="canonical">` in practice.
        let supports_canonical = matches!(source, Source::BlogSite);
        let logic = self.config.logic.clone();
        let discover_health = health.register(format!("{source}-discover"), chrono::Duration::seconds(60));
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs_f64(
            self.config.logic.delay_seconds,
        )));
        let worker_health = health.clone();

        let discover_tasks = tasks.clone();
        let discover_fetcher = fetcher.clone();
        let discover_rate_limiter = rate_limiter.clone();
        let discover_stop = stop.clone();
        let discover_handle = tokio::spawn(async move {
            discover::discover_listing(
                &discover_fetcher,
                &discover_rate_limiter,
                &discover_tasks,
                source,
                &config,
                &discover_stop,
                &discover_health,
            )
            .await;
        });

        let worker_handle = tokio::spawn(async move {
            spawn_workers(
                source,
                min_words,
                supports_canonical,
                tasks,
                documents,
                fetcher,
                rate_limiter,
                logic,
                stop,
                worker_health,
            )
            .await;
        });

        vec![discover_handle, worker_handle]
    }
}

#[allow(clippy::too_many_arguments)]
async fn spawn_workers(
    source: Source,
    min_words: usize,
    supports_canonical: bool,
    tasks: TaskStore,
    documents: DocumentStore,
    fetcher: Arc<Fetcher>,
    rate_limiter: Arc<RateLimiter>,
    logic: LogicConfig,
    stop: CancellationToken,
    health: HealthRegistry,
) {
    let mut joins = Vec::new();
    for worker_idx in 0..logic.worker_threads_per_source {
        let worker_id = format!("{source}-w{worker_idx}");
        let worker = Worker {
            worker_id: worker_id.clone(),
            source,
            min_words,
            supports_canonical,
        };
        let tasks = tasks.clone();
        let documents = documents.clone();
        let fetcher = fetcher.clone();
        let rate_limiter = rate_limiter.clone();
        let logic = logic.clone();
        let stop = stop.clone();
        let health_handle = health.register(worker_id, chrono::Duration::seconds(30));
        joins.push(tokio::spawn(async move {
            worker
                .run(&tasks, &documents, &fetcher, &rate_limiter, &logic, &stop, &health_handle)
                .await;
        }));
    }
    for join in joins {
        let _ = join.await;
    }
}

fn spawn_health_server(
    host: String,
    port: u16,
    health: HealthRegistry,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let prometheus_handle = metrics::install_recorder();
    tokio::spawn(async move {
        let app = Router::new()
            .route(
                "/healthz",
                get(move || {
                    let health = health.clone();
                    async move { health.status() }
                }),
            )
            .merge(metrics::metrics_route(prometheus_handle));

        let addr = format!("{host}:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(%addr, error = %err, "failed to bind health/metrics listener");
                return;
            }
        };
        info!(%addr, "health/metrics listener started");

        let shutdown = async move {
            stop.cancelled().await;
        };
        if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!(error = %err, "health/metrics server exited with error");
        }
    })
}

fn install_signal_handlers(stop: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
        }

        stop.cancel();
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
    });
}
