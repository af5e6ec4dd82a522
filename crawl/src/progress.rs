use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crawl_core::{DocumentStore, TaskStore};

use crate::health::HealthHandle;

/// Periodically logs task counts grouped by `(source, state)` and document
/// counts grouped by `source`. Must survive store errors: a failed query is
/// logged and the loop continues rather than exiting.
pub async fn run(
    tasks: &TaskStore,
    documents: &DocumentStore,
    interval_seconds: u64,
    stop: &CancellationToken,
    health: &HealthHandle,
) {
    let interval = Duration::from_secs(interval_seconds.max(5));
    loop {
        health.report_healthy().await;

        match tasks.stats_by_state().await {
            Ok(mut counts) => {
                counts.truncate(12);
                let summary: Vec<String> = counts
                    .iter()
                    .map(|c| format!("{}/{}={}", c.source, c.state, c.count))
                    .collect();
                info!(counts = %summary.join(", "), "task progress");
            }
            Err(err) => warn!(error = %err, "progress: task stats query failed"),
        }

        match documents.count_by_source().await {
            Ok(mut counts) => {
                counts.truncate(10);
                let summary: Vec<String> = counts
                    .iter()
                    .map(|c| format!("{}={}", c.source, c.count))
                    .collect();
                info!(counts = %summary.join(", "), "document progress");
            }
            Err(err) => warn!(error = %err, "progress: document stats query failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.cancelled() => break,
        }
    }
}
