use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Installs the process-wide Prometheus recorder. Call once at startup.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder")
}

/// Adds the `/metrics` route to a router; the recorder must already be
/// installed via `install_recorder`.
pub fn metrics_route(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

/// Records the duration between creation and drop as a histogram entry,
/// labeled by source and operation.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str, source: &str) -> TimingGuard {
    TimingGuard {
        name,
        labels: vec![("source", source.to_string())],
        start: Instant::now(),
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let labels: Vec<(String, String)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        metrics::histogram!(self.name, &labels).record(self.start.elapsed().as_millis() as f64);
    }
}

pub fn inc_counter(name: &'static str, source: &str) {
    metrics::counter!(name, "source" => source.to_string()).increment(1);
}

pub fn set_gauge(name: &'static str, source: &str, value: f64) {
    metrics::gauge!(name, "source" => source.to_string()).set(value);
}
