use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LogsConfig;

/// Initializes the global tracing subscriber: stdout plus a rolling main
/// log file, plus one rolling log file per enabled source (a worker or
/// discoverer logs with `target: "<source>"` to land in that file).
///
/// Byte-size/backup-count retention (`max_mb`/`backups`) is left to the
/// deployment's log rotation tooling; `tracing_appender` itself rotates on
/// a daily schedule rather than by size, which the ambient stack treats as
/// an acceptable substitute since file rotation is an operational concern.
///
/// Returns the guards that must be kept alive for the process lifetime —
/// dropping a guard stops its non-blocking writer from flushing.
pub fn init(config: &LogsConfig, sources: &[&str]) -> Vec<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    std::fs::create_dir_all(&config.dir).ok();

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let (main_writer, main_guard) = tracing_appender::non_blocking(rolling::daily(&config.dir, "robot.log"));
    guards.push(main_guard);

    let subscriber = Registry::default()
        .with(filter)
        .with(FmtLayer::new().with_writer(stdout_writer))
        .with(FmtLayer::new().with_writer(main_writer).with_ansi(false));

    let mut per_source_layers = Vec::new();
    for source in sources {
        let filename = format!("{}.log", safe_source(source));
        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&config.dir, filename));
        guards.push(guard);
        let targets = Targets::new().with_target(source.to_string(), tracing::Level::TRACE);
        per_source_layers.push(FmtLayer::new().with_writer(writer).with_ansi(false).with_filter(targets));
    }

    subscriber.with(per_source_layers).init();

    guards
}

fn safe_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut prev_underscore = false;
    for c in source.to_ascii_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "source".to_string()
    } else {
        trimmed.to_string()
    }
}
