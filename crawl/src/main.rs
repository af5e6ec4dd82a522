mod config;
mod discover;
mod fetcher;
mod health;
mod logging;
mod metrics;
mod parser;
mod progress;
mod supervisor;
mod worker;

use std::path::PathBuf;
use std::process::ExitCode;

use config::RootConfig;
use supervisor::Supervisor;

/// `crawl <config-path>` — runs the coordinator until SIGINT/SIGTERM.
///
/// Exit codes: `0` on a clean shutdown, `2` if the config path is missing or
/// the config file cannot be read/parsed.
fn main() -> ExitCode {
    let mut args = std::env::args_os().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: crawl <config-path>");
        return ExitCode::from(2);
    };
    if args.next().is_some() {
        eprintln!("usage: crawl <config-path>");
        return ExitCode::from(2);
    }

    let config = match RootConfig::load(&PathBuf::from(config_path)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let sources: Vec<&str> = [
        (config.sources.encyclopedia.enabled, "encyclopedia"),
        (config.sources.article_site.enabled, "article_site"),
        (config.sources.blog_site.enabled, "blog_site"),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .map(|(_, name)| name)
    .collect();
    let _log_guards = logging::init(&config.logs, &sources);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(Supervisor::new(config).run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
