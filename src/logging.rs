use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::storage::config::LoggingConfig;

const LOG_FILE: &str = "household-sync.log";

/// Installs a daily-rolling file subscriber. `RUST_LOG` overrides the
/// configured level. Keep the returned guard alive for as long as logs
/// should be flushed.
pub fn init(config: &LoggingConfig) -> WorkerGuard {
    std::fs::create_dir_all(&config.directory).ok();

    let file_appender = tracing_appender::rolling::daily(&config.directory, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .try_init();

    if installed.is_ok() {
        tracing::info!("household-sync logging to {}", config.directory.display());
    }
    guard
}
