pub mod background;
pub mod cache;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod editor;
pub mod errors;
pub mod extractor;
pub mod history;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod runner;
pub mod safety;
pub mod ui;

pub use cli::{run, Cli};

use crate::errors::{AppError, AppResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging to a daily file under `log_dir`, plus readable
/// stderr output when `verbose` is set.
pub fn init_tracing(log_dir: &Path, verbose: bool) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "ai-shell.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let stderr_layer = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .with(stderr_layer)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
