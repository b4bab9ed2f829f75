// src/logging.rs
use crate::config::LogConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact console output plus a daily-rolling file. `RUST_LOG` overrides the configured level.
/// Keep the returned guard alive or buffered file lines are lost on exit.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "{},hyper=info,reqwest=info,rustls=warn",
            config.level.trim()
        ))
        .with_context(|| format!("invalid log level `{}`", config.level))?,
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.file_prefix.clone())
        .build(&config.directory)
        .with_context(|| format!("opening log directory {}", config.directory.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}
