//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured filter. When a log file is configured
//! a second, non-blocking fmt layer writes to it; the returned guard must be
//! kept alive for buffered lines to be flushed.

use crate::config::LoggingSettings;
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` if set and valid, the configured directive otherwise.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter))
}

/// Install the global subscriber.
pub fn init(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(fmt::layer().with_ansi(settings.ansi));

    let Some(path) = &settings.file else {
        registry
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;
        return Ok(None);
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Log file path {:?} has no file name", path)))?;
    std::fs::create_dir_all(directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;
    Ok(Some(guard))
}
