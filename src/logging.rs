//! Logging initialization.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Error, Result};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,storefront_notify=debug";

/// Initialize console logging, honoring `RUST_LOG`.
pub fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| Error::other(format!("failed to initialize logging: {}", e)))
}

/// Initialize console logging plus a daily-rotated log file.
///
/// The returned guard must be held for the lifetime of the process; dropping
/// it stops the background log writer.
pub fn init_logging_with_file(dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let appender = tracing_appender::rolling::daily(dir.as_ref(), "storefront-notify.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| Error::other(format!("failed to initialize logging: {}", e)))?;

    Ok(guard)
}
