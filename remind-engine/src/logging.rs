//! Logging setup.
//!
//! Console output always; daily-rotated file output when a log directory
//! is given. Timestamps use the server's local timezone so delivery logs
//! line up with the quiet-hour windows operators reason about.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "remind_engine=info,reqwest=warn";

/// Timer that formats timestamps in the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Returns the file writer guard
/// when file logging is enabled; keep it alive for the process lifetime.
pub fn init(log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer));

    let guard = match log_dir {
        Some(dir) => {
            let log_path = PathBuf::from(dir);
            std::fs::create_dir_all(&log_path)?;

            let file_appender = tracing_appender::rolling::daily(&log_path, "remind-engine.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            registry
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(LocalTimer),
                )
                .try_init()
                .map_err(|e| {
                    crate::Error::Other(format!("Failed to set global default subscriber: {e}"))
                })?;
            Some(guard)
        }
        None => {
            registry.try_init().map_err(|e| {
                crate::Error::Other(format!("Failed to set global default subscriber: {e}"))
            })?;
            None
        }
    };

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_engine() {
        assert!(DEFAULT_LOG_FILTER.contains("remind_engine=info"));
    }
}
