//! Tracing setup for taskdesk binaries.
//!
//! Logs go to a daily-rolling file under `$TASKDESK_HOME/logs`; stdout is
//! left to command output. `TASKDESK_LOG` takes an `EnvFilter` directive.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Env var holding the log filter.
pub const LOG_ENV: &str = "TASKDESK_LOG";

const DEFAULT_FILTER: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_appender(logs_dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory {}", logs_dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("taskdesk")
        .filename_suffix("log")
        .build(logs_dir)
        .with_context(|| format!("Failed to open log file in {}", logs_dir.display()))
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the whole process; dropping it flushes
/// and stops the writer. Without a usable log directory nothing is logged.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    let filter = env_filter();

    match open_appender(logs_dir) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .try_init();
            if installed.is_ok() {
                tracing::debug!(dir = %logs_dir.display(), "logging initialized");
            }
            Some(guard)
        }
        Err(e) => {
            let _ = tracing_subscriber::registry().with(filter).try_init();
            tracing::warn!("{e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_open_appender_creates_directory() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");

        assert!(open_appender(&logs).is_ok());
        assert!(logs.is_dir());
    }

    #[test]
    fn test_open_appender_fails_on_file_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();

        assert!(open_appender(&file).is_err());
    }
}
