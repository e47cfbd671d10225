//! Tracing subscribers for the host and for plugin processes.

use crate::{config::LoggingConfig, paths::AppDirs};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable a plugin process reads its log filter from.
pub const PLUGIN_LOG_ENV: &str = "DRIVEHUB_PLUGIN_LOG";
const DEFAULT_LOG_FILE: &str = "drivehub.log";

/// Keeps the background log writer alive; flushes on drop.
#[must_use]
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Installs the host subscriber: a daily-rolling log file, mirrored to
/// stdout when `config.stdout` is set.
pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let log_dir = dirs.log_dir();
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;
    let filter = parse_filter(config.level.directive())?;

    let file_name = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);
    prune_logs(log_dir, file_name, config.max_log_files.max(1))?;
    let (file, worker) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, file_name));
    let writer = if config.stdout {
        BoxMakeWriter::new(std::io::stdout.and(file))
    } else {
        BoxMakeWriter::new(file)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.stdout)
        .with_writer(writer)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)?;
    Ok(LoggingGuard { _worker: worker })
}

/// Installs the plugin-side subscriber.
///
/// Plugins own stdout for the wire protocol, so events go to stderr without
/// ANSI colours; the host captures that stream into its own log.
pub fn init_plugin_logging() -> Result<(), LoggingError> {
    let directive = std::env::var(PLUGIN_LOG_ENV).unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(parse_filter(&directive)?)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|source| LoggingError::ParseLevel {
        level: directive.to_string(),
        source,
    })
}

/// Deletes the oldest rolled files named `file_name*` so that at most `keep`
/// remain.
fn prune_logs(dir: &Path, file_name: &str, keep: usize) -> Result<(), LoggingError> {
    let listing = fs::read_dir(dir).map_err(|source| LoggingError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut rolled: Vec<_> = listing
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(file_name))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    // newest first
    rolled.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in rolled.into_iter().skip(keep) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveOldLog { path, source })?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid log filter {level:?}: {source}")]
    ParseLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to list log directory {path}: {source}")]
    ListDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove old log file {path}: {source}")]
    RemoveOldLog {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn level_directives_parse() {
        assert_eq!(LogLevel::Warn.directive(), "warn");
        assert!(parse_filter(LogLevel::Debug.directive()).is_ok());
        assert!(matches!(
            parse_filter("drivehub=loud"),
            Err(LoggingError::ParseLevel { .. })
        ));
    }

    #[test]
    fn prune_keeps_newest_files() {
        let tmp = tempfile::tempdir().unwrap();
        for day in 1..=4 {
            let path = tmp.path().join(format!("drivehub.log.2026-01-0{day}"));
            fs::write(&path, "x").unwrap();
            let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(day * 86_400);
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }
        fs::write(tmp.path().join("other.txt"), "keep").unwrap();

        prune_logs(tmp.path(), DEFAULT_LOG_FILE, 2).unwrap();

        let mut left: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            [
                "drivehub.log.2026-01-03",
                "drivehub.log.2026-01-04",
                "other.txt"
            ]
        );
    }
}
