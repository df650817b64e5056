use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::shared::paths::ensure_dir;

/// Targets that get their own log file. Everything else goes to `system.log`.
const FILE_TARGETS: [&str; 1] = ["capture"];

/// Guards that must be kept alive to ensure logs are flushed
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create logs directory: {0}")]
    Directory(#[from] std::io::Error),
    #[error("Failed to set global tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Default to `debug` instead of `info` when `RUST_LOG` is unset.
    pub verbose: bool,
    /// Also write daily rolling files here, one per target.
    pub log_dir: Option<PathBuf>,
}

/// Multi-target writer that routes logs to different files based on target
struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

fn target_matches(target: &str, name: &str) -> bool {
    target == name
        || target
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with("::"))
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system_writer.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let target = meta.target();

        self.writers
            .iter()
            .find(|(name, _)| target_matches(target, name))
            .map(|(_, writer)| writer.clone())
            .unwrap_or_else(|| self.system_writer.clone())
    }
}

fn file_writer(log_dir: &Path, guards: &mut Vec<WorkerGuard>) -> TargetWriter {
    let mut writers = HashMap::new();

    for target in FILE_TARGETS {
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        writers.insert(target.to_string(), non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    TargetWriter {
        writers,
        system_writer,
    }
}

/// Initialize logging: always to stderr, plus rolling files when a log
/// directory is configured. Stdout is left alone so it can carry output.
pub fn init_logging(options: &LoggingOptions) -> Result<LoggingGuards, LoggingError> {
    let mut guards = Vec::new();

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let file_layer = match &options.log_dir {
        Some(log_dir) => {
            ensure_dir(log_dir)?;
            let writer = file_writer(log_dir, &mut guards);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true),
            )
        }
        None => None,
    };

    let default_level = if options.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(stderr_writer)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)?;

    match &options.log_dir {
        Some(dir) => tracing::debug!(target: "system", "Logging initialized, files at {:?}", dir),
        None => tracing::debug!(target: "system", "Logging initialized"),
    }

    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_matching() {
        assert!(target_matches("capture", "capture"));
        assert!(target_matches("capture::queue", "capture"));
        assert!(!target_matches("capturex", "capture"));
        assert!(!target_matches("system", "capture"));
    }
}
