use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{ListenerError, Result};

const DEFAULT_LOG_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "deploy_webhook";

/// Rolling file output next to the console logs.
pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn setup_file_logging(
        &self,
    ) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            ListenerError::ConfigError(format!(
                "Failed to create log directory '{}': {}",
                self.log_directory.display(),
                e
            ))
        })?;

        let file_appender = RollingFileAppender::new(
            self.rotation.clone(),
            &self.log_directory,
            LOG_FILE_PREFIX,
        );

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Install the global subscriber: console output always, plus a rolling file
/// when `log_dir` is set. Keep the returned guard alive until exit or buffered
/// file output is lost.
pub fn setup_logging(log_dir: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match log_dir {
        Some(dir) => {
            let (file_writer, guard) = FileLogger::new(dir).setup_file_logging()?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}
