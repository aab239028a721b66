//! Tracing bootstrap for the harness binary

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;

const LOG_FILE_PREFIX: &str = "cdm_recovery.log";

/// Flushes the file writer on drop
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber: env filter, stdout, and a daily rolling
/// file when enabled. Returns `None` when no file layer was installed.
///
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let env_filter =
        EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    let file = settings.file_dir.as_ref().and_then(|dir| {
        std::fs::create_dir_all(dir)
            .map_err(|err| eprintln!("failed to create log directory {}: {err}", dir.display()))
            .ok()?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
        Some(tracing_appender::non_blocking(appender))
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init();
            Some(FileLogGuard { _guard: guard })
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .try_init();
            None
        }
    }
}
