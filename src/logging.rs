use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "minerd.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. When a log directory is set
/// (`logging.dir` or `MINERD_LOG_DIR`) a daily rotated file is written as
/// well; the returned guard must be held until exit to flush it.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},minerd=debug", config.level)));

    let log_dir = config
        .dir
        .clone()
        .or_else(|| std::env::var_os("MINERD_LOG_DIR").map(PathBuf::from));

    let (file_layer, guard) = match log_dir.as_deref().filter(|dir| writable_dir(dir)) {
        Some(dir) => {
            // Daily rotating file appender
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false) // No color codes in file
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Console layer, plain or JSON
    let (plain_layer, json_layer) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/{}", dir.display(), LOG_FILE_NAME);
    }

    guard
}

/// Console-only logging for startup errors before the config is known
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// `tracing_appender::rolling::daily` panics when it cannot create the
/// initial file, so check the directory up front.
fn writable_dir(dir: &Path) -> bool {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            dir.display(),
            e
        );
        return false;
    }

    let probe = dir.join(".minerd_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                dir.display(),
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_dir_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");
        assert!(writable_dir(&dir));
        assert!(dir.is_dir());
        assert!(!dir.join(".minerd_write_test").exists());
    }
}
