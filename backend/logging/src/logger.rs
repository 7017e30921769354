//! Structured Logger
//!
//! Console output always; NDJSON to a daily rolling file when a log
//! directory is configured. `RUST_LOG` overrides the configured level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking file writer flushing. Hold it for the lifetime of
/// the process.
pub struct LoggerGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global logger. A second call is a no-op.
pub fn init_logger<P: AsRef<Path>>(log_dir: Option<P>, level: &str, json_console: bool) -> LoggerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Writes NDJSON to `<dir>/chatloom.log.YYYY-MM-DD`
    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir.as_ref(), "chatloom.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, text_layer) = if json_console {
        (Some(fmt::layer().json().with_writer(std::io::stdout)), None)
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false)
                    .with_ansi(true),
            ),
        )
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init();

    LoggerGuard { _file: file_guard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_directory_entries() {
        let dir = std::env::temp_dir().join(format!("chatloom-log-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let guard = init_logger(Some(&dir), "info", false);
        tracing::info!("hello from the logger test");
        drop(guard);
        // A second init must not panic.
        let _again = init_logger(None::<&Path>, "debug", true);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
