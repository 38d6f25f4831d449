use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Where log lines may go. The dashboard owns stdout, so it only logs to file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    ConsoleAndFile,
    FileOnly,
}

/// Initializes tracing with a console layer and a daily-rotated JSON file layer.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(target: LogTarget) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("apartment_finder=info,apartment_server=info,tower_http=info"));

    let file_layer = match fs::create_dir_all("logs") {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily("logs", "apartment-finder.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            Some((fmt::layer().json().with_writer(writer), guard))
        }
        Err(_) => None,
    };
    let (file_layer, guard) = match file_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    let console_layer = match target {
        LogTarget::ConsoleAndFile => Some(fmt::layer().with_writer(std::io::stdout)),
        LogTarget::FileOnly => None,
    };

    // try_init: tests and repeated calls must not panic
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
