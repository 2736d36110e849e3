//! Tracing setup: stderr plus a daily log file under `<root>/logs`.
//!
//! `FEEDBACK_LOOP_DEBUG_LOG=1` forces debug output; otherwise `RUST_LOG`
//! applies, defaulting to `info`. Non-interactive commands only echo warnings
//! to stderr so their stdout stays clean for the calling agent.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEBUG_ENV: &str = "FEEDBACK_LOOP_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "feedback-loop.log";

/// Keep the returned guard alive until exit or buffered file output is lost.
pub fn init(logs_dir: &Path, interactive: bool) -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_level = if debug_enabled {
        LevelFilter::DEBUG
    } else if interactive {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_level);

    let (file_layer, guard) = match fs_err::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("feedback-loop: file logging disabled: {}", e);
            (None, None)
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}
