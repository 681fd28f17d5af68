//! Tracing subscriber setup.
//!
//! Human-readable events go to stderr, filtered by `SRE_LOG` (falling back to
//! `RUST_LOG`). When a log directory is given, a JSON copy of every
//! `sre_agent` event at debug level and above is appended to `agent.log`
//! there through a non-blocking writer.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILE: &str = "agent.log";

/// Filter for the stderr layer. An unparsable directive falls back to the default.
pub fn stderr_filter(sre_log: Option<&str>, rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    let default = if verbose { "info" } else { "warn" };
    sre_log
        .or(rust_log)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process so buffered file output is flushed on exit.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let sre_log = std::env::var("SRE_LOG").ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter(
            sre_log.as_deref(),
            rust_log.as_deref(),
            verbose,
        ));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("sre_agent=debug"));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    // A subscriber may already be installed (e.g. in tests)
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}
