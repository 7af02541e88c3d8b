//! Subscriber setup for the seek demo
//!
//! The configured level applies to the transport core and this binary only;
//! everything else stays at WARN. `RUST_LOG` replaces the whole filter.

use anyhow::{Context, Result};
use mapmap_transport::logging::LOG_FILE_NAME;
use mapmap_transport::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Crates whose spans and events follow the configured level
const TRANSPORT_TARGETS: [&str; 2] = ["mapmap_transport", "mapmap_seek"];

/// Keeps the file writer thread alive until dropped
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Filter directives for `config`, e.g. `warn,mapmap_transport=debug,mapmap_seek=debug`
fn directives(config: &LogConfig) -> String {
    let level = config.parse_level().to_string().to_lowercase();
    let mut directives = String::from("warn");
    for target in TRANSPORT_TARGETS {
        directives.push_str(&format!(",{}={}", target, level));
    }
    directives
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(config)))
}

/// Install the global subscriber. The returned guard flushes the log file on
/// drop and must outlive the seek run.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    config
        .ensure_log_directory()
        .context("Failed to create log directory")?;

    // stdout carries the seek report
    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_filter(env_filter(config))
    });

    let (file_layer, guard) = if config.file_output {
        let appender = tracing_appender::rolling::never(&config.log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_filter(env_filter(config));
        (Some(layer), Some(LogGuard { _guard: guard }))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        file = ?config.file_output.then(|| config.current_log_path()),
        "Logging initialized for {}",
        TRANSPORT_TARGETS.join(", ")
    );
    Ok(guard)
}
