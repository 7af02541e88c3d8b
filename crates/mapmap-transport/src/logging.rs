//! Logging configuration
//!
//! The subscriber itself is installed by the application binary; this type
//! only carries the settings so they can live next to the transport config.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Log file name inside [`LogConfig::log_dir`]
pub const LOG_FILE_NAME: &str = "mapmap-transport.log";

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`, `off`)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Write to stderr
    pub console_output: bool,
    /// Write to a log file in `log_dir`
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            console_output: true,
            file_output: false,
        }
    }
}

impl LogConfig {
    /// Parse the configured level, falling back to INFO
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    pub fn ensure_log_directory(&self) -> io::Result<()> {
        if self.file_output {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    pub fn current_log_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}
