//! Logging setup shared by the library and the daemon
//!
//! Provides consistent logging setup with support for:
//! - Text, JSON, and pretty-printed output
//! - Environment variable configuration
//! - Per-module log level filtering
//!
//! # Examples
//!
//! ```no_run
//! use libduckcast::logging::{LoggingConfig, LogFormat};
//!
//! // Initialize with JSON format
//! let config = LoggingConfig::new(LogFormat::Json, "info".to_string(), false);
//! config.init().ok();
//!
//! // Or use default settings (respects env vars)
//! libduckcast::logging::init_default();
//! ```

use std::str::FromStr;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// * `level` - Minimum log level (error, warn, info, debug, trace)
    /// * `verbose` - If true, forces debug level
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Format from `DUCKCAST_LOG_FORMAT`, level from the config file
    pub fn from_config(config: &crate::config::Config, verbose: bool) -> Self {
        Self::new(format_from_env(), config.log_level.clone(), verbose)
    }

    /// Filter directive in effect: `RUST_LOG` wins, then `--verbose`, then
    /// the configured level
    pub fn directive(&self) -> String {
        if let Ok(directive) = std::env::var("RUST_LOG") {
            if !directive.trim().is_empty() {
                return directive;
            }
        }
        if self.verbose {
            "debug".to_string()
        } else {
            self.level.clone()
        }
    }

    /// Install the global subscriber, writing to stderr
    ///
    /// # Errors
    ///
    /// Fails if a subscriber is already installed.
    pub fn init(&self) -> Result<(), InitError> {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_new(self.directive()).unwrap_or_else(|_| EnvFilter::new("info"));

        match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .try_init(),
        }
    }
}

fn format_from_env() -> LogFormat {
    std::env::var("DUCKCAST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text)
}

/// Initialize logging with default settings
///
/// Respects `DUCKCAST_LOG_FORMAT` and `DUCKCAST_LOG_LEVEL`, falling back to
/// text output at info level. Does nothing if logging is already set up.
pub fn init_default() {
    let level = std::env::var("DUCKCAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let _ = LoggingConfig::new(format_from_env(), level, false).init();
}
