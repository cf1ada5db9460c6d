//! Global tracing subscriber setup.
//!
//! Two output formats are supported:
//!
//! - **Text** ([`LogFormat::Text`]): human-readable, optionally colored
//! - **JSON** ([`LogFormat::Json`]): one object per event, for log
//!   aggregation
//!
//! `RUST_LOG`, when set, takes precedence over the configured level.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: Level,
    pub format: LogFormat,
    /// Enable ANSI color codes (text format only).
    pub ansi_colors: bool,
    /// Include file/line source locations in output.
    pub with_source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            ansi_colors: true,
            with_source_location: false,
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            with_source_location: true,
            ..Self::default()
        }
    }

    /// Set the log level from a string. Unknown names fall back to INFO.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = parse_level(level).unwrap_or(Level::INFO);
        self
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()))
}

/// Initialize the global logging subscriber.
///
/// Call once at startup; a second call fails because a global subscriber
/// is already set.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = env_filter(config);
    match config.format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(true)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(true)
                .with_current_span(true)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }
    Ok(())
}
