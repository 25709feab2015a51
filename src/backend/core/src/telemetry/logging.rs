//! Structured logging with JSON/pretty formats.
//!
//! - JSON format for production environments
//! - Pretty format for development
//! - Per-module log level configuration through the filter directive syntax

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level or filter directives (e.g. `info`,
    /// `quarry_core=debug,sqlx=warn`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty, or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include the target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
            include_target: default_include_target(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    #[default]
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_include_target() -> bool {
    true
}

/// Initialize the global logging subscriber.
///
/// The `RUST_LOG` environment variable, when set, takes precedence over the
/// configured level.
///
/// # Errors
///
/// Returns an error if the filter directives are invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            registry.with(layer).try_init()?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            registry.with(layer).try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            registry.with(layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_target);
        assert!(!config.include_location);
    }

    #[test]
    fn test_format_deserialization() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "pretty"}"#).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
