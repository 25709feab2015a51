//! Telemetry: structured logging infrastructure.
//!
//! Quarry's observability contract is deliberately narrow: structured logs via
//! `tracing`, plus the per-job log entries written through the store's
//! [`JobLogStore`](crate::store::JobLogStore). This module owns the former.
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! let config = LoggingConfig::default();
//! init_telemetry(&config).expect("failed to initialize telemetry");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Initialize the telemetry stack.
///
/// Should be called once at application startup, before any engine component
/// starts logging.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(config)
}
