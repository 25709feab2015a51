//! Error handling for Quarry Core.
//!
//! This module provides:
//! - A single engine error type with context and machine-readable codes
//! - User-facing messages vs detailed internal messages
//! - Conversions from the database, serialization, and configuration layers
//!
//! Lock contention and job handler failures are deliberately *not* represented
//! here: contention is a [`LockAttempt`](crate::store::LockAttempt) variant the
//! caller branches on, and handler failures are
//! [`JobError`](crate::jobs::JobError) values that drive the retry state
//! machine.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// A specialized Result type for Quarry operations.
pub type Result<T> = std::result::Result<T, QuarryError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by embedding applications for
/// programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Queue errors (1000-1099)
    QueueError,

    // Store errors (2000-2099)
    StoreError,
    DatabaseError,
    DatabaseTransactionFailed,

    // Serialization errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Job errors (3000-3099)
    JobTypeNotRegistered,

    // Configuration errors (5000-5099)
    ConfigurationError,
    InvalidCronExpression,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::QueueError => 1000,

            Self::StoreError => 2000,
            Self::DatabaseError => 2001,
            Self::DatabaseTransactionFailed => 2002,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::JobTypeNotRegistered => 3000,

            Self::ConfigurationError => 5000,
            Self::InvalidCronExpression => 5001,

            Self::InternalError => 9000,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.numeric_code())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The engine error type.
///
/// Carries a stable [`ErrorCode`], a user-facing message, and an optional
/// internal message with lower-level detail (driver errors, parse failures)
/// that is logged but never shown to callers.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct QuarryError {
    code: ErrorCode,
    message: Cow<'static, str>,
    internal: Option<String>,
}

impl QuarryError {
    /// Create a new error with a code and user-facing message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// Create a new error including an internal detail message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            internal: Some(internal.into()),
        }
    }

    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The user-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The internal detail message, if any.
    pub fn internal_message(&self) -> Option<&str> {
        self.internal.as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for QuarryError {
    fn from(error: sqlx::Error) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "database operation failed",
            error.to_string(),
        )
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "failed to serialize or deserialize a value",
            error.to_string(),
        )
    }
}

impl From<config::ConfigError> for QuarryError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "failed to load configuration",
            error.to_string(),
        )
    }
}
