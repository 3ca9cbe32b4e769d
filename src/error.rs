//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbdrive.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `InvalidPath` / `PathTooDeep`: Path does not match the drive grammar
//! - `NameRejected`: A segment failed name validation (never sanitized)
//! - `NotFound`: Syntactically valid path naming an absent schema or object
//! - `Backend`: Any failure surfaced by a database driver
//! - `UnsupportedProvider`: Unknown or not compiled-in provider identifier
//! - `UnsupportedParameterType`: A bound value with no entry in the type map
//! - `InvalidInput`, `Capability`, `Config`, `ConnectionFailed`: CLI surface errors
//!
//! Classification and validation errors are always produced before any
//! connection is opened.

use thiserror::Error;

/// Main error type for dbdrive operations
#[derive(Error, Debug)]
pub enum DbDriveError {
    /// Path failed the drive grammar
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Path has more segments than `drive:\schema\type\object\row`
    #[error("Path '{path}' has too many segments ({segments})")]
    PathTooDeep { path: String, segments: usize },

    /// Identifier rejected by the name validator
    #[error("Rejected {kind} name '{name}': only [A-Za-z0-9_] is allowed")]
    NameRejected { kind: String, name: String },

    /// Schema, table or view does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Database driver error (connectivity, timeout, malformed catalog data)
    #[error("Backend error ({provider}): {detail}")]
    Backend { provider: String, detail: String },

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider identifier is unknown or its connector is not compiled in
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Bound parameter value has no backend mapping
    #[error("Parameter '{name}' has unsupported type '{type_name}'")]
    UnsupportedParameterType { name: String, type_name: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Ad-hoc statement blocked by the read-only guard
    #[error("Capability violation: {0}")]
    Capability(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbDriveError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::PathTooDeep { .. } => "PATH_TOO_DEEP",
            Self::NameRejected { .. } => "NAME_REJECTED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Backend { .. } => "BACKEND_ERROR",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            Self::UnsupportedParameterType { .. } => "UNSUPPORTED_PARAMETER_TYPE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Capability(_) => "CAPABILITY_VIOLATION",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message
    ///
    /// Messages never contain connection strings or credentials.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// True for errors raised before any I/O (path shape and name checks)
    #[must_use]
    pub const fn is_path_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. } | Self::PathTooDeep { .. } | Self::NameRejected { .. }
        )
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into(), reason: reason.into() }
    }

    /// Create a name rejection error
    pub fn name_rejected(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NameRejected { kind: kind.into(), name: name.into() }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { kind: kind.into(), name: name.into() }
    }

    /// Create a backend error
    pub fn backend(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Backend { provider: provider.into(), detail: detail.into() }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create an unsupported provider error
    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        Self::UnsupportedProvider(provider.into())
    }

    /// Create an unsupported parameter type error
    pub fn unsupported_parameter_type(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedParameterType { name: name.into(), type_name: type_name.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a capability violation error
    pub fn capability_violation(message: impl Into<String>) -> Self {
        Self::Capability(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for dbdrive operations
pub type Result<T> = std::result::Result<T, DbDriveError>;
