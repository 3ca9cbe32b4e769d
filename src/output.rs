//! JSON Output Envelopes
//!
//! Every CLI command prints exactly one envelope on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "provider": "...", "command": "...", "data": ..., "meta": {...}}`
//! - Error: `{"ok": false, "provider": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `provider` is empty for commands that never reach a database, such as
//! `drive list`.

use serde::{Deserialize, Serialize};

use crate::error::DbDriveError;

/// Envelope for a successful command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true
    pub ok: bool,

    pub provider: String,

    /// Command that was executed (`get-item`, `children`, `query`, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(provider: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, provider: provider.into(), command: command.into(), data, meta }
    }
}

/// Envelope for a failed command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false
    pub ok: bool,

    pub provider: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(provider: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, provider: provider.into(), command: command.into(), error }
    }

    pub fn from_error(provider: impl Into<String>, command: impl Into<String>, err: &DbDriveError) -> Self {
        Self::new(provider, command, ErrorInfo::from(err))
    }
}

/// Stable code plus a message free of credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

impl From<&DbDriveError> for ErrorInfo {
    fn from(err: &DbDriveError) -> Self {
        Self::new(err.error_code(), err.message())
    }
}

/// Execution metadata of a successful command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    /// Entries in `data` for listing commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,

    /// Branches of a recursive listing that failed and were skipped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorInfo>,
}

impl Metadata {
    #[must_use]
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, ..Self::default() }
    }

    #[must_use]
    pub fn with_items(execution_ms: u64, item_count: usize) -> Self {
        Self { execution_ms, item_count: Some(item_count), ..Self::default() }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorInfo>) -> Self {
        self.errors = errors;
        self
    }
}
