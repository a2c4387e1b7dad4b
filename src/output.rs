//! JSON Output Envelope Types
//!
//! Structured JSON output for the `wrds` command-line tool.
//! Every command prints either a `SuccessEnvelope` or an `ErrorEnvelope` to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::WrdsError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (libraries, tables, sql, ...)
    pub command: String,

    /// Command-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self {
            ok: true,
            command: command.into(),
            data,
            meta,
        }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            command: command.into(),
            error,
        }
    }

    /// Create error envelope from `WrdsError`
    pub fn from_error(command: impl Into<String>, err: &WrdsError) -> Self {
        Self::new(
            command,
            ErrorInfo {
                code: err.error_code().to_string(),
                message: err.message(),
            },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "NOT_SUBSCRIBED", "CONNECTION_FAILED")
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (for tabular results, None otherwise)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    /// Create new metadata with just execution time
    pub fn new(execution_ms: u64) -> Self {
        Self {
            execution_ms,
            rows_returned: None,
        }
    }

    /// Create new metadata with execution time and row count
    pub fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self {
            execution_ms,
            rows_returned: Some(rows_returned),
        }
    }
}
