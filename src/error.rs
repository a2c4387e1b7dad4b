//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout the client.
//! Every failure is one of a closed set of kinds, each with a stable error code
//! used by the CLI's JSON output.
//!
//! # Error Categories
//! - `ConnectionFailed`: the final connection attempt failed
//! - `NotSubscribed` / `SchemaNotFound`: the two permission-gate failures
//! - `QueryFailed`: the server rejected a statement (SQLSTATE preserved)
//! - `NotConnected`: an operation ran without an open session
//! - `CredentialFile` / `Credentials`: pgpass I/O and prompt failures
//! - `InvalidInput`: malformed options or arguments
//! - `Decode`: a column value could not be marshalled

use thiserror::Error;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum WrdsError {
    /// Database connection failed after every fallback stage
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The schema exists but the current user has no access to it
    #[error("You do not have permission to access the {schema} library")]
    NotSubscribed { schema: String },

    /// The schema does not exist at all
    #[error("The {schema} library is not in the list of available databases")]
    SchemaNotFound { schema: String },

    /// The server rejected the statement
    #[error("Query execution failed: {message}")]
    QueryFailed {
        sqlstate: Option<String>,
        message: String,
    },

    /// No open session
    #[error("Not connected: call connect() first")]
    NotConnected,

    /// Reading or writing the credential file failed
    #[error("Credential file error: {0}")]
    CredentialFile(String),

    /// Obtaining credentials from the credential source failed
    #[error("Could not obtain credentials: {0}")]
    Credentials(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A result value could not be converted
    #[error("Could not decode value: {0}")]
    Decode(String),
}

impl WrdsError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::NotSubscribed { .. } => "NOT_SUBSCRIBED",
            Self::SchemaNotFound { .. } => "SCHEMA_NOT_FOUND",
            Self::QueryFailed { .. } => "QUERY_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::CredentialFile(_) => "CREDENTIAL_FILE",
            Self::Credentials(_) => "CREDENTIALS",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Decode(_) => "DECODE_ERROR",
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains passwords: connection errors are built from redacted URIs.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether this is one of the two permission-gate failures
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::NotSubscribed { .. } | Self::SchemaNotFound { .. })
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a not-subscribed error
    pub fn not_subscribed(schema: impl Into<String>) -> Self {
        Self::NotSubscribed {
            schema: schema.into(),
        }
    }

    /// Create a schema-not-found error
    pub fn schema_not_found(schema: impl Into<String>) -> Self {
        Self::SchemaNotFound {
            schema: schema.into(),
        }
    }

    /// Create a query failed error without a SQLSTATE
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Create a query failed error carrying the server's SQLSTATE
    pub fn query_failed_with_state(
        sqlstate: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueryFailed {
            sqlstate: Some(sqlstate.into()),
            message: message.into(),
        }
    }

    /// Create a credential file error
    pub fn credential_file(message: impl Into<String>) -> Self {
        Self::CredentialFile(message.into())
    }

    /// Create a credential prompt error
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, WrdsError>;
