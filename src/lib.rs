//! WRDS - Client for the Wharton Research Data Services database
//!
//! Connects to the WRDS `PostgreSQL` service, discovers the libraries (schemas) and tables the
//! user is subscribed to, and returns query results as [`DataFrame`]s.
//!
//! # Core Behavior
//! - Connection fallback: configured host, then the default WRDS host, then prompted credentials
//! - Optional persistence of prompted credentials to the `pgpass` credential file
//! - Every library-scoped call is checked against the user's library list first
//! - Chunked result fetching, eager ([`Connection::raw_sql`]) or lazy
//!   ([`Connection::raw_sql_iter`])
//!
//! # Module Organization
//! - [`connection`] - Connection manager and fallback state machine
//! - [`catalog`] - Library list, permission checks, table listing and description
//! - [`query`] - Raw SQL and table reads
//! - [`frame`] - Tabular results
//! - [`config`] - Connection parameters and the credential file
//! - [`credentials`] - Sources of prompted credentials
//! - [`engine`] - Database driver seam and the `PostgreSQL` driver
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelopes for the CLI
//! - [`logging`] - Logging setup for the CLI
//!
//! ```no_run
//! use wrds::{ConnectOptions, Connection, SqlOptions, QueryParams};
//!
//! let mut db = Connection::new(ConnectOptions::new().username("jdoe"))?;
//! let df = db.raw_sql(
//!     "SELECT * FROM crsp.dsf WHERE permno = %(permno)s LIMIT 10",
//!     &SqlOptions::new().params(QueryParams::named([("permno", 14593)])),
//! )?;
//! println!("{} rows", df.len());
//! db.close()?;
//! # Ok::<(), wrds::WrdsError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod frame;
pub mod logging;
pub mod output;
pub mod query;

// Re-export commonly used types for convenience
pub use catalog::TableDescription;
pub use config::{
    ConnectOptions, ConnectionConfig, WRDS_POSTGRES_DB, WRDS_POSTGRES_HOST, WRDS_POSTGRES_PORT,
};
pub use connection::{ConnectOutcome, ConnectStage, Connection, PersistOutcome};
pub use credentials::{CredentialSource, StaticCredentials, TerminalPrompt};
pub use engine::{ColumnInfo, ColumnMeta, QueryParams, Value};
pub use error::{Result, WrdsError};
pub use frame::DataFrame;
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use query::{ChunkIter, SqlOptions, TableOptions};
