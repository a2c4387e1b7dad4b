//! Database Driver Seam and Core Types
//!
//! This module defines the narrow interface the client needs from a relational driver:
//! open a connection from a URI, execute a parameterized statement and fetch its rows in
//! chunks, and answer three catalog questions (schemas, relations, columns).
//!
//! The production implementation lives in [`postgres`]. Tests substitute an in-memory
//! driver through the same traits.
//!
//! # Values
//! Result cells are marshalled into [`Value`], a closed set of column value kinds that
//! serializes to JSON the same way regardless of driver.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::Result;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Connect options passed alongside the URI (e.g. `sslmode`, `application_name`)
pub type ConnectArgs = BTreeMap<String, String>;

/// One result row, positionally aligned with the cursor's columns
pub type Row = Vec<Value>;

/// A single result cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision NUMERIC, kept as its decimal text until coerced
    Numeric(String),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether this cell is SQL NULL
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text of a `Text` cell
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `Int` cells
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to a JSON value
    ///
    /// Dates use ISO 8601, BYTEA is Base64-encoded, NaN/Infinity become null.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int(v) => Json::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::Numeric(v) | Self::Text(v) => Json::String(v.clone()),
            Self::Date(v) => Json::String(v.format("%Y-%m-%d").to_string()),
            Self::Time(v) => Json::String(v.format("%H:%M:%S%.f").to_string()),
            Self::Timestamp(v) => Json::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::TimestampTz(v) => Json::String(v.to_rfc3339()),
            Self::Uuid(v) => Json::String(v.to_string()),
            Self::Json(v) => v.clone(),
            Self::Bytes(v) => Json::String(base64::engine::general_purpose::STANDARD.encode(v)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Statement parameters
///
/// Handed to the driver unmodified. The driver binds them natively; values are never
/// spliced into the SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParams {
    /// No parameters: the SQL is sent exactly as written
    #[default]
    None,
    /// `%s` / `$n` placeholders, in order
    Positional(Vec<Value>),
    /// `%(name)s` placeholders
    Named(BTreeMap<String, Value>),
}

impl QueryParams {
    /// Build named parameters from `(name, value)` pairs
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Build positional parameters
    pub fn positional<V, I>(values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// True when there is nothing to bind
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(values) => values.is_empty(),
        }
    }
}

/// Result-set column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name as returned by the server
    pub name: String,

    /// Declared type name (e.g. `int4`, `numeric`, `date`)
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }
}

/// Catalog column information for a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Declared column type (e.g. `double precision`, `character varying(8)`)
    #[serde(rename = "type")]
    pub data_type: String,

    /// Column comment, if any
    pub comment: Option<String>,
}

/// Kinds of relations the catalog can list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Ordinary and partitioned tables
    Table,
    /// Views and materialized views
    View,
    /// Foreign tables
    ForeignTable,
}

/// An executed statement whose rows are fetched on demand
pub trait Cursor {
    /// Result-set columns
    fn columns(&self) -> &[ColumnMeta];

    /// Fetch up to `size` rows; fewer than `size` (including zero) means exhausted
    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>>;

    /// Fetch every remaining row
    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        const BATCH: usize = 10_000;
        let mut rows = Vec::new();
        loop {
            let batch = self.fetch_many(BATCH)?;
            let exhausted = batch.len() < BATCH;
            rows.extend(batch);
            if exhausted {
                return Ok(rows);
            }
        }
    }
}

/// An open database connection
///
/// Owned exclusively by one client session; not shared between callers.
pub trait DbConnection {
    /// Execute a statement and return a cursor over its rows
    ///
    /// Server-side failures are returned as `WrdsError::QueryFailed`, unmodified.
    fn execute(&mut self, sql: &str, params: &QueryParams) -> Result<Box<dyn Cursor + '_>>;

    /// Every schema in the database, ignoring privileges (system `pg_*` schemas excluded)
    fn schema_names(&mut self) -> Result<Vec<String>>;

    /// Names of relations of one kind in a schema
    fn relation_names(&mut self, schema: &str, kind: RelationKind) -> Result<Vec<String>>;

    /// Columns of a relation in ordinal order
    fn columns(&mut self, schema: &str, relation: &str) -> Result<Vec<ColumnInfo>>;

    /// Close the connection and release the engine behind it
    fn close(&mut self) -> Result<()>;
}

/// Opens connections
pub trait Driver {
    /// Open a connection to `uri` with connect options `args`
    ///
    /// Network and authentication failures are returned as `WrdsError::ConnectionFailed`.
    fn connect(&self, uri: &str, args: &ConnectArgs) -> Result<Box<dyn DbConnection>>;
}
