//! `PostgreSQL` Driver Implementation
//!
//! This module implements the [`Driver`] / [`DbConnection`] seam on top of `tokio-postgres`.
//!
//! # Implementation Notes
//! - Each connection owns a current-thread tokio runtime (its "engine"); every call blocks on it
//! - The background connection task only makes progress while a call is in flight
//! - TLS via `postgres-native-tls`; `sslmode=require` does not verify the server certificate,
//!   matching libpq
//! - pyformat placeholders (`%s`, `%(name)s`) are rewritten to `$n` and bound natively
//! - Result rows are streamed with `query_raw`, so chunked fetches never buffer the full result
//! - `NUMERIC` values are decoded to decimal text (see [`numeric`])

mod numeric;

use futures::StreamExt;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::collections::HashMap;
use std::error::Error;
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, RowStream};

use crate::engine::{
    ColumnInfo, ColumnMeta, ConnectArgs, Cursor, DbConnection, Driver, QueryParams, RelationKind,
    Row, Value,
};
use crate::error::{Result, WrdsError};

type BoxError = Box<dyn Error + Sync + Send>;

/// How long `close()` waits for the connection task to say goodbye to the server
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// `PostgreSQL` driver backed by `tokio-postgres`
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl Driver for PostgresDriver {
    fn connect(&self, uri: &str, args: &ConnectArgs) -> Result<Box<dyn DbConnection>> {
        let config = build_pg_config(uri, args)?;

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
            |e| WrdsError::connection_failed(format!("Failed to start database runtime: {e}")),
        )?;

        let tls = make_tls_connector()?;
        let (client, connection) =
            runtime.block_on(config.connect(tls)).map_err(classify_connect_error)?;

        // Connection errors surface on the next client call; details stay at debug level
        let task = runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended with an error");
            }
        });

        Ok(Box::new(PgConnection {
            runtime: Some(runtime),
            client: Some(client),
            task: Some(task),
        }))
    }
}

/// Build a `tokio-postgres` config from a URI plus connect options
fn build_pg_config(uri: &str, args: &ConnectArgs) -> Result<Config> {
    let mut config: Config = uri
        .parse()
        .map_err(|e| WrdsError::invalid_input(format!("Invalid connection URI: {e}")))?;

    for (key, value) in args {
        match key.as_str() {
            "sslmode" => {
                config.ssl_mode(parse_ssl_mode(value)?);
            }
            "application_name" => {
                config.application_name(value);
            }
            "connect_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    WrdsError::invalid_input(format!(
                        "connect_timeout must be whole seconds, got '{value}'"
                    ))
                })?;
                config.connect_timeout(Duration::from_secs(secs));
            }
            "options" => {
                config.options(value);
            }
            other => {
                return Err(WrdsError::invalid_input(format!(
                    "Unsupported connect option '{other}' \
                     (supported: sslmode, application_name, connect_timeout, options)"
                )));
            }
        }
    }

    Ok(config)
}

fn parse_ssl_mode(value: &str) -> Result<SslMode> {
    match value {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => Err(WrdsError::invalid_input(format!(
            "Unsupported sslmode '{other}' (expected disable, prefer or require)"
        ))),
    }
}

fn make_tls_connector() -> Result<MakeTlsConnector> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| WrdsError::connection_failed(format!("Failed to create TLS connector: {e}")))?;
    Ok(MakeTlsConnector::new(connector))
}

fn classify_connect_error(e: tokio_postgres::Error) -> WrdsError {
    match e.as_db_error() {
        Some(db) => WrdsError::connection_failed(format!("{}: {}", db.severity(), db.message())),
        None => WrdsError::connection_failed(e.to_string()),
    }
}

fn classify_query_error(e: tokio_postgres::Error) -> WrdsError {
    match e.as_db_error() {
        Some(db) => WrdsError::query_failed_with_state(db.code().code(), db.message()),
        None => WrdsError::query_failed(e.to_string()),
    }
}

/// An open `PostgreSQL` connection together with the runtime that drives it
pub struct PgConnection {
    runtime: Option<Runtime>,
    client: Option<Client>,
    task: Option<JoinHandle<()>>,
}

impl PgConnection {
    fn handles(&self) -> Result<(&Runtime, &Client)> {
        match (&self.runtime, &self.client) {
            (Some(runtime), Some(client)) => Ok((runtime, client)),
            _ => Err(WrdsError::NotConnected),
        }
    }

    fn query_strings(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<String>> {
        let (runtime, client) = self.handles()?;
        let rows = runtime.block_on(client.query(sql, params)).map_err(classify_query_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(|e| WrdsError::decode(e.to_string())))
            .collect()
    }
}

impl DbConnection for PgConnection {
    fn execute(&mut self, sql: &str, params: &QueryParams) -> Result<Box<dyn Cursor + '_>> {
        let (runtime, client) = self.handles()?;
        let (sql, values) = bind_placeholders(sql, params)?;
        tracing::debug!(sql = %sql, params = values.len(), "executing statement");

        let statement = runtime.block_on(client.prepare(&sql)).map_err(classify_query_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| ColumnMeta::new(c.name(), c.type_().name()))
            .collect();

        let bound = values.iter().map(|v| *v as &dyn ToSql);
        let stream = runtime
            .block_on(client.query_raw(&statement, bound))
            .map_err(classify_query_error)?;

        Ok(Box::new(PgCursor {
            runtime,
            stream: Box::pin(stream),
            columns,
            exhausted: false,
        }))
    }

    fn schema_names(&mut self) -> Result<Vec<String>> {
        let query = "
            SELECT nspname
            FROM pg_catalog.pg_namespace
            WHERE nspname !~ '^pg_'
            ORDER BY nspname";
        self.query_strings(query, &[])
    }

    fn relation_names(&mut self, schema: &str, kind: RelationKind) -> Result<Vec<String>> {
        let relkinds = match kind {
            RelationKind::Table => "'r', 'p'",
            RelationKind::View => "'v', 'm'",
            RelationKind::ForeignTable => "'f'",
        };
        let query = format!(
            "SELECT c.relname::text
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1 AND c.relkind IN ({relkinds})
             ORDER BY c.relname"
        );
        self.query_strings(&query, &[&schema])
    }

    fn columns(&mut self, schema: &str, relation: &str) -> Result<Vec<ColumnInfo>> {
        let query = "
            SELECT a.attname::text,
                   NOT a.attnotnull,
                   pg_catalog.format_type(a.atttypid, a.atttypmod),
                   pg_catalog.col_description(a.attrelid, a.attnum)
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
              AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum";

        let (runtime, client) = self.handles()?;
        let rows = runtime
            .block_on(client.query(query, &[&schema, &relation]))
            .map_err(classify_query_error)?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get(0).map_err(|e| WrdsError::decode(e.to_string()))?,
                    nullable: row.try_get(1).map_err(|e| WrdsError::decode(e.to_string()))?,
                    data_type: row.try_get(2).map_err(|e| WrdsError::decode(e.to_string()))?,
                    comment: row.try_get(3).map_err(|e| WrdsError::decode(e.to_string()))?,
                })
            })
            .collect()
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the client ends the connection task, which sends Terminate
        drop(self.client.take());

        if let Some(runtime) = self.runtime.take() {
            shutdown(runtime, self.task.take(), CLOSE_TIMEOUT);
        }
        Ok(())
    }
}

/// Wait up to `timeout` for the connection task, then stop the runtime
///
/// The timer has to be created inside the runtime: it needs the runtime's time driver.
fn shutdown(runtime: Runtime, task: Option<JoinHandle<()>>, timeout: Duration) {
    if let Some(task) = task {
        let finished = runtime.block_on(async { tokio::time::timeout(timeout, task).await });
        if finished.is_err() {
            tracing::warn!("timed out waiting for the database connection to shut down");
        }
    }
    runtime.shutdown_timeout(timeout);
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Streaming cursor over a `query_raw` result
struct PgCursor<'a> {
    runtime: &'a Runtime,
    stream: Pin<Box<RowStream>>,
    columns: Vec<ColumnMeta>,
    exhausted: bool,
}

impl Cursor for PgCursor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        if self.exhausted || size == 0 {
            return Ok(Vec::new());
        }

        let runtime = self.runtime;
        let stream = &mut self.stream;
        let pg_rows = runtime
            .block_on(async {
                let mut rows = Vec::with_capacity(size.min(4096));
                while rows.len() < size {
                    match stream.next().await {
                        Some(row) => rows.push(row?),
                        None => break,
                    }
                }
                Ok::<_, tokio_postgres::Error>(rows)
            })
            .map_err(classify_query_error)?;

        if pg_rows.len() < size {
            self.exhausted = true;
        }

        pg_rows.iter().map(convert_row).collect()
    }
}

/// Rewrite pyformat placeholders to `$n` and collect the values to bind, in order
///
/// - `QueryParams::None`: the SQL is returned untouched
/// - `Positional`: each `%s` becomes `$1`, `$2`, ...; SQL without `%s` is assumed to use `$n`
///   already and is returned untouched
/// - `Named`: each distinct `%(name)s` gets one `$n`; repeated names share it
/// - `%%` becomes a literal `%` whenever placeholders are rewritten
pub(crate) fn bind_placeholders<'a>(
    sql: &str,
    params: &'a QueryParams,
) -> Result<(String, Vec<&'a Value>)> {
    match params {
        QueryParams::None => Ok((sql.to_string(), Vec::new())),

        QueryParams::Positional(values) => {
            if !sql.contains("%s") {
                return Ok((sql.to_string(), values.iter().collect()));
            }

            let mut out = String::with_capacity(sql.len());
            let mut bound = Vec::with_capacity(values.len());
            let mut chars = sql.chars().peekable();
            while let Some(ch) = chars.next() {
                match (ch, chars.peek().copied()) {
                    ('%', Some('%')) => {
                        chars.next();
                        out.push('%');
                    }
                    ('%', Some('s')) => {
                        chars.next();
                        let value = values.get(bound.len()).ok_or_else(|| {
                            WrdsError::invalid_input(format!(
                                "Query has more placeholders than the {} parameters supplied",
                                values.len()
                            ))
                        })?;
                        bound.push(value);
                        out.push('$');
                        out.push_str(&bound.len().to_string());
                    }
                    _ => out.push(ch),
                }
            }

            if bound.len() != values.len() {
                return Err(WrdsError::invalid_input(format!(
                    "Query has {} placeholders but {} parameters were supplied",
                    bound.len(),
                    values.len()
                )));
            }
            Ok((out, bound))
        }

        QueryParams::Named(values) => {
            let mut out = String::with_capacity(sql.len());
            let mut bound: Vec<&Value> = Vec::new();
            let mut slots: HashMap<&str, usize> = HashMap::new();
            let mut rest = sql;

            while let Some(pos) = rest.find('%') {
                out.push_str(&rest[..pos]);
                let tail = &rest[pos..];

                if let Some(after) = tail.strip_prefix("%%") {
                    out.push('%');
                    rest = after;
                } else if let Some(named) = tail.strip_prefix("%(") {
                    let close = named.find(")s").ok_or_else(|| {
                        WrdsError::invalid_input(
                            "Unterminated named placeholder, expected %(name)s",
                        )
                    })?;
                    let name = &named[..close];
                    let (key, value) = values.get_key_value(name).ok_or_else(|| {
                        WrdsError::invalid_input(format!(
                            "Missing value for query parameter '{name}'"
                        ))
                    })?;
                    let slot = *slots.entry(key.as_str()).or_insert_with(|| {
                        bound.push(value);
                        bound.len()
                    });
                    out.push('$');
                    out.push_str(&slot.to_string());
                    rest = &named[close + 2..];
                } else {
                    out.push('%');
                    rest = &tail[1..];
                }
            }
            out.push_str(rest);

            Ok((out, bound))
        }
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> std::result::Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => v.to_sql_checked(ty, out),
            Self::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql_checked(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql_checked(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql_checked(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql_checked(ty, out),
                Type::NUMERIC => numeric::encode(&v.to_string(), out).map(|()| IsNull::No),
                _ if <String as ToSql>::accepts(ty) => v.to_string().to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Self::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql_checked(ty, out),
                Type::NUMERIC => numeric::encode(&v.to_string(), out).map(|()| IsNull::No),
                _ if <String as ToSql>::accepts(ty) => v.to_string().to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Self::Numeric(v) => match *ty {
                Type::NUMERIC => numeric::encode(v, out).map(|()| IsNull::No),
                Type::FLOAT4 => v.trim().parse::<f32>()?.to_sql(ty, out),
                Type::FLOAT8 => v.trim().parse::<f64>()?.to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Self::Text(v) => match *ty {
                Type::NUMERIC => numeric::encode(v, out).map(|()| IsNull::No),
                Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                    Self::Int(v.trim().parse()?).to_sql(ty, out)
                }
                Type::FLOAT4 | Type::FLOAT8 => Self::Float(v.trim().parse()?).to_sql(ty, out),
                Type::DATE => chrono::NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")?
                    .to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Self::Date(v) => match *ty {
                Type::TIMESTAMP => v.and_time(chrono::NaiveTime::default()).to_sql_checked(ty, out),
                _ if <String as ToSql>::accepts(ty) => {
                    v.format("%Y-%m-%d").to_string().to_sql_checked(ty, out)
                }
                _ => v.to_sql_checked(ty, out),
            },
            Self::Time(v) => v.to_sql_checked(ty, out),
            Self::Timestamp(v) => match *ty {
                Type::TIMESTAMPTZ => v.and_utc().to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Self::TimestampTz(v) => v.to_sql_checked(ty, out),
            Self::Uuid(v) => v.to_sql_checked(ty, out),
            Self::Json(v) => v.to_sql_checked(ty, out),
            Self::Bytes(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// `NUMERIC` decoded to decimal text
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        numeric::decode(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw wire bytes of any type without a dedicated mapping
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row> {
    (0..row.len()).map(|idx| postgres_value(row, idx)).collect()
}

/// Convert one `PostgreSQL` cell to a [`Value`]
fn postgres_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let col_type = column.type_();
    let decode = |e: tokio_postgres::Error| {
        WrdsError::decode(format!("column '{}' ({}): {e}", column.name(), col_type.name()))
    };

    let value = match *col_type {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(decode)?.map(Value::Bool),

        Type::INT2 => {
            row.try_get::<_, Option<i16>>(idx).map_err(decode)?.map(|v| Value::Int(v.into()))
        }
        Type::INT4 => {
            row.try_get::<_, Option<i32>>(idx).map_err(decode)?.map(|v| Value::Int(v.into()))
        }
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(decode)?.map(Value::Int),
        Type::OID => {
            row.try_get::<_, Option<u32>>(idx).map_err(decode)?.map(|v| Value::Int(v.into()))
        }

        Type::FLOAT4 => {
            row.try_get::<_, Option<f32>>(idx).map_err(decode)?.map(|v| Value::Float(v.into()))
        }
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(decode)?.map(Value::Float),
        Type::NUMERIC => {
            row.try_get::<_, Option<PgNumeric>>(idx).map_err(decode)?.map(|v| Value::Numeric(v.0))
        }

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx).map_err(decode)?.map(Value::Text)
        }

        Type::JSON | Type::JSONB => {
            row.try_get::<_, Option<serde_json::Value>>(idx).map_err(decode)?.map(Value::Json)
        }

        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map_err(decode)?.map(Value::Bytes),

        Type::DATE => {
            row.try_get::<_, Option<chrono::NaiveDate>>(idx).map_err(decode)?.map(Value::Date)
        }
        Type::TIME => {
            row.try_get::<_, Option<chrono::NaiveTime>>(idx).map_err(decode)?.map(Value::Time)
        }
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(decode)?
            .map(Value::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_err(decode)?
            .map(Value::TimestampTz),

        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx).map_err(decode)?.map(Value::Uuid),

        // Common arrays become JSON arrays
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)
            .map_err(decode)?
            .map(|v| Value::Json(serde_json::json!(v))),
        Type::INT4_ARRAY => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)
            .map_err(decode)?
            .map(|v| Value::Json(serde_json::json!(v))),
        Type::INT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)
            .map_err(decode)?
            .map(|v| Value::Json(serde_json::json!(v))),
        Type::FLOAT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<f64>>>>(idx)
            .map_err(decode)?
            .map(|v| Value::Json(serde_json::json!(v))),

        // Enums, citext and other text-like types arrive as UTF-8; anything else stays binary
        _ => row.try_get::<_, Option<RawValue>>(idx).map_err(decode)?.map(|raw| {
            match String::from_utf8(raw.0) {
                Ok(text) => Value::Text(text),
                Err(e) => Value::Bytes(e.into_bytes()),
            }
        }),
    };

    Ok(value.unwrap_or(Value::Null))
}
