//! Query Execution
//!
//! Raw SQL and whole-table reads, returning [`DataFrame`]s.
//!
//! # Chunking
//! Rows are pulled from the server in chunks of [`SqlOptions::chunk_size`] rows (500 000 by
//! default). [`Connection::raw_sql`] concatenates the chunks into one frame;
//! [`Connection::raw_sql_iter`] hands them out one at a time, fetching each chunk only when
//! asked for it.
//!
//! # Parameters
//! Parameters are bound by the driver. They are never formatted into the SQL text.

use crate::catalog::quote_ident;
use crate::connection::Connection;
use crate::engine::{ColumnMeta, Cursor, QueryParams};
use crate::error::{Result, WrdsError};
use crate::frame::DataFrame;

/// Rows fetched per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 500_000;

/// Options for [`Connection::raw_sql`] and [`Connection::raw_sql_iter`]
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOptions {
    /// Convert `NUMERIC` values to floats
    pub coerce_float: bool,

    /// Columns to convert to timestamps
    pub date_cols: Vec<String>,

    /// Columns to move into the index
    pub index_col: Vec<String>,

    /// Statement parameters
    pub params: QueryParams,

    /// Rows per fetch; `None` reads everything at once
    pub chunk_size: Option<usize>,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            coerce_float: true,
            date_cols: Vec::new(),
            index_col: Vec::new(),
            params: QueryParams::None,
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
        }
    }
}

impl SqlOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub const fn coerce_float(mut self, coerce: bool) -> Self {
        self.coerce_float = coerce;
        self
    }

    #[must_use]
    pub fn date_cols<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.date_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn index_col<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.index_col = cols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn validated_chunk_size(&self) -> Result<Option<usize>> {
        match self.chunk_size {
            Some(0) => Err(WrdsError::invalid_input("chunk_size must be greater than zero")),
            other => Ok(other),
        }
    }

    /// Apply float coercion, date parsing and indexing to one chunk
    fn shape(&self, mut frame: DataFrame) -> Result<DataFrame> {
        if self.coerce_float {
            frame.coerce_float();
        }
        frame.parse_dates(&self.date_cols)?;
        frame.set_index(&self.index_col)?;
        Ok(frame)
    }
}

/// Options for [`Connection::get_table`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    /// Maximum rows to return; negative means no limit
    pub obs: i64,

    /// Rows to skip
    pub offset: i64,

    /// Columns to select; empty selects all
    pub columns: Vec<String>,

    /// Convert `NUMERIC` values to floats
    pub coerce_float: bool,

    /// Columns to move into the index
    pub index_col: Vec<String>,

    /// Columns to convert to timestamps
    pub date_cols: Vec<String>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            obs: -1,
            offset: 0,
            columns: Vec::new(),
            coerce_float: true,
            index_col: Vec::new(),
            date_cols: Vec::new(),
        }
    }
}

impl TableOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn obs(mut self, obs: i64) -> Self {
        self.obs = obs;
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn columns<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.columns = cols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn coerce_float(mut self, coerce: bool) -> Self {
        self.coerce_float = coerce;
        self
    }

    #[must_use]
    pub fn index_col<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.index_col = cols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn date_cols<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.date_cols = cols.into_iter().map(Into::into).collect();
        self
    }
}

/// Build the `SELECT` statement for a table read
pub fn table_query(schema: &str, table: &str, options: &TableOptions) -> Result<String> {
    if options.offset < 0 {
        return Err(WrdsError::invalid_input(format!(
            "offset must not be negative, got {}",
            options.offset
        )));
    }

    let columns = if options.columns.is_empty() {
        "*".to_string()
    } else {
        options.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
    };

    let mut sql = format!("SELECT {columns} FROM {}.{}", quote_ident(schema), quote_ident(table));
    if options.obs >= 0 {
        sql.push_str(&format!(" LIMIT {}", options.obs));
    }
    sql.push_str(&format!(" OFFSET {};", options.offset));
    Ok(sql)
}

impl Connection {
    /// Run a query and return all of its rows as one frame
    ///
    /// With a chunk size the rows are fetched chunk by chunk; the result is the same as an
    /// unchunked read.
    pub fn raw_sql(&mut self, sql: &str, options: &SqlOptions) -> Result<DataFrame> {
        let chunk_size = options.validated_chunk_size()?;
        tracing::debug!(sql, ?chunk_size, "running query");

        let mut cursor = self.db()?.execute(sql, &options.params)?;
        let columns = cursor.columns().to_vec();

        let frame = match chunk_size {
            None => {
                let rows = cursor.fetch_all()?;
                options.shape(DataFrame::new(columns, rows)?)?
            }
            Some(size) => {
                let mut frames = Vec::new();
                loop {
                    let rows = cursor.fetch_many(size)?;
                    let exhausted = rows.len() < size;
                    if !rows.is_empty() || frames.is_empty() {
                        frames.push(options.shape(DataFrame::new(columns.clone(), rows)?)?);
                    }
                    if exhausted {
                        break;
                    }
                }
                DataFrame::concat(frames)?
            }
        };

        tracing::debug!(rows = frame.len(), "query complete");
        Ok(frame)
    }

    /// Run a query and return a lazy iterator over its result, one chunk per item
    ///
    /// Without a chunk size the default of 500 000 rows is used. An empty result yields one
    /// empty frame.
    pub fn raw_sql_iter(&mut self, sql: &str, options: SqlOptions) -> Result<ChunkIter<'_>> {
        let chunk_size = options.validated_chunk_size()?.unwrap_or(DEFAULT_CHUNK_SIZE);
        tracing::debug!(sql, chunk_size, "running query (chunked)");

        let cursor = self.db()?.execute(sql, &options.params)?;
        let columns = cursor.columns().to_vec();
        Ok(ChunkIter {
            cursor,
            columns,
            options,
            chunk_size,
            yielded: false,
            done: false,
        })
    }

    /// Read a table, optionally limited to some columns and a row window
    pub fn get_table(
        &mut self,
        schema: &str,
        table: &str,
        options: &TableOptions,
    ) -> Result<DataFrame> {
        self.check_schema_perms(schema)?;

        let sql = table_query(schema, table, options)?;
        let sql_options = SqlOptions {
            coerce_float: options.coerce_float,
            date_cols: options.date_cols.clone(),
            index_col: options.index_col.clone(),
            ..SqlOptions::default()
        };
        self.raw_sql(&sql, &sql_options)
    }
}

/// Lazy chunked query result
///
/// Single pass, single consumer. Each call to `next` fetches one chunk from the server.
/// The iterator holds the connection mutably until dropped.
pub struct ChunkIter<'a> {
    cursor: Box<dyn Cursor + 'a>,
    columns: Vec<ColumnMeta>,
    options: SqlOptions,
    chunk_size: usize,
    yielded: bool,
    done: bool,
}

impl ChunkIter<'_> {
    /// Result columns, available before the first chunk is fetched
    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<DataFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rows = match self.cursor.fetch_many(self.chunk_size) {
            Ok(rows) => rows,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if rows.len() < self.chunk_size {
            self.done = true;
        }
        if rows.is_empty() && self.yielded {
            return None;
        }

        self.yielded = true;
        Some(DataFrame::new(self.columns.clone(), rows).and_then(|frame| self.options.shape(frame)))
    }
}
