//! Tabular Query Results
//!
//! A [`DataFrame`] holds named, typed columns and rows of [`Value`]s, optionally with an index
//! built from one or more columns. Query post-processing happens here:
//!
//! 1. [`DataFrame::coerce_float`]: `NUMERIC` values become floats
//! 2. [`DataFrame::parse_dates`]: named columns become timestamps
//! 3. [`DataFrame::set_index`]: named columns move into the index

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::engine::{ColumnMeta, Row, Value};
use crate::error::{Result, WrdsError};

/// Row labels taken from one or more columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    /// Columns the index was built from
    pub names: Vec<String>,

    /// One label tuple per row
    pub values: Vec<Row>,
}

/// Query result table
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DataFrame {
    columns: Vec<ColumnMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<Index>,
    rows: Vec<Row>,
}

impl DataFrame {
    /// Build a frame from columns and rows
    ///
    /// Every row must have exactly one value per column.
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|row| row.len() != columns.len()) {
            return Err(WrdsError::decode(format!(
                "row {bad} has {} values but the result has {} columns",
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            index: None,
            rows,
        })
    }

    /// A frame with columns but no rows
    #[must_use]
    pub fn empty(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            index: None,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let pos = self.position(name)?;
        Some(self.rows.iter().map(|row| &row[pos]).collect())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn require_position(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| {
            WrdsError::invalid_input(format!(
                "Column '{name}' is not in the result (columns: {})",
                self.column_names().join(", ")
            ))
        })
    }

    /// Stack frames vertically
    ///
    /// All frames must have the same column names (and index names) in the same order.
    /// An empty input yields an empty frame without columns.
    pub fn concat<I>(frames: I) -> Result<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut frames = frames.into_iter();
        let Some(mut out) = frames.next() else {
            return Ok(Self::default());
        };

        for frame in frames {
            if frame.column_names() != out.column_names() {
                return Err(WrdsError::invalid_input(format!(
                    "Cannot concatenate frames with different columns: [{}] vs [{}]",
                    out.column_names().join(", "),
                    frame.column_names().join(", ")
                )));
            }

            match (&mut out.index, frame.index) {
                (Some(ours), Some(theirs)) if ours.names == theirs.names => {
                    ours.values.extend(theirs.values);
                }
                (None, None) => {}
                _ => {
                    return Err(WrdsError::invalid_input(
                        "Cannot concatenate frames with different indexes",
                    ))
                }
            }
            out.rows.extend(frame.rows);
        }

        Ok(out)
    }

    /// Convert `NUMERIC` values to floating point
    pub fn coerce_float(&mut self) {
        for value in self.rows.iter_mut().flatten() {
            if let Value::Numeric(text) = value {
                *value = text.trim().parse::<f64>().map_or(Value::Null, Value::Float);
            }
        }
    }

    /// Convert the named columns to timestamps
    ///
    /// Text is parsed as a date, a date-time or an RFC 3339 timestamp; integers and floats are
    /// seconds since the Unix epoch; dates become midnight. Values that cannot be converted
    /// become null.
    pub fn parse_dates<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            let pos = self.require_position(name.as_ref())?;
            for row in &mut self.rows {
                row[pos] = to_datetime(std::mem::replace(&mut row[pos], Value::Null));
            }
            self.columns[pos].type_name = "timestamp".to_string();
        }
        Ok(())
    }

    /// Move the named columns out of the data and into the index
    pub fn set_index<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let positions = names
            .iter()
            .map(|name| self.require_position(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut values = Vec::with_capacity(self.rows.len());
        for row in &mut self.rows {
            let labels = positions
                .iter()
                .map(|&pos| std::mem::replace(&mut row[pos], Value::Null))
                .collect();
            values.push(labels);
        }

        let mut remove = positions.clone();
        remove.sort_unstable();
        remove.dedup();
        for &pos in remove.iter().rev() {
            self.columns.remove(pos);
            for row in &mut self.rows {
                row.remove(pos);
            }
        }

        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.index = Some(Index { names, values });
        Ok(())
    }
}

fn to_datetime(value: Value) -> Value {
    match value {
        Value::Timestamp(_) | Value::TimestampTz(_) | Value::Null => value,
        Value::Date(date) => Value::Timestamp(date.and_time(chrono::NaiveTime::default())),
        Value::Int(secs) => {
            DateTime::<Utc>::from_timestamp(secs, 0)
                .map_or(Value::Null, |dt| Value::Timestamp(dt.naive_utc()))
        }
        Value::Float(secs) => from_epoch_float(secs),
        Value::Numeric(text) => text.trim().parse().map_or(Value::Null, from_epoch_float),
        Value::Text(text) => parse_date_text(text.trim()),
        _ => Value::Null,
    }
}

fn from_epoch_float(secs: f64) -> Value {
    if !secs.is_finite() {
        return Value::Null;
    }
    let whole = secs.floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    #[allow(clippy::cast_possible_truncation)]
    let whole = whole as i64;
    DateTime::<Utc>::from_timestamp(whole, nanos)
        .map_or(Value::Null, |dt| Value::Timestamp(dt.naive_utc()))
}

fn parse_date_text(text: &str) -> Value {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Value::Timestamp(date.and_time(chrono::NaiveTime::default()));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Value::Timestamp(dt);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Value::TimestampTz(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Value::TimestampTz(dt.with_timezone(&Utc));
    }
    Value::Null
}
