//! Shared test support: an in-memory database driver
//!
//! `FakeDriver` records every connection attempt, statement and fetch, and answers catalog
//! calls and queries from data registered up front. Clones share state, so a test keeps one
//! clone for assertions and hands another to the connection.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use wrds::catalog::LIBRARY_LIST_SQL;
use wrds::engine::{
    ColumnInfo, ColumnMeta, ConnectArgs, Cursor, DbConnection, Driver, RelationKind, Row,
};
use wrds::{ConnectOptions, QueryParams, Result, StaticCredentials, Value, WrdsError};

/// Host used by tests that exercise the default-host fallback
pub const CUSTOM_HOST: &str = "wrds-cloud.example.edu";

#[derive(Default)]
pub struct FakeState {
    pub connect_failures: usize,
    pub connects: Vec<(String, ConnectArgs)>,
    pub executed: Vec<(String, QueryParams)>,
    pub fetches: Vec<usize>,
    pub closes: usize,
    pub libraries: Vec<String>,
    pub schemas: Vec<String>,
    pub relations: Vec<(String, RelationKind, String)>,
    pub columns: HashMap<(String, String), Vec<ColumnInfo>>,
    pub results: HashMap<String, (Vec<ColumnMeta>, Vec<Row>)>,
    pub plan: Option<serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// The first `n` connection attempts fail
    pub fn fail_connects(self, n: usize) -> Self {
        self.state().connect_failures = n;
        self
    }

    /// A library the user may read (also listed as an existing schema)
    pub fn library(self, name: &str) -> Self {
        {
            let mut state = self.state();
            state.libraries.push(name.to_string());
            state.schemas.push(name.to_string());
        }
        self
    }

    /// A schema that exists but is not readable
    pub fn schema(self, name: &str) -> Self {
        self.state().schemas.push(name.to_string());
        self
    }

    pub fn relation(self, schema: &str, kind: RelationKind, name: &str) -> Self {
        self.state().relations.push((schema.to_string(), kind, name.to_string()));
        self
    }

    pub fn table_columns(self, schema: &str, table: &str, columns: Vec<ColumnInfo>) -> Self {
        self.state().columns.insert((schema.to_string(), table.to_string()), columns);
        self
    }

    /// Rows returned for exactly this SQL text
    pub fn result(self, sql: &str, columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        self.state().results.insert(sql.to_string(), (columns, rows));
        self
    }

    /// `Plan Rows` reported by `EXPLAIN`
    pub fn plan_rows(self, rows: i64) -> Self {
        self.state().plan = Some(serde_json::json!([
            { "Plan": { "Node Type": "Seq Scan", "Plan Rows": rows } }
        ]));
        self
    }

    pub fn connect_uris(&self) -> Vec<String> {
        self.state().connects.iter().map(|(uri, _)| uri.clone()).collect()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn last_executed(&self) -> Option<(String, QueryParams)> {
        self.state().executed.last().cloned()
    }

    pub fn fetches(&self) -> Vec<usize> {
        self.state().fetches.clone()
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

impl Driver for FakeDriver {
    fn connect(&self, uri: &str, args: &ConnectArgs) -> Result<Box<dyn DbConnection>> {
        let mut state = self.state();
        state.connects.push((uri.to_string(), args.clone()));
        if state.connects.len() <= state.connect_failures {
            return Err(WrdsError::connection_failed(
                "FATAL: password authentication failed for user",
            ));
        }
        Ok(Box::new(FakeConnection { state: Arc::clone(&self.state), closed: false }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
    closed: bool,
}

impl FakeConnection {
    fn state(&self) -> Result<MutexGuard<'_, FakeState>> {
        if self.closed {
            return Err(WrdsError::query_failed("connection already closed"));
        }
        Ok(self.state.lock().unwrap())
    }
}

impl DbConnection for FakeConnection {
    fn execute(&mut self, sql: &str, params: &QueryParams) -> Result<Box<dyn Cursor + '_>> {
        let mut state = self.state()?;
        state.executed.push((sql.to_string(), params.clone()));

        let (columns, rows) = if sql == LIBRARY_LIST_SQL {
            let rows = state
                .libraries
                .iter()
                .map(|name| vec![Value::from(name.as_str())])
                .collect();
            (vec![ColumnMeta::new("schemaname", "text")], rows)
        } else if sql.starts_with("EXPLAIN") {
            match &state.plan {
                Some(plan) => (
                    vec![ColumnMeta::new("QUERY PLAN", "json")],
                    vec![vec![Value::Json(plan.clone())]],
                ),
                None => {
                    return Err(WrdsError::query_failed_with_state(
                        "42P01",
                        "relation does not exist",
                    ));
                }
            }
        } else {
            match state.results.get(sql) {
                Some((columns, rows)) => (columns.clone(), rows.clone()),
                None => {
                    return Err(WrdsError::query_failed_with_state(
                        "42601",
                        format!("syntax error in {sql}"),
                    ))
                }
            }
        };

        Ok(Box::new(FakeCursor {
            state: Arc::clone(&self.state),
            columns,
            rows: rows.into(),
        }))
    }

    fn schema_names(&mut self) -> Result<Vec<String>> {
        Ok(self.state()?.schemas.clone())
    }

    fn relation_names(&mut self, schema: &str, kind: RelationKind) -> Result<Vec<String>> {
        Ok(self
            .state()?
            .relations
            .iter()
            .filter(|(s, k, _)| s == schema && *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect())
    }

    fn columns(&mut self, schema: &str, relation: &str) -> Result<Vec<ColumnInfo>> {
        Ok(self
            .state()?
            .columns
            .get(&(schema.to_string(), relation.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}

struct FakeCursor {
    state: Arc<Mutex<FakeState>>,
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
}

impl Cursor for FakeCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        self.state.lock().unwrap().fetches.push(size);
        let take = size.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }
}

/// Options for a fake-backed connection that does not connect on construction
pub fn options(driver: &FakeDriver, creds: &StaticCredentials) -> ConnectOptions {
    ConnectOptions::new()
        .hostname(CUSTOM_HOST)
        .username("config_user")
        .password("config_pw")
        .driver(driver.clone())
        .credential_source(creds.clone())
        .autoconnect(false)
}

/// Credentials a test never expects to be asked for
pub fn unused_credentials() -> StaticCredentials {
    StaticCredentials::new("prompted_user", "prompted_pw")
}

/// `n` rows of `(permno int4, prc numeric)`
pub fn price_rows(n: usize) -> (Vec<ColumnMeta>, Vec<Row>) {
    let columns = vec![ColumnMeta::new("permno", "int4"), ColumnMeta::new("prc", "numeric")];
    let rows = (0..n)
        .map(|i| {
            let permno = 10_000 + i64::try_from(i).unwrap();
            vec![Value::Int(permno), Value::Numeric(format!("{}.25", i % 100))]
        })
        .collect();
    (columns, rows)
}

pub fn column(name: &str, data_type: &str, nullable: bool, comment: Option<&str>) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        nullable,
        data_type: data_type.to_string(),
        comment: comment.map(str::to_string),
    }
}
