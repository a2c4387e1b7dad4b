//! Library Catalog
//!
//! Schema ("library") discovery and permission gating.
//!
//! The set of libraries the user may read is computed once per connection by
//! [`LIBRARY_LIST_SQL`] and consulted before every schema-scoped operation. A schema outside the
//! set is reported as [`WrdsError::NotSubscribed`] when it exists in the database and
//! [`WrdsError::SchemaNotFound`] when it does not.
//!
//! # Library Rules
//! - Schemas with `USAGE` privilege that hold at least one table, view or foreign table
//! - Excluding `pg_*`, `information_schema`, and names ending in `_old` or `_all`
//! - View-only schemas, suffixed or not, are included only when their views depend on tables
//!   in an included schema

use serde::Serialize;
use std::collections::BTreeSet;

use crate::connection::Connection;
use crate::engine::{ColumnInfo, QueryParams, RelationKind, Value};
use crate::error::{Result, WrdsError};

/// Libraries the current user may read
pub const LIBRARY_LIST_SQL: &str = r#"
WITH pgobjs AS (
    SELECT oid, relnamespace, relkind
    FROM pg_catalog.pg_class
    WHERE relkind = ANY (ARRAY['r'::"char", 'v'::"char", 'f'::"char", 'p'::"char"])
),
schemas AS (
    SELECT n.nspname AS schemaname,
           n.oid,
           array_agg(DISTINCT o.relkind) AS relkind_a
    FROM pg_catalog.pg_namespace n
    JOIN pgobjs o ON n.oid = o.relnamespace
    WHERE n.nspname !~ '(^pg_)|(^information_schema$)'
      AND has_schema_privilege(n.nspname, 'USAGE') = TRUE
    GROUP BY n.nspname, n.oid
)
SELECT schemaname::text
FROM schemas
WHERE relkind_a != ARRAY['v'::"char"]
  AND schemaname !~ '(_old$)|(_all$)'
UNION
SELECT nv.schemaname::text
FROM schemas nv
JOIN pgobjs v ON nv.oid = v.relnamespace AND v.relkind = 'v'::"char"
JOIN pg_catalog.pg_depend dv ON v.oid = dv.refobjid
    AND dv.refclassid = 'pg_catalog.pg_class'::regclass::oid
    AND dv.classid = 'pg_catalog.pg_rewrite'::regclass::oid
    AND dv.deptype = 'i'::"char"
JOIN pg_catalog.pg_depend dt ON dv.objid = dt.objid
    AND dv.refobjid <> dt.refobjid
    AND dt.classid = 'pg_catalog.pg_rewrite'::regclass::oid
    AND dt.refclassid = 'pg_catalog.pg_class'::regclass::oid
JOIN pgobjs t ON dt.refobjid = t.oid
JOIN schemas nt ON t.relnamespace = nt.oid
    AND nt.relkind_a != ARRAY['v'::"char"]
    AND nt.schemaname !~ '(_old$)|(_all$)'
WHERE nv.relkind_a = ARRAY['v'::"char"]
GROUP BY nv.schemaname
ORDER BY 1
"#;

/// Summary of one table or view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub schema: String,
    pub table: String,

    /// Planner row estimate (0 when unavailable)
    pub approx_rows: i64,

    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
}

/// Quote an SQL identifier
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Connection {
    /// Load (or reload) the set of libraries the user may read
    pub fn load_library_list(&mut self) -> Result<()> {
        let rows = {
            let mut cursor = self.db()?.execute(LIBRARY_LIST_SQL, &QueryParams::None)?;
            cursor.fetch_all()?
        };

        let libraries: BTreeSet<String> = rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Value::Text(name)) => Some(name),
                _ => None,
            })
            .collect();

        tracing::info!(count = libraries.len(), "loaded library list");
        self.schema_perm = Some(libraries);
        Ok(())
    }

    /// Libraries the user may read, in sorted order
    pub fn list_libraries(&mut self) -> Result<Vec<String>> {
        Ok(self.permitted()?.iter().cloned().collect())
    }

    fn permitted(&mut self) -> Result<&BTreeSet<String>> {
        if self.schema_perm.is_none() {
            self.load_library_list()?;
        }
        self.schema_perm.as_ref().ok_or(WrdsError::NotConnected)
    }

    /// Fail unless `schema` is one of the user's libraries
    ///
    /// Distinguishes a schema the user is not subscribed to from one that does not exist.
    pub fn check_schema_perms(&mut self, schema: &str) -> Result<()> {
        if self.permitted()?.contains(schema) {
            return Ok(());
        }

        let exists = self.db()?.schema_names()?.iter().any(|name| name == schema);
        if exists {
            Err(WrdsError::not_subscribed(schema))
        } else {
            Err(WrdsError::schema_not_found(schema))
        }
    }

    /// Views, tables and foreign tables in a library, in that order
    pub fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.check_schema_perms(schema)?;

        let db = self.db()?;
        let mut tables = db.relation_names(schema, RelationKind::View)?;
        tables.extend(db.relation_names(schema, RelationKind::Table)?);
        tables.extend(db.relation_names(schema, RelationKind::ForeignTable)?);
        Ok(tables)
    }

    /// Approximate row count and column details of a table
    pub fn describe_table(&mut self, schema: &str, table: &str) -> Result<TableDescription> {
        let approx_rows = self.get_row_count(schema, table)?;

        let columns = self.db()?.columns(schema, table)?;
        if columns.is_empty() {
            return Err(WrdsError::query_failed_with_state(
                "42P01",
                format!("relation {}.{} does not exist", quote_ident(schema), quote_ident(table)),
            ));
        }

        tracing::info!(schema, table, approx_rows, "described table");
        Ok(TableDescription {
            schema: schema.to_string(),
            table: table.to_string(),
            approx_rows,
            columns,
        })
    }

    /// Planner row estimate for a table
    ///
    /// Any failure of the estimate itself is logged and reported as 0; permission failures are
    /// still errors.
    pub fn get_row_count(&mut self, schema: &str, table: &str) -> Result<i64> {
        self.check_schema_perms(schema)?;

        let sql = format!(
            "EXPLAIN (FORMAT 'json') SELECT 1 FROM {}.{}",
            quote_ident(schema),
            quote_ident(table)
        );
        match self.plan_rows(&sql) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::warn!(schema, table, error = %e, "row count estimate unavailable");
                Ok(0)
            }
        }
    }

    fn plan_rows(&mut self, sql: &str) -> Result<i64> {
        let rows = {
            let mut cursor = self.db()?.execute(sql, &QueryParams::None)?;
            cursor.fetch_all()?
        };

        let plan = match rows.into_iter().next().and_then(|row| row.into_iter().next()) {
            Some(Value::Json(plan)) => plan,
            Some(Value::Text(text)) => serde_json::from_str(&text)
                .map_err(|e| WrdsError::decode(format!("Invalid EXPLAIN output: {e}")))?,
            other => {
                return Err(WrdsError::decode(format!("Unexpected EXPLAIN output: {other:?}")))
            }
        };

        plan.get(0)
            .and_then(|p| p.get("Plan"))
            .and_then(|p| p.get("Plan Rows"))
            .and_then(|rows| rows.as_i64().or_else(|| rows.as_f64().map(|f| f.round() as i64)))
            .ok_or_else(|| WrdsError::decode("EXPLAIN output has no \"Plan Rows\""))
    }
}
