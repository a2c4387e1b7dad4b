//! WRDS CLI Entry Point
//!
//! Subcommands:
//! - `libraries` - Libraries the user is subscribed to
//! - `tables` - Tables and views in a library
//! - `describe` - Column details and approximate row count of a table
//! - `row-count` - Approximate row count of a table
//! - `sql` - Run a query
//! - `get-table` - Read a table
//! - `pgpass` - Save credentials to the credential file
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use std::time::Instant;

use wrds::{
    ConnectOptions, Connection, ErrorEnvelope, Metadata, QueryParams, Result, SqlOptions,
    SuccessEnvelope, TableOptions, WrdsError,
};

/// WRDS - query the Wharton Research Data Services database
#[derive(Parser)]
#[command(name = "wrds")]
#[command(about = "Discover WRDS libraries and tables and run queries, with JSON output")]
#[command(version)]
struct Cli {
    /// Database host (default: $PGHOST, then the WRDS host)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Database name
    #[arg(long, global = true)]
    dbname: Option<String>,

    /// WRDS username (default: the OS user)
    #[arg(long, short = 'u', global = true)]
    username: Option<String>,

    /// More logging on stderr (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the libraries you are subscribed to
    Libraries,

    /// List tables and views in a library
    Tables { library: String },

    /// Describe the columns of a table
    Describe { library: String, table: String },

    /// Approximate number of rows in a table
    RowCount { library: String, table: String },

    /// Run a SQL query
    Sql {
        query: String,

        /// Query parameter for a %(name)s placeholder (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Column to use as the index (repeatable)
        #[arg(long)]
        index_col: Vec<String>,

        /// Column to parse as a timestamp (repeatable)
        #[arg(long)]
        date_col: Vec<String>,

        /// Rows fetched per round trip
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Keep NUMERIC values as exact decimal strings
        #[arg(long)]
        no_coerce_float: bool,
    },

    /// Read rows from a table
    GetTable {
        library: String,
        table: String,

        /// Maximum rows to return (negative: no limit)
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        obs: i64,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,

        /// Columns to select, comma separated
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Save your credentials to the credential file
    Pgpass,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Libraries => "libraries",
            Self::Tables { .. } => "tables",
            Self::Describe { .. } => "describe",
            Self::RowCount { .. } => "row-count",
            Self::Sql { .. } => "sql",
            Self::GetTable { .. } => "get-table",
            Self::Pgpass => "pgpass",
        }
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = wrds::logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("{e}");
    }

    let command = cli.command.name();
    let started = Instant::now();
    match run(&cli) {
        Ok((data, rows)) => {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let meta = match rows {
                Some(rows) => Metadata::with_rows(elapsed, rows),
                None => Metadata::new(elapsed),
            };
            print_json(&SuccessEnvelope::new(command, data, meta));
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            print_json(&ErrorEnvelope::from_error(command, &e));
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            let message = format!("Could not serialize output: {e}");
            println!(r#"{{"ok":false,"error":{{"code":"DECODE_ERROR","message":{message:?}}}}}"#);
        }
    }
}

fn options(cli: &Cli) -> ConnectOptions {
    let mut options = ConnectOptions::new();
    if let Some(host) = &cli.host {
        options = options.hostname(host);
    }
    if let Some(port) = cli.port {
        options = options.port(port);
    }
    if let Some(dbname) = &cli.dbname {
        options = options.dbname(dbname);
    }
    if let Some(username) = &cli.username {
        options = options.username(username);
    }
    options
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| WrdsError::decode(format!("Could not serialize result: {e}")))
}

/// Run the command, returning its JSON payload and row count (for tabular results)
fn run(cli: &Cli) -> Result<(serde_json::Value, Option<usize>)> {
    // Saving credentials does not need a session
    if let Commands::Pgpass = cli.command {
        let mut db = Connection::new(options(cli).autoconnect(false))?;
        return save_credentials(&mut db);
    }

    Connection::scoped(options(cli), |db| run_connected(db, &cli.command))
}

fn save_credentials(db: &mut Connection) -> Result<(serde_json::Value, Option<usize>)> {
    let path = db.create_pgpass_file()?;
    Ok((serde_json::json!({ "path": path }), None))
}

fn run_connected(
    db: &mut Connection,
    command: &Commands,
) -> Result<(serde_json::Value, Option<usize>)> {
    match command {
        Commands::Libraries => {
            let libraries = db.list_libraries()?;
            let count = libraries.len();
            Ok((to_json(&libraries)?, Some(count)))
        }
        Commands::Tables { library } => {
            let tables = db.list_tables(library)?;
            let count = tables.len();
            Ok((to_json(&tables)?, Some(count)))
        }
        Commands::Describe { library, table } => {
            let description = db.describe_table(library, table)?;
            Ok((to_json(&description)?, None))
        }
        Commands::RowCount { library, table } => {
            let rows = db.get_row_count(library, table)?;
            let data = serde_json::json!({
                "library": library,
                "table": table,
                "approx_rows": rows,
            });
            Ok((data, None))
        }
        Commands::Sql { query, params, index_col, date_col, chunk_size, no_coerce_float } => {
            let params = if params.is_empty() {
                QueryParams::None
            } else {
                QueryParams::named(params.iter().cloned())
            };
            let mut sql_options = SqlOptions::new()
                .params(params)
                .index_col(index_col.iter().cloned())
                .date_cols(date_col.iter().cloned())
                .coerce_float(!no_coerce_float);
            if chunk_size.is_some() {
                sql_options = sql_options.chunk_size(*chunk_size);
            }
            let frame = db.raw_sql(query, &sql_options)?;
            Ok((to_json(&frame)?, Some(frame.len())))
        }
        Commands::GetTable { library, table, obs, offset, columns } => {
            let table_options =
                TableOptions::new().obs(*obs).offset(*offset).columns(columns.iter().cloned());
            let frame = db.get_table(library, table, &table_options)?;
            Ok((to_json(&frame)?, Some(frame.len())))
        }
        Commands::Pgpass => save_credentials(db),
    }
}
