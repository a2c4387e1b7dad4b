//! Connection Configuration
//!
//! This module resolves the parameters of a client connection: target host, port, database,
//! credentials and driver connect options.
//!
//! # Resolution Precedence (hostname)
//! 1. Explicit hostname passed to [`ConnectOptions::hostname`] (highest priority)
//! 2. `PGHOST` environment variable
//! 3. [`WRDS_POSTGRES_HOST`]
//!
//! # Connect Options
//! Every connection starts from [`default_connect_args`] (`sslmode=require` and an
//! `application_name` identifying the client). Options given by the caller are merged over
//! the defaults.
//!
//! # Credential File
//! See [`pgpass`] for lookup and persistence of `host:port:dbname:user:password` entries.

pub mod pgpass;

use std::fmt;
use std::path::PathBuf;
use url::Url;
use zeroize::Zeroizing;

use crate::credentials::{CredentialSource, TerminalPrompt};
use crate::engine::{ConnectArgs, Driver};
use crate::error::{Result, WrdsError};

/// Default WRDS `PostgreSQL` host
pub const WRDS_POSTGRES_HOST: &str = "wrds-pgdata.wharton.upenn.edu";

/// Default WRDS `PostgreSQL` port
pub const WRDS_POSTGRES_PORT: u16 = 9737;

/// Default WRDS database name
pub const WRDS_POSTGRES_DB: &str = "wrds";

/// Environment variable naming the host when none is configured
pub const PGHOST_ENV: &str = "PGHOST";

/// Resolved connection parameters
///
/// `hostname` may be replaced by the default host and `username` / `password` filled in
/// by a credential prompt while connecting; nothing else changes after construction.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Database host
    pub hostname: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub dbname: String,

    /// Login user; the OS user is used when unset
    pub username: Option<String>,

    /// Login password; the credential file is consulted when unset
    pub password: Option<Zeroizing<String>>,

    /// Driver connect options (`sslmode`, `application_name`, ...)
    pub connect_args: ConnectArgs,

    /// Credential file override
    pub pgpass_file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Username used for the next connection attempt
    #[must_use]
    pub fn effective_username(&self) -> String {
        self.username.clone().unwrap_or_else(os_username)
    }

    /// Whether the configured host is the default WRDS host
    #[must_use]
    pub fn is_default_host(&self) -> bool {
        self.hostname == WRDS_POSTGRES_HOST
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hostname: WRDS_POSTGRES_HOST.to_string(),
            port: WRDS_POSTGRES_PORT,
            dbname: WRDS_POSTGRES_DB.to_string(),
            username: None,
            password: None,
            connect_args: default_connect_args(),
            pgpass_file: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_args", &self.connect_args)
            .field("pgpass_file", &self.pgpass_file)
            .finish()
    }
}

/// Builder for a [`crate::Connection`]
///
/// ```no_run
/// use wrds::{ConnectOptions, Connection};
///
/// let mut db = Connection::new(ConnectOptions::new().username("jdoe"))?;
/// println!("{:?}", db.list_libraries()?);
/// # Ok::<(), wrds::WrdsError>(())
/// ```
pub struct ConnectOptions {
    hostname: Option<String>,
    port: Option<u16>,
    dbname: Option<String>,
    username: Option<String>,
    password: Option<Zeroizing<String>>,
    connect_args: ConnectArgs,
    pgpass_file: Option<PathBuf>,
    credentials: Option<Box<dyn CredentialSource>>,
    driver: Option<Box<dyn Driver>>,
    autoconnect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            hostname: None,
            port: None,
            dbname: None,
            username: None,
            password: None,
            connect_args: ConnectArgs::new(),
            pgpass_file: None,
            credentials: None,
            driver: None,
            autoconnect: true,
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Database host (overrides `PGHOST`)
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    /// Add a driver connect option, replacing the default for the same key
    #[must_use]
    pub fn connect_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_args.insert(key.into(), value.into());
        self
    }

    /// Read and write credentials at `path` instead of the platform credential file
    #[must_use]
    pub fn pgpass_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pgpass_file = Some(path.into());
        self
    }

    /// Source of prompted credentials (defaults to [`TerminalPrompt`])
    #[must_use]
    pub fn credential_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.credentials = Some(Box::new(source));
        self
    }

    /// Database driver (defaults to the `PostgreSQL` driver)
    #[must_use]
    pub fn driver(mut self, driver: impl Driver + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    /// Connect and load the library list during construction (default `true`)
    #[must_use]
    pub fn autoconnect(mut self, autoconnect: bool) -> Self {
        self.autoconnect = autoconnect;
        self
    }

    /// Resolve into a config plus the collaborators the connection needs
    pub(crate) fn into_parts(self) -> Result<ResolvedOptions> {
        let env_host = std::env::var(PGHOST_ENV).ok();
        let hostname = resolve_hostname(self.hostname.as_deref(), env_host.as_deref());

        let mut connect_args = default_connect_args();
        connect_args.extend(self.connect_args);

        let config = ConnectionConfig {
            hostname,
            port: self.port.unwrap_or(WRDS_POSTGRES_PORT),
            dbname: self.dbname.unwrap_or_else(|| WRDS_POSTGRES_DB.to_string()),
            username: self.username,
            password: self.password,
            connect_args,
            pgpass_file: self.pgpass_file,
        };

        let driver = match self.driver {
            Some(driver) => driver,
            None => default_driver()?,
        };
        let credentials = self.credentials.unwrap_or_else(|| Box::new(TerminalPrompt));

        Ok(ResolvedOptions {
            config,
            driver,
            credentials,
            autoconnect: self.autoconnect,
        })
    }
}

pub(crate) struct ResolvedOptions {
    pub config: ConnectionConfig,
    pub driver: Box<dyn Driver>,
    pub credentials: Box<dyn CredentialSource>,
    pub autoconnect: bool,
}

#[cfg(feature = "postgres")]
fn default_driver() -> Result<Box<dyn Driver>> {
    Ok(Box::new(crate::engine::postgres::PostgresDriver))
}

#[cfg(not(feature = "postgres"))]
fn default_driver() -> Result<Box<dyn Driver>> {
    Err(WrdsError::invalid_input(
        "No database driver available: enable the 'postgres' feature or supply a driver",
    ))
}

/// Pick the first-attempt hostname: explicit, then environment, then the WRDS default
#[must_use]
pub fn resolve_hostname(explicit: Option<&str>, env: Option<&str>) -> String {
    explicit
        .or(env)
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .unwrap_or(WRDS_POSTGRES_HOST)
        .to_string()
}

/// Identifies this client in `pg_stat_activity`
#[must_use]
pub fn application_name() -> String {
    format!(
        "{}/{} {}/rustc {}",
        std::env::consts::OS,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("WRDS_RUSTC_VERSION"),
    )
}

/// Connect options applied to every connection unless overridden
#[must_use]
pub fn default_connect_args() -> ConnectArgs {
    let mut args = ConnectArgs::new();
    args.insert("sslmode".to_string(), "require".to_string());
    args.insert("application_name".to_string(), application_name());
    args
}

/// Build `postgresql://<user>:<password>@<host>:<port>/<dbname>`
///
/// User and password are percent-encoded, so passwords containing `@`, `:`, `/` or spaces
/// survive intact.
pub fn build_uri(
    host: &str,
    port: u16,
    dbname: &str,
    user: &str,
    password: &str,
) -> Result<String> {
    let mut url = Url::parse(&format!("postgresql://{host}:{port}/{dbname}")).map_err(|e| {
        WrdsError::invalid_input(format!(
            "Invalid connection target '{host}:{port}/{dbname}': {e}"
        ))
    })?;

    url.set_username(user)
        .map_err(|()| WrdsError::invalid_input(format!("Cannot use '{user}' as a username")))?;
    if !password.is_empty() {
        url.set_password(Some(password))
            .map_err(|()| WrdsError::invalid_input("Cannot encode password into connection URI"))?;
    }

    Ok(url.into())
}

/// The URI with any password masked, for logs and error messages
#[must_use]
pub fn redacted_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.into()
        }
        Err(_) => "<invalid uri>".to_string(),
    }
}

/// Name of the user running this process
#[must_use]
pub fn os_username() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|name| !name.is_empty()))
        .unwrap_or_default()
}
