//! Connection Manager
//!
//! A [`Connection`] owns its configuration, its driver, its credential source and at most one
//! open session. There is no process-wide state: independent connections never interact.
//!
//! # Connection Fallback
//! [`Connection::connect`] tries, in order:
//! 1. The configured host with the configured credentials. When no username is set the OS
//!    user is used; when no password is set the credential file is consulted.
//! 2. The default WRDS host with the same credentials (only if the configured host differs)
//! 3. The default WRDS host with credentials obtained from the [`CredentialSource`]
//!
//! Failure of the third attempt is terminal. After a successful third attempt the credential
//! source is asked whether to save the credentials to the credential file.
//!
//! Only connection failures fall through to the next stage; malformed options fail at once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use zeroize::Zeroizing;

use crate::config::pgpass::{self, PgPassEntry};
use crate::config::{
    build_uri, os_username, redacted_uri, ConnectOptions, ConnectionConfig, ResolvedOptions,
    WRDS_POSTGRES_HOST,
};
use crate::credentials::CredentialSource;
use crate::engine::{DbConnection, Driver};
use crate::error::{Result, WrdsError};

/// Which fallback stage produced the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStage {
    /// Configured host and credentials
    Configured,
    /// Default WRDS host with the configured credentials
    DefaultHost,
    /// Default WRDS host with prompted credentials
    Prompted,
}

/// What happened to prompted credentials after a successful connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum PersistOutcome {
    /// No prompt happened, so nothing was offered
    NotOffered,
    /// The user chose not to save credentials
    Declined,
    /// Credentials were written to this file
    Saved(PathBuf),
    /// Saving failed; the connection is kept
    Failed(String),
}

/// Result of [`Connection::connect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    pub stage: ConnectStage,
    pub persisted: PersistOutcome,
}

/// An open driver connection
struct Session {
    conn: Box<dyn DbConnection>,
    target: String,
    stage: ConnectStage,
    connected_at: DateTime<Utc>,
}

/// Client for the WRDS research database
pub struct Connection {
    config: ConnectionConfig,
    driver: Box<dyn Driver>,
    credentials: Box<dyn CredentialSource>,
    session: Option<Session>,
    pub(crate) schema_perm: Option<BTreeSet<String>>,
}

impl Connection {
    /// Build a client; with `autoconnect` (the default) also connect and load the library list
    pub fn new(options: ConnectOptions) -> Result<Self> {
        let ResolvedOptions { config, driver, credentials, autoconnect } = options.into_parts()?;
        tracing::debug!(?config, autoconnect, "creating connection");

        let mut db = Self {
            config,
            driver,
            credentials,
            session: None,
            schema_perm: None,
        };
        if autoconnect {
            db.connect()?;
            db.load_library_list()?;
        }
        Ok(db)
    }

    /// Connect, run `f`, and close the connection whether or not `f` succeeded
    pub fn scoped<T, F>(options: ConnectOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut db = Self::new(options)?;
        if !db.is_connected() {
            db.connect()?;
            db.load_library_list()?;
        }

        let result = f(&mut db);
        let closed = db.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Establish a session, falling back through the default host and prompted credentials
    ///
    /// Calling this while connected is a no-op.
    pub fn connect(&mut self) -> Result<ConnectOutcome> {
        if let Some(session) = &self.session {
            tracing::debug!(target_uri = %session.target, "already connected");
            return Ok(Self::outcome(session.stage));
        }

        tracing::info!(host = %self.config.hostname, port = self.config.port, "connecting to WRDS");
        match self.attempt(ConnectStage::Configured) {
            Ok(()) => return Ok(Self::outcome(ConnectStage::Configured)),
            Err(WrdsError::ConnectionFailed(reason)) => {
                tracing::warn!(host = %self.config.hostname, %reason, "connection attempt failed");
            }
            Err(e) => return Err(e),
        }

        if !self.config.is_default_host() {
            self.config.hostname = WRDS_POSTGRES_HOST.to_string();
            tracing::info!(host = WRDS_POSTGRES_HOST, "retrying with the default WRDS host");
            match self.attempt(ConnectStage::DefaultHost) {
                Ok(()) => return Ok(Self::outcome(ConnectStage::DefaultHost)),
                Err(WrdsError::ConnectionFailed(reason)) => {
                    tracing::warn!(host = WRDS_POSTGRES_HOST, %reason, "connection attempt failed");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("asking for WRDS credentials");
        self.prompt_credentials()?;
        self.attempt(ConnectStage::Prompted)?;

        let persisted = match self.credentials.confirm_persist() {
            Ok(true) => match self.create_pgpass_file() {
                Ok(path) => PersistOutcome::Saved(path),
                Err(e) => {
                    tracing::warn!(error = %e, "could not save credentials");
                    PersistOutcome::Failed(e.message())
                }
            },
            Ok(false) => PersistOutcome::Declined,
            Err(e) => {
                tracing::warn!(error = %e, "could not ask whether to save credentials");
                PersistOutcome::Failed(e.message())
            }
        };

        Ok(ConnectOutcome { stage: ConnectStage::Prompted, persisted })
    }

    const fn outcome(stage: ConnectStage) -> ConnectOutcome {
        ConnectOutcome { stage, persisted: PersistOutcome::NotOffered }
    }

    /// One connection attempt with the current config; stores the session on success
    fn attempt(&mut self, stage: ConnectStage) -> Result<()> {
        let user = self.config.effective_username();
        let password = match &self.config.password {
            Some(password) => password.clone(),
            None => self.stored_password(&user),
        };

        let uri = Zeroizing::new(build_uri(
            &self.config.hostname,
            self.config.port,
            &self.config.dbname,
            &user,
            &password,
        )?);
        let target = redacted_uri(&uri);
        tracing::debug!(?stage, target_uri = %target, "connection attempt");

        let conn = self.driver.connect(&uri, &self.config.connect_args)?;
        tracing::info!(?stage, target_uri = %target, "connected");

        self.session = Some(Session {
            conn,
            target,
            stage,
            connected_at: Utc::now(),
        });
        Ok(())
    }

    /// Password from the credential file, or empty when there is none
    fn stored_password(&self, user: &str) -> Zeroizing<String> {
        let Some(path) = pgpass::resolve_path(self.config.pgpass_file.as_deref()) else {
            return Zeroizing::new(String::new());
        };

        let config = &self.config;
        match pgpass::lookup(&path, &config.hostname, config.port, &config.dbname, user) {
            Ok(Some(password)) => {
                tracing::debug!(path = %path.display(), "using password from credential file");
                password
            }
            Ok(None) => Zeroizing::new(String::new()),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable credential file");
                Zeroizing::new(String::new())
            }
        }
    }

    fn prompt_credentials(&mut self) -> Result<()> {
        let default_user = os_username();
        let username = self.credentials.username(&default_user)?;
        let username = if username.trim().is_empty() { default_user } else { username };
        let password = self.credentials.password()?;

        self.config.username = Some(username);
        self.config.password = Some(password);
        Ok(())
    }

    /// Close the session and forget the library list
    ///
    /// Closing an unconnected client is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.schema_perm = None;
        match self.session.take() {
            Some(mut session) => {
                tracing::info!(target_uri = %session.target, "closing connection");
                session.conn.close()
            }
            None => Ok(()),
        }
    }

    /// Whether a session is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Connection URI of the open session, with the password masked
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.target.as_str())
    }

    /// When the open session was established
    #[must_use]
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.session.as_ref().map(|s| s.connected_at)
    }

    /// Current connection parameters
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Save the current credentials to the credential file, prompting for missing ones
    ///
    /// Returns the path written.
    pub fn create_pgpass_file(&mut self) -> Result<PathBuf> {
        if self.config.username.is_none() || self.config.password.is_none() {
            self.prompt_credentials()?;
        }

        let path = pgpass::resolve_path(self.config.pgpass_file.as_deref()).ok_or_else(|| {
            WrdsError::credential_file("Could not determine the credential file location")
        })?;

        let entry = PgPassEntry::new(
            self.config.hostname.as_str(),
            self.config.port,
            self.config.dbname.as_str(),
            self.config.effective_username(),
            self.config.password.as_ref().map_or("", |p| p.as_str()),
        );
        pgpass::write_entry(&path, &entry)?;
        Ok(path)
    }

    /// The open driver connection
    pub(crate) fn db(&mut self) -> Result<&mut dyn DbConnection> {
        match self.session.as_mut() {
            Some(session) => Ok(session.conn.as_mut()),
            None => Err(WrdsError::NotConnected),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing connection");
        }
    }
}
