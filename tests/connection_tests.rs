//! Connection Manager Tests
//!
//! Covers the connection fallback sequence, credential prompting and persistence, and the
//! session lifecycle (close, drop, scoped use) against an in-memory driver.

mod common;

use common::{options, unused_credentials, FakeDriver, CUSTOM_HOST};
use pretty_assertions::assert_eq;
use std::fs;
use wrds::catalog::LIBRARY_LIST_SQL;
use wrds::config::build_uri;
use wrds::{
    ConnectOptions, ConnectStage, Connection, PersistOutcome, SqlOptions, StaticCredentials,
    WrdsError, WRDS_POSTGRES_HOST,
};

fn connected(driver: &FakeDriver) -> Connection {
    Connection::new(options(driver, &unused_credentials()).autoconnect(true)).unwrap()
}

// ============================================================================
// Fallback Sequence
// ============================================================================

#[test]
fn test_fallback_order_configured_then_default_host_then_prompt() {
    let driver = FakeDriver::new().fail_connects(2);
    let creds = StaticCredentials::new("prompted_user", "prompted_pw");
    let mut db = Connection::new(options(&driver, &creds)).unwrap();

    let outcome = db.connect().unwrap();
    assert_eq!(outcome.stage, ConnectStage::Prompted);

    assert_eq!(
        driver.connect_uris(),
        vec![
            format!("postgresql://config_user:config_pw@{CUSTOM_HOST}:9737/wrds"),
            format!("postgresql://config_user:config_pw@{WRDS_POSTGRES_HOST}:9737/wrds"),
            format!("postgresql://prompted_user:prompted_pw@{WRDS_POSTGRES_HOST}:9737/wrds"),
        ]
    );
}

#[test]
fn test_autoconnect_false_then_prompted_connect() {
    let driver = FakeDriver::new().fail_connects(2).library("crsp");
    let creds = StaticCredentials::new("jdoe", "p@ss word:1");
    let mut db = Connection::new(options(&driver, &creds)).unwrap();

    // Nothing happens during construction
    assert!(driver.connect_uris().is_empty());
    assert!(driver.executed_sql().is_empty());
    assert!(!db.is_connected());

    db.connect().unwrap();

    assert_eq!(creds.username_prompts(), 1);
    assert_eq!(creds.password_prompts(), 1);

    let uris = driver.connect_uris();
    assert_eq!(uris.len(), 3);
    let expected = build_uri(WRDS_POSTGRES_HOST, 9737, "wrds", "jdoe", "p@ss word:1").unwrap();
    assert_eq!(uris[2], expected);
    assert_eq!(
        uris[2],
        format!("postgresql://jdoe:p%40ss%20word%3A1@{WRDS_POSTGRES_HOST}:9737/wrds")
    );
}

#[test]
fn test_autoconnect_loads_library_list() {
    let driver = FakeDriver::new().library("crsp").library("comp");
    let mut db = connected(&driver);

    assert!(db.is_connected());
    assert_eq!(driver.connect_uris().len(), 1);
    assert_eq!(driver.executed_sql(), vec![LIBRARY_LIST_SQL.to_string()]);
    assert_eq!(db.list_libraries().unwrap(), vec!["comp".to_string(), "crsp".to_string()]);
}

#[test]
fn test_terminal_failure_returns_driver_error() {
    let driver = FakeDriver::new().fail_connects(3);
    let creds = unused_credentials();
    let mut db = Connection::new(options(&driver, &creds)).unwrap();

    match db.connect() {
        Err(WrdsError::ConnectionFailed(message)) => {
            assert!(message.contains("password authentication failed"));
        }
        other => panic!("expected connection failure, got {other:?}"),
    }
    assert!(!db.is_connected());
    assert_eq!(driver.connect_uris().len(), 3);
}

#[test]
fn test_default_connect_args_are_sent() {
    let driver = FakeDriver::new();
    let mut db = Connection::new(options(&driver, &unused_credentials())).unwrap();
    db.connect().unwrap();

    let state = driver.state();
    let (_, args) = &state.connects[0];
    assert_eq!(args.get("sslmode").map(String::as_str), Some("require"));
    assert!(args["application_name"].contains("wrds"));
}

// ============================================================================
// Credential File
// ============================================================================

#[test]
fn test_prompted_credentials_are_saved_when_confirmed() {
    let dir = tempfile::tempdir().unwrap();
    let pgpass = dir.path().join("pgpass.conf");

    let driver = FakeDriver::new().fail_connects(2);
    let creds = StaticCredentials::new("jdoe", "se:cret").persist(true);
    let mut db = Connection::new(options(&driver, &creds).pgpass_file(&pgpass)).unwrap();

    let outcome = db.connect().unwrap();
    assert_eq!(outcome.persisted, PersistOutcome::Saved(pgpass.clone()));
    // Credentials were already known, so saving did not prompt again
    assert_eq!(creds.username_prompts(), 1);

    let contents = fs::read_to_string(&pgpass).unwrap();
    assert_eq!(contents, format!("{WRDS_POSTGRES_HOST}:9737:wrds:jdoe:se\\:cret\n"));
}

#[test]
fn test_failed_save_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, "").unwrap();

    let driver = FakeDriver::new().fail_connects(2);
    let creds = StaticCredentials::new("jdoe", "secret").persist(true);
    let mut db =
        Connection::new(options(&driver, &creds).pgpass_file(blocker.join("pgpass"))).unwrap();

    let outcome = db.connect().unwrap();
    assert!(matches!(outcome.persisted, PersistOutcome::Failed(_)));
    assert!(db.is_connected());
}

#[test]
fn test_declined_save_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let pgpass = dir.path().join(".pgpass");

    let driver = FakeDriver::new().fail_connects(2);
    let creds = StaticCredentials::new("jdoe", "secret");
    let mut db = Connection::new(options(&driver, &creds).pgpass_file(&pgpass)).unwrap();

    assert_eq!(db.connect().unwrap().persisted, PersistOutcome::Declined);
    assert!(!pgpass.exists());
}

#[cfg(unix)]
#[test]
fn test_password_read_from_credential_file() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let pgpass = dir.path().join(".pgpass");
    fs::write(&pgpass, format!("# saved\n{CUSTOM_HOST}:9737:wrds:jdoe:from\\:file\n")).unwrap();
    fs::set_permissions(&pgpass, fs::Permissions::from_mode(0o600)).unwrap();

    let driver = FakeDriver::new();
    let mut db = Connection::new(
        ConnectOptions::new()
            .hostname(CUSTOM_HOST)
            .username("jdoe")
            .pgpass_file(&pgpass)
            .driver(driver.clone())
            .credential_source(unused_credentials())
            .autoconnect(false),
    )
    .unwrap();

    db.connect().unwrap();
    assert_eq!(
        driver.connect_uris(),
        vec![format!("postgresql://jdoe:from%3Afile@{CUSTOM_HOST}:9737/wrds")]
    );
}

#[test]
fn test_create_pgpass_file_prompts_for_missing_username() {
    let dir = tempfile::tempdir().unwrap();
    let pgpass = dir.path().join(".pgpass");

    let creds = StaticCredentials::new("jdoe", "secret");
    let mut db = Connection::new(
        ConnectOptions::new()
            .hostname(WRDS_POSTGRES_HOST)
            .password("configured")
            .pgpass_file(&pgpass)
            .driver(FakeDriver::new())
            .credential_source(creds.clone())
            .autoconnect(false),
    )
    .unwrap();

    let path = db.create_pgpass_file().unwrap();
    assert_eq!(path, pgpass);
    assert_eq!(creds.username_prompts(), 1);
    assert_eq!(
        fs::read_to_string(&pgpass).unwrap(),
        format!("{WRDS_POSTGRES_HOST}:9737:wrds:jdoe:secret\n")
    );
}

// ============================================================================
// Session Lifecycle
// ============================================================================

#[test]
fn test_close_clears_session_and_is_idempotent() {
    let driver = FakeDriver::new().library("crsp");
    let mut db = connected(&driver);

    db.close().unwrap();
    assert!(!db.is_connected());
    assert!(db.target().is_none());
    assert_eq!(driver.closes(), 1);

    db.close().unwrap();
    assert_eq!(driver.closes(), 1);

    assert!(matches!(db.list_tables("crsp"), Err(WrdsError::NotConnected)));
    assert!(matches!(db.raw_sql("SELECT 1", &SqlOptions::default()), Err(WrdsError::NotConnected)));
    assert!(matches!(db.list_libraries(), Err(WrdsError::NotConnected)));
}

#[test]
fn test_reconnect_after_close() {
    let driver = FakeDriver::new().library("crsp");
    let mut db = connected(&driver);

    db.close().unwrap();
    db.connect().unwrap();
    db.load_library_list().unwrap();
    assert_eq!(db.list_libraries().unwrap(), vec!["crsp".to_string()]);
    assert_eq!(driver.connect_uris().len(), 2);
}

#[test]
fn test_drop_closes_connection() {
    let driver = FakeDriver::new();
    {
        let mut db = Connection::new(options(&driver, &unused_credentials())).unwrap();
        db.connect().unwrap();
    }
    assert_eq!(driver.closes(), 1);
}

#[test]
fn test_scoped_closes_on_error() {
    let driver = FakeDriver::new().library("crsp");
    let options = options(&driver, &unused_credentials());
    let result: wrds::Result<()> = Connection::scoped(options, |db| {
        assert!(db.is_connected());
        Err(WrdsError::invalid_input("stop"))
    });

    assert!(matches!(result, Err(WrdsError::InvalidInput(_))));
    assert_eq!(driver.closes(), 1);
}
