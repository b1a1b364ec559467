//! Driver-level tests that need no database server

use database::{
    ConnectionParams, ConnectionSource, DbArtifact, PostgresDriver, PostgresDriverOptions,
    SnapshotDriver, SnapshotOutcome, SqliteDriver,
};
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const URL_VARS: [&str; 3] = ["DATABASE_URL", "DATABASE_PUBLIC_URL", "DATABASE_PRIVATE_URL"];
const DISCRETE_VARS: [&str; 10] = [
    "PGHOST",
    "POSTGRES_HOST",
    "PGPORT",
    "POSTGRES_PORT",
    "PGUSER",
    "POSTGRES_USER",
    "PGPASSWORD",
    "POSTGRES_PASSWORD",
    "PGDATABASE",
    "POSTGRES_DB",
];

fn clear_connection_env() {
    for key in URL_VARS.iter().chain(DISCRETE_VARS.iter()) {
        std::env::remove_var(key);
    }
}

fn url_vars() -> Vec<String> {
    URL_VARS.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn sqlite_snapshot_then_restore_round_trips() {
    let live_dir = tempdir().unwrap();
    let snapshot_dir = tempdir().unwrap();
    let live = live_dir.path().join("db.sqlite3");
    fs::write(&live, b"state at backup time").unwrap();

    let driver = SqliteDriver::new(&live);
    let artifact = match driver.snapshot(snapshot_dir.path()).await {
        SnapshotOutcome::Captured(DbArtifact::EmbeddedFile(path)) => path,
        other => panic!("unexpected outcome: {other:?}"),
    };

    fs::write(&live, b"state after more writes").unwrap();
    driver.restore(&artifact).await.unwrap();

    assert_eq!(fs::read(&live).unwrap(), b"state at backup time");
}

#[test]
#[serial]
fn placeholder_url_falls_through_to_next_variable() {
    clear_connection_env();
    std::env::set_var("DATABASE_URL", "${{ Postgres.DATABASE_URL }}");
    std::env::set_var(
        "DATABASE_PUBLIC_URL",
        "postgresql://app:pw@proxy.example.net:6543/tours",
    );

    let params = ConnectionParams::from_env(&url_vars());
    clear_connection_env();

    assert_eq!(params.host, "proxy.example.net");
    assert_eq!(params.port, 6543);
    assert_eq!(params.database, "tours");
    assert_eq!(
        params.source,
        ConnectionSource::Url("DATABASE_PUBLIC_URL".to_string())
    );
}

#[test]
#[serial]
fn discrete_variables_are_used_without_urls() {
    clear_connection_env();
    std::env::set_var("POSTGRES_HOST", "db.internal");
    std::env::set_var("PGUSER", "backup");
    std::env::set_var("POSTGRES_DB", "condominio");

    let params = ConnectionParams::from_env(&url_vars());
    clear_connection_env();

    assert_eq!(params.host, "db.internal");
    assert_eq!(params.port, 5432);
    assert_eq!(params.user, "backup");
    assert_eq!(params.database, "condominio");
    assert_eq!(params.password, None);
    assert_eq!(params.source, ConnectionSource::Discrete);
}

#[cfg(unix)]
#[tokio::test]
async fn failing_dump_client_leaves_marker_with_streams() {
    let dir = tempdir().unwrap();
    let options = PostgresDriverOptions {
        // `false` accepts any arguments and exits 1
        pg_dump_bin: "false".to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let conn = ConnectionParams {
        host: "localhost".to_string(),
        port: 5432,
        user: "postgres".to_string(),
        password: Some("do-not-leak".to_string()),
        database: "tours".to_string(),
        source: ConnectionSource::Discrete,
    };
    let driver = PostgresDriver::with_connection(options, conn);

    let outcome = driver.snapshot(dir.path()).await;
    let SnapshotOutcome::Failed { marker, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    let body = fs::read_to_string(marker).unwrap();
    assert!(body.contains("command: false --host localhost"));
    assert!(body.contains("Some(1)"));
    assert!(!body.contains("do-not-leak"));
}
