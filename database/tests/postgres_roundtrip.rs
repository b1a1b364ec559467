//! Dump and restore against a disposable PostgreSQL container.
//! Needs docker plus `pg_dump`/`psql` on PATH, so it only runs with `--ignored`.

use database::{
    ConnectionParams, ConnectionSource, DbArtifact, PostgresDriver, PostgresDriverOptions,
    SnapshotDriver, SnapshotOutcome,
};
use std::time::Duration;
use tempfile::tempdir;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt};
use tokio_postgres::NoTls;

async fn connect(conn: &ConnectionParams) -> tokio_postgres::Client {
    let conn_str = conn.connection_string_for(&conn.database);
    for _ in 0..30 {
        if let Ok((client, connection)) = tokio_postgres::connect(&conn_str, NoTls).await {
            tokio::spawn(connection);
            if client.simple_query("SELECT 1;").await.is_ok() {
                return client;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("Postgres did not become ready");
}

#[tokio::test]
#[ignore = "requires docker and PostgreSQL client tools"]
async fn dump_and_restore_replaces_database_contents() {
    let node = GenericImage::new("postgres", "16")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "toor")
        .with_env_var("POSTGRES_DB", "rooted")
        .start()
        .await
        .expect("start postgres container");
    let port = node
        .get_host_port_ipv4(5432.tcp())
        .await
        .expect("mapped port");

    let conn = ConnectionParams {
        host: "127.0.0.1".to_string(),
        port,
        user: "postgres".to_string(),
        password: Some("toor".to_string()),
        database: "rooted".to_string(),
        source: ConnectionSource::Discrete,
    };
    let client = connect(&conn).await;
    client
        .batch_execute(
            "CREATE TABLE residents (id SERIAL PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO residents (name) VALUES ('Ana'), ('Luis');",
        )
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let driver = PostgresDriver::with_connection(PostgresDriverOptions::default(), conn.clone());
    let dump = match driver.snapshot(dir.path()).await {
        SnapshotOutcome::Captured(DbArtifact::SqlDump(path)) => path,
        other => panic!("unexpected outcome: {other:?}"),
    };

    client
        .batch_execute("INSERT INTO residents (name) VALUES ('Eva');")
        .await
        .unwrap();
    drop(client);

    driver.restore(&dump).await.unwrap();

    let client = connect(&conn).await;
    let row = client
        .query_one("SELECT COUNT(*) FROM residents", &[])
        .await
        .unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 2);
}
