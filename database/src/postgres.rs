use crate::command::write_marker;
use crate::connection::ConnectionParams;
use crate::wrapper::{PgDump, PgDumpOptions, PgRestore, Psql};
use crate::{DatabaseError, DbArtifact, DbEngine, Result, SnapshotDriver, SnapshotOutcome};
use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio_postgres::NoTls;

/// Settings for the server database driver
#[derive(Debug, Clone)]
pub struct PostgresDriverOptions {
    /// Connection URL variables, checked in order before the discrete values
    pub url_env_vars: Vec<String>,
    pub pg_dump_bin: String,
    pub psql_bin: String,
    pub pg_restore_bin: String,
    /// Database used to drop and recreate the target
    pub maintenance_db: String,
    /// Upper bound for every external client and for connecting
    pub timeout: Duration,
}

impl Default for PostgresDriverOptions {
    fn default() -> Self {
        Self {
            url_env_vars: vec![
                "DATABASE_URL".to_string(),
                "DATABASE_PUBLIC_URL".to_string(),
                "DATABASE_PRIVATE_URL".to_string(),
            ],
            pg_dump_bin: "pg_dump".to_string(),
            psql_bin: "psql".to_string(),
            pg_restore_bin: "pg_restore".to_string(),
            maintenance_db: "postgres".to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Server database driver: `pg_dump` on snapshot, drop/recreate plus
/// `psql` (falling back to `pg_restore`) on restore.
pub struct PostgresDriver {
    options: PostgresDriverOptions,
    connection: Option<ConnectionParams>,
}

impl PostgresDriver {
    /// Connection parameters are resolved from the environment on every run
    pub fn new(options: PostgresDriverOptions) -> Self {
        Self {
            options,
            connection: None,
        }
    }

    /// Uses fixed connection parameters instead of the environment
    pub fn with_connection(options: PostgresDriverOptions, connection: ConnectionParams) -> Self {
        Self {
            options,
            connection: Some(connection),
        }
    }

    pub fn connection(&self) -> ConnectionParams {
        self.connection
            .clone()
            .unwrap_or_else(|| ConnectionParams::from_env(&self.options.url_env_vars))
    }

    /// Drops and recreates the target database so a restore starts from nothing
    async fn recreate_database(&self, conn: &ConnectionParams) -> Result<()> {
        let maintenance_db = if conn.database == self.options.maintenance_db {
            "template1"
        } else {
            self.options.maintenance_db.as_str()
        };
        let conn_string = conn.connection_string_for(maintenance_db);

        let (client, connection) =
            tokio::time::timeout(self.options.timeout, tokio_postgres::connect(&conn_string, NoTls))
                .await
                .map_err(|_| {
                    DatabaseError::ConnectionError(format!(
                        "timed out connecting to {}:{}",
                        conn.host, conn.port
                    ))
                })?
                .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection error: {e}");
            }
        });

        // Disconnect all other connections
        client
            .execute(
                "SELECT pg_terminate_backend(pg_stat_activity.pid) FROM pg_stat_activity WHERE pg_stat_activity.datname = $1 AND pid <> pg_backend_pid();",
                &[&conn.database],
            )
            .await?;

        let ident = quote_ident(&conn.database);
        client
            .batch_execute(&format!("DROP DATABASE IF EXISTS {ident};"))
            .await?;
        client
            .batch_execute(&format!("CREATE DATABASE {ident};"))
            .await?;

        info!("Database {} dropped and recreated", conn.database);
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl SnapshotDriver for PostgresDriver {
    fn engine(&self) -> DbEngine {
        DbEngine::Postgres
    }

    async fn snapshot(&self, target_dir: &Path) -> SnapshotOutcome {
        let conn = self.connection();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let dump_file = target_dir.join(format!("postgres_dump_{timestamp}.sql"));

        let options = PgDumpOptions {
            binary: self.options.pg_dump_bin.clone(),
            file: dump_file.clone(),
            timeout: self.options.timeout,
            ..Default::default()
        };

        info!("Dumping database {} to {}", conn.database, dump_file.display());
        match PgDump::run(&conn, &options).await {
            Ok(output) => {
                if !output.stderr.trim().is_empty() {
                    warn!("pg_dump reported: {}", output.stderr.trim());
                }
                SnapshotOutcome::Captured(DbArtifact::SqlDump(dump_file))
            }
            Err(failure) => {
                error!("Database dump failed: {failure}");
                if dump_file.exists() {
                    if let Err(e) = fs::remove_file(&dump_file) {
                        warn!("Failed to remove partial dump {}: {e}", dump_file.display());
                    }
                }
                let cmd = PgDump::command(&conn, &options);
                let marker_path = target_dir.join("pg_dump_error.txt");
                let marker = match write_marker(target_dir, "pg_dump_error.txt", &cmd, &failure) {
                    Ok(marker) => marker,
                    Err(e) => {
                        error!("Failed to write marker {}: {e}", marker_path.display());
                        marker_path
                    }
                };
                SnapshotOutcome::Failed {
                    marker,
                    reason: failure.to_string(),
                }
            }
        }
    }

    async fn restore(&self, artifact: &Path) -> Result<()> {
        if !artifact.is_file() {
            return Err(DatabaseError::RestoreError(format!(
                "Dump file does not exist: {artifact:?}"
            )));
        }

        let conn = self.connection();
        self.recreate_database(&conn).await?;

        let psql = Psql::new(self.options.psql_bin.clone(), self.options.timeout);
        let primary = match psql.apply(&conn, artifact).await {
            Ok(_) => {
                info!("Database {} restored with psql", conn.database);
                return Ok(());
            }
            Err(e) => e,
        };

        warn!("psql could not apply the dump ({primary}), retrying with pg_restore");
        self.recreate_database(&conn).await?;

        let pg_restore = PgRestore::new(self.options.pg_restore_bin.clone(), self.options.timeout);
        match pg_restore.restore(&conn, artifact).await {
            Ok(_) => {
                info!("Database {} restored with pg_restore", conn.database);
                Ok(())
            }
            Err(fallback) => Err(DatabaseError::RestoreError(format!(
                "psql failed: {primary}; pg_restore failed: {fallback}"
            ))),
        }
    }
}
