use crate::command::{CommandFailure, CommandOutput, ExternalCommand};
use crate::connection::ConnectionParams;
use log::{debug, error, info};
use std::path::Path;
use std::time::Duration;

/// Wrapper for pg_restore utility, used when psql cannot apply a dump
pub struct PgRestore {
    binary: String,
    timeout: Duration,
}

impl PgRestore {
    /// Create a new PgRestore instance
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn command(&self, conn: &ConnectionParams, dump_file: &Path) -> ExternalCommand {
        // Add connection options
        let mut cmd = ExternalCommand::new(self.binary.clone(), self.timeout)
            .arg("--host")
            .arg(&conn.host)
            .arg("--port")
            .arg(conn.port.to_string())
            .arg("--username")
            .arg(&conn.user)
            .arg("--dbname")
            .arg(&conn.database)
            .arg("--no-password")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("--clean")
            .arg("--if-exists")
            .arg(dump_file);

        // Set password environment variable if provided
        if let Some(password) = &conn.password {
            cmd = cmd.env("PGPASSWORD", password.clone());
        }
        cmd
    }

    /// Restore a database from a dump file
    pub async fn restore(
        &self,
        conn: &ConnectionParams,
        dump_file: &Path,
    ) -> Result<CommandOutput, CommandFailure> {
        info!("Restoring database with pg_restore from: {dump_file:?}");

        let cmd = self.command(conn, dump_file);
        debug!("Running pg_restore command: {}", cmd.describe());

        match cmd.run().await {
            Ok(output) => {
                info!("Database restored successfully with pg_restore: {dump_file:?}");
                Ok(output)
            }
            Err(e) => {
                error!("pg_restore failed: {e}");
                Err(e)
            }
        }
    }
}
