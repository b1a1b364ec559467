use crate::command::{CommandFailure, CommandOutput, ExternalCommand};
use crate::connection::ConnectionParams;
use log::{debug, error, info};
use std::path::Path;
use std::time::Duration;

/// Wrapper for psql, the primary tool for applying plain SQL dumps
pub struct Psql {
    binary: String,
    timeout: Duration,
}

impl Psql {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn command(&self, conn: &ConnectionParams, sql_file: &Path) -> ExternalCommand {
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
            .arg("--quiet")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--file")
            .arg(sql_file);

        if let Some(password) = &conn.password {
            cmd = cmd.env("PGPASSWORD", password.clone());
        }
        cmd
    }

    /// Apply a plain SQL file to the target database
    pub async fn apply(
        &self,
        conn: &ConnectionParams,
        sql_file: &Path,
    ) -> Result<CommandOutput, CommandFailure> {
        info!("Applying SQL dump with psql: {sql_file:?}");

        let cmd = self.command(conn, sql_file);
        debug!("Running psql command: {}", cmd.describe());

        match cmd.run().await {
            Ok(output) => {
                info!("SQL dump applied successfully: {sql_file:?}");
                Ok(output)
            }
            Err(e) => {
                error!("psql failed: {e}");
                Err(e)
            }
        }
    }
}
