use crate::command::{CommandFailure, CommandOutput, ExternalCommand};
use crate::connection::ConnectionParams;
use log::{debug, info};
use std::path::PathBuf;
use std::time::Duration;

/// Options for a plain-format pg_dump
#[derive(Debug, Clone)]
pub struct PgDumpOptions {
    pub binary: String,
    pub file: PathBuf,
    pub no_owner: bool,
    pub no_privileges: bool,
    pub timeout: Duration,
}

impl Default for PgDumpOptions {
    fn default() -> Self {
        Self {
            binary: "pg_dump".to_string(),
            file: PathBuf::from("dump.sql"),
            no_owner: true,
            no_privileges: true,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Wrapper for pg_dump command
pub struct PgDump;

impl PgDump {
    /// Builds the pg_dump invocation for the given connection
    pub fn command(conn: &ConnectionParams, options: &PgDumpOptions) -> ExternalCommand {
        let mut cmd = ExternalCommand::new(options.binary.clone(), options.timeout)
            .arg("--host")
            .arg(&conn.host)
            .arg("--port")
            .arg(conn.port.to_string())
            .arg("--username")
            .arg(&conn.user)
            .arg("--dbname")
            .arg(&conn.database)
            .arg("--file")
            .arg(&options.file)
            .arg("--format")
            .arg("p")
            .arg("--no-password");

        // Set PGPASSWORD environment variable
        if let Some(password) = &conn.password {
            cmd = cmd.env("PGPASSWORD", password.clone());
        }

        if options.no_owner {
            cmd = cmd.arg("--no-owner");
        }

        if options.no_privileges {
            cmd = cmd.arg("--no-privileges");
        }

        cmd
    }

    /// Run pg_dump with the given options
    pub async fn run(
        conn: &ConnectionParams,
        options: &PgDumpOptions,
    ) -> Result<CommandOutput, CommandFailure> {
        let cmd = Self::command(conn, options);
        debug!("Running pg_dump command: {}", cmd.describe());
        let output = cmd.run().await?;
        info!("pg_dump completed successfully: {}", options.file.display());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSource;

    #[test]
    fn command_carries_connection_and_plain_format() {
        let conn = ConnectionParams {
            host: "db".to_string(),
            port: 5433,
            user: "app".to_string(),
            password: Some("pw".to_string()),
            database: "tours".to_string(),
            source: ConnectionSource::Discrete,
        };
        let options = PgDumpOptions {
            file: PathBuf::from("/tmp/out.sql"),
            ..Default::default()
        };
        let described = PgDump::command(&conn, &options).describe();
        assert!(described.starts_with("pg_dump --host db --port 5433 --username app"));
        assert!(described.contains("--dbname tours"));
        assert!(described.contains("--format p"));
        assert!(described.contains("--no-owner"));
        assert!(!described.contains("pw"));
    }
}
