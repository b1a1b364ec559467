pub mod command;
pub mod connection;
pub mod data_layer;
pub mod postgres;
pub mod sqlite;
pub mod wrapper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Restore error: {0}")]
    RestoreError(String),

    #[error("Data layer error: {0}")]
    DataLayerError(String),

    #[error("Unknown database engine: {0}")]
    UnknownEngine(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Postgres error: {0}")]
    Postgres(tokio_postgres::Error),
}

impl From<std::io::Error> for DatabaseError {
    fn from(err: std::io::Error) -> Self {
        DatabaseError::Io(err)
    }
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        DatabaseError::Postgres(err)
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Database engine the snapshot is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    Postgres,
    Sqlite,
}

impl FromStr for DbEngine {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DbEngine::Postgres),
            "sqlite" | "sqlite3" => Ok(DbEngine::Sqlite),
            other => Err(DatabaseError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for DbEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbEngine::Postgres => write!(f, "postgres"),
            DbEngine::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// A database artifact written into a snapshot directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbArtifact {
    /// Copy of the embedded database file
    EmbeddedFile(PathBuf),
    /// Plain-text SQL dump
    SqlDump(PathBuf),
}

impl DbArtifact {
    pub fn path(&self) -> &Path {
        match self {
            DbArtifact::EmbeddedFile(path) | DbArtifact::SqlDump(path) => path,
        }
    }
}

/// Result of a snapshot attempt. Client failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Captured(DbArtifact),
    /// Nothing to snapshot (e.g. the embedded database file does not exist)
    Skipped(String),
    /// The dump client failed; a diagnostic marker was written next to the snapshot
    Failed { marker: PathBuf, reason: String },
}

/// Engine-specific snapshot/restore strategy
#[async_trait]
pub trait SnapshotDriver: Send + Sync {
    fn engine(&self) -> DbEngine;

    /// Writes a snapshot of the live database into `target_dir`
    async fn snapshot(&self, target_dir: &Path) -> SnapshotOutcome;

    /// Replaces the live database with the contents of `artifact`
    async fn restore(&self, artifact: &Path) -> Result<()>;
}

// Re-export key types for convenience
pub use command::{CommandFailure, CommandOutput, ExternalCommand};
pub use connection::{ConnectionParams, ConnectionSource};
pub use data_layer::{load_fixtures, DataLayer, FixtureOutcome, FixtureReport, ManagementCommand};
pub use postgres::{PostgresDriver, PostgresDriverOptions};
pub use sqlite::SqliteDriver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_parse() {
        assert_eq!("postgres".parse::<DbEngine>().unwrap(), DbEngine::Postgres);
        assert_eq!("PostgreSQL".parse::<DbEngine>().unwrap(), DbEngine::Postgres);
        assert_eq!("sqlite".parse::<DbEngine>().unwrap(), DbEngine::Sqlite);
        assert!(matches!(
            "mysql".parse::<DbEngine>(),
            Err(DatabaseError::UnknownEngine(_))
        ));
    }

    #[test]
    fn engine_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DbEngine::Postgres).unwrap(), "\"postgres\"");
        let engine: DbEngine = serde_json::from_str("\"sqlite\"").unwrap();
        assert_eq!(engine, DbEngine::Sqlite);
    }
}
