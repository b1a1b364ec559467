//! Classifies an unpacked archive. Restore decides everything from the
//! [`ArchiveLayout`] returned by [`detect`].

use crate::error::{EngineError, Result};
use std::path::{Path, PathBuf};

pub const CODE_DIR: &str = "backend_code";
pub const SQL_DUMP_PREFIX: &str = "postgres_dump_";

/// Source-tree snapshot found in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeLayout {
    /// `backend_code/`, written by manual runs
    Manual(PathBuf),
    /// `backend_code_<timestamp>/`, written by scheduled runs
    Scheduled { path: PathBuf, timestamp: String },
}

impl CodeLayout {
    pub fn path(&self) -> &Path {
        match self {
            CodeLayout::Manual(path) => path,
            CodeLayout::Scheduled { path, .. } => path,
        }
    }
}

/// Database content found in an archive, in restore priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseArtifact {
    Embedded(PathBuf),
    SqlDump(PathBuf),
    Fixtures(Vec<PathBuf>),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub code: Option<CodeLayout>,
    pub database: DatabaseArtifact,
    /// Diagnostic `*_error.txt` files left by a failed dump
    pub markers: Vec<PathBuf>,
}

/// Inspects the top level of `root`. `embedded_name` is the file name the
/// embedded database is stored under (e.g. `db.sqlite3`).
pub fn detect(root: &Path, embedded_name: &str) -> Result<ArchiveLayout> {
    let read = std::fs::read_dir(root)
        .map_err(|e| EngineError::io(format!("reading {}", root.display()), e))?;

    let mut manual = None;
    let mut scheduled: Vec<(String, PathBuf)> = Vec::new();
    let mut embedded = None;
    let mut dumps = Vec::new();
    let mut fixtures = Vec::new();
    let mut markers = Vec::new();

    for entry in read {
        let entry = entry.map_err(|e| EngineError::io(format!("reading {}", root.display()), e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if path.is_dir() {
            if name == CODE_DIR {
                manual = Some(path);
            } else if let Some(timestamp) = name.strip_prefix("backend_code_") {
                scheduled.push((timestamp.to_string(), path));
            }
            continue;
        }

        if name == embedded_name {
            embedded = Some(path);
        } else if name.ends_with(".sql") {
            dumps.push(path);
        } else if name.ends_with(".json") {
            fixtures.push(path);
        } else if name.ends_with("_error.txt") {
            markers.push(path);
        }
    }

    let code = match manual {
        Some(path) => Some(CodeLayout::Manual(path)),
        None => {
            scheduled.sort();
            scheduled
                .pop()
                .map(|(timestamp, path)| CodeLayout::Scheduled { path, timestamp })
        }
    };

    // Prefer the dump this engine writes over any other .sql file
    dumps.sort_by_key(|p| {
        let is_ours = p
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(SQL_DUMP_PREFIX));
        (!is_ours, p.clone())
    });
    fixtures.sort();
    markers.sort();

    let database = if let Some(path) = embedded {
        DatabaseArtifact::Embedded(path)
    } else if let Some(path) = dumps.into_iter().next() {
        DatabaseArtifact::SqlDump(path)
    } else if !fixtures.is_empty() {
        DatabaseArtifact::Fixtures(fixtures)
    } else {
        DatabaseArtifact::None
    };

    Ok(ArchiveLayout {
        code,
        database,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn embedded_database_wins_over_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("db.sqlite3"), b"x").unwrap();
        fs::write(dir.path().join("dump_20250104_173000.json"), b"[]").unwrap();
        fs::create_dir(dir.path().join("backend_code")).unwrap();

        let layout = detect(dir.path(), "db.sqlite3").unwrap();
        assert_eq!(
            layout.database,
            DatabaseArtifact::Embedded(dir.path().join("db.sqlite3"))
        );
        assert_eq!(
            layout.code,
            Some(CodeLayout::Manual(dir.path().join("backend_code")))
        );
    }

    #[test]
    fn sql_dump_and_scheduled_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("postgres_dump_20250104_173000.sql"), b"--").unwrap();
        fs::write(dir.path().join("dump_20250104_173000.json"), b"[]").unwrap();
        fs::write(dir.path().join("pg_dump_error.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("backend_code_20250104_173000")).unwrap();

        let layout = detect(dir.path(), "db.sqlite3").unwrap();
        assert_eq!(
            layout.database,
            DatabaseArtifact::SqlDump(dir.path().join("postgres_dump_20250104_173000.sql"))
        );
        assert_eq!(
            layout.code,
            Some(CodeLayout::Scheduled {
                path: dir.path().join("backend_code_20250104_173000"),
                timestamp: "20250104_173000".to_string(),
            })
        );
        assert_eq!(layout.markers.len(), 1);
    }

    #[test]
    fn fixtures_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), b"[]").unwrap();
        fs::write(dir.path().join("a.json"), b"[]").unwrap();

        let layout = detect(dir.path(), "db.sqlite3").unwrap();
        assert_eq!(
            layout.database,
            DatabaseArtifact::Fixtures(vec![dir.path().join("a.json"), dir.path().join("b.json")])
        );
        assert_eq!(layout.code, None);
    }

    #[test]
    fn empty_archive_has_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = detect(dir.path(), "db.sqlite3").unwrap();
        assert_eq!(layout.database, DatabaseArtifact::None);
        assert!(layout.code.is_none());
    }
}
