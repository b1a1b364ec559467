//! Copies the allow-listed part of the application's source tree into a
//! snapshot and back.

use crate::error::{EngineError, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct SourceTree {
    project_root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    /// Never copied, even when it sits inside the project root
    backup_root: PathBuf,
}

/// What a snapshot copied and which allow-listed entries were absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub copied: Vec<String>,
    pub missing: Vec<String>,
}

impl SourceTree {
    pub fn new(
        project_root: impl Into<PathBuf>,
        include: Vec<String>,
        exclude: Vec<String>,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            include,
            exclude,
            backup_root: backup_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Copies each allow-listed top-level entry of the project root into `dest`
    pub fn snapshot_into(&self, dest: &Path) -> Result<SourceSnapshot> {
        fs::create_dir_all(dest)
            .map_err(|e| EngineError::io(format!("creating {}", dest.display()), e))?;

        let mut report = SourceSnapshot::default();
        for name in &self.include {
            let source = self.project_root.join(name);
            if !source.exists() {
                warn!("Source entry {name} not found under {}", self.project_root.display());
                report.missing.push(name.clone());
                continue;
            }
            self.copy_entry(&source, &dest.join(name), true)?;
            report.copied.push(name.clone());
        }
        info!(
            "Source snapshot written to {} ({} entries)",
            dest.display(),
            report.copied.len()
        );
        Ok(report)
    }

    /// Replaces each allow-listed live entry that has a copy in `snapshot`.
    /// Returns the names that were replaced.
    pub fn restore_from(&self, snapshot: &Path) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for name in &self.include {
            let saved = snapshot.join(name);
            if !saved.exists() {
                debug!("No saved copy of {name} in {}", snapshot.display());
                continue;
            }
            let live = self.project_root.join(name);
            if live.is_dir() && self.backup_root.starts_with(&live) {
                self.clear_around_backup_root(&live)?;
            } else {
                remove_path(&live)?;
            }
            self.copy_entry(&saved, &live, false)?;
            info!("Restored {name}");
            restored.push(name.clone());
        }
        Ok(restored)
    }

    /// Empties `dir` except for the backup root and the directories leading to it
    fn clear_around_backup_root(&self, dir: &Path) -> Result<()> {
        let entries = fs::read_dir(dir)
            .map_err(|e| EngineError::io(format!("reading {}", dir.display()), e))?;
        for entry in entries {
            let path = entry
                .map_err(|e| EngineError::io(format!("reading {}", dir.display()), e))?
                .path();
            if path == self.backup_root {
                continue;
            }
            if path.is_dir() && self.backup_root.starts_with(&path) {
                self.clear_around_backup_root(&path)?;
            } else {
                remove_path(&path)?;
            }
        }
        Ok(())
    }

    fn is_skipped(&self, path: &Path, from_live: bool) -> bool {
        if from_live && path.starts_with(&self.backup_root) {
            return true;
        }
        path.file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| self.exclude.iter().any(|ex| ex == n.as_ref()))
    }

    /// Copies a file or a directory tree, skipping denied names at any depth.
    /// The backup root is skipped only when copying out of the live tree.
    fn copy_entry(&self, source: &Path, dest: &Path, from_live: bool) -> Result<()> {
        if source.is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| EngineError::io(format!("creating {}", parent.display()), e))?;
            }
            fs::copy(source, dest)
                .map_err(|e| EngineError::io(format!("copying {}", source.display()), e))?;
            return Ok(());
        }

        let walker = WalkDir::new(source)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_skipped(entry.path(), from_live));
        for entry in walker {
            let entry = entry.map_err(|e| EngineError::Archive(e.to_string()))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| EngineError::Archive(e.to_string()))?;
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| EngineError::io(format!("creating {}", target.display()), e))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(|e| {
                    EngineError::io(format!("copying {}", entry.path().display()), e)
                })?;
            } else {
                debug!("Skipping link {}", entry.path().display());
            }
        }
        Ok(())
    }
}

fn remove_path(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(());
    };
    removed.map_err(|e| EngineError::io(format!("removing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(root: &Path) -> SourceTree {
        SourceTree::new(
            root,
            vec!["core".to_string(), "manage.py".to_string(), "authz".to_string()],
            vec!["__pycache__".to_string(), "node_modules".to_string()],
            root.join("backups"),
        )
    }

    #[test]
    fn snapshot_skips_denied_names_and_reports_missing() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        fs::create_dir_all(root.join("core/__pycache__")).unwrap();
        fs::create_dir_all(root.join("core/api")).unwrap();
        fs::write(root.join("core/api/views.py"), "def v(): pass").unwrap();
        fs::write(root.join("core/__pycache__/views.cpython-311.pyc"), b"\0").unwrap();
        fs::write(root.join("manage.py"), "#!/usr/bin/env python").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let report = tree(root).snapshot_into(&dest.path().join("backend_code")).unwrap();

        assert_eq!(report.copied, vec!["core", "manage.py"]);
        assert_eq!(report.missing, vec!["authz"]);
        let code = dest.path().join("backend_code");
        assert!(code.join("core/api/views.py").is_file());
        assert!(code.join("manage.py").is_file());
        assert!(!code.join("core/__pycache__").exists());
    }

    #[test]
    fn restore_replaces_live_entries_only_from_allow_list() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        fs::create_dir_all(root.join("core")).unwrap();
        fs::write(root.join("core/new_file.py"), "added after backup").unwrap();
        fs::write(root.join("manage.py"), "new").unwrap();

        let snapshot = tempfile::tempdir().unwrap();
        fs::create_dir_all(snapshot.path().join("core")).unwrap();
        fs::write(snapshot.path().join("core/models.py"), "old models").unwrap();
        fs::write(snapshot.path().join("manage.py"), "old").unwrap();
        fs::write(snapshot.path().join("settings_local.py"), "not allowed").unwrap();

        let restored = tree(root).restore_from(snapshot.path()).unwrap();

        assert_eq!(restored, vec!["core", "manage.py"]);
        assert!(!root.join("core/new_file.py").exists());
        assert_eq!(fs::read_to_string(root.join("core/models.py")).unwrap(), "old models");
        assert_eq!(fs::read_to_string(root.join("manage.py")).unwrap(), "old");
        assert!(!root.join("settings_local.py").exists());
    }

    #[test]
    fn restore_reads_a_snapshot_unpacked_inside_the_backup_root() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        fs::create_dir_all(root.join("core/api")).unwrap();
        fs::write(root.join("core/api/views.py"), "changed").unwrap();

        let saved = root.join("backups/restore_temp/backend_code");
        fs::create_dir_all(saved.join("core/api")).unwrap();
        fs::write(saved.join("core/models.py"), "old models").unwrap();
        fs::write(saved.join("core/api/views.py"), "old views").unwrap();

        let restored = tree(root).restore_from(&saved).unwrap();

        assert_eq!(restored, vec!["core"]);
        assert_eq!(fs::read_to_string(root.join("core/models.py")).unwrap(), "old models");
        assert_eq!(fs::read_to_string(root.join("core/api/views.py")).unwrap(), "old views");
    }

    #[test]
    fn restore_keeps_a_backup_root_nested_in_an_allow_listed_dir() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        let backup_root = root.join("condominio/backups");
        let tree = SourceTree::new(
            root,
            vec!["condominio".to_string()],
            vec!["__pycache__".to_string()],
            &backup_root,
        );

        fs::create_dir_all(root.join("condominio/reservas")).unwrap();
        fs::write(root.join("condominio/settings.py"), "old settings").unwrap();
        fs::write(root.join("condominio/reservas/views.py"), "v1").unwrap();
        fs::create_dir_all(&backup_root).unwrap();
        fs::write(backup_root.join("full_backup_20250104_173000.zip"), "zip").unwrap();

        let saved = backup_root.join("restore_temp/backend_code");
        let report = tree.snapshot_into(&saved).unwrap();
        assert_eq!(report.copied, vec!["condominio"]);
        assert!(!saved.join("condominio/backups").exists());

        fs::write(root.join("condominio/settings.py"), "new settings").unwrap();
        fs::write(root.join("condominio/added.py"), "x = 1").unwrap();

        let restored = tree.restore_from(&saved).unwrap();

        assert_eq!(restored, vec!["condominio"]);
        assert_eq!(
            fs::read_to_string(root.join("condominio/settings.py")).unwrap(),
            "old settings"
        );
        assert_eq!(fs::read_to_string(root.join("condominio/reservas/views.py")).unwrap(), "v1");
        assert!(!root.join("condominio/added.py").exists());
        assert!(backup_root.join("full_backup_20250104_173000.zip").is_file());
        assert!(saved.join("condominio/settings.py").is_file());
    }
}
