//! Zip packing and unpacking of a backup working directory.

use crate::error::{EngineError, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Counts of what went into an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
}

/// Packs everything under `source_dir` into `target` with paths relative to
/// `source_dir`. Directory entries are kept so empty directories survive.
/// A partially written archive is removed on failure.
pub fn build_archive(source_dir: &Path, target: &Path) -> Result<ArchiveStats> {
    match write_archive(source_dir, target) {
        Ok(stats) => {
            info!(
                "Archive {} written ({} files, {} directories)",
                target.display(),
                stats.files,
                stats.directories
            );
            Ok(stats)
        }
        Err(e) => {
            if target.exists() {
                if let Err(remove_err) = std::fs::remove_file(target) {
                    warn!(
                        "Failed to remove partial archive {}: {remove_err}",
                        target.display()
                    );
                }
            }
            Err(e)
        }
    }
}

fn write_archive(source_dir: &Path, target: &Path) -> Result<ArchiveStats> {
    let file = File::create(target)
        .map_err(|e| EngineError::io(format!("creating {}", target.display()), e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let mut stats = ArchiveStats::default();

    for entry in WalkDir::new(source_dir).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| EngineError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| EngineError::Archive(e.to_string()))?;
        // Zip entry names always use forward slashes
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options.clone())?;
            stats.directories += 1;
        } else if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options.clone())?;
            let mut source = File::open(entry.path())
                .map_err(|e| EngineError::io(format!("reading {}", entry.path().display()), e))?;
            io::copy(&mut source, &mut zip)
                .map_err(|e| EngineError::io(format!("compressing {name}"), e))?;
            stats.files += 1;
        } else {
            debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    zip.finish()?;
    Ok(stats)
}

/// Unpacks `archive` into `dest_dir`. Entries that would land outside
/// `dest_dir` are rejected by the zip reader.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| EngineError::io(format!("opening {}", archive.display()), e))?;
    let mut zip = ZipArchive::new(file)?;
    let entries = zip.len();
    zip.extract(dest_dir)?;
    info!(
        "Extracted {entries} entries from {} into {}",
        archive.display(),
        dest_dir.display()
    );
    Ok(())
}
