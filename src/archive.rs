//! Archiving of processed input files
//!
//! Files are moved into `<archive_root>/<YYYY-MM-DD_HHMM>/`, one folder per run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create archive directory {path}: {message}")]
    CreateDir { path: PathBuf, message: String },

    #[error("Failed to move {from} to {to}: {message}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
}

/// Folder name for a run timestamp
pub fn archive_dir_name(run_ts: NaiveDateTime) -> String {
    run_ts.format("%Y-%m-%d_%H%M").to_string()
}

/// Move `paths` into the run's archive folder and return their new locations
///
/// Missing sources are skipped with a warning, so re-running after a partial archive is
/// harmless.
pub fn archive_inputs(
    paths: &[PathBuf],
    run_ts: NaiveDateTime,
    archive_root: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let dir = archive_root.join(archive_dir_name(run_ts));
    let mut archived = Vec::with_capacity(paths.len());

    for source in paths {
        if !source.is_file() {
            warn!("Nothing to archive at {}", source.display());
            continue;
        }
        let Some(name) = source.file_name() else {
            warn!("Not archiving {}: no file name", source.display());
            continue;
        };

        fs::create_dir_all(&dir).map_err(|e| ArchiveError::CreateDir {
            path: dir.clone(),
            message: e.to_string(),
        })?;

        let dest = dir.join(name);
        move_file(source, &dest)?;
        info!("Archived {} to {}", source.display(), dest.display());
        archived.push(dest);
    }

    Ok(archived)
}

fn move_file(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    fs::rename(from, to)
        .or_else(|_| {
            // Fallback: copy if cross-device rename fails
            fs::copy(from, to).and_then(|_| fs::remove_file(from))
        })
        .map_err(|e| ArchiveError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            message: e.to_string(),
        })
}
