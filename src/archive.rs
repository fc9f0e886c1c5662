//! Output archive: saved collages and consumed source photos.
//!
//! Collages go to `<root>/collage_<stamp>.jpg`, consumed photos to
//! `<root>/single_images/<stamp>_<name>`. Names never overwrite an
//! existing file.

use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const SINGLE_IMAGES_DIR: &str = "single_images";
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create archive directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },

    #[error("Source has no file name: {0}")]
    NoFileName(String),
}

#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    singles: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let root = root.into();
        let singles = root.join(SINGLE_IMAGES_DIR);
        fs::create_dir_all(&singles).map_err(|source| ArchiveError::CreateDir {
            path: singles.display().to_string(),
            source,
        })?;
        Ok(Self { root, singles })
    }

    /// Local time stamp shared by a collage and the photos it consumed.
    pub fn stamp() -> String {
        Local::now().format(STAMP_FORMAT).to_string()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn singles_dir(&self) -> &Path {
        &self.singles
    }

    /// Free path for a collage saved with this stamp.
    pub fn collage_path(&self, stamp: &str) -> PathBuf {
        unique_path(&self.root, &format!("collage_{}", stamp), "jpg")
    }

    /// Move a consumed photo out of the watched directory.
    pub fn archive_source(&self, source: &Path, stamp: &str) -> Result<PathBuf, ArchiveError> {
        let name = source
            .file_name()
            .ok_or_else(|| ArchiveError::NoFileName(source.display().to_string()))?;
        let name = Path::new(name);
        let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let ext = name.extension().map(|e| e.to_string_lossy()).unwrap_or_default();

        let dest = unique_path(&self.singles, &format!("{}_{}", stamp, stem), &ext);
        move_file(source, &dest).map_err(|e| ArchiveError::Move {
            from: source.display().to_string(),
            to: dest.display().to_string(),
            source: e,
        })?;
        debug!(from = %source.display(), to = %dest.display(), "Archived source photo");
        Ok(dest)
    }
}

/// `<dir>/<base>.<ext>`, or `<dir>/<base>_<n>.<ext>` for the first free `n`.
fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let file = |suffix: String| {
        if ext.is_empty() {
            dir.join(format!("{}{}", base, suffix))
        } else {
            dir.join(format!("{}{}.{}", base, suffix, ext))
        }
    };

    let mut candidate = file(String::new());
    let mut n = 1;
    while candidate.exists() {
        candidate = file(format!("_{}", n));
        n += 1;
    }
    candidate
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // rename fails across filesystems
            if from.exists() {
                warn!(from = %from.display(), error = %rename_err, "Rename failed, copying instead");
                fs::copy(from, to)?;
                fs::remove_file(from)
            } else {
                Err(rename_err)
            }
        }
    }
}
