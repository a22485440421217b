//! # Image
//!
//! In-memory copy of a library file, and atomic replacement of files on disk

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{fchown, MetadataExt};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors reading or replacing a file
#[derive(Debug, Error)]
pub enum ImageError {
    /// The file could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// The replacement could not be written or renamed into place
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        /// File being replaced
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// A library file held in memory
#[derive(Debug, Clone)]
pub struct LibraryImage {
    /// Where the bytes came from
    path: PathBuf,
    /// File contents
    bytes: Vec<u8>,
}

impl LibraryImage {
    /// Reads `path` fully into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path).map_err(|source| ImageError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, bytes })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable contents. Changes are only persisted by [`LibraryImage::commit`]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Atomically replaces the file on disk with the current contents
    pub fn commit(&self) -> Result<(), ImageError> {
        write_atomic(&self.path, &self.bytes)
    }
}

/// Replaces `path` with `bytes` so readers see either the old or the new file, never a mix
///
/// The data goes to a temporary file in the same directory, which takes over the original's mode
/// and ownership, is synced, and is then renamed over `path`. A symlinked `path` is followed, so
/// the link stays and the file it points to is replaced.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let path = resolved.as_path();
    let err = |source| ImageError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(err)?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions()).map_err(err)?;
        // only root can hand a file to another owner; the mode is what matters otherwise
        if let Err(e) = fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid())) {
            log::debug!("keeping temporary owner for {}: {e}", path.display());
        }
    }
    tmp.write_all(bytes).map_err(err)?;
    tmp.as_file().sync_all().map_err(err)?;
    tmp.persist(path).map_err(|e| err(e.error))?;
    Ok(())
}
