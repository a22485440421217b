//! # Backup
//!
//! Pristine copies of the library, one per driver version, kept as
//! `<backup dir>/<library>.<version>.orig`.
//!
//! A backup is written once and never replaced: the copy is staged in a temporary file and moved
//! into place with a rename that refuses to overwrite, so a second run (or a concurrent one) can
//! never replace the original with an already patched file.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::image::{self, ImageError};
use crate::system::LinkerCache;
use crate::version::DriverVersion;

/// Errors creating or restoring backups
#[derive(Debug, Error)]
pub enum BackupError {
    /// There is no backup for this version
    #[error("no backup found at {}", .path.display())]
    Missing {
        /// Where the backup was expected
        path: PathBuf,
    },
    /// Copying failed
    #[error("backup of {} failed: {source}", .path.display())]
    Io {
        /// File being backed up or restored
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Writing the restored library failed
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// What [`BackupStore::ensure_backup`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A backup for this version was already there and was left alone
    Existing,
    /// A new backup was written
    Created,
    /// Dry run, a backup would have been written
    WouldCreate,
}

/// The directory of versioned backups
#[derive(Debug, Clone)]
pub struct BackupStore {
    /// Backup directory
    dir: PathBuf,
    /// Library file name without the version suffix
    library_name: String,
}

impl BackupStore {
    /// Creates a store in `dir` for `library_name`
    pub fn new(dir: impl Into<PathBuf>, library_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            library_name: library_name.into(),
        }
    }

    /// The backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the backup for `version` lives
    pub fn backup_path(&self, version: &DriverVersion) -> PathBuf {
        self.dir.join(format!("{}.{version}.orig", self.library_name))
    }

    /// Makes sure a backup of `source` exists for `version`
    pub fn ensure_backup(
        &self,
        source: &Path,
        version: &DriverVersion,
        dry_run: bool,
    ) -> Result<BackupOutcome, BackupError> {
        let backup = self.backup_path(version);
        if backup.is_file() {
            info!("backup already exists: {}", backup.display());
            return Ok(BackupOutcome::Existing);
        }
        if dry_run {
            info!("[DRY-RUN] would create backup: {}", backup.display());
            return Ok(BackupOutcome::WouldCreate);
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| BackupError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let mut original = File::open(source).map_err(io_err(source))?;
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        io::copy(&mut original, staged.as_file_mut()).map_err(io_err(source))?;
        if let Ok(meta) = original.metadata() {
            staged
                .as_file()
                .set_permissions(meta.permissions())
                .map_err(io_err(&backup))?;
        }
        staged.as_file().sync_all().map_err(io_err(&backup))?;

        match staged.persist_noclobber(&backup) {
            Ok(_) => {
                info!("backup created: {}", backup.display());
                Ok(BackupOutcome::Created)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                info!("backup already exists: {}", backup.display());
                Ok(BackupOutcome::Existing)
            }
            Err(e) => Err(BackupError::Io {
                path: backup,
                source: e.error,
            }),
        }
    }

    /// Copies the backup for `version` back over `target` and rebuilds the linker cache
    pub fn restore(
        &self,
        version: &DriverVersion,
        target: &Path,
        dry_run: bool,
        linker: &dyn LinkerCache,
    ) -> Result<(), BackupError> {
        let backup = self.backup_path(version);
        if !backup.is_file() {
            return Err(BackupError::Missing { path: backup });
        }
        if dry_run {
            info!("[DRY-RUN] would restore {} from {}", target.display(), backup.display());
            return Ok(());
        }
        let bytes = fs::read(&backup).map_err(|source| BackupError::Io {
            path: backup.clone(),
            source,
        })?;
        image::write_atomic(target, &bytes)?;
        linker.refresh();
        info!("restored {} from backup", target.display());
        Ok(())
    }
}

/// Restores a backup when dropped, unless the change it protects was confirmed
///
/// Armed right after the library is modified; any early return between the write and the final
/// checks puts the original back.
pub struct RollbackGuard<'a> {
    /// Where the backup comes from
    store: &'a BackupStore,
    /// Which backup
    version: DriverVersion,
    /// The modified library
    target: PathBuf,
    /// Rebuilt after restoring
    linker: &'a dyn LinkerCache,
    /// Restore on drop
    armed: bool,
}

impl<'a> RollbackGuard<'a> {
    /// Arms a guard for `target`
    pub fn arm(
        store: &'a BackupStore,
        version: &DriverVersion,
        target: &Path,
        linker: &'a dyn LinkerCache,
    ) -> Self {
        Self {
            store,
            version: version.clone(),
            target: target.to_path_buf(),
            linker,
            armed: true,
        }
    }

    /// Keeps the change
    pub fn confirm(mut self) {
        self.armed = false;
    }

    /// Restores the backup now and reports whether it worked
    pub fn roll_back(mut self) -> Result<(), BackupError> {
        self.armed = false;
        self.store
            .restore(&self.version, &self.target, false, self.linker)
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("rolling back {}", self.target.display());
        if let Err(e) = self
            .store
            .restore(&self.version, &self.target, false, self.linker)
        {
            error!("rollback of {} failed: {e}", self.target.display());
        }
    }
}
