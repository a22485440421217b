//! # Lock
//!
//! Exclusive advisory lock held while one driver version's library is backed up, patched and
//! verified. A second live run against the same target fails fast instead of waiting.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

use crate::version::DriverVersion;

/// Errors taking the lock
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock
    #[error("{} is locked by another process", .path.display())]
    Busy {
        /// Lock file
        path: PathBuf,
    },
    /// The lock file could not be created or locked
    #[error("cannot lock {}: {source}", .path.display())]
    Io {
        /// Lock file
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// A held lock, released on drop
pub struct TargetLock {
    /// Lock file path
    path: PathBuf,
    /// Locked handle; dropping it unlocks
    _lock: Flock<File>,
}

impl TargetLock {
    /// Lock file for `library.version` in `dir`
    pub fn path_for(dir: &Path, library_name: &str, version: &DriverVersion) -> PathBuf {
        dir.join(format!("{library_name}.{version}.lock"))
    }

    /// Takes the lock for `library.version` in `dir` without blocking
    pub fn acquire(
        dir: &Path,
        library_name: &str,
        version: &DriverVersion,
    ) -> Result<Self, LockError> {
        let path = Self::path_for(dir, library_name, version);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("locked {}", path.display());
                Ok(Self { path, _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(LockError::Busy { path }),
            Err((_, errno)) => Err(LockError::Io {
                source: io::Error::from(errno),
                path,
            }),
        }
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
