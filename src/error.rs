//! # Error
//!
//! Every way an orchestrated run can end early

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::image::ImageError;
use crate::lock::LockError;
use crate::patcher::PatchError;
use crate::scan::NoUniqueAnchor;
use crate::version::VersionError;

/// Errors ending a run
#[derive(Debug, Error)]
pub enum EngineError {
    /// No probe could tell the driver version
    #[error("could not detect the NVIDIA driver version (tried nvidia-smi, library file names, modinfo, dpkg); reboot or pass the version explicitly")]
    VersionUndetected,
    /// The version given is not a version
    #[error(transparent)]
    InvalidVersion(#[from] VersionError),
    /// The library file does not exist in any searched directory
    #[error("could not find {name}")]
    LibraryNotFound {
        /// File name searched for
        name: String,
    },
    /// The library has no SONAME before patching
    #[error("ELF SONAME is already missing from {}; a previous patch may have corrupted it, reinstall the driver package", .path.display())]
    IdentityMissing {
        /// The library
        path: PathBuf,
    },
    /// Another run holds the target lock
    #[error("{} is locked by another run", .path.display())]
    Busy {
        /// Lock file
        path: PathBuf,
    },
    /// No anchor could be used
    #[error("no unique anchor pattern found; this driver version may not be supported ({0})")]
    NoUniqueAnchor(NoUniqueAnchor),
    /// The patch site holds unknown bytes
    #[error("no variant matched at {offset:#x}, bytes found: {}", hex::encode(.found))]
    VariantMismatch {
        /// File offset of the patch site
        offset: usize,
        /// Bytes found at the site
        found: Vec<u8>,
    },
    /// The SONAME vanished or changed after patching
    #[error("ELF SONAME was destroyed by patching; {}", restore_note(.restored))]
    PostPatchIdentityLoss {
        /// The backup was put back
        restored: bool,
    },
    /// Creating or restoring the backup failed
    #[error(transparent)]
    Backup(#[from] BackupError),
    /// Reading or writing the library failed
    #[error(transparent)]
    Image(#[from] ImageError),
    /// Other filesystem failure
    #[error("{}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// The configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<PatchError> for EngineError {
    fn from(e: PatchError) -> Self {
        match e {
            PatchError::NoUniqueAnchor(report) => Self::NoUniqueAnchor(report),
            PatchError::VariantMismatch { offset, found } => Self::VariantMismatch { offset, found },
            PatchError::Image(e) => Self::Image(e),
        }
    }
}

impl From<LockError> for EngineError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy { path } => Self::Busy { path },
            LockError::Io { path, source } => Self::Io { path, source },
        }
    }
}

/// Tail of the [`EngineError::PostPatchIdentityLoss`] message
fn restore_note(restored: &bool) -> &'static str {
    if *restored {
        "original restored from backup"
    } else {
        "restoring the backup FAILED, reinstall the driver package"
    }
}

impl EngineError {
    /// Patch site offset, for errors that located one
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::VariantMismatch { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
