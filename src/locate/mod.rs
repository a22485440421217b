//! # Locate
//!
//! Finds `<library>.<version>` on the host.
//!
//! The usual library directories are checked first. After that, the siblings of each fallback
//! prefix whose names start with the prefix's own name are checked, one level deep: for `/usr/lib`
//! that is `/usr/lib32`, `/usr/lib64`, `/usr/libx32` and the like, for `/lib` the same under `/`.
//! Subdirectories such as `/usr/lib/nvidia` are not searched.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::EngineConfig;
use crate::version::DriverVersion;

/// Resolves the versioned library path
pub struct LibraryLocator<'a> {
    /// Search directories, prefixes and the host root
    config: &'a EngineConfig,
}

impl<'a> LibraryLocator<'a> {
    /// Creates a new [`LibraryLocator`]
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// File name looked for, e.g. `libnvidia-encode.so.580.126.09`
    pub fn file_name(&self, version: &DriverVersion) -> String {
        format!("{}.{version}", self.config.library_name)
    }

    /// Returns the first existing `<dir>/<library>.<version>`, searching the configured
    /// directories in order and then the sibling directories of each fallback prefix
    pub fn locate(&self, version: &DriverVersion) -> Option<PathBuf> {
        let file_name = self.file_name(version);

        for dir in &self.config.search_dirs {
            let candidate = self.config.host_path(dir).join(&file_name);
            if candidate.is_file() {
                info!("found library: {}", candidate.display());
                return Some(candidate);
            }
        }

        for prefix in &self.config.fallback_prefixes {
            if let Some(found) = self.scan_siblings(&self.config.host_path(prefix), &file_name) {
                info!("found library: {}", found.display());
                return Some(found);
            }
        }

        debug!("{file_name} not found in any library directory");
        None
    }

    /// Looks one level deep in the directories next to `prefix` that share its name
    fn scan_siblings(&self, prefix: &Path, file_name: &str) -> Option<PathBuf> {
        let parent = prefix.parent()?;
        let stem = prefix.file_name()?.to_str()?;
        let mut dirs: Vec<PathBuf> = fs::read_dir(parent)
            .ok()?
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with(stem))
            })
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs.into_iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
    }
}
