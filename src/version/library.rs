//! Guessing the version from installed library file names
//!
//! A driver upgrade installs `libnvidia-encode.so.<version>` before the new kernel module is
//! loaded, so the file names are the best answer while `nvidia-smi` is broken.

use std::fs;
use std::path::PathBuf;

use log::debug;
use regex::Regex;

use super::{DriverVersion, VersionProbe};
use crate::config::EngineConfig;

/// Scans the library directories for versioned file names and picks the highest version
pub struct LibraryFilenames<'a> {
    /// Where to look and for which name
    config: &'a EngineConfig,
}

impl<'a> LibraryFilenames<'a> {
    /// Creates a new [`LibraryFilenames`] probe
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Directories scanned, as seen on this host
    fn dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.config
            .search_dirs
            .iter()
            .chain(&self.config.version_dirs)
            .map(|dir| self.config.host_path(dir))
    }
}

impl VersionProbe for LibraryFilenames<'_> {
    fn name(&self) -> &'static str {
        "library file names"
    }

    fn probe(&self) -> Option<DriverVersion> {
        let pattern = format!(r"^{}\.(\d+\.\d+\.\d+)$", regex::escape(&self.config.library_name));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                debug!("cannot build file name pattern: {e}");
                return None;
            }
        };
        let mut best: Option<DriverVersion> = None;
        for dir in self.dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(caps) = name.to_str().and_then(|n| re.captures(n)) else {
                    continue;
                };
                let Ok(version) = caps[1].parse::<DriverVersion>() else {
                    continue;
                };
                debug!("found {}", entry.path().display());
                if best.as_ref().map_or(true, |b| version > *b) {
                    best = Some(version);
                }
            }
        }
        best
    }
}
