//! # Config
//!
//! Paths the engine searches and writes, and extra anchors for driver releases the built-in table
//! does not know yet. Every field has a default, so an empty file is a valid config.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pattern::nvenc::{LIBRARY_NAME, NVENC_ANCHORS};
use crate::pattern::{AnchorPattern, PatternError};

/// Errors loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`EngineConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// An extra anchor is malformed
    #[error("invalid anchor #{index}: {source}")]
    Anchor {
        /// Position in the `anchors` list
        index: usize,
        /// What is wrong with it
        source: PatternError,
    },
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Filesystem root every absolute path below is resolved against
    pub root: PathBuf,
    /// Library file name without the version suffix
    pub library_name: String,
    /// Library directories, in priority order
    pub search_dirs: Vec<PathBuf>,
    /// Extra directories scanned only when guessing the version from library file names
    pub version_dirs: Vec<PathBuf>,
    /// Directory prefixes whose siblings are scanned when the library is not in `search_dirs`
    pub fallback_prefixes: Vec<PathBuf>,
    /// Where pristine copies are kept
    pub backup_dir: PathBuf,
    /// Extra anchors, tried before the built-in ones
    pub anchors: Vec<AnchorConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            library_name: LIBRARY_NAME.to_owned(),
            search_dirs: [
                "/usr/lib/x86_64-linux-gnu",
                "/usr/lib64",
                "/usr/lib",
                "/lib/x86_64-linux-gnu",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            version_dirs: ["/lib64", "/lib"].iter().map(PathBuf::from).collect(),
            fallback_prefixes: ["/usr/lib", "/lib"].iter().map(PathBuf::from).collect(),
            backup_dir: PathBuf::from("/opt/nvidia/libnvidia-encode-backup"),
            anchors: Vec::new(),
        }
    }
}

/// An anchor written in the config file, bytes as hex strings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AnchorConfig {
    /// Anchor bytes
    pub anchor: String,
    /// Offset from the anchor start to the patch site
    pub skip: usize,
    /// Bytes proving the patch is in place
    pub patched_marker: String,
    /// Variants in priority order
    pub variants: Vec<VariantConfig>,
}

/// A variant written in the config file
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    /// Expected bytes
    pub before: String,
    /// Replacement bytes
    pub after: String,
    /// Name shown in reports
    pub label: String,
}

impl EngineConfig {
    /// Loads a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses TOML text and validates the extra anchors
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.anchor_table()?;
        Ok(config)
    }

    /// The anchors to scan with: configured extras first, then the built-in table
    pub fn anchor_table(&self) -> Result<Vec<AnchorPattern>, ConfigError> {
        let mut table = Vec::with_capacity(self.anchors.len() + NVENC_ANCHORS.len());
        for (index, anchor) in self.anchors.iter().enumerate() {
            let variants: Vec<(&str, &str, &str)> = anchor
                .variants
                .iter()
                .map(|v| (v.before.as_str(), v.after.as_str(), v.label.as_str()))
                .collect();
            let pattern = AnchorPattern::from_hex(
                &anchor.anchor,
                anchor.skip,
                &anchor.patched_marker,
                &variants,
            )
            .map_err(|source| ConfigError::Anchor { index, source })?;
            table.push(pattern);
        }
        table.extend(NVENC_ANCHORS.iter().cloned());
        Ok(table)
    }

    /// Resolves an absolute host path under [`EngineConfig::root`]
    pub fn host_path(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.root.join(relative)
    }

    /// Backup directory as seen on this host
    pub fn backup_dir(&self) -> PathBuf {
        self.host_path(&self.backup_dir)
    }
}
