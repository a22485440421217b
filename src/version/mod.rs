//! # Version
//!
//! Detects the installed driver version.
//!
//! `nvidia-smi` is the authoritative source but stops working after a driver upgrade until the
//! next reboot, which is exactly when patching is usually wanted. The resolver therefore walks a
//! chain of probes and takes the first answer that looks like a version number.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::system::CommandRunner;

pub mod dpkg;
pub mod library;
pub mod modinfo;
pub mod smi;

lazy_static! {
    /// `major.minor[.patch]`, digits only
    static ref VERSION_RE: Regex = Regex::new(r"^\d+\.\d+(\.\d+)?$").unwrap();
}

/// Errors parsing a version string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// Not of the form `major.minor[.patch]`
    #[error("invalid driver version {0:?}, expected major.minor[.patch]")]
    Invalid(String),
}

/// A validated driver version such as `580.126.09`
///
/// Ordering is numeric per component, so `580.126.9` sorts above `580.95.05`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverVersion {
    /// Version exactly as found, used in file names
    text: String,
    /// Numeric components
    parts: Vec<u32>,
}

impl DriverVersion {
    /// The major version, e.g. `580`
    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    /// The version as found, leading zeros included
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for DriverVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::Invalid(s.to_owned());
        if !VERSION_RE.is_match(s) {
            return Err(invalid());
        }
        let parts = s
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            text: s.to_owned(),
            parts,
        })
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for DriverVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .cmp(&other.parts)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for DriverVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One way of finding out the driver version
pub trait VersionProbe {
    /// Short name for logs
    fn name(&self) -> &'static str;
    /// Returns the version if this source knows it
    fn probe(&self) -> Option<DriverVersion>;
}

/// A detected version and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The version
    pub version: DriverVersion,
    /// Name of the probe that found it, or `"override"`
    pub source: &'static str,
}

/// Tries probes in order until one succeeds
pub struct VersionResolver<'a> {
    /// Probes, most authoritative first
    probes: Vec<Box<dyn VersionProbe + 'a>>,
}

impl<'a> VersionResolver<'a> {
    /// Creates a resolver over an explicit probe chain
    pub fn new(probes: Vec<Box<dyn VersionProbe + 'a>>) -> Self {
        Self { probes }
    }

    /// The standard chain: `nvidia-smi`, library file names, `modinfo`, `dpkg`
    pub fn host<R: CommandRunner>(runner: &'a R, config: &'a EngineConfig) -> Self {
        Self::new(vec![
            Box::new(smi::NvidiaSmi::new(runner)),
            Box::new(library::LibraryFilenames::new(config)),
            Box::new(modinfo::Modinfo::new(runner)),
            Box::new(dpkg::Dpkg::new(runner)),
        ])
    }

    /// Returns the override if given, otherwise the first probe's answer
    ///
    /// `None` means every probe came up empty; callers decide how to degrade.
    pub fn resolve(&self, manual: Option<DriverVersion>) -> Option<Resolved> {
        if let Some(version) = manual {
            info!("using driver version {version} as given");
            return Some(Resolved {
                version,
                source: "override",
            });
        }
        for (i, probe) in self.probes.iter().enumerate() {
            let Some(version) = probe.probe() else {
                debug!("{} did not report a driver version", probe.name());
                continue;
            };
            info!("driver version detected via {}: {version}", probe.name());
            if i > 0 {
                warn!(
                    "detected driver version from {} ({} unavailable)",
                    probe.name(),
                    self.probes[0].name()
                );
            }
            return Some(Resolved {
                version,
                source: probe.name(),
            });
        }
        None
    }
}
