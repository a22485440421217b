//! Installed package metadata through `dpkg`

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::{DriverVersion, VersionProbe};
use crate::system::CommandRunner;

lazy_static! {
    /// Driver metapackage names, e.g. `nvidia-driver-570`
    static ref PACKAGE_RE: Regex = Regex::new(r"^nvidia-driver-\d+$").unwrap();
    /// Upstream part of the package version, e.g. `570.86.16` in `570.86.16-0ubuntu1`
    static ref PACKAGE_VERSION_RE: Regex = Regex::new(r"^\d+\.\d+\.\d+").unwrap();
}

/// Reads the version of the installed `nvidia-driver-NNN` package
pub struct Dpkg<'a, R> {
    /// How `dpkg` is run
    runner: &'a R,
}

impl<'a, R: CommandRunner> Dpkg<'a, R> {
    /// Creates a new [`Dpkg`] probe
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> VersionProbe for Dpkg<'_, R> {
    fn name(&self) -> &'static str {
        "dpkg"
    }

    fn probe(&self) -> Option<DriverVersion> {
        match self.runner.run("dpkg", &["-l", "nvidia-driver-*"]) {
            Ok(out) if out.success => parse(&out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!("cannot run dpkg: {e}");
                None
            }
        }
    }
}

/// Finds the first installed (`ii`) driver metapackage in `dpkg -l` output
pub fn parse(stdout: &str) -> Option<DriverVersion> {
    stdout.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields[..] {
            ["ii", package, version, ..] if PACKAGE_RE.is_match(package) => {
                PACKAGE_VERSION_RE.find(version)?.as_str().parse().ok()
            }
            _ => None,
        }
    })
}
