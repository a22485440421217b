//! Kernel module metadata through `modinfo`

use log::debug;

use super::{DriverVersion, VersionProbe};
use crate::system::CommandRunner;

/// Reads the `version:` field of the `nvidia` kernel module
pub struct Modinfo<'a, R> {
    /// How `modinfo` is run
    runner: &'a R,
}

impl<'a, R: CommandRunner> Modinfo<'a, R> {
    /// Creates a new [`Modinfo`] probe
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> VersionProbe for Modinfo<'_, R> {
    fn name(&self) -> &'static str {
        "modinfo"
    }

    fn probe(&self) -> Option<DriverVersion> {
        match self.runner.run("modinfo", &["nvidia"]) {
            Ok(out) if out.success => parse(&out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!("cannot run modinfo: {e}");
                None
            }
        }
    }
}

/// Extracts the module version from `modinfo` output
pub fn parse(stdout: &str) -> Option<DriverVersion> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("version:"))
        .find_map(|rest| rest.trim().parse().ok())
}
