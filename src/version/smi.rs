//! Live query through `nvidia-smi`

use log::{debug, warn};

use super::{DriverVersion, VersionProbe};
use crate::system::CommandRunner;

/// Arguments asking `nvidia-smi` for the bare driver version
const QUERY: [&str; 2] = ["--query-gpu=driver_version", "--format=csv,noheader"];

/// What `nvidia-smi` prints when the kernel module and userspace libraries disagree
const MISMATCH: &str = "Driver/library version mismatch";

/// Asks the running driver through `nvidia-smi`
pub struct NvidiaSmi<'a, R> {
    /// How `nvidia-smi` is run
    runner: &'a R,
}

impl<'a, R: CommandRunner> NvidiaSmi<'a, R> {
    /// Creates a new [`NvidiaSmi`] probe
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> VersionProbe for NvidiaSmi<'_, R> {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn probe(&self) -> Option<DriverVersion> {
        let out = match self.runner.run("nvidia-smi", &QUERY) {
            Ok(out) => out,
            Err(e) => {
                debug!("cannot run nvidia-smi: {e}");
                return None;
            }
        };
        if out.success {
            let first = parse(&out.stdout);
            if first.is_some() {
                return first;
            }
            debug!("nvidia-smi returned invalid version string: {}", out.stdout.trim());
        }
        warn!("nvidia-smi failed or returned invalid output (driver/library version mismatch?)");
        None
    }
}

/// Parses the first GPU's line of `--query-gpu=driver_version` output
pub fn parse(stdout: &str) -> Option<DriverVersion> {
    stdout.lines().map(str::trim).find(|l| !l.is_empty())?.parse().ok()
}

/// Whether `nvidia-smi` reports that the loaded kernel module is older than the libraries
///
/// This happens after upgrading the driver without rebooting; the fix is a reboot.
pub fn driver_mismatch<R: CommandRunner>(runner: &R) -> bool {
    match runner.run("nvidia-smi", &[]) {
        Ok(out) => out.stdout.contains(MISMATCH) || out.stderr.contains(MISMATCH),
        Err(_) => false,
    }
}
