//! # System
//!
//! The few host programs the engine talks to (`nvidia-smi`, `modinfo`, `dpkg`, `ldconfig`) are run
//! through [`CommandRunner`], so probes and the linker cache can be driven by scripted output.

use std::io;
use std::process::{Command, Stdio};

use log::{debug, info, warn};

#[cfg(test)]
pub(crate) mod fake;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command exited with status 0
    pub success: bool,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// Runs host programs
pub trait CommandRunner {
    /// Runs `program` with `args` to completion and captures its output
    ///
    /// An `Err` means the program could not be started at all (e.g. it is not installed)
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// Runs programs on the host with stdin closed
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!("running: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The dynamic linker cache
pub trait LinkerCache {
    /// Rebuilds the cache. Failures are logged, never fatal
    fn refresh(&self);
    /// Whether a library whose name contains `name` is in the cache
    fn contains(&self, name: &str) -> bool;
}

/// [`LinkerCache`] backed by `ldconfig`
#[derive(Debug, Clone)]
pub struct Ldconfig<R> {
    /// How `ldconfig` is run
    runner: R,
}

impl<R: CommandRunner> Ldconfig<R> {
    /// Creates a new [`Ldconfig`]
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> LinkerCache for Ldconfig<R> {
    fn refresh(&self) {
        match self.runner.run("ldconfig", &[]) {
            Ok(out) if out.success => info!("ldconfig cache rebuilt"),
            Ok(out) => warn!("ldconfig failed: {}", out.stderr.trim()),
            Err(e) => warn!("cannot run ldconfig: {e}"),
        }
    }

    fn contains(&self, name: &str) -> bool {
        match self.runner.run("ldconfig", &["-p"]) {
            Ok(out) => out.stdout.lines().any(|line| line.contains(name)),
            Err(e) => {
                warn!("cannot run ldconfig -p: {e}");
                false
            }
        }
    }
}
