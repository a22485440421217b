//! Command line front end

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;

use nvpatch::config::EngineConfig;
use nvpatch::identity::ElfSoname;
use nvpatch::system::{HostRunner, Ldconfig};
use nvpatch::{Orchestrator, Report, Request};

/// Removes the NVENC session limit from libnvidia-encode.so without corrupting its ELF SONAME
#[derive(Parser)]
#[command(name = "nvpatch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Subcommands
#[derive(Subcommand)]
enum Commands {
    /// Patch the installed library
    Patch {
        /// Driver version to use instead of detecting it
        #[arg(long)]
        driver_version: Option<String>,
        /// Only report what would be done
        #[arg(long)]
        dry_run: bool,
        /// Patch even if the library has no SONAME to begin with
        #[arg(long)]
        force: bool,
    },
    /// Restore the library from its backup
    Rollback {
        /// Driver version to use instead of detecting it
        #[arg(long)]
        driver_version: Option<String>,
        /// Only report what would be done
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the NVENC session status of this host
    Status,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => {
            debug!("loading config from {}", path.display());
            EngineConfig::load(path).context("failed to load configuration")?
        }
        None => EngineConfig::default(),
    };
    let orchestrator = Orchestrator::new(config, HostRunner, ElfSoname::new(), Ldconfig::new(HostRunner))
        .context("invalid anchor table")?;

    let request = match cli.command {
        Commands::Status => {
            let info = orchestrator.status();
            let version = info
                .driver_version
                .as_ref()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            println!("driver version: {version}");
            println!("NVENC sessions: {}", info.status_label);
            if info.patch_useful {
                println!("patching would remove the session limit");
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Patch {
            driver_version,
            dry_run,
            force,
        } => {
            let info = orchestrator.status();
            if info.is_professional {
                println!("professional GPU detected, NVENC sessions are already unrestricted");
                return Ok(ExitCode::SUCCESS);
            }
            if let Some(limit) = info.native_limit {
                println!("this GPU currently supports {limit} concurrent NVENC sessions");
            }
            Request {
                version: driver_version,
                dry_run,
                rollback: false,
                force,
            }
        }
        Commands::Rollback {
            driver_version,
            dry_run,
        } => Request {
            version: driver_version,
            dry_run,
            rollback: true,
            force: false,
        },
    };

    let report = orchestrator.run(&request);
    summarize(&report);
    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints the outcome of a run
fn summarize(report: &Report) {
    if let Some(version) = &report.version {
        println!("driver version: {version}");
    }
    if let Some(library) = &report.library {
        println!("library:        {}", library.display());
    }
    if let Some(backup) = &report.backup {
        println!("backup:         {}", backup.display());
    }
    println!("stage:          {}", report.stage);
    match (&report.result, &report.error) {
        (_, Some(e)) => println!("failed:         {e}"),
        (Some(result), None) => println!("result:         {result}"),
        (None, None) => println!("result:         restored from backup"),
    }
}
