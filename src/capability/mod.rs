//! # Capability
//!
//! How many concurrent NVENC sessions the installed GPU and driver allow, and whether patching
//! would change that.
//!
//! Professional and datacenter GPUs are never limited. Consumer GPUs get a cap that depends only
//! on the driver branch.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::system::CommandRunner;
use crate::version::DriverVersion;

/// Lower-cased substrings of professional GPU names
const PROFESSIONAL: [&str; 18] = [
    "quadro", "tesla", "rtx a", "rtx pro", " a100", " a40", " a30", " a16", " a10", " a2", " l40",
    " l20", " l4", " l2", " h100", " h200", " b100", " b200",
];

/// Consumer session caps by minimum driver major version, highest first
const LIMITS: [(u32, u32); 3] = [(590, 12), (531, 5), (450, 3)];

/// Cap assumed for drivers older than every entry in [`LIMITS`]
const LEGACY_LIMIT: u32 = 3;

/// Architectures by inclusive compute capability range
const ARCHITECTURES: [(&str, (u32, u32), (u32, u32)); 11] = [
    ("Tesla", (1, 0), (1, 3)),
    ("Fermi", (2, 0), (2, 1)),
    ("Kepler", (3, 0), (3, 7)),
    ("Maxwell", (5, 0), (5, 3)),
    ("Pascal", (6, 0), (6, 2)),
    ("Volta", (7, 0), (7, 0)),
    ("Turing", (7, 5), (7, 5)),
    ("Ampere", (8, 0), (8, 6)),
    ("Ada Lovelace", (8, 9), (8, 9)),
    ("Blackwell", (10, 0), (10, 9)),
    ("Blackwell", (12, 0), (12, 9)),
];

/// CUDA compute capability, e.g. `8.9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputeCapability {
    /// Major revision
    pub major: u32,
    /// Minor revision
    pub minor: u32,
}

impl FromStr for ComputeCapability {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        Ok(Self {
            major: major.parse()?,
            minor: minor.parse()?,
        })
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Architecture name for a compute capability, `"Unknown"` when unlisted
pub fn architecture(cc: ComputeCapability) -> &'static str {
    let key = (cc.major, cc.minor);
    ARCHITECTURES
        .iter()
        .find(|(_, low, high)| *low <= key && key <= *high)
        .map_or("Unknown", |(name, ..)| *name)
}

/// Whether a GPU name belongs to a professional or datacenter product
pub fn is_professional(name: &str) -> bool {
    let name = name.to_lowercase();
    PROFESSIONAL.iter().any(|p| name.contains(p))
}

/// The consumer session cap and its label for a driver version
pub fn native_limit(version: Option<&DriverVersion>) -> (Option<u32>, String) {
    let Some(version) = version else {
        return (None, "[Unknown]".into());
    };
    match LIMITS.iter().find(|(min, _)| version.major() >= *min) {
        Some((_, limit)) => (Some(*limit), format!("[{limit} sessions]")),
        None => (Some(LEGACY_LIMIT), "[Limited]".into()),
    }
}

/// What `nvidia-smi` says about the first GPU
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuInfo {
    /// Marketing name, e.g. `NVIDIA GeForce RTX 4090`
    pub name: Option<String>,
    /// Compute capability
    pub compute_capability: Option<ComputeCapability>,
}

impl GpuInfo {
    /// Queries the first GPU; fields stay empty when `nvidia-smi` cannot answer
    pub fn query<R: CommandRunner>(runner: &R) -> Self {
        let name = first_line(runner, "--query-gpu=name");
        let compute_capability =
            first_line(runner, "--query-gpu=compute_cap").and_then(|s| s.parse().ok());
        Self {
            name,
            compute_capability,
        }
    }

    /// Whether this is a professional GPU
    pub fn is_professional(&self) -> bool {
        self.name.as_deref().map_or(false, is_professional)
    }

    /// Architecture name, if the compute capability is known
    pub fn architecture(&self) -> Option<&'static str> {
        self.compute_capability.map(architecture)
    }
}

/// First non-empty line of an `nvidia-smi` CSV query
fn first_line<R: CommandRunner>(runner: &R, query: &str) -> Option<String> {
    match runner.run("nvidia-smi", &[query, "--format=csv,noheader"]) {
        Ok(out) if out.success => out
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_owned),
        Ok(_) => None,
        Err(e) => {
            debug!("cannot run nvidia-smi {query}: {e}");
            None
        }
    }
}

/// NVENC session status for this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Sessions allowed without the patch; `None` when unrestricted or unknown
    pub native_limit: Option<u32>,
    /// The library already carries the patch
    pub is_patched: bool,
    /// Professional or datacenter GPU
    pub is_professional: bool,
    /// Detected driver version
    pub driver_version: Option<DriverVersion>,
    /// Short label such as `[5 sessions]`
    pub status_label: String,
    /// Patching would raise the session count
    pub patch_useful: bool,
}

/// Classifies a host from its GPU, driver version and patch state
pub fn classify(gpu: &GpuInfo, version: Option<&DriverVersion>, is_patched: bool) -> SessionInfo {
    let mut info = SessionInfo {
        native_limit: None,
        is_patched: false,
        is_professional: false,
        driver_version: version.cloned(),
        status_label: String::new(),
        patch_useful: false,
    };

    if gpu.is_professional() {
        info.is_professional = true;
        info.status_label = "[Pro - Unrestricted]".into();
        return info;
    }

    if is_patched {
        info.is_patched = true;
        info.status_label = "[Unlimited]".into();
        return info;
    }

    let (limit, label) = native_limit(version);
    info.native_limit = limit;
    info.status_label = label;
    info.patch_useful = true;
    info
}
