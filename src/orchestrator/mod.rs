//! # Orchestrator
//!
//! Runs a whole patch or rollback: detect the driver version, find the library, check its SONAME,
//! take the target lock, back up, patch, check the SONAME again and refresh the linker cache.
//!
//! A failure at any step ends the run with a [`Report`] saying how far it got. Once the library has
//! been modified, a [`RollbackGuard`] puts the backup back unless every check passes.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use log::{debug, error, info, warn};

use crate::backup::{BackupStore, RollbackGuard};
use crate::capability::{self, GpuInfo, SessionInfo};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::IdentityReader;
use crate::locate::LibraryLocator;
use crate::lock::TargetLock;
use crate::patcher::{self, PatchResult};
use crate::pattern::AnchorPattern;
use crate::system::{CommandRunner, LinkerCache};
use crate::version::{smi, DriverVersion, VersionResolver};

/// How far a run got
///
/// A run that stops early keeps the last stage it completed, and [`Report::error`] says why it
/// stopped. Only a failing patch step moves to [`Stage::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing done yet
    Idle,
    /// The driver version is known
    VersionResolved,
    /// The library file was found
    LibraryLocated,
    /// The library's SONAME was read (or its absence accepted)
    IdentityVerified,
    /// A backup exists
    BackedUp,
    /// The file was scanned for anchors
    Scanned,
    /// The patch was applied, or would have been in a dry run
    Patched,
    /// Nothing to do
    AlreadyPatched,
    /// The patch step failed; nothing was written
    Failed,
    /// The patched library still has its SONAME
    IntegrityConfirmed,
    /// The patch broke the library and the backup was put back
    RolledBack,
    /// Rollback mode finished
    Restored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Driver version to use instead of detecting it
    pub version: Option<String>,
    /// Report what would happen without writing anything
    pub dry_run: bool,
    /// Restore the backup instead of patching
    pub rollback: bool,
    /// Patch even if the library has no SONAME to begin with
    pub force: bool,
}

/// Outcome of a run
#[derive(Debug)]
pub struct Report {
    /// Last stage completed
    pub stage: Stage,
    /// Result of the patch step; rollback runs only carry one when they fail
    pub result: Option<PatchResult>,
    /// Driver version used
    pub version: Option<DriverVersion>,
    /// Library path
    pub library: Option<PathBuf>,
    /// Backup path
    pub backup: Option<PathBuf>,
    /// Why the run stopped early
    pub error: Option<EngineError>,
}

impl Report {
    /// A report for a run that has not started
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            result: None,
            version: None,
            library: None,
            backup: None,
            error: None,
        }
    }

    /// True when the run did what was asked (including finding nothing to do)
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives a patch or rollback against the host
pub struct Orchestrator<R, I, L> {
    /// Paths and names
    config: EngineConfig,
    /// Anchors to scan with
    anchors: Vec<AnchorPattern>,
    /// Runs `nvidia-smi` and friends
    runner: R,
    /// Reads the SONAME
    identity: I,
    /// `ldconfig`
    linker: L,
}

impl<R, I, L> Orchestrator<R, I, L>
where
    R: CommandRunner,
    I: IdentityReader,
    L: LinkerCache,
{
    /// Creates an orchestrator scanning with the configured and built-in anchors
    pub fn new(config: EngineConfig, runner: R, identity: I, linker: L) -> Result<Self, EngineError> {
        let anchors = config.anchor_table()?;
        Ok(Self {
            config,
            anchors,
            runner,
            identity,
            linker,
        })
    }

    /// Replaces the anchor table
    pub fn with_anchors(mut self, anchors: Vec<AnchorPattern>) -> Self {
        self.anchors = anchors;
        self
    }

    /// Runs `request` to completion
    pub fn run(&self, request: &Request) -> Report {
        let mut report = Report::new();
        let outcome = if request.rollback {
            self.roll_back(request, &mut report)
        } else {
            self.patch(request, &mut report)
        };
        match outcome {
            Ok(result) => report.result = result,
            Err(e) => {
                error!("{e}");
                report.result = Some(PatchResult::Failed {
                    offset: e.offset(),
                    message: e.to_string(),
                });
                report.error = Some(e);
            }
        }
        report
    }

    /// Finds the version, the library and its SONAME
    fn prepare(
        &self,
        request: &Request,
        report: &mut Report,
    ) -> Result<(DriverVersion, PathBuf, Option<String>), EngineError> {
        let manual = request
            .version
            .as_deref()
            .map(str::parse::<DriverVersion>)
            .transpose()?;
        let Some(resolved) = VersionResolver::host(&self.runner, &self.config).resolve(manual) else {
            if smi::driver_mismatch(&self.runner) {
                warn!("nvidia-smi reports a driver/library version mismatch; reboot and re-run");
            }
            return Err(EngineError::VersionUndetected);
        };
        let version = resolved.version;
        report.version = Some(version.clone());
        report.stage = Stage::VersionResolved;

        let locator = LibraryLocator::new(&self.config);
        let Some(library) = locator.locate(&version) else {
            warn!(
                "ensure the driver is properly installed (e.g. reinstall libnvidia-encode-{})",
                version.major()
            );
            return Err(EngineError::LibraryNotFound {
                name: locator.file_name(&version),
            });
        };
        // packages often install the versioned name as a link; patch and back up the real file
        let library = fs::canonicalize(&library).map_err(|source| EngineError::Io {
            path: library.clone(),
            source,
        })?;
        report.library = Some(library.clone());
        report.stage = Stage::LibraryLocated;

        let soname = self.identity.read_identity(&library);
        match &soname {
            Some(name) => debug!("ELF SONAME verified: {name}"),
            None => warn!(
                "ELF SONAME is missing from {}; a previous patch may have corrupted it",
                library.display()
            ),
        }
        Ok((version, library, soname))
    }

    /// Backup, patch, verify
    fn patch(&self, request: &Request, report: &mut Report) -> Result<Option<PatchResult>, EngineError> {
        let (version, library, soname_before) = self.prepare(request, report)?;
        if soname_before.is_none() {
            if !request.force {
                return Err(EngineError::IdentityMissing { path: library });
            }
            warn!("continuing without a SONAME to verify against");
        }
        report.stage = Stage::IdentityVerified;

        let _lock = if request.dry_run {
            None
        } else {
            Some(TargetLock::acquire(
                &self.config.backup_dir(),
                &self.config.library_name,
                &version,
            )?)
        };

        let store = BackupStore::new(self.config.backup_dir(), self.config.library_name.as_str());
        store.ensure_backup(&library, &version, request.dry_run)?;
        report.backup = Some(store.backup_path(&version));
        report.stage = Stage::BackedUp;

        info!("scanning {} for the session limit check", library.display());
        let result = patcher::patch_file(&library, &self.anchors, request.dry_run);
        report.stage = Stage::Scanned;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                report.stage = Stage::Failed;
                warn!("do not fall back to sed-based patching, it corrupts the ELF SONAME");
                return Err(e.into());
            }
        };

        if result.already_patched() {
            report.stage = Stage::AlreadyPatched;
            info!("library is already patched, nothing to do");
            return Ok(Some(result));
        }
        report.stage = Stage::Patched;
        if request.dry_run {
            info!("{result}");
            return Ok(Some(result));
        }

        let guard = RollbackGuard::arm(&store, &version, &library, &self.linker);
        let soname_after = self.identity.read_identity(&library);
        if soname_before.is_some() && soname_after != soname_before {
            error!("ELF SONAME changed by patching, restoring from backup");
            let restored = match guard.roll_back() {
                Ok(()) => true,
                Err(e) => {
                    error!("{e}");
                    false
                }
            };
            report.stage = Stage::RolledBack;
            return Err(EngineError::PostPatchIdentityLoss { restored });
        }
        guard.confirm();
        if let Some(name) = &soname_after {
            info!("ELF SONAME intact: {name}");
        }
        report.stage = Stage::IntegrityConfirmed;

        self.linker.refresh();
        if self.linker.contains(self.library_stem()) {
            info!("linker cache updated, library is discoverable");
        } else {
            warn!("library not found in the linker cache; containers may not discover it");
        }
        info!("NVENC session limit removed, backup at {}", store.backup_path(&version).display());
        Ok(Some(result))
    }

    /// Restore the backup
    fn roll_back(
        &self,
        request: &Request,
        report: &mut Report,
    ) -> Result<Option<PatchResult>, EngineError> {
        let (version, library, _) = self.prepare(request, report)?;
        report.stage = Stage::IdentityVerified;

        let _lock = if request.dry_run {
            None
        } else {
            Some(TargetLock::acquire(
                &self.config.backup_dir(),
                &self.config.library_name,
                &version,
            )?)
        };

        let store = BackupStore::new(self.config.backup_dir(), self.config.library_name.as_str());
        report.backup = Some(store.backup_path(&version));
        store.restore(&version, &library, request.dry_run, &self.linker)?;
        report.stage = Stage::Restored;

        if !request.dry_run {
            match self.identity.read_identity(&library) {
                Some(name) => info!("SONAME verified after rollback: {name}"),
                None => warn!(
                    "SONAME still missing after rollback, the backup may be corrupted too; reinstall libnvidia-encode-{}",
                    version.major()
                ),
            }
        }
        Ok(None)
    }

    /// NVENC session status of this host
    ///
    /// Never fails: whatever cannot be determined is reported as unknown.
    pub fn status(&self) -> SessionInfo {
        let version = VersionResolver::host(&self.runner, &self.config)
            .resolve(None)
            .map(|r| r.version);
        let gpu = GpuInfo::query(&self.runner);
        if let (Some(name), Some(arch)) = (&gpu.name, gpu.architecture()) {
            debug!("GPU: {name} ({arch})");
        }
        let is_patched = version
            .as_ref()
            .and_then(|v| LibraryLocator::new(&self.config).locate(v))
            .and_then(|path| patcher::patch_file(&path, &self.anchors, true).ok())
            .map_or(false, |result| result.already_patched());
        capability::classify(&gpu, version.as_ref(), is_patched)
    }

    /// Library name up to `.so`, as `ldconfig -p` lists it
    fn library_stem(&self) -> &str {
        let name = self.config.library_name.as_str();
        name.split(".so").next().unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;

    use sha2::{Digest, Sha256};

    use super::*;
    use crate::identity::{fixture, ElfSoname};
    use crate::pattern::PatchVariant;
    use crate::system::fake::ScriptedRunner;
    use crate::system::Ldconfig;

    /// Version reported by the scripted `nvidia-smi`
    const VERSION: &str = "580.126.09";

    /// `call; mov r14d, eax; test eax, eax; jne` as found in 580.x
    const CHECK: &[u8] = b"\xe8\x10\x20\xfe\xff\x41\x89\xc6\x85\xc0\x0f\x85\xa6\x00\x00\x00";

    /// The same check after patching
    const PATCHED: &[u8] = b"\xe8\x10\x20\xfe\xff\x29\xc0\x41\x89\xc6\x90\x90\x90\x90\x90\x90";

    /// Orchestrator type used in tests
    type TestOrchestrator<'a> =
        Orchestrator<&'a ScriptedRunner, ElfSoname, Ldconfig<&'a ScriptedRunner>>;

    /// A host with a working driver and linker cache
    fn runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok(
                "nvidia-smi --query-gpu=driver_version --format=csv,noheader",
                "580.126.09\n",
            )
            .ok("nvidia-smi --query-gpu=name --format=csv,noheader", "NVIDIA GeForce RTX 4090\n")
            .ok("nvidia-smi --query-gpu=compute_cap --format=csv,noheader", "8.9\n")
            .ok("ldconfig", "")
            .ok(
                "ldconfig -p",
                "\tlibnvidia-encode.so.1 (libc6,x86-64) => /usr/lib/x86_64-linux-gnu/libnvidia-encode.so.1\n",
            )
    }

    /// Config rooted in `root`
    fn config(root: &Path) -> EngineConfig {
        EngineConfig {
            root: root.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    /// Orchestrator over `root` driven by `runner`
    fn orchestrator<'a>(root: &Path, runner: &'a ScriptedRunner) -> TestOrchestrator<'a> {
        Orchestrator::new(config(root), runner, ElfSoname::new(), Ldconfig::new(runner)).unwrap()
    }

    /// Reads the real SONAME once, then answers later reads with `after`
    struct ChangingIdentity<F> {
        /// Reads so far
        calls: Cell<usize>,
        /// Answer for every read after the first
        after: F,
    }

    impl<F: Fn(&Path) -> Option<String>> ChangingIdentity<F> {
        /// Wraps `after`
        fn new(after: F) -> Self {
            Self {
                calls: Cell::new(0),
                after,
            }
        }
    }

    impl<F: Fn(&Path) -> Option<String>> IdentityReader for ChangingIdentity<F> {
        fn read_identity(&self, path: &Path) -> Option<String> {
            let calls = self.calls.replace(self.calls.get() + 1);
            if calls == 0 {
                ElfSoname::new().read_identity(path)
            } else {
                (self.after)(path)
            }
        }
    }

    /// Installs a library whose code section holds `code` and returns its path
    fn install(root: &Path, code: &[u8]) -> PathBuf {
        install_in(root, "usr/lib/x86_64-linux-gnu", code)
    }

    /// Installs the library under `root/dir`
    fn install_in(root: &Path, dir: &str, code: &[u8]) -> PathBuf {
        let dir = root.join(dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("libnvidia-encode.so.{VERSION}"));
        let mut text = vec![0x90u8; 24];
        text.extend_from_slice(code);
        text.extend_from_slice(&[0xc3; 24]);
        fs::write(&path, fixture::shared_object("libnvidia-encode.so.1", &text)).unwrap();
        path
    }

    /// Checksum of a file
    fn checksum(path: &Path) -> Vec<u8> {
        Sha256::digest(fs::read(path).unwrap()).to_vec()
    }

    /// Backup path for [`VERSION`] under `root`
    fn backup(root: &Path) -> PathBuf {
        root.join(format!(
            "opt/nvidia/libnvidia-encode-backup/libnvidia-encode.so.{VERSION}.orig"
        ))
    }

    #[test]
    /// A supported library is backed up, patched, verified and registered
    fn test_patch() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let original = fs::read(&library).unwrap();

        let report = orchestrator(root.path(), &runner).run(&Request::default());
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.stage, Stage::IntegrityConfirmed);
        let result = report.result.unwrap();
        assert_eq!(result.variant_label(), "r14d+JNE");
        assert_eq!(report.version.unwrap().as_str(), VERSION);
        assert_eq!(report.library, Some(fs::canonicalize(&library).unwrap()));
        assert_eq!(report.backup, Some(backup(root.path())));

        let patched = fs::read(&library).unwrap();
        let site = result.offset().unwrap();
        assert_eq!(&patched[site - 5..site + 11], PATCHED);
        assert_eq!(patched.len(), original.len());
        assert_eq!(fs::read(backup(root.path())).unwrap(), original);
        assert_eq!(
            ElfSoname::new().read_identity(&library).as_deref(),
            Some("libnvidia-encode.so.1")
        );
        let calls = runner.calls();
        assert!(calls.contains(&"ldconfig".to_string()));
        assert!(calls.contains(&"ldconfig -p".to_string()));
    }

    #[test]
    /// A second run finds nothing to do and leaves the file and backup alone
    fn test_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let orchestrator = orchestrator(root.path(), &runner);
        assert!(orchestrator.run(&Request::default()).success());
        let patched = checksum(&library);
        let backed_up = checksum(&backup(root.path()));

        let report = orchestrator.run(&Request::default());
        assert!(report.success());
        assert_eq!(report.stage, Stage::AlreadyPatched);
        assert!(report.result.unwrap().already_patched());
        assert_eq!(checksum(&library), patched);
        assert_eq!(checksum(&backup(root.path())), backed_up);
    }

    #[test]
    /// Only the marker present: already patched without inspecting variants
    fn test_marker_only() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), PATCHED);
        let sum = checksum(&library);

        let report = orchestrator(root.path(), &runner).run(&Request::default());
        assert_eq!(report.stage, Stage::AlreadyPatched);
        let result = report.result.unwrap();
        assert!(result.already_patched());
        assert_eq!(result.variant_label(), "");
        assert_eq!(checksum(&library), sum);
    }

    #[test]
    /// Two candidate sites: refused, nothing written
    fn test_ambiguous() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), &[CHECK, CHECK].concat());
        let sum = checksum(&library);

        let report = orchestrator(root.path(), &runner).run(&Request::default());
        assert_eq!(report.stage, Stage::Failed);
        assert!(!report.result.unwrap().success());
        match report.error {
            Some(EngineError::NoUniqueAnchor(ref diag)) => assert!(diag.is_ambiguous()),
            ref other => panic!("unexpected {other:?}"),
        }
        assert_eq!(checksum(&library), sum);
        assert!(!runner.calls().contains(&"ldconfig".to_string()));
    }

    #[test]
    /// Dry runs write nothing at all, not even the backup
    fn test_dry_run() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let sum = checksum(&library);
        let modified = fs::metadata(&library).unwrap().modified().unwrap();

        let report = orchestrator(root.path(), &runner).run(&Request {
            dry_run: true,
            ..Request::default()
        });
        assert!(report.success());
        assert_eq!(report.stage, Stage::Patched);
        let result = report.result.unwrap();
        assert!(result.message().starts_with("[DRY-RUN]"));
        assert_eq!(checksum(&library), sum);
        assert_eq!(fs::metadata(&library).unwrap().modified().unwrap(), modified);
        assert!(!root.path().join("opt").exists());
    }

    #[test]
    /// Patch then roll back gives the original file back
    fn test_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let original = checksum(&library);
        let orchestrator = orchestrator(root.path(), &runner);

        assert!(orchestrator.run(&Request::default()).success());
        assert_ne!(checksum(&library), original);

        let report = orchestrator.run(&Request {
            rollback: true,
            ..Request::default()
        });
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.stage, Stage::Restored);
        assert!(report.result.is_none());
        assert_eq!(checksum(&library), original);
    }

    #[test]
    /// A patch that destroys the SONAME is undone
    fn test_identity_loss_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let original = checksum(&library);
        // rewrites the first byte of the SONAME string to NUL
        let clobber = AnchorPattern::new(
            b"libnvidia-encode.so.1".to_vec(),
            0,
            b"\0ibnvidia-encode.so.1".to_vec(),
            vec![PatchVariant::new(b"libnv".to_vec(), b"\0ibnv".to_vec(), "clobber").unwrap()],
        )
        .unwrap();

        let report = orchestrator(root.path(), &runner)
            .with_anchors(vec![clobber])
            .run(&Request::default());
        assert_eq!(report.stage, Stage::RolledBack);
        assert!(matches!(
            report.error,
            Some(EngineError::PostPatchIdentityLoss { restored: true })
        ));
        assert_eq!(checksum(&library), original);
        assert_eq!(
            ElfSoname::new().read_identity(&library).as_deref(),
            Some("libnvidia-encode.so.1")
        );
    }

    #[test]
    /// A versioned name that is a link: the link survives and the file behind it is patched
    fn test_symlinked_library() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let real = install_in(root.path(), "usr/lib/nvidia", CHECK);
        let original = checksum(&real);
        let link = root
            .path()
            .join(format!("usr/lib/x86_64-linux-gnu/libnvidia-encode.so.{VERSION}"));
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        symlink(&real, &link).unwrap();
        let orchestrator = orchestrator(root.path(), &runner);

        let report = orchestrator.run(&Request::default());
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.library, Some(fs::canonicalize(&real).unwrap()));
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_ne!(checksum(&real), original);
        assert_eq!(checksum(&backup(root.path())), original);

        let report = orchestrator.run(&Request {
            rollback: true,
            ..Request::default()
        });
        assert!(report.success(), "{:?}", report.error);
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(checksum(&real), original);
    }

    #[test]
    /// A SONAME that changes to another name is also undone
    fn test_identity_changed_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let original = checksum(&library);
        let identity = ChangingIdentity::new(|_: &Path| Some("libnvidia-encode.so.2".to_string()));

        let report = Orchestrator::new(config(root.path()), &runner, identity, Ldconfig::new(&runner))
            .unwrap()
            .run(&Request::default());
        assert_eq!(report.stage, Stage::RolledBack);
        assert!(matches!(
            report.error,
            Some(EngineError::PostPatchIdentityLoss { restored: true })
        ));
        assert_eq!(checksum(&library), original);
    }

    #[test]
    /// Identity loss with the backup gone reports that nothing was restored
    fn test_identity_loss_without_backup() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let original = checksum(&library);
        let saved = backup(root.path());
        let identity = ChangingIdentity::new(move |_: &Path| {
            fs::remove_file(&saved).unwrap();
            None
        });

        let report = Orchestrator::new(config(root.path()), &runner, identity, Ldconfig::new(&runner))
            .unwrap()
            .run(&Request::default());
        assert_eq!(report.stage, Stage::RolledBack);
        assert!(matches!(
            report.error,
            Some(EngineError::PostPatchIdentityLoss { restored: false })
        ));
        assert!(report.error.unwrap().to_string().contains("FAILED"));
        assert_ne!(checksum(&library), original);
    }

    #[test]
    /// A library without a SONAME is refused unless forced
    fn test_missing_identity() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let mut bytes = fs::read(&library).unwrap();
        let at = bytes.windows(5).position(|w| w == b"libnv").unwrap();
        bytes[at] = 0;
        fs::write(&library, &bytes).unwrap();
        let orchestrator = orchestrator(root.path(), &runner);

        let report = orchestrator.run(&Request::default());
        assert_eq!(report.stage, Stage::LibraryLocated);
        assert!(matches!(report.error, Some(EngineError::IdentityMissing { .. })));
        assert_eq!(fs::read(&library).unwrap(), bytes);

        let report = orchestrator.run(&Request {
            force: true,
            ..Request::default()
        });
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.stage, Stage::IntegrityConfirmed);
    }

    #[test]
    /// Without a version nothing is touched, and a stale kernel module is pointed out
    fn test_version_undetected() {
        let root = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail(
            "nvidia-smi",
            "Failed to initialize NVML: Driver/library version mismatch\n",
            "",
        );

        let report = orchestrator(root.path(), &runner).run(&Request::default());
        assert_eq!(report.stage, Stage::Idle);
        assert!(matches!(report.error, Some(EngineError::VersionUndetected)));
        assert!(report.library.is_none());
        assert!(runner.calls().contains(&"nvidia-smi".to_string()));
    }

    #[test]
    /// Overrides are validated and bypass detection
    fn test_version_override() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        install(root.path(), CHECK);
        let orchestrator = orchestrator(root.path(), &runner);

        let report = orchestrator.run(&Request {
            version: Some("../../etc/passwd".into()),
            ..Request::default()
        });
        assert!(matches!(report.error, Some(EngineError::InvalidVersion(_))));
        assert_eq!(report.stage, Stage::Idle);

        let report = orchestrator.run(&Request {
            version: Some("570.86.16".into()),
            dry_run: true,
            ..Request::default()
        });
        assert_eq!(report.stage, Stage::VersionResolved);
        assert!(matches!(
            report.error,
            Some(EngineError::LibraryNotFound { ref name }) if name == "libnvidia-encode.so.570.86.16"
        ));
    }

    #[test]
    /// A held lock makes a live run fail fast without touching the file
    fn test_busy() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let sum = checksum(&library);
        let config = config(root.path());
        let _held = TargetLock::acquire(
            &config.backup_dir(),
            &config.library_name,
            &VERSION.parse().unwrap(),
        )
        .unwrap();

        let report = orchestrator(root.path(), &runner).run(&Request::default());
        assert!(matches!(report.error, Some(EngineError::Busy { .. })));
        assert_eq!(checksum(&library), sum);
        assert!(!backup(root.path()).exists());
    }

    #[test]
    /// Rolling back without a backup fails loudly
    fn test_rollback_without_backup() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        let library = install(root.path(), CHECK);
        let sum = checksum(&library);

        let report = orchestrator(root.path(), &runner).run(&Request {
            rollback: true,
            ..Request::default()
        });
        assert!(matches!(report.error, Some(EngineError::Backup(_))));
        assert!(!report.result.unwrap().success());
        assert_eq!(checksum(&library), sum);
    }

    #[test]
    /// Status reflects the driver cap before patching and unlimited after
    fn test_status() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner();
        install(root.path(), CHECK);
        let orchestrator = orchestrator(root.path(), &runner);

        let info = orchestrator.status();
        assert_eq!(info.native_limit, Some(5));
        assert_eq!(info.status_label, "[5 sessions]");
        assert!(info.patch_useful && !info.is_patched);

        assert!(orchestrator.run(&Request::default()).success());
        let info = orchestrator.status();
        assert!(info.is_patched && !info.patch_useful);
        assert_eq!(info.status_label, "[Unlimited]");
        assert_eq!(info.driver_version.unwrap().as_str(), VERSION);
    }
}
