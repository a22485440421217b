//! # Patcher
//!
//! This module covers applying a variant at a located patch site and persisting the result

use std::fmt;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::code::x64;
use crate::image::{ImageError, LibraryImage};
use crate::pattern::AnchorPattern;
use crate::scan::{self, NoUniqueAnchor, ScanOutcome, DUMP_LEN};

pub mod byte;

use self::byte::SiteState;

/// Outcome of one patch attempt
///
/// The three cases are exclusive: a file is either patched by this call, was already patched, or
/// the attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    /// A variant matched and was written, or would have been in a dry run
    Patched {
        /// Label of the variant that matched
        variant: String,
        /// File offset of the patch site
        offset: usize,
        /// Nothing was written
        dry_run: bool,
    },
    /// The file already carries the patch
    AlreadyPatched {
        /// Label of the variant found, when the site itself was inspected
        variant: Option<String>,
        /// File offset of the patch site or marker
        offset: Option<usize>,
    },
    /// Nothing was written
    Failed {
        /// Patch site, if one was located
        offset: Option<usize>,
        /// Why
        message: String,
    },
}

impl PatchResult {
    /// True unless the attempt failed
    pub fn success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// True when the file was already patched before this call
    pub fn already_patched(&self) -> bool {
        matches!(self, Self::AlreadyPatched { .. })
    }

    /// Label of the variant involved, empty if none
    pub fn variant_label(&self) -> &str {
        match self {
            Self::Patched { variant, .. } => variant,
            Self::AlreadyPatched {
                variant: Some(variant),
                ..
            } => variant,
            _ => "",
        }
    }

    /// Offset of the patch site, if known
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Patched { offset, .. } => Some(*offset),
            Self::AlreadyPatched { offset, .. } | Self::Failed { offset, .. } => *offset,
        }
    }

    /// Human readable summary
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patched {
                dry_run: true,
                variant,
                offset,
            } => write!(
                f,
                "[DRY-RUN] pattern found, variant {variant} at offset {offset:#x} -- patch would succeed"
            ),
            Self::Patched {
                variant, offset, ..
            } => write!(f, "patched variant {variant} at offset {offset:#x}"),
            Self::AlreadyPatched { .. } => f.write_str("library is already patched"),
            Self::Failed { message, .. } => f.write_str(message),
        }
    }
}

/// Reasons a patch could not be applied
#[derive(Debug, Error)]
pub enum PatchError {
    /// No anchor occurred exactly once and no patch marker was present
    #[error("no unique anchor pattern found; this driver version may not be supported ({0})")]
    NoUniqueAnchor(NoUniqueAnchor),
    /// The anchor was found, but the bytes at the patch site match no known variant
    #[error("no variant matched at {offset:#x}, bytes found: {}", hex::encode(.found))]
    VariantMismatch {
        /// File offset of the patch site
        offset: usize,
        /// Bytes found at the site
        found: Vec<u8>,
    },
    /// Reading or writing the file failed
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl From<&PatchError> for PatchResult {
    fn from(e: &PatchError) -> Self {
        let offset = match e {
            PatchError::VariantMismatch { offset, .. } => Some(*offset),
            _ => None,
        };
        Self::Failed {
            offset,
            message: e.to_string(),
        }
    }
}

/// Applies the first matching variant of `anchor` at `offset + anchor.skip()`
///
/// `offset` is where the anchor was found. In a dry run the image and the file are left untouched;
/// otherwise the image is modified and committed to disk.
pub fn apply(
    image: &mut LibraryImage,
    anchor: &AnchorPattern,
    offset: usize,
    dry_run: bool,
) -> Result<PatchResult, PatchError> {
    let Some(site) = offset.checked_add(anchor.skip()) else {
        return Err(PatchError::VariantMismatch {
            offset,
            found: Vec::new(),
        });
    };
    debug!("anchor matched at {offset:#x}, patch region starts at {site:#x}");

    match byte::inspect(image.bytes(), site, anchor.variants()) {
        SiteState::Unpatched(variant) => {
            debug!(
                "MATCH: variant={} offset={site:#x} len={}",
                variant.label(),
                variant.len()
            );
            debug!("old: {}", hex::encode(variant.before()));
            debug!("new: {}", hex::encode(variant.after()));

            if !dry_run {
                if byte::rewrite(image.bytes_mut(), site, variant).is_none() {
                    return Err(PatchError::VariantMismatch {
                        offset: site,
                        found: image.bytes().iter().skip(site).take(DUMP_LEN).copied().collect(),
                    });
                }
                image.commit()?;
                info!(
                    "patched variant {} at {site:#x} in {}",
                    variant.label(),
                    image.path().display()
                );
            }
            Ok(PatchResult::Patched {
                variant: variant.label().to_owned(),
                offset: site,
                dry_run,
            })
        }
        SiteState::Patched(variant) => Ok(PatchResult::AlreadyPatched {
            variant: Some(variant.label().to_owned()),
            offset: Some(site),
        }),
        SiteState::Unknown => {
            let end = site.saturating_add(DUMP_LEN).min(image.bytes().len());
            let found = image.bytes().get(site..end).unwrap_or_default().to_vec();
            for line in x64::listing(&found, site as u64) {
                debug!("  {line}");
            }
            Err(PatchError::VariantMismatch {
                offset: site,
                found,
            })
        }
    }
}

/// Scans the file at `path` with `anchors` and applies the patch
///
/// This is the whole byte-level operation without any of the surrounding safety steps (backup,
/// identity checks); it's what status queries run with `dry_run` set.
pub fn patch_file(
    path: &Path,
    anchors: &[AnchorPattern],
    dry_run: bool,
) -> Result<PatchResult, PatchError> {
    let mut image = LibraryImage::load(path)?;
    debug!("library size: {} bytes", image.bytes().len());

    let (anchor, offset) = match scan::match_anchors(image.bytes(), anchors) {
        ScanOutcome::Unique { anchor, offset } => (anchor, offset),
        ScanOutcome::AlreadyPatched { anchor, offset } => {
            debug!("marker of anchor {} found at {offset:#x}", anchor.name());
            return Ok(PatchResult::AlreadyPatched {
                variant: None,
                offset: Some(offset),
            });
        }
        ScanOutcome::NoUniqueAnchor(report) => {
            if let Some(dump) = &report.dump {
                for line in x64::listing(&dump.bytes, dump.offset as u64) {
                    debug!("  {line}");
                }
            }
            return Err(PatchError::NoUniqueAnchor(report));
        }
    };
    apply(&mut image, anchor, offset, dry_run)
}
