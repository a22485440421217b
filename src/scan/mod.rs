//! # Scan
//!
//! Locates a patch site by trying anchors in priority order.
//!
//! The first anchor that occurs exactly once wins. Anchors with zero or several hits are never
//! guessed at; instead their already-patched marker is checked, and the scan moves on.

use std::fmt;

use log::debug;
use memchr::memmem;

use crate::pattern::AnchorPattern;

/// Number of bytes captured for diagnostics when no anchor is usable
pub const DUMP_LEN: usize = 16;

/// Result of scanning a file against a list of anchors
#[derive(Debug)]
pub enum ScanOutcome<'a> {
    /// `anchor` occurs exactly once, at `offset`
    Unique {
        /// The anchor that matched
        anchor: &'a AnchorPattern,
        /// Offset of the start of the anchor
        offset: usize,
    },
    /// The marker left by `anchor`'s patch is present
    AlreadyPatched {
        /// The anchor whose marker was found
        anchor: &'a AnchorPattern,
        /// Offset of the marker
        offset: usize,
    },
    /// No anchor was usable and nothing looked patched
    NoUniqueAnchor(NoUniqueAnchor),
}

/// Hits recorded for one anchor during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorTally {
    /// Hex rendering of the anchor
    pub anchor: String,
    /// Every offset the anchor was found at
    pub offsets: Vec<usize>,
}

/// Bytes captured from the file to help add support for new releases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    /// File offset of the first byte
    pub offset: usize,
    /// Captured bytes, at most [`DUMP_LEN`]
    pub bytes: Vec<u8>,
}

/// Diagnostics for a scan that found no usable anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoUniqueAnchor {
    /// One entry per anchor, in scan order
    pub tallies: Vec<AnchorTally>,
    /// Bytes at the best-guess patch site, if any anchor was seen at all
    pub dump: Option<Dump>,
}

impl NoUniqueAnchor {
    /// True when at least one anchor was rejected for matching more than once
    pub fn is_ambiguous(&self) -> bool {
        self.tallies.iter().any(|t| t.offsets.len() > 1)
    }
}

impl fmt::Display for NoUniqueAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tally) in self.tallies.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {} hit(s)", tally.anchor, tally.offsets.len())?;
            if !tally.offsets.is_empty() {
                let offsets: Vec<String> =
                    tally.offsets.iter().map(|o| format!("{o:#x}")).collect();
                write!(f, " at [{}]", offsets.join(", "))?;
            }
        }
        if let Some(dump) = &self.dump {
            write!(f, "; bytes at {:#x}: {}", dump.offset, hex::encode(&dump.bytes))?;
        }
        Ok(())
    }
}

/// Returns every offset `needle` occurs at in `haystack`, overlapping occurrences included
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let finder = memmem::Finder::new(needle);
    let mut offsets = Vec::new();
    let mut start = 0;
    while start <= haystack.len() {
        match finder.find(&haystack[start..]) {
            Some(pos) => {
                offsets.push(start + pos);
                start += pos + 1;
            }
            None => break,
        }
    }
    offsets
}

/// Scans `data` with `anchors`, in order
pub fn match_anchors<'a>(data: &[u8], anchors: &'a [AnchorPattern]) -> ScanOutcome<'a> {
    let mut tallies = Vec::with_capacity(anchors.len());
    let mut best_guess = None;

    for anchor in anchors {
        let hits = find_all(data, anchor.anchor());
        debug!("anchor {}: {} hit(s)", anchor.name(), hits.len());

        if let [offset] = hits.as_slice() {
            return ScanOutcome::Unique {
                anchor,
                offset: *offset,
            };
        }
        if hits.len() > 1 {
            debug!("  skipping, ambiguous: {:x?}", hits);
        }

        // the file can only have been patched through one anchor, so any marker is conclusive
        if let Some(offset) = memmem::find(data, anchor.patched_marker()) {
            return ScanOutcome::AlreadyPatched { anchor, offset };
        }

        if best_guess.is_none() {
            best_guess = hits.first().and_then(|&hit| hit.checked_add(anchor.skip()));
        }
        tallies.push(AnchorTally {
            anchor: anchor.name(),
            offsets: hits,
        });
    }

    let dump = best_guess.filter(|&site| site < data.len()).map(|site| Dump {
        offset: site,
        bytes: data[site..site.saturating_add(DUMP_LEN).min(data.len())].to_vec(),
    });
    ScanOutcome::NoUniqueAnchor(NoUniqueAnchor { tallies, dump })
}
