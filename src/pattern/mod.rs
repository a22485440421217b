//! # Pattern
//!
//! Anchor patterns describe where a patch site lives and which byte sequences are acceptable there.
//!
//! Patterns are plain data. The scanner walks them in the order they are given, so the order of a
//! pattern list is part of its meaning: newer code-generation conventions come first.

use std::borrow::Cow;

use thiserror::Error;

pub mod nvenc;

/// Errors when building patterns from untrusted input (e.g. the config file)
#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    /// `before` and `after` must have the same length, patches never shift bytes
    #[error("variant {label:?}: before is {before} bytes but after is {after} bytes")]
    LengthMismatch {
        /// Label of the offending variant
        label: String,
        /// Length of the expected bytes
        before: usize,
        /// Length of the replacement bytes
        after: usize,
    },
    /// A variant with no bytes would match anywhere
    #[error("variant {0:?} is empty")]
    EmptyVariant(String),
    /// An anchor with no bytes would match anywhere
    #[error("anchor must not be empty")]
    EmptyAnchor,
    /// An anchor without variants can never be applied
    #[error("anchor {0} has no variants")]
    NoVariants(String),
    /// A hex string in the config could not be decoded
    #[error("invalid hex in {field}: {source}")]
    Hex {
        /// Which field held the bad value
        field: &'static str,
        /// Underlying decode error
        source: hex::FromHexError,
    },
}

/// One code-generation variant: the bytes expected at the patch site and their replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchVariant {
    /// Bytes expected at the patch site
    before: Cow<'static, [u8]>,
    /// Replacement bytes, same length as `before`
    after: Cow<'static, [u8]>,
    /// Human readable name used in reports
    label: Cow<'static, str>,
}

impl PatchVariant {
    /// Creates a new variant, rejecting empty or length-changing replacements
    pub fn new(
        before: impl Into<Vec<u8>>,
        after: impl Into<Vec<u8>>,
        label: impl Into<String>,
    ) -> Result<Self, PatternError> {
        let (before, after, label) = (before.into(), after.into(), label.into());
        if before.is_empty() {
            return Err(PatternError::EmptyVariant(label));
        }
        if before.len() != after.len() {
            return Err(PatternError::LengthMismatch {
                before: before.len(),
                after: after.len(),
                label,
            });
        }
        Ok(Self {
            before: Cow::Owned(before),
            after: Cow::Owned(after),
            label: Cow::Owned(label),
        })
    }

    /// Builds a variant from static tables. Lengths are checked by the table's tests.
    pub(crate) const fn from_static(
        before: &'static [u8],
        after: &'static [u8],
        label: &'static str,
    ) -> Self {
        Self {
            before: Cow::Borrowed(before),
            after: Cow::Borrowed(after),
            label: Cow::Borrowed(label),
        }
    }

    /// Bytes expected at the patch site
    pub fn before(&self) -> &[u8] {
        &self.before
    }

    /// Bytes written over the patch site
    pub fn after(&self) -> &[u8] {
        &self.after
    }

    /// Variant name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Length of the rewritten region
    pub fn len(&self) -> usize {
        self.before.len()
    }

    /// Always false for validated variants
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }
}

/// An anchor byte sequence locating a patch site, and the variants that may be found there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPattern {
    /// Bytes that must occur exactly once in the file
    anchor: Cow<'static, [u8]>,
    /// Offset from the start of the anchor to the patch site
    skip: usize,
    /// Bytes whose presence anywhere proves this anchor was already patched
    patched_marker: Cow<'static, [u8]>,
    /// Variants, tried in order
    variants: Vec<PatchVariant>,
}

impl AnchorPattern {
    /// Creates a new anchor pattern
    pub fn new(
        anchor: impl Into<Vec<u8>>,
        skip: usize,
        patched_marker: impl Into<Vec<u8>>,
        variants: Vec<PatchVariant>,
    ) -> Result<Self, PatternError> {
        let anchor = anchor.into();
        let patched_marker = patched_marker.into();
        if anchor.is_empty() || patched_marker.is_empty() {
            return Err(PatternError::EmptyAnchor);
        }
        if variants.is_empty() {
            return Err(PatternError::NoVariants(hex::encode(&anchor)));
        }
        Ok(Self {
            anchor: Cow::Owned(anchor),
            skip,
            patched_marker: Cow::Owned(patched_marker),
            variants,
        })
    }

    /// Builds an anchor from hex strings, as written in the config file
    pub fn from_hex(
        anchor: &str,
        skip: usize,
        patched_marker: &str,
        variants: &[(&str, &str, &str)],
    ) -> Result<Self, PatternError> {
        /// Decodes one field, tagging errors with the field name
        fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, PatternError> {
            hex::decode(value.trim()).map_err(|source| PatternError::Hex { field, source })
        }

        let variants = variants
            .iter()
            .map(|(before, after, label)| {
                PatchVariant::new(decode("before", before)?, decode("after", after)?, *label)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(
            decode("anchor", anchor)?,
            skip,
            decode("patched_marker", patched_marker)?,
            variants,
        )
    }

    /// Builds an anchor from static tables
    pub(crate) fn from_static(
        anchor: &'static [u8],
        skip: usize,
        patched_marker: &'static [u8],
        variants: Vec<PatchVariant>,
    ) -> Self {
        Self {
            anchor: Cow::Borrowed(anchor),
            skip,
            patched_marker: Cow::Borrowed(patched_marker),
            variants,
        }
    }

    /// The anchor bytes
    pub fn anchor(&self) -> &[u8] {
        &self.anchor
    }

    /// Distance from the anchor start to the patch site
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// The already-patched marker
    pub fn patched_marker(&self) -> &[u8] {
        &self.patched_marker
    }

    /// Variants in priority order
    pub fn variants(&self) -> &[PatchVariant] {
        &self.variants
    }

    /// Hex rendering of the anchor, used in logs
    pub fn name(&self) -> String {
        hex::encode(&self.anchor)
    }
}
