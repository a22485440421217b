//! This module contains the byte-level check and rewrite of a patch site

use crate::pattern::PatchVariant;

/// What was found at a patch site
#[derive(Debug, PartialEq, Eq)]
pub enum SiteState<'a> {
    /// The site holds `before` of this variant and can be patched
    Unpatched(&'a PatchVariant),
    /// The site already holds `after` of this variant
    Patched(&'a PatchVariant),
    /// No variant matches
    Unknown,
}

/// Compares the bytes at `site` with each variant, in order
///
/// A variant only matches when every one of its bytes is equal; there is no partial match.
pub fn inspect<'a>(data: &[u8], site: usize, variants: &'a [PatchVariant]) -> SiteState<'a> {
    for variant in variants {
        let Some(actual) = site
            .checked_add(variant.len())
            .and_then(|end| data.get(site..end))
        else {
            continue;
        };
        if actual == variant.before() {
            return SiteState::Unpatched(variant);
        }
        if actual == variant.after() {
            return SiteState::Patched(variant);
        }
    }
    SiteState::Unknown
}

/// Overwrites the site with `variant`'s replacement, returning the bytes that were there
///
/// Returns `None` and leaves `data` untouched unless the site holds exactly `variant.before()`
pub fn rewrite(data: &mut [u8], site: usize, variant: &PatchVariant) -> Option<Vec<u8>> {
    let end = site.checked_add(variant.len())?;
    let region = data.get_mut(site..end)?;
    if region != variant.before() {
        return None;
    }
    let original = region.to_vec();
    region.copy_from_slice(variant.after());
    Some(original)
}
