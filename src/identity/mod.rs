//! # Identity
//!
//! Reads the `DT_SONAME` of a shared object.
//!
//! `ldconfig`, the dynamic linker and `nvidia-container-cli` all find the library through its
//! SONAME, so a file whose SONAME vanished is effectively gone even though its code still works.

use std::fs;
use std::path::Path;

use goblin::elf::Elf;
use log::debug;

#[cfg(test)]
pub(crate) mod fixture;

/// Reads the identity field of a binary
pub trait IdentityReader {
    /// Returns the identity of the file at `path`, or `None` if it is missing or unreadable
    fn read_identity(&self, path: &Path) -> Option<String>;
}

/// Reads the SONAME from the ELF dynamic section
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfSoname;

impl ElfSoname {
    /// Creates a new [`ElfSoname`]
    pub fn new() -> Self {
        Self
    }
}

impl IdentityReader for ElfSoname {
    fn read_identity(&self, path: &Path) -> Option<String> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("cannot read {}: {e}", path.display());
                return None;
            }
        };
        soname(&bytes)
    }
}

/// Extracts a non-empty SONAME from an in-memory ELF image
pub fn soname(bytes: &[u8]) -> Option<String> {
    match Elf::parse(bytes) {
        Ok(elf) => elf.soname.filter(|s| !s.is_empty()).map(str::to_owned),
        Err(e) => {
            debug!("not a parseable ELF file: {e}");
            None
        }
    }
}
