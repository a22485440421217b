//! # Code
//!
//! Instruction-level helpers. Matching never depends on decoding; this is only used to render
//! diagnostics and to sanity-check patch tables.

pub mod x64;
