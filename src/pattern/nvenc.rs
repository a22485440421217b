//! Built-in anchors for the NVENC session-limit check in `libnvidia-encode.so`
//!
//! The check compiles to roughly:
//!
//! ```text
//! call  <session_check>   ; e8 xx xx fe ff     <- tail of the anchor
//! mov   r1Xd, eax         ; 41 89 cX           <- register varies by release
//! test  eax, eax          ; 85 c0
//! jne   <error>           ; 0f 85 xx xx xx xx  (not always present)
//! ```
//!
//! which is rewritten to `sub eax, eax ; mov r1Xd, eax` (padded with `nop`s), so the check always
//! reports success.

use lazy_static::lazy_static;

use super::{AnchorPattern, PatchVariant};

/// File name of the library, without the version suffix
pub const LIBRARY_NAME: &str = "libnvidia-encode.so";

lazy_static! {
    /// Anchors ordered newest driver release first
    pub static ref NVENC_ANCHORS: Vec<AnchorPattern> = vec![
        // result kept in r14d, 580.x and later
        AnchorPattern::from_static(
            b"\xfe\xff\x41\x89\xc6\x85\xc0",
            2,
            b"\xfe\xff\x29\xc0\x41\x89\xc6",
            vec![
                PatchVariant::from_static(
                    b"\x41\x89\xc6\x85\xc0\x0f\x85\xa6\x00\x00\x00",
                    b"\x29\xc0\x41\x89\xc6\x90\x90\x90\x90\x90\x90",
                    "r14d+JNE",
                ),
                PatchVariant::from_static(
                    b"\x41\x89\xc6\x85\xc0",
                    b"\x29\xc0\x41\x89\xc6",
                    "r14d",
                ),
            ],
        ),
        // test before mov, result kept in r12d, some 570.x releases
        AnchorPattern::from_static(
            b"\xfe\xff\x85\xc0\x41\x89\xc4",
            2,
            b"\xfe\xff\x29\xc0\x41\x89\xc4",
            vec![PatchVariant::from_static(
                b"\x85\xc0\x41\x89\xc4",
                b"\x29\xc0\x41\x89\xc4",
                "r12d-test-first",
            )],
        ),
        // mov before test, result kept in r12d, older 570.x and earlier
        AnchorPattern::from_static(
            b"\xfe\xff\x41\x89\xc4\x85\xc0",
            2,
            b"\xfe\xff\x29\xc0\x41\x89\xc4",
            vec![
                PatchVariant::from_static(
                    b"\x41\x89\xc4\x85\xc0\x0f\x85",
                    b"\x29\xc0\x41\x89\xc4\x90\x90",
                    "r12d+JNE",
                ),
                PatchVariant::from_static(
                    b"\x41\x89\xc4\x85\xc0",
                    b"\x29\xc0\x41\x89\xc4",
                    "r12d",
                ),
            ],
        ),
    ];
}
