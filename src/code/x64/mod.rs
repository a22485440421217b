//! # x64
//!
//! Decoding and NASM listings of 64-bit code

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};

/// Bitness of the code we patch
const BITNESS: u32 = 64;

/// Decodes `bytes` as 64-bit code starting at `ip`
///
/// Decoding never fails; bytes that do not form an instruction come back as invalid instructions
pub fn decode(bytes: &[u8], ip: u64) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(BITNESS, bytes, ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut instruction = Instruction::default();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        instructions.push(instruction);
    }
    instructions
}

/// Renders `bytes` as a NASM listing, one line per instruction, for diagnostics
///
/// `ip` is the file offset of the first byte so the listing lines up with offsets in the logs
pub fn listing(bytes: &[u8], ip: u64) -> Vec<String> {
    let mut formatter = NasmFormatter::new();
    let mut text = String::new();
    decode(bytes, ip)
        .iter()
        .map(|instruction| {
            text.clear();
            if instruction.is_invalid() {
                text.push_str("(bad)");
            } else {
                formatter.format(instruction, &mut text);
            }
            let start = (instruction.ip() - ip) as usize;
            let end = (start + instruction.len().max(1)).min(bytes.len());
            let raw = &bytes[start.min(end)..end];
            format!("{:#010x}  {:<24}{}", instruction.ip(), hex::encode(raw), text)
        })
        .collect()
}
