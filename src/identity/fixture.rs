//! Minimal ELF64 shared objects for tests
//!
//! Layout: ELF header, a `PT_LOAD` and a `PT_DYNAMIC` program header, the dynamic section
//! (`DT_SONAME`, `DT_STRTAB`, `DT_STRSZ`, `DT_NULL`), the dynamic string table, then `code`.
//! Virtual addresses equal file offsets.

/// Size of the ELF64 header
const EHDR_SIZE: usize = 64;
/// Size of one ELF64 program header
const PHDR_SIZE: usize = 56;
/// Size of one ELF64 dynamic entry
const DYN_SIZE: usize = 16;

/// `PT_LOAD`
const PT_LOAD: u32 = 1;
/// `PT_DYNAMIC`
const PT_DYNAMIC: u32 = 2;
/// `DT_NULL`
const DT_NULL: u64 = 0;
/// `DT_STRTAB`
const DT_STRTAB: u64 = 5;
/// `DT_STRSZ`
const DT_STRSZ: u64 = 10;
/// `DT_SONAME`
const DT_SONAME: u64 = 14;

/// Builds a shared object whose SONAME is `soname`, followed by `code`
pub(crate) fn shared_object(soname: &str, code: &[u8]) -> Vec<u8> {
    let phoff = EHDR_SIZE;
    let dynamic_off = phoff + 2 * PHDR_SIZE;
    let dynamic_len = 4 * DYN_SIZE;
    let strtab_off = dynamic_off + dynamic_len;
    let mut strtab = vec![0u8];
    strtab.extend_from_slice(soname.as_bytes());
    strtab.push(0);
    let code_off = strtab_off + strtab.len();
    let total = (code_off + code.len()) as u64;

    let mut out = Vec::with_capacity(total as usize);

    // e_ident
    out.extend_from_slice(b"\x7fELF");
    out.extend_from_slice(&[2, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
    out.extend_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&(phoff as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(out.len(), EHDR_SIZE);

    push_phdr(&mut out, PT_LOAD, 5, 0, total, 0x1000);
    push_phdr(&mut out, PT_DYNAMIC, 6, dynamic_off as u64, dynamic_len as u64, 8);

    for (tag, val) in [
        (DT_SONAME, 1),
        (DT_STRTAB, strtab_off as u64),
        (DT_STRSZ, strtab.len() as u64),
        (DT_NULL, 0),
    ] {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&val.to_le_bytes());
    }

    out.extend_from_slice(&strtab);
    out.extend_from_slice(code);
    out
}

/// Appends one program header where the virtual address equals the file offset
fn push_phdr(out: &mut Vec<u8>, kind: u32, flags: u32, offset: u64, size: u64, align: u64) {
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes()); // p_offset
    out.extend_from_slice(&offset.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&offset.to_le_bytes()); // p_paddr
    out.extend_from_slice(&size.to_le_bytes()); // p_filesz
    out.extend_from_slice(&size.to_le_bytes()); // p_memsz
    out.extend_from_slice(&align.to_le_bytes());
}
