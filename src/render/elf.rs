//! ELF32 REL object emission: one section header per assembled `SECTION`,
//! plus a trailing `.shstrtab` carrying their names.

use byteorder::{LittleEndian, WriteBytesExt};
use bitflags::bitflags;

use crate::error::{AsmError, Result};
use crate::render::RenderCtx;

const ELF_FILE_HEADER_SIZE: u32 = 52;
const ELF_SECTION_HEADER_SIZE: u32 = 40;

const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EIV_CURRENT: u8 = 1;
const ELFOSABI_NONE: u8 = 0;
const ET_REL: u16 = 1;
const EM_NONE: u16 = 0;
const EV_CURRENT: u32 = 1;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

bitflags! {
    struct SectionFlags: u32 {
        const WRITE     = 0x1;
        const ALLOC     = 0x2;
        const EXECINSTR = 0x4;
    }
}

/// Serialise every section into a 32-bit little-endian `ET_REL` object,
/// mirroring the layout: file header, then one section header per section
/// (`.shstrtab` last), then the raw section contents back to back.
pub fn render_elf(ctx: &RenderCtx) -> Result<Vec<u8>> {
    let mut shstrtab = vec![0u8]; // first byte of a strtab is always NUL
    let mut name_offsets = Vec::with_capacity(ctx.sections.len() + 1);
    for section in &ctx.sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(section.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);

    let section_count = ctx.sections.len() + 1; // + .shstrtab
    let shoff = ELF_FILE_HEADER_SIZE;
    let data_offset_base = shoff + ELF_SECTION_HEADER_SIZE * section_count as u32;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    out.push(ELFCLASS32);
    out.push(ELFDATA2LSB);
    out.push(EIV_CURRENT);
    out.push(ELFOSABI_NONE);
    out.push(0); // ei_abiversion
    out.extend_from_slice(&[0u8; 7]); // ei_pad
    out.write_u16::<LittleEndian>(ET_REL).unwrap();
    out.write_u16::<LittleEndian>(EM_NONE).unwrap();
    out.write_u32::<LittleEndian>(EV_CURRENT).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap(); // e_entry
    out.write_u32::<LittleEndian>(0).unwrap(); // e_phoff
    out.write_u32::<LittleEndian>(shoff).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap(); // e_flags
    out.write_u16::<LittleEndian>(ELF_FILE_HEADER_SIZE as u16).unwrap();
    out.write_u16::<LittleEndian>(32).unwrap(); // e_phentsize
    out.write_u16::<LittleEndian>(0).unwrap(); // e_phnum
    out.write_u16::<LittleEndian>(ELF_SECTION_HEADER_SIZE as u16).unwrap();
    out.write_u16::<LittleEndian>(section_count as u16).unwrap();
    out.write_u16::<LittleEndian>((section_count - 1) as u16).unwrap(); // .shstrtab is last

    debug_assert_eq!(out.len() as u32, ELF_FILE_HEADER_SIZE);

    let mut data_offset = data_offset_base;
    let mut section_offsets = Vec::with_capacity(ctx.sections.len());
    for section in &ctx.sections {
        if section.start.is_none() {
            return Err(AsmError::ElfSectionMissingOrigin { name: section.name.clone() });
        }
        section_offsets.push(data_offset);
        data_offset += section.bytes.len() as u32;
    }
    let shstrtab_offset = data_offset;

    for (i, section) in ctx.sections.iter().enumerate() {
        let flags = SectionFlags::ALLOC | SectionFlags::EXECINSTR | SectionFlags::WRITE;
        write_section_header(
            &mut out,
            name_offsets[i],
            SHT_PROGBITS,
            flags.bits(),
            section.start.unwrap() as u32,
            section_offsets[i],
            section.bytes.len() as u32,
        );
    }
    write_section_header(&mut out, shstrtab_name_offset, SHT_STRTAB, 0, 0, shstrtab_offset, shstrtab.len() as u32);

    for section in &ctx.sections {
        out.extend_from_slice(&section.bytes);
    }
    out.extend_from_slice(&shstrtab);

    tracing::debug!(backend = "elf", sections = ctx.sections.len(), bytes = out.len(), "serialisation complete");
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(
    out: &mut Vec<u8>,
    name: u32,
    kind: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
) {
    out.write_u32::<LittleEndian>(name).unwrap();
    out.write_u32::<LittleEndian>(kind).unwrap();
    out.write_u32::<LittleEndian>(flags).unwrap();
    out.write_u32::<LittleEndian>(addr).unwrap();
    out.write_u32::<LittleEndian>(offset).unwrap();
    out.write_u32::<LittleEndian>(size).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap(); // sh_link
    out.write_u32::<LittleEndian>(0).unwrap(); // sh_info
    out.write_u32::<LittleEndian>(0).unwrap(); // sh_addralign
    out.write_u32::<LittleEndian>(0).unwrap(); // sh_entsize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;

    #[test]
    fn test_elf_header_magic_and_counts() {
        let mut ctx = RenderCtx::new();
        ctx.reorg(0x8000, &Pos::default()).unwrap();
        ctx.bytes(&[0xC9]);
        let out = render_elf(&ctx).unwrap();
        assert_eq!(&out[0..4], &[0x7f, b'E', b'L', b'F']);
        assert_eq!(out[4], ELFCLASS32);
        // e_shnum at offset 48, e_shstrndx at offset 50 (both u16 LE)
        let shnum = u16::from_le_bytes([out[48], out[49]]);
        let shstrndx = u16::from_le_bytes([out[50], out[51]]);
        assert_eq!(shnum, 2); // .text + .shstrtab
        assert_eq!(shstrndx, 1);
    }

    #[test]
    fn test_elf_requires_origin() {
        let ctx = RenderCtx::new();
        assert!(render_elf(&ctx).is_err());
    }
}
