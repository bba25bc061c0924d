//! ZX Spectrum `.SNA` snapshot emission: 27-byte register header followed by
//! a flat 48K RAM image (`0x4000..=0xFFFF`).
//!
//! The classic `.SNA` format has no PC field: a loader restores it by
//! `RET`-ing into it, so the snapshot's initial SP is pointed at a stack
//! slot holding the entry address and that slot is poked into the RAM image
//! directly.

use crate::error::{AsmError, Pos, Result};
use crate::render::RenderCtx;

pub const RAM_SIZE: usize = 48 * 1024;
pub const RAM_BASE: i64 = 0x4000;
pub const ZX_DEFAULT_RAMTOP: u16 = 0x5D5B;
pub const SNA_DEFAULT_RAMTOP: u16 = 0xFFF0;

pub struct SnaOptions {
    /// Skip ZX Spectrum ROM-variable initialisation (UDGs, system vars).
    pub generic: bool,
    /// Entry PC; defaults to the lowest section start address if `None`.
    pub pc: Option<u16>,
    /// RAM top / initial stack pointer; defaults per `generic`.
    pub ramtop: Option<u16>,
}

impl Default for SnaOptions {
    fn default() -> Self {
        Self { generic: false, pc: None, ramtop: None }
    }
}

pub fn render_sna(ctx: &RenderCtx, opts: &SnaOptions) -> Result<Vec<u8>> {
    let lowest_start = ctx
        .sections
        .iter()
        .filter_map(|s| s.start)
        .min()
        .ok_or_else(|| AsmError::Encoder {
            pos: Pos::default(),
            message: "SNA output requires at least one section with an ORG".into(),
        })?;

    let entry_pc = opts.pc.unwrap_or(lowest_start as u16);
    let ramtop = opts.ramtop.unwrap_or(if opts.generic { SNA_DEFAULT_RAMTOP } else { ZX_DEFAULT_RAMTOP });

    let mut ram = vec![0u8; RAM_SIZE];
    for section in &ctx.sections {
        let Some(start) = section.start else { continue };
        let offset = start - RAM_BASE;
        if offset < 0 || offset as usize + section.bytes.len() > RAM_SIZE {
            return Err(AsmError::Encoder {
                pos: Pos::default(),
                message: format!(
                    "section `{}` at {:#06x} does not fit in the 48K RAM image",
                    section.name, start
                ),
            });
        }
        let start = offset as usize;
        ram[start..start + section.bytes.len()].copy_from_slice(&section.bytes);
    }

    // Push the entry PC onto the stack the snapshot will boot with, so the
    // loader's closing RET lands on it.
    let sp = ramtop.wrapping_sub(2);
    let sp_ram_offset = sp as i64 - RAM_BASE;
    if sp_ram_offset < 0 || sp_ram_offset as usize + 1 >= RAM_SIZE {
        return Err(AsmError::Encoder {
            pos: Pos::default(),
            message: format!("SNA ramtop {ramtop:#06x} leaves no room for the entry PC on the stack"),
        });
    }
    let sp_ram_offset = sp_ram_offset as usize;
    ram[sp_ram_offset] = entry_pc as u8;
    ram[sp_ram_offset + 1] = (entry_pc >> 8) as u8;

    if !opts.generic {
        init_zx_spectrum_vars(&mut ram);
    }

    let mut out = Vec::with_capacity(27 + RAM_SIZE);
    out.push(0); // i
    out.extend_from_slice(&0u16.to_le_bytes()); // hl'
    out.extend_from_slice(&0u16.to_le_bytes()); // de'
    out.extend_from_slice(&0u16.to_le_bytes()); // bc'
    out.extend_from_slice(&0u16.to_le_bytes()); // af'
    out.extend_from_slice(&0u16.to_le_bytes()); // hl
    out.extend_from_slice(&0u16.to_le_bytes()); // de
    out.extend_from_slice(&0u16.to_le_bytes()); // bc
    out.extend_from_slice(&0u16.to_le_bytes()); // iy
    out.extend_from_slice(&0u16.to_le_bytes()); // ix
    out.push(0); // iff2
    out.push(0); // r
    out.extend_from_slice(&0u16.to_le_bytes()); // af
    out.extend_from_slice(&sp.to_le_bytes()); // sp
    out.push(1); // im
    out.push(7); // border
    debug_assert_eq!(out.len(), 27);

    out.extend_from_slice(&ram);
    tracing::debug!(backend = "sna", entry_pc, sp, bytes = out.len(), "serialisation complete");
    Ok(out)
}

/// Pokes a handful of well-known ZX Spectrum system variables so a snapshot
/// boots cleanly on real hardware/emulators instead of leaving them zeroed.
fn init_zx_spectrum_vars(ram: &mut [u8]) {
    const UDG: u16 = 0xFF58;
    let addr = (UDG - RAM_BASE as u16) as usize;
    ram[addr] = 0x00;
    ram[addr + 1] = 0xFF;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;

    #[test]
    fn test_sna_header_and_ram_size() {
        let mut ctx = RenderCtx::new();
        ctx.reorg(0x8000, &Pos::default()).unwrap();
        ctx.bytes(&[0xC9]);
        let out = render_sna(&ctx, &SnaOptions::default()).unwrap();
        assert_eq!(out.len(), 27 + RAM_SIZE);
        assert_eq!(out[25], 1); // im
        assert_eq!(out[26], 7); // border
    }

    #[test]
    fn test_sna_places_code_at_org() {
        let mut ctx = RenderCtx::new();
        ctx.reorg(0x8000, &Pos::default()).unwrap();
        ctx.bytes(&[0xC9]);
        let out = render_sna(&ctx, &SnaOptions::default()).unwrap();
        let ram_start = 27;
        assert_eq!(out[ram_start + (0x8000 - 0x4000)], 0xC9);
    }

    #[test]
    fn test_sna_entry_pc_on_stack() {
        let mut ctx = RenderCtx::new();
        ctx.reorg(0x8000, &Pos::default()).unwrap();
        ctx.bytes(&[0xC9]);
        let opts = SnaOptions { generic: true, pc: Some(0x8000), ramtop: Some(0x9000) };
        let out = render_sna(&ctx, &opts).unwrap();
        let sp = u16::from_le_bytes([out[23], out[24]]);
        assert_eq!(sp, 0x8FFE);
        let ram_start = 27;
        let sp_off = ram_start + (sp as usize - 0x4000);
        assert_eq!(u16::from_le_bytes([out[sp_off], out[sp_off + 1]]), 0x8000);
    }
}
