//! Z80 binary disassembler: opcode decode plus the text renderer.
//!
//! The decoder walks the standard `x/y/z/p/q` bitfield decomposition of a
//! Z80 opcode byte (`x = op>>6`, `y = (op>>3)&7`, `z = op&7`, `p = y>>1`,
//! `q = y&1`) rather than a giant literal match, the same shape the encoder
//! uses in reverse. Register/condition name tables are shared with
//! [`crate::encoder`]'s numbering so a round trip through both agrees.

use std::collections::HashMap;
use std::fmt::Write as _;

const GPR8: [&str; 8] = ["b", "c", "d", "e", "h", "l", "(hl)", "a"];
const QREG16: [&str; 4] = ["bc", "de", "hl", "sp"];
const PREG16: [&str; 4] = ["bc", "de", "hl", "af"];
const CONDITIONS: [&str; 8] = ["nz", "z", "nc", "c", "po", "pe", "p", "m"];
const RST_TARGETS: [u8; 8] = [0x00, 0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38];

const ALU_MNEMONICS: [&str; 8] = ["add a,", "adc a,", "sub", "sbc a,", "and", "xor", "or", "cp"];
const ROT_MNEMONICS: [&str; 8] = ["rlc", "rrc", "rl", "rr", "sla", "sra", "sll", "srl"];

/// One decoded instruction: rendered mnemonic/operand text plus enough
/// metadata for the column-formatted listing and jump-label pass.
#[derive(Debug, Clone)]
pub struct DecodedInstr {
    pub addr: u16,
    pub text: String,
    pub len: usize,
    pub raw: Vec<u8>,
    pub valid: bool,
    pub jump_target: Option<u16>,
    pub is_unconditional_ret: bool,
}

fn hex(value: u16, force16: bool) -> String {
    let digits = if force16 || value > 0xFF { format!("{value:04x}") } else { format!("{value:02x}") };
    let mut s = if digits.as_bytes()[0].is_ascii_alphabetic() { format!("0{digits}") } else { digits };
    s.push('h');
    s
}

fn signed_disp(d: u8) -> (char, u8) {
    let v = d as i8;
    if v >= 0 { ('+', v as u8) } else { ('-', (-(v as i32)) as u8) }
}

/// Decode one instruction starting at `bytes[0]`; `addr` is its load address
/// (used only for relative-jump target computation). Returns a one-byte
/// `defb` pseudo-instruction for anything not recognised.
pub fn decode_one(bytes: &[u8], addr: u16) -> DecodedInstr {
    if bytes.is_empty() {
        return DecodedInstr {
            addr,
            text: String::new(),
            len: 0,
            raw: Vec::new(),
            valid: false,
            jump_target: None,
            is_unconditional_ret: false,
        };
    }

    match bytes[0] {
        0xDD => decode_indexed(bytes, addr, "ix"),
        0xFD => decode_indexed(bytes, addr, "iy"),
        0xCB => decode_cb(bytes, addr, None),
        0xED => decode_ed(bytes, addr),
        _ => decode_main(bytes, addr, None),
    }
}

fn invalid(bytes: &[u8], addr: u16) -> DecodedInstr {
    DecodedInstr {
        addr,
        text: format!("defb {}", hex(bytes[0] as u16, false)),
        len: 1,
        raw: vec![bytes[0]],
        valid: false,
        jump_target: None,
        is_unconditional_ret: false,
    }
}

/// `index` is `Some("ix"/"iy")` when called from inside a DD/FD prefix, to
/// retarget `hl`/`(hl)` operands to `ix`/`iy`/`(ix+d)`.
fn decode_main(bytes: &[u8], addr: u16, index: Option<&'static str>) -> DecodedInstr {
    let op = bytes[0];
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    let reg = |n: u8, extra: &mut usize, raw: &mut Vec<u8>| -> String {
        if n == 6 {
            if let Some(idx) = index {
                let d = *bytes.get(1 + *extra).unwrap_or(&0);
                raw.push(d);
                *extra += 1;
                let (sign, mag) = signed_disp(d);
                return format!("({idx}{sign}{mag})");
            }
            "(hl)".to_string()
        } else if let Some(idx) = index {
            match n {
                4 => format!("{idx}h"),
                5 => format!("{idx}l"),
                _ => GPR8[n as usize].to_string(),
            }
        } else {
            GPR8[n as usize].to_string()
        }
    };

    let mut raw = vec![op];
    let mut extra = 0usize;

    macro_rules! finish {
        ($text:expr) => {{
            return DecodedInstr {
                addr,
                text: $text,
                len: raw.len(),
                raw,
                valid: true,
                jump_target: None,
                is_unconditional_ret: false,
            };
        }};
    }

    match (x, z) {
        (0, 0) if y == 0 => finish!("nop".into()),
        (0, 0) if y == 1 => finish!("ex af,af'".to_string()),
        (0, 0) if y == 2 => {
            let d = *bytes.get(1).unwrap_or(&0) as i8;
            raw.push(d as u8);
            finish!(format!("djnz ${}{}", if d >= 0 { "+" } else { "-" }, d.unsigned_abs()))
        }
        (0, 0) if y == 3 => {
            let d = *bytes.get(1).unwrap_or(&0) as i8;
            raw.push(d as u8);
            finish!(format!("jr ${}{}", if d >= 0 { "+" } else { "-" }, d.unsigned_abs()))
        }
        (0, 0) => {
            let d = *bytes.get(1).unwrap_or(&0) as i8;
            raw.push(d as u8);
            finish!(format!("jr {},${}{}", CONDITIONS[(y - 4) as usize], if d >= 0 { "+" } else { "-" }, d.unsigned_abs()))
        }
        (0, 1) if q == 0 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            let nn = u16::from_le_bytes([lo, hi]);
            let name = if let Some(idx) = index { if p == 2 { idx } else { QREG16[p as usize] } } else { QREG16[p as usize] };
            finish!(format!("ld {},{}", name, hex(nn, true)))
        }
        (0, 1) => {
            let dst = index.unwrap_or("hl");
            let src = if let Some(idx) = index { if p == 2 { idx } else { QREG16[p as usize] } } else { QREG16[p as usize] };
            finish!(format!("add {dst},{src}"))
        }
        (0, 2) if q == 0 && p == 0 => finish!("ld (bc),a".into()),
        (0, 2) if q == 0 && p == 1 => finish!("ld (de),a".into()),
        (0, 2) if q == 0 && p == 2 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            finish!(format!("ld ({}),{}", hex(u16::from_le_bytes([lo, hi]), true), index.unwrap_or("hl")))
        }
        (0, 2) if q == 0 && p == 3 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            finish!(format!("ld ({}),a", hex(u16::from_le_bytes([lo, hi]), true)))
        }
        (0, 2) if q == 1 && p == 0 => finish!("ld a,(bc)".into()),
        (0, 2) if q == 1 && p == 1 => finish!("ld a,(de)".into()),
        (0, 2) if q == 1 && p == 2 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            finish!(format!("ld {},({})", index.unwrap_or("hl"), hex(u16::from_le_bytes([lo, hi]), true)))
        }
        (0, 2) => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            finish!(format!("ld a,({})", hex(u16::from_le_bytes([lo, hi]), true)))
        }
        (0, 3) => {
            let name = if let Some(idx) = index { if p == 2 { idx.to_string() } else { QREG16[p as usize].to_string() } } else { QREG16[p as usize].to_string() };
            finish!(format!("{} {name}", if q == 0 { "inc" } else { "dec" }))
        }
        (0, 4) => {
            let r = reg(y, &mut extra, &mut raw);
            finish!(format!("inc {r}"))
        }
        (0, 5) => {
            let r = reg(y, &mut extra, &mut raw);
            finish!(format!("dec {r}"))
        }
        (0, 6) => {
            let r = reg(y, &mut extra, &mut raw);
            let n = *bytes.get(1 + extra).unwrap_or(&0);
            raw.push(n);
            finish!(format!("ld {r},{}", hex(n as u16, false)))
        }
        (0, 7) => {
            const OPS: [&str; 8] = ["rlca", "rrca", "rla", "rra", "daa", "cpl", "scf", "ccf"];
            finish!(OPS[y as usize].into())
        }
        (1, 6) if y == 6 => finish!("halt".into()),
        (1, _) => {
            let src = reg(z, &mut extra, &mut raw);
            let dst = reg(y, &mut extra, &mut raw);
            finish!(format!("ld {dst},{src}"))
        }
        (2, _) => {
            let r = reg(z, &mut extra, &mut raw);
            finish!(format!("{} {r}", ALU_MNEMONICS[y as usize]))
        }
        (3, 0) => finish!(format!("ret {}", CONDITIONS[y as usize])),
        (3, 1) if q == 0 => {
            let name = if p == 2 { index.unwrap_or("hl").to_string() } else { PREG16[p as usize].to_string() };
            finish!(format!("pop {name}"))
        }
        (3, 1) if y == 1 => finish!("ret".into()),
        (3, 1) if y == 3 => finish!("exx".into()),
        (3, 1) if y == 5 => finish!(match index {
            Some(idx) => format!("jp ({idx})"),
            None => "jp (hl)".to_string(),
        }),
        (3, 1) if y == 7 => finish!(format!("ld sp,{}", index.unwrap_or("hl"))),
        (3, 2) => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            let target = u16::from_le_bytes([lo, hi]);
            return DecodedInstr {
                addr,
                text: format!("jp {},{}", CONDITIONS[y as usize], hex(target, true)),
                len: raw.len(),
                raw,
                valid: true,
                jump_target: Some(target),
                is_unconditional_ret: false,
            };
        }
        (3, 3) if y == 0 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            let target = u16::from_le_bytes([lo, hi]);
            return DecodedInstr {
                addr,
                text: format!("jp {}", hex(target, true)),
                len: raw.len(),
                raw,
                valid: true,
                jump_target: Some(target),
                is_unconditional_ret: false,
            };
        }
        (3, 3) if y == 1 => decode_cb(bytes, addr, index),
        (3, 3) if y == 2 => {
            let n = *bytes.get(1).unwrap_or(&0);
            raw.push(n);
            finish!(format!("out ({}),a", hex(n as u16, false)))
        }
        (3, 3) if y == 3 => {
            let n = *bytes.get(1).unwrap_or(&0);
            raw.push(n);
            finish!(format!("in a,({})", hex(n as u16, false)))
        }
        (3, 3) if y == 4 => finish!("ex (sp),hl".into()),
        (3, 3) if y == 5 => finish!("ex de,hl".into()),
        (3, 3) if y == 6 => finish!("di".into()),
        (3, 3) if y == 7 => finish!("ei".into()),
        (3, 4) => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            let target = u16::from_le_bytes([lo, hi]);
            return DecodedInstr {
                addr,
                text: format!("call {},{}", CONDITIONS[y as usize], hex(target, true)),
                len: raw.len(),
                raw,
                valid: true,
                jump_target: Some(target),
                is_unconditional_ret: false,
            };
        }
        (3, 5) if q == 0 => {
            let name = if p == 2 { index.unwrap_or("hl").to_string() } else { PREG16[p as usize].to_string() };
            finish!(format!("push {name}"))
        }
        (3, 5) if y == 1 => {
            let lo = *bytes.get(1).unwrap_or(&0);
            let hi = *bytes.get(2).unwrap_or(&0);
            raw.extend_from_slice(&[lo, hi]);
            let target = u16::from_le_bytes([lo, hi]);
            return DecodedInstr {
                addr,
                text: format!("call {}", hex(target, true)),
                len: raw.len(),
                raw,
                valid: true,
                jump_target: Some(target),
                is_unconditional_ret: false,
            };
        }
        (3, 6) => {
            let n = *bytes.get(1).unwrap_or(&0);
            raw.push(n);
            finish!(format!("{} {}", ALU_MNEMONICS[y as usize], hex(n as u16, false)))
        }
        (3, 7) => finish!(format!("rst {}", hex(RST_TARGETS[y as usize] as u16, false))),
        _ => invalid(bytes, addr),
    }
}

fn decode_cb(bytes: &[u8], addr: u16, index: Option<&'static str>) -> DecodedInstr {
    // Plain `CB xx` is 2 bytes; `DD/FD CB d xx` is 4 bytes with the
    // displacement sitting before the opcode byte.
    let (op, mut raw, d) = if index.is_some() {
        let d = *bytes.get(2).unwrap_or(&0);
        (*bytes.get(3).unwrap_or(&0), vec![bytes[0], 0xCB, d, 0], Some(d))
    } else {
        (*bytes.get(1).unwrap_or(&0), vec![0xCB, 0], None)
    };
    if index.is_some() {
        raw[3] = op;
    } else {
        raw[1] = op;
    }

    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;

    let operand = if let (Some(idx), Some(d)) = (index, d) {
        let (sign, mag) = signed_disp(d);
        format!("({idx}{sign}{mag})")
    } else {
        GPR8[z as usize].to_string()
    };

    let text = match x {
        0 => format!("{} {}", ROT_MNEMONICS[y as usize], operand),
        1 => format!("bit {y},{operand}"),
        2 => format!("res {y},{operand}"),
        3 => format!("set {y},{operand}"),
        _ => unreachable!(),
    };

    DecodedInstr { addr, text, len: raw.len(), raw, valid: true, jump_target: None, is_unconditional_ret: false }
}

fn decode_indexed(bytes: &[u8], addr: u16, idx: &'static str) -> DecodedInstr {
    match bytes.get(1) {
        Some(0xCB) => decode_cb(bytes, addr, Some(idx)),
        Some(_) => {
            let mut inner = decode_main(&bytes[1..], addr, Some(idx));
            inner.raw.insert(0, bytes[0]);
            inner.len += 1;
            inner
        }
        None => invalid(bytes, addr),
    }
}

fn decode_ed(bytes: &[u8], addr: u16) -> DecodedInstr {
    let op = *bytes.get(1).unwrap_or(&0);
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    macro_rules! fixed {
        ($text:expr, $len:expr) => {
            DecodedInstr {
                addr,
                text: $text.to_string(),
                len: $len,
                raw: bytes[..$len].to_vec(),
                valid: true,
                jump_target: None,
                is_unconditional_ret: false,
            }
        };
    }

    if x == 2 {
        const BLOCK: [[&str; 4]; 4] = [
            ["ldi", "cpi", "ini", "outi"],
            ["ldd", "cpd", "ind", "outd"],
            ["ldir", "cpir", "inir", "otir"],
            ["lddr", "cpdr", "indr", "otdr"],
        ];
        if (4..=7).contains(&y) && z <= 3 {
            return fixed!(BLOCK[(y - 4) as usize][z as usize], 2);
        }
        return DecodedInstr {
            addr,
            text: format!("defb {}", hex(0xED, false)),
            len: 1,
            raw: vec![0xED],
            valid: false,
            jump_target: None,
            is_unconditional_ret: false,
        };
    }

    if x != 1 {
        return DecodedInstr {
            addr,
            text: format!("defb {}", hex(0xED, false)),
            len: 1,
            raw: vec![0xED],
            valid: false,
            jump_target: None,
            is_unconditional_ret: false,
        };
    }

    match z {
        0 if y == 6 => fixed!("in (c)", 2),
        0 => fixed!(format!("in {},(c)", GPR8[y as usize]), 2),
        1 if y == 6 => fixed!("out (c),0", 2),
        1 => fixed!(format!("out (c),{}", GPR8[y as usize]), 2),
        2 => {
            let name = QREG16[p as usize];
            if q == 0 {
                fixed!(format!("sbc hl,{name}"), 2)
            } else {
                fixed!(format!("adc hl,{name}"), 2)
            }
        }
        3 => {
            let lo = *bytes.get(2).unwrap_or(&0);
            let hi = *bytes.get(3).unwrap_or(&0);
            let nn = u16::from_le_bytes([lo, hi]);
            let name = QREG16[p as usize];
            let text = if q == 0 {
                format!("ld ({}),{name}", hex(nn, true))
            } else {
                format!("ld {name},({})", hex(nn, true))
            };
            DecodedInstr { addr, text, len: 4, raw: bytes[..4].to_vec(), valid: true, jump_target: None, is_unconditional_ret: false }
        }
        4 => fixed!("neg", 2),
        5 if y == 1 => fixed!("reti", 2),
        5 => fixed!("retn", 2),
        6 => {
            const IM: [&str; 4] = ["0", "0/1", "1", "2"];
            fixed!(format!("im {}", IM[(y % 4) as usize]), 2)
        }
        7 => {
            const OPS: [&str; 8] = ["ld i,a", "ld r,a", "ld a,i", "ld a,r", "rrd", "rld", "nop", "nop"];
            fixed!(OPS[y as usize], 2)
        }
        _ => DecodedInstr {
            addr,
            text: format!("defb {}", hex(0xED, false)),
            len: 1,
            raw: vec![0xED],
            valid: false,
            jump_target: None,
            is_unconditional_ret: false,
        },
    }
}

pub struct DisasOptions {
    pub opt_addr: bool,
    pub opt_source: bool,
    pub opt_labels: bool,
    pub org: u16,
}

impl Default for DisasOptions {
    fn default() -> Self {
        Self { opt_addr: true, opt_source: true, opt_labels: true, org: 0 }
    }
}

const INSTR_COLUMN: usize = 8;
const COMMENT_COLUMN: usize = 32;
const ASCII_DUMP_OFFSET: usize = 24;

fn pad_to(out: &mut String, col: &mut usize, target: usize) {
    while *col < target {
        out.push(' ');
        *col += 1;
    }
}

/// Decode the full buffer and render the listing in the same column layout
/// as the reference tool: indented mnemonics, a `; addr hex ascii` trailing
/// comment column, an extra blank line after unconditional returns, and
/// (when `opt_labels`) `lbl_N:` labels synthesised for every jump/call
/// target that lands inside the decoded range.
pub fn disassemble(bytes: &[u8], opts: &DisasOptions) -> String {
    let mut instrs = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let addr = opts.org.wrapping_add(offset as u16);
        let instr = decode_one(&bytes[offset..], addr);
        let len = instr.len.max(1);
        offset += len;
        instrs.push(instr);
    }

    let mut labels: HashMap<u16, usize> = HashMap::new();
    if opts.opt_labels {
        let mut targets: Vec<u16> = instrs.iter().filter_map(|i| i.jump_target).collect();
        targets.sort_unstable();
        targets.dedup();
        for (n, addr) in targets.into_iter().enumerate() {
            labels.insert(addr, n + 1);
        }
    }

    let mut out = String::new();
    for _ in 0..INSTR_COLUMN {
        out.push(' ');
    }
    let _ = write!(out, "org {}\n\n", hex(opts.org, true));

    for instr in &instrs {
        if let Some(id) = labels.get(&instr.addr) {
            let _ = write!(out, "lbl_{id}:\n");
        }

        let mut col = 0;
        for _ in 0..INSTR_COLUMN {
            out.push(' ');
            col += 1;
        }

        if !instr.valid {
            let start = out.len();
            out.push_str(&instr.text);
            col += out.len() - start;
            pad_to(&mut out, &mut col, COMMENT_COLUMN);
            let _ = write!(out, "; {:04x}  invalid opcode {:02x}h\n", instr.addr, instr.raw[0]);
            continue;
        }

        let mut text = instr.text.clone();
        if let (true, Some(target)) = (opts.opt_labels, instr.jump_target) {
            if let Some(id) = labels.get(&target) {
                let hex_form = hex(target, true);
                text = text.replace(&hex_form, &format!("lbl_{id}"));
            }
        }
        let start = out.len();
        out.push_str(&text);
        col += out.len() - start;

        if opts.opt_addr || opts.opt_source {
            pad_to(&mut out, &mut col, COMMENT_COLUMN);
            out.push_str("; ");
            col += 2;
            if opts.opt_addr {
                let s = format!("{:04x}", instr.addr);
                col += s.len();
                out.push_str(&s);
            }
            if opts.opt_source {
                out.push_str("   ");
                col += 3;
                for &b in &instr.raw {
                    let s = format!("{b:02x} ");
                    col += s.len();
                    out.push_str(&s);
                }
                pad_to(&mut out, &mut col, COMMENT_COLUMN + ASCII_DUMP_OFFSET);
                for &b in &instr.raw {
                    let c = b as char;
                    out.push(if c.is_ascii_graphic() { c } else { '.' });
                    col += 1;
                }
            }
        }
        out.push('\n');

        if instr.text == "ret" || instr.text == "reti" || instr.text == "retn" {
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nop_and_halt() {
        assert_eq!(decode_one(&[0x00], 0).text, "nop");
        assert_eq!(decode_one(&[0x76], 0).text, "halt");
    }

    #[test]
    fn test_decode_ld_reg_reg() {
        let d = decode_one(&[0x78], 0); // LD A,B
        assert_eq!(d.text, "ld a,b");
        assert_eq!(d.len, 1);
    }

    #[test]
    fn test_decode_ld_hl_nn() {
        let d = decode_one(&[0x21, 0x34, 0x12], 0);
        assert_eq!(d.text, "ld hl,1234h");
        assert_eq!(d.len, 3);
    }

    #[test]
    fn test_decode_jp_nn() {
        let d = decode_one(&[0xC3, 0x00, 0x80], 0x1000);
        assert_eq!(d.text, "jp 8000h");
        assert_eq!(d.jump_target, Some(0x8000));
    }

    #[test]
    fn test_decode_rst() {
        assert_eq!(decode_one(&[0xFF], 0).text, "rst 38h");
    }

    #[test]
    fn test_decode_cb_bit() {
        assert_eq!(decode_one(&[0xCB, 0x7E], 0).text, "bit 7,(hl)"); // BIT 7,(HL)
    }

    #[test]
    fn test_decode_indexed_ld_with_displacement() {
        let d = decode_one(&[0xDD, 0x36, 0xFE, 0x42], 0); // LD (IX-2),42h
        assert_eq!(d.text, "ld (ix-2),42h");
        assert_eq!(d.len, 4);
    }

    #[test]
    fn test_decode_invalid_opcode_in_ed_space() {
        let d = decode_one(&[0xED, 0x00], 0);
        assert!(!d.valid);
    }

    #[test]
    fn test_disassemble_inserts_jump_label() {
        let bytes = [0xC3, 0x04, 0x00, 0x00, 0x00];
        let out = disassemble(&bytes, &DisasOptions { opt_addr: false, opt_source: false, ..DisasOptions::default() });
        assert!(out.contains("jp lbl_1"));
        assert!(out.contains("lbl_1:"));
    }

    #[test]
    fn test_disassemble_blank_line_after_ret() {
        let bytes = [0xC9, 0x00];
        let out = disassemble(&bytes, &DisasOptions { opt_addr: false, opt_source: false, opt_labels: false, org: 0 });
        let ret_pos = out.find("ret").unwrap();
        assert_eq!(&out[ret_pos + 3..ret_pos + 5], "\n\n");
    }
}
