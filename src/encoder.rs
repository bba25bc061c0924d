//! Z80 instruction encoder.
//!
//! Each mnemonic's operand forms are tried in a fixed priority order, same
//! as picking the first matching overload in an assembler's instruction
//! table. Operands are classified from the parsed argument node (register
//! name, `(HL)`, `(IX+d)`, immediate, ...); values that can't be resolved
//! yet (forward references to a label) are recorded as a [`PendingPatch`]
//! against a zero placeholder and filled in on the second pass.

use crate::arena::{Arena, BinOp, NodeId, NodeKind, UnOp};
use crate::error::{AsmError, Pos, Result};
use crate::eval::{eval, EvalCtx};

const REG_A: u8 = 7;
const REG_B: u8 = 0;
const REG_C: u8 = 1;
const REG_D: u8 = 2;
const REG_E: u8 = 3;
const REG_H: u8 = 4;
const REG_L: u8 = 5;

const REG_BC: u8 = 0;
const REG_DE: u8 = 1;
const REG_HL: u8 = 2;
const REG_SP: u8 = 3;

const REG_IX: u8 = 0;
const REG_IY: u8 = 1;

const COND_NZ: u8 = 0;
const COND_Z: u8 = 1;
const COND_NC: u8 = 2;
const COND_C: u8 = 3;
const COND_PO: u8 = 4;
const COND_PE: u8 = 5;
const COND_P: u8 = 6;
const COND_M: u8 = 7;

const REG_AF: u8 = 3;

/// A byte or pair of bytes this instruction needs but can't supply yet
/// because its value depends on a label not yet defined.
#[derive(Debug, Clone)]
pub struct PendingPatch {
    /// Expression to re-evaluate once the symbol table is complete.
    pub node: NodeId,
    /// Offset of the first patched byte within this instruction's own bytes.
    pub local_offset: usize,
    pub width: u8,
    pub is_relative: bool,
    /// PC of the instruction itself (needed to compute relative displacement).
    pub instr_pc: i64,
}

pub struct Encoded {
    pub bytes: Vec<u8>,
    pub cycles: u32,
    pub patches: Vec<PendingPatch>,
}

impl Encoded {
    fn fixed(bytes: Vec<u8>, cycles: u32) -> Self {
        Self { bytes, cycles, patches: Vec::new() }
    }
}

fn err(pos: &Pos, message: impl Into<String>) -> AsmError {
    AsmError::Encoder { pos: pos.clone(), message: message.into() }
}

fn ident(arena: &Arena, id: NodeId) -> Option<(String, bool)> {
    match &arena.get(id).kind {
        NodeKind::Ident(name) => Some((name.to_ascii_lowercase(), arena.get(id).is_reference)),
        _ => None,
    }
}

fn is_name(arena: &Arena, id: NodeId, want: &str) -> Option<bool> {
    ident(arena, id).and_then(|(n, r)| if n == want { Some(r) } else { None })
}

fn gpr8(arena: &Arena, id: NodeId) -> Option<(u8, bool)> {
    let (n, r) = ident(arena, id)?;
    let code = match n.as_str() {
        "a" => REG_A,
        "b" => REG_B,
        "c" => REG_C,
        "d" => REG_D,
        "e" => REG_E,
        "h" => REG_H,
        "l" => REG_L,
        _ => return None,
    };
    Some((code, r))
}

fn hl(arena: &Arena, id: NodeId) -> Option<bool> {
    is_name(arena, id, "hl")
}

fn qreg16(arena: &Arena, id: NodeId) -> Option<(u8, bool)> {
    let (n, r) = ident(arena, id)?;
    let code = match n.as_str() {
        "bc" => REG_BC,
        "de" => REG_DE,
        "hl" => REG_HL,
        "sp" => REG_SP,
        _ => return None,
    };
    Some((code, r))
}

fn preg16(arena: &Arena, id: NodeId) -> Option<(u8, bool)> {
    let (n, r) = ident(arena, id)?;
    let code = match n.as_str() {
        "bc" => 0,
        "de" => 1,
        "hl" => 2,
        "af" => 3,
        _ => return None,
    };
    Some((code, r))
}

fn index_reg(arena: &Arena, id: NodeId) -> Option<(u8, bool)> {
    let (n, r) = ident(arena, id)?;
    match n.as_str() {
        "ix" => Some((REG_IX, r)),
        "iy" => Some((REG_IY, r)),
        _ => None,
    }
}

/// `IXH`/`IXL`/`IYH`/`IYL` — only meaningful unparenthesised.
fn ixy_half(arena: &Arena, id: NodeId) -> Option<(u8, u8)> {
    let (n, r) = ident(arena, id)?;
    if r {
        return None;
    }
    match n.as_str() {
        "ixh" => Some((0xDD, REG_H)),
        "ixl" => Some((0xDD, REG_L)),
        "iyh" => Some((0xFD, REG_H)),
        "iyl" => Some((0xFD, REG_L)),
        _ => None,
    }
}

fn condition(arena: &Arena, id: NodeId) -> Option<u8> {
    let (n, _) = ident(arena, id)?;
    Some(match n.as_str() {
        "nz" => COND_NZ,
        "z" => COND_Z,
        "nc" => COND_NC,
        "c" => COND_C,
        "po" => COND_PO,
        "pe" => COND_PE,
        "p" => COND_P,
        "m" => COND_M,
        _ => return None,
    })
}

/// `(IX+d)`/`(IY+d)`. A literal offset folds to a resolved displacement;
/// an offset expression that names no reserved identifier (so, typically,
/// a forward-declared label) is recorded as a patch the same way `imm()`
/// defers an unresolved plain immediate. `(IX-label)` negates the patched
/// expression by wrapping it in a fresh `Unary(Neg, ..)` node rather than
/// carrying a separate negate flag, since nothing downstream of the patch
/// queue knows how to negate after the fact.
fn index_offset8(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId) -> Option<(u8, Imm)> {
    let data = arena.get(id).clone();
    if !data.is_reference {
        return None;
    }
    let inner = match data.kind {
        NodeKind::Simple(inner) => inner,
        _ => return None,
    };
    let (op, lhs, rhs) = match arena.get(inner).kind {
        NodeKind::Binary(op @ (BinOp::Add | BinOp::Sub), lhs, rhs) => (op, lhs, rhs),
        _ => return None,
    };
    let (idx, _) = index_reg(arena, lhs)?;
    let evaluated = eval(ctx, arena, rhs).ok()?;
    match arena.get(evaluated).kind {
        NodeKind::IntLiteral(v) => {
            let v = if op == BinOp::Sub { -v } else { v };
            Some((idx, Imm::Resolved(v)))
        }
        _ if !contains_reserved_ident(arena, rhs) => {
            let patch_node = if op == BinOp::Sub {
                arena.alloc(NodeKind::Unary(UnOp::Neg, rhs), data.pos.clone())
            } else {
                rhs
            };
            Some((idx, Imm::Forward(patch_node)))
        }
        _ => None,
    }
}

fn contains_reserved_ident(arena: &Arena, id: NodeId) -> bool {
    match &arena.get(id).kind {
        NodeKind::Ident(name) => crate::symtab::is_reserved(name),
        NodeKind::Binary(_, l, r) => contains_reserved_ident(arena, *l) || contains_reserved_ident(arena, *r),
        NodeKind::Unary(_, inner) | NodeKind::Simple(inner) => contains_reserved_ident(arena, *inner),
        _ => false,
    }
}

#[derive(Debug, Clone)]
enum Imm {
    Resolved(i64),
    Forward(NodeId),
}

/// An immediate value: a literal int, or (if it names no register) a
/// forward reference patched on the second pass.
fn imm(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId, want_ref: bool) -> Option<Imm> {
    let data = arena.get(id).clone();
    if data.is_reference != want_ref {
        return None;
    }
    let evaluated = eval(ctx, arena, id).ok()?;
    match arena.get(evaluated).kind {
        NodeKind::IntLiteral(v) => Some(Imm::Resolved(v)),
        _ if !contains_reserved_ident(arena, id) => Some(Imm::Forward(id)),
        _ => None,
    }
}

fn bitnum(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId) -> Option<u8> {
    match imm(ctx, arena, id, false)? {
        Imm::Resolved(v) if (0..=7).contains(&v) => Some(v as u8),
        _ => None,
    }
}

fn rstaddr(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId) -> Option<u8> {
    match imm(ctx, arena, id, false)? {
        Imm::Resolved(v) => match v {
            0x00 => Some(0),
            0x08 => Some(1),
            0x10 => Some(2),
            0x18 => Some(3),
            0x20 => Some(4),
            0x28 => Some(5),
            0x30 => Some(6),
            0x38 => Some(7),
            _ => None,
        },
        _ => None,
    }
}

/// Normalised shape of a single operand node, classified once per
/// position and then dispatched on with `match` instead of re-running
/// a chain of classifier probes per candidate encoding. Condition codes
/// (`NZ`/`Z`/`NC`/`C`/...) are deliberately not a variant here: `C` is
/// also a plain 8-bit register, and `CALL`/`JP`/`JR`/`RET` disambiguate
/// by argument position, not by shape, so they keep calling
/// [`condition`] directly.
#[derive(Debug, Clone)]
enum Operand {
    Reg8 { code: u8, is_ref: bool },
    Hl { is_ref: bool },
    Pair { code: u8, is_ref: bool },
    PushPop { code: u8 },
    IndexReg { code: u8, is_ref: bool },
    IndexOffset { code: u8, disp: Imm },
    IxyHalf { prefix: u8, reg: u8 },
    I,
    R,
    F,
    AfPrime,
    Imm { value: Imm, is_ref: bool },
    Other,
}

fn classify(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId) -> Operand {
    if let Some((code, is_ref)) = gpr8(arena, id) {
        return Operand::Reg8 { code, is_ref };
    }
    if let Some(is_ref) = hl(arena, id) {
        return Operand::Hl { is_ref };
    }
    if let Some((code, is_ref)) = qreg16(arena, id) {
        return Operand::Pair { code, is_ref };
    }
    if let Some((code, false)) = preg16(arena, id) {
        return Operand::PushPop { code };
    }
    if let Some((code, is_ref)) = index_reg(arena, id) {
        return Operand::IndexReg { code, is_ref };
    }
    if let Some((code, disp)) = index_offset8(ctx, arena, id) {
        return Operand::IndexOffset { code, disp };
    }
    if let Some((prefix, reg)) = ixy_half(arena, id) {
        return Operand::IxyHalf { prefix, reg };
    }
    if is_name(arena, id, "i").is_some() {
        return Operand::I;
    }
    if is_name(arena, id, "r").is_some() {
        return Operand::R;
    }
    if is_name(arena, id, "f").is_some() {
        return Operand::F;
    }
    if is_name(arena, id, "af'").is_some() {
        return Operand::AfPrime;
    }
    let is_ref = arena.get(id).is_reference;
    if let Some(value) = imm(ctx, arena, id, is_ref) {
        return Operand::Imm { value, is_ref };
    }
    Operand::Other
}

/// Collapses the two shapes that encode a 16-bit register-pair operand
/// (`Operand::Pair` for BC/DE/SP, `Operand::Hl` for HL, which `classify`
/// always produces ahead of `Pair` since plain `HL` needs its own
/// dedicated addressing modes elsewhere) back into one register code,
/// for the handful of mnemonics (`ADD`/`ADC`/`SBC` HL,rr and `DEC`/`INC`
/// rr) that accept all four interchangeably.
fn pair_code(op: &Operand) -> Option<u8> {
    match op {
        Operand::Pair { code, is_ref: false } => Some(*code),
        Operand::Hl { is_ref: false } => Some(REG_HL),
        _ => None,
    }
}

fn legal_arg_counts(mnemonic: &str) -> &'static [usize] {
    match mnemonic {
        "adc" | "add" | "sbc" => &[2],
        "and" | "cp" | "or" | "sub" | "xor" => &[1],
        "bit" | "res" | "set" => &[2],
        "call" => &[1, 2],
        "ccf" | "cpd" | "cpdr" | "cpi" | "cpir" | "cpl" | "daa" | "di" | "ei" | "exx" | "halt" | "ind"
        | "indr" | "ini" | "inir" | "ldd" | "lddr" | "ldi" | "ldir" | "neg" | "nop" | "otdr" | "otir"
        | "outd" | "outi" | "reti" | "retn" | "rla" | "rlca" | "rra" | "rrca" | "rld" | "rrd" | "scf" => &[0],
        "dec" | "djnz" | "im" | "inc" | "pop" | "push" | "rl" | "rlc" | "rr" | "rrc" | "rst" | "sla"
        | "sll" | "sra" | "srl" => &[1],
        "ex" | "in" | "out" | "ld" => &[2],
        "jp" | "jr" => &[1, 2],
        "ret" => &[0, 1],
        _ => &[],
    }
}

fn describe_arities(allowed: &[usize]) -> String {
    allowed.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" or ")
}

/// Builder that accumulates bytes for one instruction and records patches
/// at their offset within this instruction (translated to section-relative
/// offsets by the caller once the instruction's own start is known).
struct Builder {
    bytes: Vec<u8>,
    cycles: u32,
    patches: Vec<PendingPatch>,
    pc: i64,
}

impl Builder {
    fn new(pc: i64) -> Self {
        Self { bytes: Vec::new(), cycles: 0, patches: Vec::new(), pc }
    }

    fn byte(&mut self, b: u8) -> &mut Self {
        self.bytes.push(b);
        self
    }

    fn push_imm(&mut self, value: Imm, width: u8) {
        let offset = self.bytes.len();
        match value {
            Imm::Resolved(v) => {
                self.bytes.push((v & 0xFF) as u8);
                if width == 2 {
                    self.bytes.push(((v >> 8) & 0xFF) as u8);
                }
            }
            Imm::Forward(node) => {
                self.bytes.push(0);
                if width == 2 {
                    self.bytes.push(0);
                }
                self.patches.push(PendingPatch {
                    node,
                    local_offset: offset,
                    width,
                    is_relative: false,
                    instr_pc: self.pc,
                });
            }
        }
    }

    fn push_rel(&mut self, value: Imm) {
        let offset = self.bytes.len();
        match value {
            Imm::Resolved(v) => self.bytes.push((v & 0xFF) as u8),
            Imm::Forward(node) => {
                self.bytes.push(0);
                self.patches.push(PendingPatch {
                    node,
                    local_offset: offset,
                    width: 1,
                    is_relative: true,
                    instr_pc: self.pc,
                });
            }
        }
    }

    fn finish(self, cycles: u32) -> Encoded {
        Encoded { bytes: self.bytes, cycles, patches: self.patches }
    }
}

/// Encode one instruction. `pc` is the address the first byte will land
/// at (used both for relative-jump math and to fill in `PendingPatch::instr_pc`).
pub fn encode(
    ctx: &mut EvalCtx,
    arena: &mut Arena,
    pos: &Pos,
    mnemonic: &str,
    args: &[NodeId],
    pc: i64,
) -> Result<Encoded> {
    let m = mnemonic.to_ascii_lowercase();
    let allowed = legal_arg_counts(&m);
    if !allowed.is_empty() && !allowed.contains(&args.len()) {
        return Err(err(
            pos,
            format!(
                "{} takes {} argument(s), found {}",
                mnemonic.to_ascii_uppercase(),
                describe_arities(allowed),
                args.len()
            ),
        ));
    }
    tracing::trace!(mnemonic = %m, pc, args = args.len(), "encoding instruction");

    let a1 = args.first().copied();
    let a2 = args.get(1).copied();
    let mut b = Builder::new(pc);

    macro_rules! need {
        ($a:expr, $n:literal) => {
            $a.ok_or_else(|| err(pos, concat!("argument ", $n, " missing")))?
        };
    }
    macro_rules! bad {
        ($n:literal) => {
            return Err(err(pos, concat!("unexpected argument ", $n)))
        };
    }

    match m.as_str() {
        "adc" | "add" | "sbc" => {
            let arg1 = need!(a1, 1);
            let arg2 = need!(a2, 2);
            let (base8, base16_hl, opc_imm8, is_add) = match m.as_str() {
                "adc" => (0x88, 0x4A, 0xCE, false),
                "sbc" => (0x98, 0x42, 0xDE, false),
                _ => (0x80, 0x09, 0xC6, true),
            };
            match classify(ctx, arena, arg1) {
                Operand::Reg8 { code: REG_A, is_ref: false } => match classify(ctx, arena, arg2) {
                    Operand::Reg8 { code: r, is_ref: false } => {
                        b.byte(base8 | r);
                        return Ok(b.finish(4));
                    }
                    Operand::Imm { value, is_ref: false } => {
                        b.byte(opc_imm8);
                        b.push_imm(value, 1);
                        return Ok(b.finish(7));
                    }
                    Operand::Hl { is_ref: true } => {
                        b.byte(base8 | 0x06);
                        return Ok(b.finish(7));
                    }
                    Operand::IndexOffset { code: idx, disp } => {
                        b.byte(0xDD | (idx << 5)).byte(base8 | 0x06);
                        b.push_imm(disp, 1);
                        return Ok(b.finish(19));
                    }
                    Operand::IxyHalf { prefix, reg } => {
                        b.byte(prefix).byte(base8 | reg);
                        return Ok(b.finish(8));
                    }
                    _ => bad!(2),
                },
                Operand::Hl { is_ref: false } => match pair_code(&classify(ctx, arena, arg2)) {
                    Some(r) => {
                        if is_add {
                            b.byte(0x09 | (r << 4));
                            return Ok(b.finish(11));
                        }
                        b.byte(0xED).byte(base16_hl | (r << 4));
                        return Ok(b.finish(15));
                    }
                    None => bad!(2),
                },
                Operand::IndexReg { code: idx, is_ref: false } if is_add => {
                    match pair_code(&classify(ctx, arena, arg2)) {
                        Some(r2) => {
                            b.byte(0xDD | (idx << 5)).byte(0x09 | (r2 << 4));
                            return Ok(b.finish(15));
                        }
                        None => bad!(2),
                    }
                }
                _ => bad!(1),
            }
        }

        "and" | "or" | "xor" | "cp" | "sub" => {
            let arg1 = need!(a1, 1);
            let (base, opc_imm8, hl_opc) = match m.as_str() {
                "and" => (0xA0, 0xE6, 0xA6),
                "or" => (0xB0, 0xF6, 0xB6),
                "xor" => (0xA8, 0xEE, 0xAE),
                "cp" => (0xB8, 0xFE, 0xBE),
                _ => (0x90, 0xD6, 0x96),
            };
            match classify(ctx, arena, arg1) {
                Operand::Reg8 { code: r, is_ref: false } => {
                    b.byte(base | r);
                    return Ok(b.finish(4));
                }
                Operand::Imm { value, is_ref: false } => {
                    b.byte(opc_imm8);
                    b.push_imm(value, 1);
                    return Ok(b.finish(7));
                }
                Operand::Hl { is_ref: true } => {
                    b.byte(hl_opc);
                    return Ok(b.finish(7));
                }
                Operand::IndexOffset { code: idx, disp } => {
                    b.byte(0xDD | (idx << 5)).byte(hl_opc);
                    b.push_imm(disp, 1);
                    return Ok(b.finish(19));
                }
                Operand::IxyHalf { prefix, reg } => {
                    b.byte(prefix).byte(base | reg);
                    return Ok(b.finish(8));
                }
                _ => bad!(1),
            }
        }

        "bit" | "res" | "set" => {
            let arg1 = need!(a1, 1);
            let arg2 = need!(a2, 2);
            let base = match m.as_str() {
                "bit" => 0x40,
                "res" => 0x80,
                _ => 0xC0,
            };
            let bit = bitnum(ctx, arena, arg1).ok_or_else(|| err(pos, "invalid bit number (must be 0-7)"))?;
            match classify(ctx, arena, arg2) {
                Operand::Reg8 { code: r, is_ref: false } => {
                    b.byte(0xCB).byte(base | (bit << 3) | r);
                    return Ok(b.finish(8));
                }
                Operand::Hl { is_ref: true } => {
                    b.byte(0xCB).byte((base | (bit << 3)) | 0x06);
                    return Ok(b.finish(12));
                }
                Operand::IndexOffset { code: idx, disp } => {
                    b.byte(0xDD | (idx << 5)).byte(0xCB);
                    b.push_imm(disp, 1);
                    b.byte((base | (bit << 3)) | 0x06);
                    return Ok(b.finish(20));
                }
                _ => bad!(2),
            }
        }

        "call" => {
            let arg1 = need!(a1, 1);
            if args.len() == 1 {
                let v = imm(ctx, arena, arg1, false).ok_or_else(|| err(pos, "unexpected argument 1"))?;
                b.byte(0xCD);
                b.push_imm(v, 2);
                return Ok(b.finish(17));
            }
            let arg2 = need!(a2, 2);
            let cond = condition(arena, arg1).ok_or_else(|| err(pos, "unexpected argument 1"))?;
            let v = imm(ctx, arena, arg2, false).ok_or_else(|| err(pos, "unexpected argument 2"))?;
            b.byte(0xC4 | (cond << 3));
            b.push_imm(v, 2);
            return Ok(b.finish(17));
        }

        "djnz" | "jr" => {
            let arg1 = need!(a1, 1);
            if m == "djnz" || args.len() == 1 {
                let v = reladdr(ctx, arena, arg1, pc)
                    .ok_or_else(|| err(pos, format!("{} offset doesn't fit in a byte", mnemonic.to_ascii_uppercase())))?;
                b.byte(if m == "djnz" { 0x10 } else { 0x18 });
                b.push_rel(v);
                return Ok(b.finish(if m == "djnz" { 13 } else { 12 }));
            }
            let arg2 = need!(a2, 2);
            let v = reladdr(ctx, arena, arg2, pc)
                .ok_or_else(|| err(pos, "JR offset doesn't fit in a byte"))?;
            let cond = condition(arena, arg1).ok_or_else(|| err(pos, "unexpected argument 1"))?;
            let opc = match cond {
                COND_NZ => 0x20,
                COND_Z => 0x28,
                COND_NC => 0x30,
                COND_C => 0x38,
                _ => return Err(err(pos, "JR only accepts NZ, Z, NC, C")),
            };
            b.byte(opc);
            b.push_rel(v);
            return Ok(b.finish(12));
        }

        "jp" => {
            let arg1 = need!(a1, 1);
            if args.len() == 1 {
                match classify(ctx, arena, arg1) {
                    Operand::Imm { value, is_ref: false } => {
                        b.byte(0xC3);
                        b.push_imm(value, 2);
                        return Ok(b.finish(10));
                    }
                    Operand::Hl { is_ref: true } => {
                        b.byte(0xE9);
                        return Ok(b.finish(4));
                    }
                    Operand::IndexReg { code: idx, is_ref: true } => {
                        b.byte(0xDD | (idx << 5)).byte(0xE9);
                        return Ok(b.finish(8));
                    }
                    _ => bad!(1),
                }
            }
            let arg2 = need!(a2, 2);
            let cond = condition(arena, arg1).ok_or_else(|| err(pos, "unexpected argument 1"))?;
            let v = imm(ctx, arena, arg2, false).ok_or_else(|| err(pos, "unexpected argument 2"))?;
            b.byte(0xC2 | (cond << 3));
            b.push_imm(v, 2);
            return Ok(b.finish(10));
        }

        "ld" => return encode_ld(ctx, arena, pos, arg_or(a1, pos, 1)?, arg_or(a2, pos, 2)?, b),

        "dec" | "inc" => {
            let arg1 = need!(a1, 1);
            let (base, base16) = if m == "dec" { (0x05, 0x0B) } else { (0x04, 0x03) };
            let mem_opc = if m == "dec" { 0x35 } else { 0x34 };
            let idx16_opc = if m == "dec" { 0x2B } else { 0x23 };
            match classify(ctx, arena, arg1) {
                Operand::Reg8 { code: r, is_ref: false } => {
                    b.byte(base | (r << 3));
                    return Ok(b.finish(4));
                }
                Operand::Hl { is_ref: true } => {
                    b.byte(mem_opc);
                    return Ok(b.finish(11));
                }
                Operand::IndexOffset { code: idx, disp } => {
                    b.byte(0xDD | (idx << 5)).byte(mem_opc);
                    b.push_imm(disp, 1);
                    return Ok(b.finish(23));
                }
                Operand::Hl { is_ref: false } => {
                    b.byte(base16 | (REG_HL << 4));
                    return Ok(b.finish(6));
                }
                Operand::Pair { code: r, is_ref: false } => {
                    b.byte(base16 | (r << 4));
                    return Ok(b.finish(6));
                }
                Operand::IndexReg { code: idx, is_ref: false } => {
                    b.byte(0xDD | (idx << 5)).byte(idx16_opc);
                    return Ok(b.finish(10));
                }
                Operand::IxyHalf { prefix, reg } => {
                    b.byte(prefix).byte(base | (reg << 3));
                    return Ok(b.finish(8));
                }
                _ => bad!(1),
            }
        }

        "ex" => {
            let arg1 = need!(a1, 1);
            let arg2 = need!(a2, 2);
            match classify(ctx, arena, arg1) {
                Operand::Pair { code: REG_SP, is_ref: true } => match classify(ctx, arena, arg2) {
                    Operand::Hl { is_ref: false } => {
                        b.byte(0xE3);
                        return Ok(b.finish(19));
                    }
                    Operand::IndexReg { code: idx, is_ref: false } => {
                        b.byte(0xDD | (idx << 5)).byte(0xE3);
                        return Ok(b.finish(23));
                    }
                    _ => bad!(2),
                },
                Operand::PushPop { code: REG_AF } => match classify(ctx, arena, arg2) {
                    Operand::AfPrime => {
                        b.byte(0x08);
                        return Ok(b.finish(4));
                    }
                    _ => bad!(2),
                },
                Operand::Pair { code: REG_DE, is_ref: false } => match classify(ctx, arena, arg2) {
                    Operand::Hl { is_ref: false } => {
                        b.byte(0xEB);
                        return Ok(b.finish(4));
                    }
                    _ => bad!(2),
                },
                _ => bad!(1),
            }
        }

        "im" => {
            let arg1 = need!(a1, 1);
            match imm(ctx, arena, arg1, false) {
                Some(Imm::Resolved(0)) => {
                    b.byte(0xED).byte(0x46);
                    return Ok(b.finish(8));
                }
                Some(Imm::Resolved(1)) => {
                    b.byte(0xED).byte(0x56);
                    return Ok(b.finish(8));
                }
                Some(Imm::Resolved(2)) => {
                    b.byte(0xED).byte(0x5E);
                    return Ok(b.finish(8));
                }
                _ => bad!(1),
            }
        }

        "in" => {
            let arg1 = need!(a1, 1);
            let arg2 = need!(a2, 2);
            match classify(ctx, arena, arg1) {
                Operand::Reg8 { code: REG_A, .. } => match classify(ctx, arena, arg2) {
                    Operand::Imm { value: Imm::Resolved(v), is_ref: true } => {
                        b.byte(0xDB).byte(v as u8);
                        return Ok(b.finish(11));
                    }
                    Operand::Reg8 { code: REG_C, is_ref: true } => {
                        b.byte(0xED).byte(0x78);
                        return Ok(b.finish(12));
                    }
                    _ => bad!(2),
                },
                Operand::Reg8 { code: r, is_ref: false } => match classify(ctx, arena, arg2) {
                    Operand::Reg8 { code: REG_C, is_ref: true } => {
                        b.byte(0xED).byte(0x40 | (r << 3));
                        return Ok(b.finish(12));
                    }
                    _ => bad!(2),
                },
                Operand::F => match classify(ctx, arena, arg2) {
                    Operand::Reg8 { code: REG_C, is_ref: true } => {
                        b.byte(0xED).byte(0x70);
                        return Ok(b.finish(12));
                    }
                    _ => bad!(2),
                },
                _ => bad!(1),
            }
        }

        "out" => {
            let arg1 = need!(a1, 1);
            let arg2 = need!(a2, 2);
            match classify(ctx, arena, arg1) {
                Operand::Imm { value: Imm::Resolved(v), is_ref: true } => match classify(ctx, arena, arg2) {
                    Operand::Reg8 { code: REG_A, .. } => {
                        b.byte(0xD3).byte(v as u8);
                        return Ok(b.finish(11));
                    }
                    _ => bad!(2),
                },
                Operand::Reg8 { code: REG_C, is_ref: true } => match classify(ctx, arena, arg2) {
                    Operand::Reg8 { code: r, is_ref: false } => {
                        b.byte(0xED).byte(0x41 | (r << 3));
                        return Ok(b.finish(12));
                    }
                    Operand::Imm { value: Imm::Resolved(0), is_ref: false } => {
                        b.byte(0xED).byte(0x71);
                        return Ok(b.finish(12));
                    }
                    _ => bad!(2),
                },
                _ => bad!(1),
            }
        }

        "pop" | "push" => {
            let arg1 = need!(a1, 1);
            let (base, cycles) = if m == "pop" { (0xC1, 10) } else { (0xC5, 11) };
            match classify(ctx, arena, arg1) {
                Operand::Pair { code: r, is_ref: false } if r != REG_SP => {
                    b.byte(base | (r << 4));
                    return Ok(b.finish(cycles));
                }
                Operand::Hl { is_ref: false } => {
                    b.byte(base | (REG_HL << 4));
                    return Ok(b.finish(cycles));
                }
                Operand::PushPop { code: r } => {
                    b.byte(base | (r << 4));
                    return Ok(b.finish(cycles));
                }
                Operand::IndexReg { code: idx, is_ref: false } => {
                    b.byte(0xDD | (idx << 5)).byte(if m == "pop" { 0xE1 } else { 0xE5 });
                    return Ok(b.finish(cycles + 4));
                }
                _ => bad!(1),
            }
        }

        "rl" | "rr" | "rlc" | "rrc" | "sla" | "sra" | "sll" | "srl" => {
            let arg1 = need!(a1, 1);
            let base = match m.as_str() {
                "rlc" => 0x00,
                "rrc" => 0x08,
                "rl" => 0x10,
                "rr" => 0x18,
                "sla" => 0x20,
                "sra" => 0x28,
                "sll" => 0x30,
                _ => 0x38,
            };
            match classify(ctx, arena, arg1) {
                Operand::Reg8 { code: r, is_ref: false } => {
                    b.byte(0xCB).byte(base | r);
                    return Ok(b.finish(8));
                }
                Operand::Hl { is_ref: true } => {
                    b.byte(0xCB).byte(base | 0x06);
                    return Ok(b.finish(15));
                }
                Operand::IndexOffset { code: idx, disp } => {
                    b.byte(0xDD | (idx << 5)).byte(0xCB);
                    b.push_imm(disp, 1);
                    b.byte(base | 0x06);
                    return Ok(b.finish(23));
                }
                _ => bad!(1),
            }
        }

        "rst" => {
            let arg1 = need!(a1, 1);
            let code = rstaddr(ctx, arena, arg1).ok_or_else(|| err(pos, "invalid RST target"))?;
            b.byte(0xC7 | (code << 3));
            return Ok(b.finish(11));
        }

        "ret" => {
            if args.is_empty() {
                b.byte(0xC9);
                return Ok(b.finish(10));
            }
            let arg1 = need!(a1, 1);
            let cond = condition(arena, arg1).ok_or_else(|| err(pos, "unexpected argument 1"))?;
            b.byte(0xC0 | (cond << 3));
            return Ok(b.finish(11));
        }

        // zero-operand instructions
        "ccf" => return Ok(Encoded::fixed(vec![0x3F], 4)),
        "cpl" => return Ok(Encoded::fixed(vec![0x2F], 4)),
        "daa" => return Ok(Encoded::fixed(vec![0x27], 4)),
        "di" => return Ok(Encoded::fixed(vec![0xF3], 4)),
        "ei" => return Ok(Encoded::fixed(vec![0xFB], 4)),
        "exx" => return Ok(Encoded::fixed(vec![0xD9], 4)),
        "halt" => return Ok(Encoded::fixed(vec![0x76], 4)),
        "nop" => return Ok(Encoded::fixed(vec![0x00], 4)),
        "rla" => return Ok(Encoded::fixed(vec![0x17], 4)),
        "rlca" => return Ok(Encoded::fixed(vec![0x07], 4)),
        "rra" => return Ok(Encoded::fixed(vec![0x1F], 4)),
        "rrca" => return Ok(Encoded::fixed(vec![0x0F], 4)),
        "scf" => return Ok(Encoded::fixed(vec![0x37], 4)),
        "cpd" => return Ok(Encoded::fixed(vec![0xED, 0xA9], 16)),
        "cpdr" => return Ok(Encoded::fixed(vec![0xED, 0xB9], 21)),
        "cpi" => return Ok(Encoded::fixed(vec![0xED, 0xA1], 16)),
        "cpir" => return Ok(Encoded::fixed(vec![0xED, 0xB1], 21)),
        "ind" => return Ok(Encoded::fixed(vec![0xED, 0xAA], 16)),
        "indr" => return Ok(Encoded::fixed(vec![0xED, 0xBA], 21)),
        "ini" => return Ok(Encoded::fixed(vec![0xED, 0xA2], 16)),
        "inir" => return Ok(Encoded::fixed(vec![0xED, 0xB2], 21)),
        "ldd" => return Ok(Encoded::fixed(vec![0xED, 0xA8], 16)),
        "lddr" => return Ok(Encoded::fixed(vec![0xED, 0xB8], 21)),
        "ldi" => return Ok(Encoded::fixed(vec![0xED, 0xA0], 16)),
        "ldir" => return Ok(Encoded::fixed(vec![0xED, 0xB0], 21)),
        "neg" => return Ok(Encoded::fixed(vec![0xED, 0x44], 8)),
        "outd" => return Ok(Encoded::fixed(vec![0xED, 0xAB], 16)),
        "otdr" => return Ok(Encoded::fixed(vec![0xED, 0xBB], 21)),
        "outi" => return Ok(Encoded::fixed(vec![0xED, 0xA3], 16)),
        "otir" => return Ok(Encoded::fixed(vec![0xED, 0xB3], 21)),
        "reti" => return Ok(Encoded::fixed(vec![0xED, 0x4D], 14)),
        "retn" => return Ok(Encoded::fixed(vec![0xED, 0x45], 14)),
        "rld" => return Ok(Encoded::fixed(vec![0xED, 0x6F], 18)),
        "rrd" => return Ok(Encoded::fixed(vec![0xED, 0x67], 18)),

        _ => return Err(err(pos, format!("no such instruction {mnemonic}"))),
    }
}

fn arg_or(a: Option<NodeId>, pos: &Pos, n: u8) -> Result<NodeId> {
    a.ok_or_else(|| err(pos, format!("argument {n} missing")))
}

/// `LD` has by far the most operand shapes of any Z80 mnemonic; it gets
/// its own function to keep `encode`'s outer match readable.
fn encode_ld(ctx: &mut EvalCtx, arena: &mut Arena, pos: &Pos, arg1: NodeId, arg2: NodeId, mut b: Builder) -> Result<Encoded> {
    macro_rules! bad {
        ($n:literal) => {
            return Err(err(pos, concat!("unexpected argument ", $n)))
        };
    }

    match classify(ctx, arena, arg1) {
        Operand::Reg8 { code: r, is_ref: false } => {
            let op2 = classify(ctx, arena, arg2);
            match (r, op2) {
                (REG_A, Operand::Pair { code: REG_BC, is_ref: true }) => {
                    b.byte(0x0A);
                    return Ok(b.finish(7));
                }
                (REG_A, Operand::Pair { code: REG_DE, is_ref: true }) => {
                    b.byte(0x1A);
                    return Ok(b.finish(7));
                }
                (REG_A, Operand::I) => {
                    b.byte(0xED).byte(0x57);
                    return Ok(b.finish(9));
                }
                (REG_A, Operand::R) => {
                    b.byte(0xED).byte(0x5F);
                    return Ok(b.finish(9));
                }
                (_, Operand::Reg8 { code: r2, is_ref: false }) => {
                    b.byte(0x40 | (r << 3) | r2);
                    return Ok(b.finish(4));
                }
                (_, Operand::Imm { value, is_ref: false }) => {
                    b.byte(0x06 | (r << 3));
                    b.push_imm(value, 1);
                    return Ok(b.finish(7));
                }
                (_, Operand::Hl { is_ref: true }) => {
                    b.byte(0x46 | (r << 3));
                    return Ok(b.finish(7));
                }
                (_, Operand::IndexOffset { code: idx, disp }) => {
                    b.byte(0xDD | (idx << 5)).byte(0x46 | (r << 3));
                    b.push_imm(disp, 1);
                    return Ok(b.finish(19));
                }
                (REG_A, Operand::Imm { value, is_ref: true }) => {
                    b.byte(0x3A);
                    b.push_imm(value, 2);
                    return Ok(b.finish(13));
                }
                (_, Operand::IxyHalf { prefix, reg }) => {
                    b.byte(prefix).byte(0x40 | (r << 3) | reg);
                    return Ok(b.finish(8));
                }
                _ => bad!(2),
            }
        }
        Operand::Hl { is_ref: true } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: r, is_ref: false } => {
                b.byte(0x70 | r);
                return Ok(b.finish(7));
            }
            Operand::Imm { value, is_ref: false } => {
                b.byte(0x36);
                b.push_imm(value, 1);
                return Ok(b.finish(10));
            }
            _ => bad!(2),
        },
        Operand::Hl { is_ref: false } => match classify(ctx, arena, arg2) {
            Operand::Imm { value, is_ref: true } => {
                b.byte(0x2A);
                b.push_imm(value, 2);
                return Ok(b.finish(16));
            }
            Operand::Imm { value, is_ref: false } => {
                b.byte(0x21);
                b.push_imm(value, 2);
                return Ok(b.finish(10));
            }
            _ => bad!(2),
        },
        Operand::IndexOffset { code: idx, disp } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: r2, is_ref: false } => {
                b.byte(0xDD | (idx << 5)).byte(0x70 | r2);
                b.push_imm(disp, 1);
                return Ok(b.finish(19));
            }
            Operand::Imm { value, is_ref: false } => {
                b.byte(0xDD | (idx << 5)).byte(0x36);
                b.push_imm(disp, 1);
                b.push_imm(value, 1);
                return Ok(b.finish(19));
            }
            _ => bad!(2),
        },
        Operand::Pair { code: REG_BC, is_ref: true } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: REG_A, .. } => {
                b.byte(0x02);
                return Ok(b.finish(7));
            }
            _ => bad!(2),
        },
        Operand::Pair { code: REG_DE, is_ref: true } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: REG_A, .. } => {
                b.byte(0x12);
                return Ok(b.finish(7));
            }
            _ => bad!(2),
        },
        Operand::Imm { value, is_ref: true } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: REG_A, .. } => {
                b.byte(0x32);
                b.push_imm(value, 2);
                return Ok(b.finish(13));
            }
            Operand::Hl { is_ref: false } => {
                b.byte(0x22);
                b.push_imm(value, 2);
                return Ok(b.finish(16));
            }
            Operand::IndexReg { code: idx, is_ref: false } => {
                b.byte(0xDD | (idx << 5)).byte(0x22);
                b.push_imm(value, 2);
                return Ok(b.finish(20));
            }
            Operand::Pair { code: r2, is_ref: false } => {
                b.byte(0xED).byte(0x43 | (r2 << 4));
                b.push_imm(value, 2);
                return Ok(b.finish(20));
            }
            _ => bad!(2),
        },
        Operand::I => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: REG_A, .. } => {
                b.byte(0xED).byte(0x47);
                return Ok(b.finish(9));
            }
            _ => bad!(2),
        },
        Operand::R => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: REG_A, .. } => {
                b.byte(0xED).byte(0x4F);
                return Ok(b.finish(9));
            }
            _ => bad!(2),
        },
        Operand::Pair { code: r, is_ref: false } => {
            let op2 = classify(ctx, arena, arg2);
            if r == REG_SP {
                match op2 {
                    Operand::Hl { is_ref: false } => {
                        b.byte(0xF9);
                        return Ok(b.finish(6));
                    }
                    Operand::IndexReg { code: idx, is_ref: false } => {
                        b.byte(0xDD | (idx << 5)).byte(0xF9);
                        return Ok(b.finish(10));
                    }
                    Operand::Imm { value, is_ref: false } => {
                        b.byte(0x01 | (r << 4));
                        b.push_imm(value, 2);
                        return Ok(b.finish(10));
                    }
                    Operand::Imm { value, is_ref: true } => {
                        b.byte(0xED).byte(0x4B | (r << 4));
                        b.push_imm(value, 2);
                        return Ok(b.finish(20));
                    }
                    _ => bad!(2),
                }
            } else {
                match op2 {
                    Operand::Imm { value, is_ref: false } => {
                        b.byte(0x01 | (r << 4));
                        b.push_imm(value, 2);
                        return Ok(b.finish(10));
                    }
                    Operand::Imm { value, is_ref: true } => {
                        b.byte(0xED).byte(0x4B | (r << 4));
                        b.push_imm(value, 2);
                        return Ok(b.finish(20));
                    }
                    _ => bad!(2),
                }
            }
        }
        Operand::IndexReg { code: idx, is_ref: false } => match classify(ctx, arena, arg2) {
            Operand::Imm { value, is_ref: false } => {
                b.byte(0xDD | (idx << 5)).byte(0x21);
                b.push_imm(value, 2);
                return Ok(b.finish(14));
            }
            Operand::Imm { value, is_ref: true } => {
                b.byte(0xDD | (idx << 5)).byte(0x2A);
                b.push_imm(value, 2);
                return Ok(b.finish(20));
            }
            _ => bad!(2),
        },
        Operand::IxyHalf { prefix, reg } => match classify(ctx, arena, arg2) {
            Operand::Reg8 { code: r2, is_ref: false } => {
                b.byte(prefix).byte(0x40 | (reg << 3) | r2);
                return Ok(b.finish(8));
            }
            Operand::Imm { value, is_ref: false } => {
                b.byte(prefix).byte(0x06 | (reg << 3));
                b.push_imm(value, 1);
                return Ok(b.finish(11));
            }
            Operand::IxyHalf { reg: reg2, .. } => {
                b.byte(prefix).byte(0x40 | (reg << 3) | reg2);
                return Ok(b.finish(8));
            }
            _ => bad!(2),
        },
        _ => bad!(1),
    }
}

/// Relative-jump displacement, evaluated against `instr_pc + 2` (every
/// relative jump on the Z80 is 2 bytes long).
fn reladdr(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId, instr_pc: i64) -> Option<Imm> {
    let data = arena.get(id).clone();
    if data.is_reference {
        return None;
    }
    let evaluated = eval(ctx, arena, id).ok()?;
    match arena.get(evaluated).kind {
        NodeKind::IntLiteral(target) => {
            let disp = target - (instr_pc + 2);
            if (-128..=127).contains(&disp) {
                Some(Imm::Resolved(disp))
            } else {
                None
            }
        }
        _ if !contains_reserved_ident(arena, id) => Some(Imm::Forward(id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::symtab::Symtab;

    fn enc(src_mnemonic: &str, args_src: &str) -> Encoded {
        let mut arena = Arena::new();
        let full = format!("{} {}\n", src_mnemonic, args_src);
        let stmts = crate::parser::parse_source(&mut arena, &full, "t.asm").unwrap();
        let (mnemonic, arg_ids) = match &arena.get(stmts[0]).kind {
            NodeKind::Instr { mnemonic, args } => (mnemonic.clone(), args.clone()),
            _ => panic!("expected instruction"),
        };
        let st = Symtab::new();
        let mut ctx = EvalCtx::new(&st, 0x8000);
        encode(&mut ctx, &mut arena, &Pos::default(), &mnemonic, &arg_ids, 0x8000).unwrap()
    }

    #[test]
    fn test_nop() {
        assert_eq!(enc("NOP", "").bytes, vec![0x00]);
    }

    #[test]
    fn test_ld_reg_imm8() {
        assert_eq!(enc("LD", "B,42").bytes, vec![0x06, 42]);
    }

    #[test]
    fn test_ld_reg_reg() {
        assert_eq!(enc("LD", "A,B").bytes, vec![0x78]);
    }

    #[test]
    fn test_ld_a_ref_hl() {
        assert_eq!(enc("LD", "A,(HL)").bytes, vec![0x7E]);
    }

    #[test]
    fn test_ld_indexed_offset() {
        assert_eq!(enc("LD", "A,(IX+5)").bytes, vec![0xDD, 0x7E, 5]);
        assert_eq!(enc("LD", "A,(IX-5)").bytes, vec![0xDD, 0x7E, (-5i8) as u8]);
    }

    #[test]
    fn test_ld_hl_imm16() {
        assert_eq!(enc("LD", "HL,0x1234").bytes, vec![0x21, 0x34, 0x12]);
    }

    #[test]
    fn test_bit_hl_ref() {
        assert_eq!(enc("BIT", "3,(HL)").bytes, vec![0xCB, 0x5E]);
    }

    #[test]
    fn test_sll_undocumented_accepted() {
        assert_eq!(enc("SLL", "B").bytes, vec![0xCB, 0x30]);
    }

    #[test]
    fn test_jr_forward_reference_is_patched() {
        let encoded = enc("JR", "later");
        assert_eq!(encoded.bytes, vec![0x18, 0]);
        assert_eq!(encoded.patches.len(), 1);
        assert!(encoded.patches[0].is_relative);
    }

    #[test]
    fn test_rst_rejects_non_multiple_of_8() {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, "RST 5\n", "t.asm").unwrap();
        let (mnemonic, args) = match &arena.get(stmts[0]).kind {
            NodeKind::Instr { mnemonic, args } => (mnemonic.clone(), args.clone()),
            _ => unreachable!(),
        };
        let st = Symtab::new();
        let mut ctx = EvalCtx::new(&st, 0);
        assert!(encode(&mut ctx, &mut arena, &Pos::default(), &mnemonic, &args, 0).is_err());
    }

    #[test]
    fn test_index_offset_forward_reference_is_patched() {
        let encoded = enc("LD", "A,(IX+table)");
        assert_eq!(encoded.bytes, vec![0xDD, 0x7E, 0]);
        assert_eq!(encoded.patches.len(), 1);
        assert_eq!(encoded.patches[0].width, 1);
        assert!(!encoded.patches[0].is_relative);
    }

    #[test]
    fn test_index_offset_forward_reference_negated() {
        let encoded = enc("LD", "A,(IX-table)");
        assert_eq!(encoded.bytes, vec![0xDD, 0x7E, 0]);
        assert_eq!(encoded.patches.len(), 1);
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, "NOP 1\n", "t.asm").unwrap();
        let (mnemonic, args) = match &arena.get(stmts[0]).kind {
            NodeKind::Instr { mnemonic, args } => (mnemonic.clone(), args.clone()),
            _ => unreachable!(),
        };
        let st = Symtab::new();
        let mut ctx = EvalCtx::new(&st, 0);
        assert!(encode(&mut ctx, &mut arena, &Pos::default(), &mnemonic, &args, 0).is_err());
    }
}
