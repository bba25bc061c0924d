//! Symbol table: name -> literal node, with local (`.`) and REPT-suffix scoping.

use std::collections::HashMap;

use crate::arena::{Arena, NodeId, NodeKind};
use crate::error::{AsmError, Pos, Result};

/// Keywords and register/condition names the user cannot bind.
pub const RESERVED: &[&str] = &[
    // registers / condition codes
    "a", "b", "c", "d", "e", "h", "l", "f", "i", "r", "bc", "de", "hl", "af", "af'", "sp", "ix",
    "iy", "ixh", "ixl", "iyh", "iyl", "nz", "z", "nc", "po", "pe", "p", "m",
    // mnemonics
    "adc", "add", "and", "bit", "call", "ccf", "cp", "cpd", "cpdr", "cpi", "cpir", "cpl", "daa",
    "dec", "di", "djnz", "ei", "ex", "exx", "halt", "im", "in", "inc", "ind", "indr", "ini",
    "inir", "jp", "jr", "ld", "ldd", "lddr", "ldi", "ldir", "neg", "nop", "or", "out", "outd",
    "otdr", "outi", "otir", "pop", "push", "res", "ret", "reti", "retn", "rla", "rl", "rlca",
    "rlc", "rld", "rra", "rr", "rrca", "rrc", "rrd", "rst", "sbc", "scf", "set", "sla", "sll",
    "sra", "srl", "sub", "xor",
    // directive keywords
    "org", "rept", "endr", "profile", "endprofile", "equ", "end", "db", "dw", "ds", "dm", "defb",
    "defw", "defs", "defm", "incbin", "include", "section", "if", "else", "endif",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

#[derive(Debug, Default)]
pub struct Symtab {
    values: HashMap<String, NodeId>,
}

impl Symtab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, arena: &Arena, name: &str, value: NodeId, pos: &Pos) -> Result<()> {
        if is_reserved(name) {
            return Err(AsmError::ReservedIdentifier { pos: pos.clone(), name: name.into() });
        }
        if self.values.contains_key(name) {
            return Err(AsmError::DuplicateLabel { pos: pos.clone(), name: name.into() });
        }
        let _ = arena;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Used for REPT loop variables and CLI `-D` seeds, which may legitimately overwrite.
    pub fn define_overwrite(&mut self, name: &str, value: NodeId) {
        self.values.insert(name.to_string(), value);
    }

    pub fn define_integer(&mut self, arena: &mut Arena, name: &str, i: i64, pos: Pos) {
        let node = arena.alloc(NodeKind::IntLiteral(i), pos);
        self.define_overwrite(name, node);
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.values.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}

/// Expand a possibly-local label name against the last global label.
///
/// `.loop` inside label scope `start` becomes `start.loop`. A local label
/// with no preceding global label is a hard error.
pub fn expand_local(name: &str, current_global: Option<&str>, pos: &Pos) -> Result<String> {
    if let Some(rest) = name.strip_prefix('.') {
        match current_global {
            Some(g) => Ok(format!("{g}.{rest}")),
            None => Err(AsmError::Syntax {
                pos: pos.clone(),
                message: format!("local label `{name}` has no preceding global label"),
            }),
        }
    } else {
        Ok(name.to_string())
    }
}

/// Append the `#i1#i2...` REPT-nesting suffix, innermost counter last.
pub fn rept_suffix(counters: &[u32]) -> String {
    let mut s = String::new();
    for c in counters {
        s.push('#');
        s.push_str(&c.to_string());
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_rejected() {
        let mut arena = Arena::new();
        let mut st = Symtab::new();
        let v = arena.alloc(NodeKind::IntLiteral(1), Pos::default());
        assert!(st.define(&arena, "hl", v, &Pos::default()).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut arena = Arena::new();
        let mut st = Symtab::new();
        let v1 = arena.alloc(NodeKind::IntLiteral(1), Pos::default());
        let v2 = arena.alloc(NodeKind::IntLiteral(2), Pos::default());
        st.define(&arena, "foo", v1, &Pos::default()).unwrap();
        assert!(st.define(&arena, "foo", v2, &Pos::default()).is_err());
    }

    #[test]
    fn test_local_expansion() {
        let pos = Pos::default();
        assert_eq!(expand_local(".loop", Some("start"), &pos).unwrap(), "start.loop");
        assert_eq!(expand_local("plain", Some("start"), &pos).unwrap(), "plain");
        assert!(expand_local(".loop", None, &pos).is_err());
    }

    #[test]
    fn test_rept_suffix_nesting() {
        assert_eq!(rept_suffix(&[0, 2]), "#0#2");
        assert_eq!(rept_suffix(&[]), "");
    }
}
