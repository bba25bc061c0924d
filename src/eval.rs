//! Non-mutating expression evaluator.
//!
//! `eval` never changes the input tree: it builds fresh nodes for every
//! fold, because the same expression node is evaluated once in pass 1
//! (with an incomplete symbol table and the live PC) and again in pass 2
//! (with a complete symbol table and a REPT suffix in scope). Mutating in
//! place would make the second evaluation see the first one's answer.

use crate::arena::{Arena, BinOp, NodeId, NodeKind, UnOp};
use crate::error::{AsmError, Pos, Result};
use crate::symtab::Symtab;

/// Evaluation context threaded through `eval`.
pub struct EvalCtx<'a> {
    pub symtab: &'a Symtab,
    pub pc: i64,
    /// Disable `$`-as-PC substitution (used for `EQU` right-hand sides).
    pub dollar_is_pc: bool,
    /// Suffix appended to unresolved identifier lookups (pass-2, inside REPT).
    pub rept_suffix: Option<&'a str>,
    /// Set to true whenever a fold actually happens.
    pub arithmetic_happened: bool,
}

impl<'a> EvalCtx<'a> {
    pub fn new(symtab: &'a Symtab, pc: i64) -> Self {
        Self { symtab, pc, dollar_is_pc: true, rept_suffix: None, arithmetic_happened: false }
    }
}

fn is_int_literal(arena: &Arena, id: NodeId) -> Option<i64> {
    match arena.get(id).kind {
        NodeKind::IntLiteral(v) => Some(v),
        _ => None,
    }
}

/// Coerce a single-character string into its ASCII value, leaving longer
/// strings untouched (those are only legal inside `DB`/`DM`).
fn coerce_single_char(arena: &mut Arena, id: NodeId) -> NodeId {
    let data = arena.get(id);
    if let NodeKind::StringLiteral(s) = &data.kind {
        if s.len() == 1 {
            let pos = data.pos.clone();
            let v = s.as_bytes()[0] as i64;
            return arena.alloc(NodeKind::IntLiteral(v), pos);
        }
    }
    id
}

pub fn eval(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId) -> Result<NodeId> {
    let data = arena.get(id).clone();
    let pos = data.pos.clone();
    let is_ref = data.is_reference;

    match data.kind {
        NodeKind::Dollar => {
            if ctx.dollar_is_pc {
                Ok(arena.alloc_ref(NodeKind::IntLiteral(ctx.pc), pos, is_ref))
            } else {
                Ok(id)
            }
        }

        NodeKind::StringLiteral(_) => Ok(coerce_single_char(arena, id)),

        NodeKind::IntLiteral(_) => Ok(id),

        NodeKind::Ident(ref name) => {
            if let Some(value) = ctx.symtab.lookup(name) {
                eval(ctx, arena, value)
            } else if let Some(suffix) = ctx.rept_suffix {
                let suffixed = format!("{name}{suffix}");
                if let Some(value) = ctx.symtab.lookup(&suffixed) {
                    eval(ctx, arena, value)
                } else {
                    Ok(id)
                }
            } else {
                Ok(id)
            }
        }

        NodeKind::Simple(inner) => {
            let evaluated = eval(ctx, arena, inner)?;
            let data = arena.get(evaluated).clone();
            Ok(arena.alloc_ref(data.kind, pos, is_ref))
        }

        NodeKind::Unary(op, inner) => {
            let evaluated = eval(ctx, arena, inner)?;
            if let Some(v) = is_int_literal(arena, evaluated) {
                ctx.arithmetic_happened = true;
                let folded = match op {
                    UnOp::Plus => v,
                    UnOp::Neg => (-v) as i32 as i64,
                    UnOp::Not => i64::from(v == 0),
                    UnOp::BitNot => !(v as i32) as i64,
                };
                Ok(arena.alloc_ref(NodeKind::IntLiteral(folded), pos, is_ref))
            } else {
                Ok(arena.alloc_ref(NodeKind::Unary(op, evaluated), pos, is_ref))
            }
        }

        NodeKind::Binary(op, lhs, rhs) => {
            let l = eval(ctx, arena, lhs)?;
            let r = eval(ctx, arena, rhs)?;
            match (is_int_literal(arena, l), is_int_literal(arena, r)) {
                (Some(a), Some(b)) => {
                    ctx.arithmetic_happened = true;
                    let folded = fold_binary(op, a, b, &pos)?;
                    Ok(arena.alloc_ref(NodeKind::IntLiteral(folded), pos, is_ref))
                }
                _ => Ok(arena.alloc_ref(NodeKind::Binary(op, l, r), pos, is_ref)),
            }
        }

        other => Ok(arena.alloc_ref(other, pos, is_ref)),
    }
}

fn fold_binary(op: BinOp, a: i64, b: i64, pos: &Pos) -> Result<i64> {
    let a = a as i32;
    let b = b as i32;
    Ok(match op {
        BinOp::Add => a.wrapping_add(b) as i64,
        BinOp::Sub => a.wrapping_sub(b) as i64,
        BinOp::Mul => a.wrapping_mul(b) as i64,
        BinOp::Div => {
            if b == 0 {
                return Err(AsmError::DivisionByZero { pos: pos.clone() });
            }
            a.wrapping_div(b) as i64
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(AsmError::DivisionByZero { pos: pos.clone() });
            }
            a.wrapping_rem(b) as i64
        }
        BinOp::And => (a & b) as i64,
        BinOp::Or => (a | b) as i64,
        BinOp::Shl => a.wrapping_shl(b as u32) as i64,
        BinOp::Shr => a.wrapping_shr(b as u32) as i64,
        BinOp::Eq => i64::from(a == b),
        BinOp::Ne => i64::from(a != b),
        BinOp::Lt => i64::from(a < b),
        BinOp::Le => i64::from(a <= b),
        BinOp::Gt => i64::from(a > b),
        BinOp::Ge => i64::from(a >= b),
    })
}

/// Convenience: evaluate and require the result to be an integer literal.
pub fn eval_to_int(ctx: &mut EvalCtx, arena: &mut Arena, id: NodeId, name_hint: &str) -> Result<i64> {
    let result = eval(ctx, arena, id)?;
    match arena.get(result).kind {
        NodeKind::IntLiteral(v) => Ok(v),
        NodeKind::Ident(ref n) => {
            Err(AsmError::UnresolvedSymbol { pos: arena.get(result).pos.clone(), name: n.clone() })
        }
        _ => Err(AsmError::UnresolvedSymbol {
            pos: arena.get(result).pos.clone(),
            name: name_hint.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;

    fn lit(arena: &mut Arena, v: i64) -> NodeId {
        arena.alloc(NodeKind::IntLiteral(v), Pos::default())
    }

    #[test]
    fn test_fold_arithmetic() {
        let mut arena = Arena::new();
        let st = Symtab::new();
        let a = lit(&mut arena, 5);
        let b = lit(&mut arena, 5);
        let mul = arena.alloc(NodeKind::Binary(BinOp::Mul, a, b), Pos::default());
        let one = lit(&mut arena, 1);
        let expr = arena.alloc(NodeKind::Binary(BinOp::Add, mul, one), Pos::default());

        let mut ctx = EvalCtx::new(&st, 0);
        let result = eval(&mut ctx, &mut arena, expr).unwrap();
        assert_eq!(arena.get(result).kind, NodeKind::IntLiteral(26));
        assert!(ctx.arithmetic_happened);
    }

    #[test]
    fn test_dollar_as_pc() {
        let mut arena = Arena::new();
        let st = Symtab::new();
        let dollar = arena.alloc(NodeKind::Dollar, Pos::default());
        let mut ctx = EvalCtx::new(&st, 0x1234);
        let result = eval(&mut ctx, &mut arena, dollar).unwrap();
        assert_eq!(arena.get(result).kind, NodeKind::IntLiteral(0x1234));
    }

    #[test]
    fn test_dollar_disabled_in_equ() {
        let mut arena = Arena::new();
        let st = Symtab::new();
        let dollar = arena.alloc(NodeKind::Dollar, Pos::default());
        let mut ctx = EvalCtx::new(&st, 0x1234);
        ctx.dollar_is_pc = false;
        let result = eval(&mut ctx, &mut arena, dollar).unwrap();
        assert_eq!(arena.get(result).kind, NodeKind::Dollar);
    }

    #[test]
    fn test_rept_suffix_fallback_lookup() {
        let mut arena = Arena::new();
        let mut st = Symtab::new();
        st.define_integer(&mut arena, "loop#0", 99, Pos::default());
        let ident = arena.alloc(NodeKind::Ident("loop".into()), Pos::default());

        let mut ctx = EvalCtx::new(&st, 0);
        ctx.rept_suffix = Some("#0");
        let result = eval(&mut ctx, &mut arena, ident).unwrap();
        assert_eq!(arena.get(result).kind, NodeKind::IntLiteral(99));
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let mut arena = Arena::new();
        let st = Symtab::new();
        let a = lit(&mut arena, 1);
        let b = lit(&mut arena, 0);
        let expr = arena.alloc(NodeKind::Binary(BinOp::Div, a, b), Pos::default());
        let mut ctx = EvalCtx::new(&st, 0);
        assert!(eval(&mut ctx, &mut arena, expr).is_err());
    }

    #[test]
    fn test_unresolved_identifier_residualises() {
        let mut arena = Arena::new();
        let st = Symtab::new();
        let ident = arena.alloc(NodeKind::Ident("later".into()), Pos::default());
        let mut ctx = EvalCtx::new(&st, 0);
        let result = eval(&mut ctx, &mut arena, ident).unwrap();
        assert_eq!(arena.get(result).kind, NodeKind::Ident("later".into()));
    }
}
