//! Recursive-descent parser over the token stream, producing an arena of
//! [`NodeKind`] statements and expressions.
//!
//! One statement per source line (an optional label, then an optional
//! directive or instruction). Directive keywords and mnemonics are
//! recognised case-insensitively; everything else is an identifier.

use crate::arena::{Arena, BinOp, DefKind, NodeId, NodeKind, UnOp};
use crate::error::{AsmError, Pos, Result};
use crate::lexer::{Lexer, Tok};

pub struct Parser<'a> {
    toks: Vec<(Tok, Pos)>,
    idx: usize,
    arena: &'a mut Arena,
}

pub fn parse_source(arena: &mut Arena, source: &str, file: &str) -> Result<Vec<NodeId>> {
    let toks = Lexer::new(source, file).tokenize()?;
    let mut parser = Parser { toks, idx: 0, arena };
    parser.parse_statements()
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        self.toks.get(self.idx).map(|(t, _)| t).unwrap_or(&Tok::Newline)
    }

    fn peek_pos(&self) -> Pos {
        self.toks
            .get(self.idx)
            .map(|(_, p)| p.clone())
            .or_else(|| self.toks.last().map(|(_, p)| p.clone()))
            .unwrap_or_default()
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks.get(self.idx).map(|(t, _)| t.clone()).unwrap_or(Tok::Newline);
        if self.idx < self.toks.len() {
            self.idx += 1;
        }
        t
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.bump();
        }
    }

    fn expect_ident_ci(&mut self, word: &str) -> bool {
        if let Tok::Ident(s) = self.peek() {
            if s.eq_ignore_ascii_case(word) {
                self.bump();
                return true;
            }
        }
        false
    }

    fn parse_statements(&mut self) -> Result<Vec<NodeId>> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while self.idx < self.toks.len() {
            self.parse_line(&mut stmts)?;
            self.skip_newlines();
        }
        Ok(stmts)
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline) || self.idx >= self.toks.len()
    }

    fn parse_line(&mut self, stmts: &mut Vec<NodeId>) -> Result<()> {
        let pos = self.peek_pos();

        // A `name:` at the start of a line is always a label. Bare labels
        // without a colon are not supported: nothing else distinguishes
        // `foo` the label from `nop` the zero-operand instruction once
        // whitespace is gone.
        if let Tok::Ident(name) = self.peek().clone() {
            let next_is_colon = matches!(self.toks.get(self.idx + 1).map(|(t, _)| t), Some(Tok::Colon));
            if next_is_colon {
                self.bump();
                self.bump(); // colon
                stmts.push(self.arena.alloc(NodeKind::Label(name), pos.clone()));
            }
        }

        if self.at_line_end() {
            return Ok(());
        }

        let pos = self.peek_pos();
        match self.peek().clone() {
            Tok::Ident(word) if word.eq_ignore_ascii_case("equ") => {
                return Err(AsmError::Syntax { pos, message: "EQU without a preceding name".into() });
            }
            Tok::Ident(word) => {
                let lw = word.to_ascii_lowercase();
                match lw.as_str() {
                    "org" => {
                        self.bump();
                        let e = self.parse_expr()?;
                        stmts.push(self.arena.alloc(NodeKind::Org(e), pos));
                    }
                    "db" | "defb" | "dm" | "defm" => {
                        self.bump();
                        let kind = if lw == "dm" || lw == "defm" { DefKind::Dm } else { DefKind::Db };
                        let items = self.parse_expr_list()?;
                        stmts.push(self.arena.alloc(NodeKind::Def { kind, items }, pos));
                    }
                    "dw" | "defw" => {
                        self.bump();
                        let items = self.parse_expr_list()?;
                        stmts.push(self.arena.alloc(NodeKind::Def { kind: DefKind::Dw, items }, pos));
                    }
                    "ds" | "defs" => {
                        self.bump();
                        let items = self.parse_expr_list()?;
                        stmts.push(self.arena.alloc(NodeKind::Def { kind: DefKind::Ds, items }, pos));
                    }
                    "incbin" => {
                        self.bump();
                        let path = match self.bump() {
                            Tok::Str(s) => s,
                            _ => {
                                return Err(AsmError::Syntax {
                                    pos,
                                    message: "INCBIN expects a string path".into(),
                                })
                            }
                        };
                        stmts.push(self.arena.alloc(NodeKind::Incbin { path }, pos));
                    }
                    "section" => {
                        self.bump();
                        let name = match self.bump() {
                            Tok::Ident(n) => n,
                            _ => {
                                return Err(AsmError::Syntax { pos, message: "SECTION expects a name".into() })
                            }
                        };
                        let mut base = None;
                        let mut fill = None;
                        while matches!(self.peek(), Tok::Comma) {
                            self.bump();
                            if self.expect_ident_ci("base") {
                                self.expect_eq();
                                base = Some(self.parse_expr()?);
                            } else if self.expect_ident_ci("fill") {
                                self.expect_eq();
                                fill = Some(self.parse_expr()?);
                            } else {
                                self.bump();
                            }
                        }
                        stmts.push(self.arena.alloc(NodeKind::Section { name, base, fill }, pos));
                    }
                    "rept" => {
                        self.bump();
                        let count = self.parse_expr()?;
                        let mut var = None;
                        if matches!(self.peek(), Tok::Comma) {
                            self.bump();
                            if let Tok::Ident(v) = self.bump() {
                                var = Some(v);
                            }
                        }
                        stmts.push(self.arena.alloc(NodeKind::Rept { count, var }, pos));
                    }
                    "endr" => {
                        self.bump();
                        stmts.push(self.arena.alloc(NodeKind::Endr, pos));
                    }
                    "if" => {
                        self.bump();
                        let e = self.parse_expr()?;
                        stmts.push(self.arena.alloc(NodeKind::If(e), pos));
                    }
                    "else" => {
                        self.bump();
                        stmts.push(self.arena.alloc(NodeKind::Else, pos));
                    }
                    "endif" => {
                        self.bump();
                        stmts.push(self.arena.alloc(NodeKind::Endif, pos));
                    }
                    "profile" => {
                        self.bump();
                        let name = if self.at_line_end() { None } else { Some(self.parse_expr()?) };
                        stmts.push(self.arena.alloc(NodeKind::Profile { name }, pos));
                    }
                    "endprofile" => {
                        self.bump();
                        stmts.push(self.arena.alloc(NodeKind::EndProfile, pos));
                    }
                    "end" => {
                        self.bump();
                        stmts.push(self.arena.alloc(NodeKind::End, pos));
                    }
                    "include" => {
                        return Err(AsmError::Syntax {
                            pos,
                            message: "INCLUDE requires an external preprocessor pass".into(),
                        })
                    }
                    _ => {
                        // EQU: NAME EQU expr
                        if let Some(Tok::Ident(next)) = self.toks.get(self.idx + 1).map(|(t, _)| t.clone()) {
                            if next.eq_ignore_ascii_case("equ") {
                                let name = word;
                                self.bump();
                                self.bump();
                                let value = self.parse_expr()?;
                                stmts.push(self.arena.alloc(NodeKind::Equ { name, value }, pos));
                                return Ok(());
                            }
                        }
                        // instruction
                        self.bump();
                        let args = self.parse_instr_args()?;
                        stmts.push(self.arena.alloc(NodeKind::Instr { mnemonic: word, args }, pos));
                    }
                }
            }
            other => {
                return Err(AsmError::Syntax {
                    pos,
                    message: format!("unexpected token {other:?}"),
                })
            }
        }

        if !self.at_line_end() {
            return Err(AsmError::Syntax {
                pos: self.peek_pos(),
                message: "unexpected trailing tokens on line".into(),
            });
        }
        Ok(())
    }

    fn expect_eq(&mut self) {
        if matches!(self.peek(), Tok::Eq) {
            self.bump();
        }
    }

    fn parse_instr_args(&mut self) -> Result<Vec<NodeId>> {
        if self.at_line_end() {
            return Ok(Vec::new());
        }
        self.parse_expr_list()
    }

    fn parse_expr_list(&mut self) -> Result<Vec<NodeId>> {
        let mut items = vec![self.parse_arg()?];
        while matches!(self.peek(), Tok::Comma) {
            self.bump();
            items.push(self.parse_arg()?);
        }
        Ok(items)
    }

    /// A top-level instruction/data argument: a bare string literal is kept
    /// as a string node (for `DB "text"`); otherwise it's an expression.
    fn parse_arg(&mut self) -> Result<NodeId> {
        if let Tok::Str(s) = self.peek().clone() {
            let pos = self.peek_pos();
            self.bump();
            return Ok(self.arena.alloc(NodeKind::StringLiteral(s), pos));
        }
        self.parse_expr()
    }

    fn parse_expr(&mut self) -> Result<NodeId> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_bitor()?;
            lhs = self.arena.alloc(NodeKind::Binary(op, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_bitand()?;
        while matches!(self.peek(), Tok::Pipe) {
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_bitand()?;
            lhs = self.arena.alloc(NodeKind::Binary(BinOp::Or, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_shift()?;
        while matches!(self.peek(), Tok::Amp) {
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_shift()?;
            lhs = self.arena.alloc(NodeKind::Binary(BinOp::And, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Shl => BinOp::Shl,
                Tok::Shr => BinOp::Shr,
                _ => break,
            };
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = self.arena.alloc(NodeKind::Binary(op, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = self.arena.alloc(NodeKind::Binary(op, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            let pos = self.peek_pos();
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = self.arena.alloc(NodeKind::Binary(op, lhs, rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId> {
        let pos = self.peek_pos();
        let op = match self.peek() {
            Tok::Plus => Some(UnOp::Plus),
            Tok::Minus => Some(UnOp::Neg),
            Tok::Bang => Some(UnOp::Not),
            Tok::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(self.arena.alloc(NodeKind::Unary(op, inner), pos));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<NodeId> {
        let pos = self.peek_pos();
        match self.bump() {
            Tok::Int(v) => Ok(self.arena.alloc(NodeKind::IntLiteral(v), pos)),
            Tok::Str(s) => Ok(self.arena.alloc(NodeKind::StringLiteral(s), pos)),
            Tok::Dollar => Ok(self.arena.alloc(NodeKind::Dollar, pos)),
            Tok::Ident(name) => Ok(self.arena.alloc(NodeKind::Ident(name), pos)),
            Tok::LParen => {
                let inner = self.parse_expr()?;
                if !matches!(self.peek(), Tok::RParen) {
                    return Err(AsmError::Syntax {
                        pos: self.peek_pos(),
                        message: "expected ')'".into(),
                    });
                }
                self.bump();
                Ok(self.arena.alloc_ref(NodeKind::Simple(inner), pos, true))
            }
            other => Err(AsmError::Syntax {
                pos,
                message: format!("unexpected token {other:?} in expression"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Arena, Vec<NodeId>) {
        let mut arena = Arena::new();
        let stmts = parse_source(&mut arena, src, "t.asm").unwrap();
        (arena, stmts)
    }

    #[test]
    fn test_label_and_instruction() {
        let (arena, stmts) = parse("start: LD A,42\nJP start\n");
        assert_eq!(stmts.len(), 3);
        assert_eq!(arena.get(stmts[0]).kind, NodeKind::Label("start".into()));
        match &arena.get(stmts[1]).kind {
            NodeKind::Instr { mnemonic, args } => {
                assert_eq!(mnemonic, "LD");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_equ() {
        let (arena, stmts) = parse("X EQU 5\n");
        match &arena.get(stmts[0]).kind {
            NodeKind::Equ { name, .. } => assert_eq!(name, "X"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_db_mixed_args() {
        let (arena, stmts) = parse("DB 1,2,\"AB\",3\n");
        match &arena.get(stmts[0]).kind {
            NodeKind::Def { kind: DefKind::Db, items } => assert_eq!(items.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_index_reference_arg() {
        let (arena, stmts) = parse("LD A,(IX-1)\n");
        match &arena.get(stmts[0]).kind {
            NodeKind::Instr { args, .. } => {
                assert!(arena.get(args[1]).is_reference);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rept_endr() {
        let (arena, stmts) = parse("REPT 3\nNOP\nENDR\n");
        assert!(matches!(arena.get(stmts[0]).kind, NodeKind::Rept { .. }));
        assert!(matches!(arena.get(stmts[2]).kind, NodeKind::Endr));
    }
}
