//! Line-oriented tokenizer for Z80 source text.
//!
//! One statement per line (directives may still span multiple tokens on
//! that line, e.g. `DB 1,2,3`). Comments start with `;` and run to end of
//! line. This is intentionally thin: all semantic work happens later in
//! the compile driver and encoder.

use crate::error::{AsmError, Pos, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Str(String),
    Dollar,
    Colon,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Tilde,
    Bang,
    Shl,
    Shr,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Newline,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    file: &'a str,
    line: u32,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0, file, line: 1, line_start: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c == Some(b'\n') {
            self.line += 1;
        }
        if c.is_some() {
            self.pos += 1;
        }
        if c == Some(b'\n') {
            self.line_start = self.pos;
        }
        c
    }

    fn pos_here(&self) -> Pos {
        Pos::new(self.file, self.line, (self.pos - self.line_start + 1) as u32)
    }

    pub fn tokenize(mut self) -> Result<Vec<(Tok, Pos)>> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.bump();
                }
                Some(b';') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.bump();
                    }
                }
                Some(b'\n') => {
                    let pos = self.pos_here();
                    self.bump();
                    out.push((Tok::Newline, pos));
                }
                Some(c) if c.is_ascii_digit() => {
                    let pos = self.pos_here();
                    out.push((self.lex_number()?, pos));
                }
                Some(b'\'') | Some(b'"') => {
                    let pos = self.pos_here();
                    out.push((self.lex_string()?, pos));
                }
                Some(c) if c.is_ascii_alphabetic() || c == b'_' || c == b'.' => {
                    let pos = self.pos_here();
                    out.push((self.lex_ident(), pos));
                }
                Some(b'$') => {
                    let pos = self.pos_here();
                    // `$7F` hex literal vs bare `$` (current PC).
                    if self.peek2().map(|c| c.is_ascii_hexdigit()).unwrap_or(false) {
                        self.bump();
                        out.push((self.lex_hex_digits()?, pos));
                    } else {
                        self.bump();
                        out.push((Tok::Dollar, pos));
                    }
                }
                Some(b'%') => {
                    let pos = self.pos_here();
                    if self.peek2().map(|c| c == b'0' || c == b'1').unwrap_or(false) {
                        self.bump();
                        out.push((self.lex_binary_digits()?, pos));
                    } else {
                        self.bump();
                        out.push((Tok::Percent, pos));
                    }
                }
                Some(c) => {
                    let pos = self.pos_here();
                    out.push((self.lex_symbol(c)?, pos));
                }
            }
        }
        Ok(out)
    }

    fn lex_symbol(&mut self, c: u8) -> Result<Tok> {
        self.bump();
        Ok(match c {
            b':' => Tok::Colon,
            b',' => Tok::Comma,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'&' => Tok::Amp,
            b'|' => Tok::Pipe,
            b'~' => Tok::Tilde,
            b'/' => Tok::Slash,
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::EqEq
                } else {
                    Tok::Eq
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::Ne
                } else {
                    Tok::Bang
                }
            }
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.bump();
                    Tok::Shl
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.bump();
                    Tok::Shr
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            other => {
                return Err(AsmError::Syntax {
                    pos: self.pos_here(),
                    message: format!("unexpected character '{}'", other as char),
                })
            }
        })
    }

    fn lex_ident(&mut self) -> Tok {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'\'') {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        Tok::Ident(text)
    }

    fn lex_hex_digits(&mut self) -> Result<Tok> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value = i64::from_str_radix(text, 16).map_err(|_| AsmError::Syntax {
            pos: self.pos_here(),
            message: format!("invalid hex literal '{text}'"),
        })?;
        Ok(Tok::Int(value))
    }

    fn lex_binary_digits(&mut self) -> Result<Tok> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0') | Some(b'1')) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value = i64::from_str_radix(text, 2).map_err(|_| AsmError::Syntax {
            pos: self.pos_here(),
            message: format!("invalid binary literal '{text}'"),
        })?;
        Ok(Tok::Int(value))
    }

    /// Decimal, `0x..`/`0o..`/`0b..`, and C64-style suffixed (`7Fh`, `1010b`, `17o`) literals.
    fn lex_number(&mut self) -> Result<Tok> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric()) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        parse_numeric(&text).map(Tok::Int).ok_or_else(|| AsmError::Syntax {
            pos: self.pos_here(),
            message: format!("invalid numeric literal '{text}'"),
        })
    }

    fn lex_string(&mut self) -> Result<Tok> {
        let quote = self.bump().unwrap();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(AsmError::Syntax {
                        pos: self.pos_here(),
                        message: "unterminated string literal".into(),
                    })
                }
                Some(c) if c == quote => break,
                Some(b'\\') => {
                    let esc = self.bump().ok_or_else(|| AsmError::Syntax {
                        pos: self.pos_here(),
                        message: "unterminated escape".into(),
                    })?;
                    s.push(match esc {
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'0' => '\0',
                        other => other as char,
                    });
                }
                Some(c) => s.push(c as char),
            }
        }
        Ok(Tok::Str(s))
    }
}

/// Parse a numeric literal in any supported base: decimal, `0x`/`$`/`h`-suffix
/// hex, `0b`/`%`/`b`-suffix binary, leading-zero or `0o`/`o`-suffix octal.
pub fn parse_numeric(text: &str) -> Option<i64> {
    let lower = text.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("0x") {
        return i64::from_str_radix(rest, 16).ok();
    }
    if let Some(rest) = lower.strip_prefix("0b") {
        return i64::from_str_radix(rest, 2).ok();
    }
    if let Some(rest) = lower.strip_prefix("0o") {
        return i64::from_str_radix(rest, 8).ok();
    }
    if let Some(rest) = lower.strip_suffix('h') {
        return i64::from_str_radix(rest, 16).ok();
    }
    if let Some(rest) = lower.strip_suffix('b') {
        if rest.chars().all(|c| c == '0' || c == '1') && !rest.is_empty() {
            return i64::from_str_radix(rest, 2).ok();
        }
    }
    if let Some(rest) = lower.strip_suffix('o') {
        return i64::from_str_radix(rest, 8).ok();
    }
    if lower.len() > 1 && lower.starts_with('0') && lower.chars().all(|c| c.is_ascii_digit()) {
        return i64::from_str_radix(&lower[1..], 8).ok();
    }
    lower.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_bases() {
        assert_eq!(parse_numeric("123"), Some(123));
        assert_eq!(parse_numeric("0x7F"), Some(0x7F));
        assert_eq!(parse_numeric("7Fh"), Some(0x7F));
        assert_eq!(parse_numeric("0b1010"), Some(0b1010));
        assert_eq!(parse_numeric("1010b"), Some(0b1010));
        assert_eq!(parse_numeric("017"), Some(0o17));
        assert_eq!(parse_numeric("0o17"), Some(0o17));
        assert_eq!(parse_numeric("17o"), Some(0o17));
    }

    #[test]
    fn test_tokenize_instruction_line() {
        let toks = Lexer::new("LD A,(IX+1) ; comment\n", "t.asm").tokenize().unwrap();
        let kinds: Vec<_> = toks.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                Tok::Ident("LD".into()),
                Tok::Ident("A".into()),
                Tok::Comma,
                Tok::LParen,
                Tok::Ident("IX".into()),
                Tok::Plus,
                Tok::Int(1),
                Tok::RParen,
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn test_dollar_literal_vs_pc() {
        let toks = Lexer::new("$7F $\n", "t.asm").tokenize().unwrap();
        let kinds: Vec<_> = toks.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(kinds, vec![Tok::Int(0x7F), Tok::Dollar, Tok::Newline]);
    }
}
