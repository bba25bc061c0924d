//! bc80asm - Two-pass Z80 Assembler and Disassembler
//!
//! A two-pass Z80 assembler with back-patching for forward references,
//! plus a companion disassembler. Targets raw binary images, ELF32 `REL`
//! objects, and ZX Spectrum `.SNA` snapshots.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bc80asm::driver::{compile, CompileOptions};
//! use bc80asm::arena::Arena;
//! use bc80asm::parser::parse_source;
//! use bc80asm::render::raw::render_raw;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut arena = Arena::new();
//!     let stmts = parse_source(&mut arena, "ORG 0x8000\nNOP\nHALT\n", "game.asm")?;
//!     let output = compile(&mut arena, &stmts, &CompileOptions::default())?;
//!     let bytes = render_raw(&output.render)?;
//!     println!("{} bytes assembled", bytes.len());
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline
//!
//! - **Lexer/Parser** (`lexer`, `parser`, `arena`): source text to an
//!   arena-allocated statement list.
//! - **Evaluator** (`eval`): non-mutating constant folding over expression
//!   nodes, aware of `$` and forward references.
//! - **Symbol table** (`symtab`): global/local/REPT-scoped label storage.
//! - **Encoder** (`encoder`): one Z80 mnemonic/operand shape to its byte
//!   sequence, cycle count, and any unresolved patches.
//! - **Driver** (`driver`): the two-pass compile loop tying the above
//!   together, plus `REPT`/`IF`/`SECTION`/`PROFILE` directive handling.
//! - **Renderer** (`render`): section buffers and the raw/ELF/SNA backends.
//! - **Disassembler** (`disasm`): the reverse direction, byte image to text.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod arena;
#[cfg(feature = "cli")]
pub mod config;
pub mod disasm;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod fs;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod symtab;

pub use disasm::{disassemble, DisasOptions};
pub use driver::{compile, CompileOptions, CompileOutput, ProfileMode, ProfileWindow};
pub use error::{AsmError, Diagnostics, Pos, Result};

use arena::Arena;

/// Assembles `source` in one call: parse, compile, and render to a raw
/// byte image. Convenience wrapper for callers who don't need ELF/SNA
/// output or access to the intermediate arena/driver state.
pub fn assemble(source: &str, file: &str, opts: &CompileOptions) -> Result<Vec<u8>> {
    let mut arena = Arena::new();
    let stmts = parser::parse_source(&mut arena, source, file)?;
    let output = compile(&mut arena, &stmts, opts)?;
    render::raw::render_raw(&output.render)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_end_to_end() {
        let bytes = assemble("ORG 0x100\nNOP\nHALT\n", "t.asm", &CompileOptions::default()).unwrap();
        assert_eq!(bytes, vec![0x00, 0x76]);
    }

    #[test]
    fn test_assemble_forward_reference() {
        let bytes = assemble(
            "ORG 0\nstart: LD A,42\nJP start\n",
            "t.asm",
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(bytes, vec![0x3E, 0x2A, 0xC3, 0x00, 0x00]);
    }

    #[test]
    fn test_disassemble_round_trip() {
        let bytes = assemble("ORG 0\nLD A,(IX-1)\n", "t.asm", &CompileOptions::default()).unwrap();
        assert_eq!(bytes, vec![0xDD, 0x7E, 0xFF]);
        let text = disassemble(&bytes, &DisasOptions::default());
        assert!(text.to_lowercase().contains("ld a,(ix-1)"));
    }
}
