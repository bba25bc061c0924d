//! Assembles a tiny program and writes it out as a ZX Spectrum `.SNA`
//! snapshot, a raw binary, and an ELF object, to show the three backends
//! driven from the same compile output.

use bc80asm::arena::Arena;
use bc80asm::driver::{compile, CompileOptions};
use bc80asm::parser::parse_source;
use bc80asm::render::{elf::render_elf, raw::render_raw, sna::render_sna};
use bc80asm::render::sna::SnaOptions;

const SOURCE: &str = r#"
    ORG 0x8000
start:
    LD HL, message
    LD B, 12
loop:
    LD A, (HL)
    INC HL
    DJNZ loop
    HALT
message:
    DB "HELLO, WORLD"
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut arena = Arena::new();
    let stmts = parse_source(&mut arena, SOURCE, "demo.asm")?;
    let output = compile(&mut arena, &stmts, &CompileOptions::default())?;

    let raw = render_raw(&output.render)?;
    println!("raw: {} bytes", raw.len());

    let elf = render_elf(&output.render)?;
    println!("elf: {} bytes", elf.len());

    let sna = render_sna(&output.render, &SnaOptions::default())?;
    println!("sna: {} bytes", sna.len());

    for warning in output.diagnostics.warnings() {
        eprintln!("warning: {warning}");
    }

    Ok(())
}
