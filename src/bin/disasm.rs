//! bc80asm command-line disassembler.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;

use bc80asm::config;
use bc80asm::disasm::{disassemble, DisasOptions};
use bc80asm::AsmError;

/// Z80 disassembler: raw byte image to text listing.
#[derive(Parser, Debug)]
#[command(name = "disasm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Binary file to disassemble
    input: PathBuf,

    /// Include an address comment per line
    #[arg(short = 'a')]
    addr: bool,

    /// Include a hex/ASCII source-byte dump comment per line
    #[arg(short = 's')]
    source_dump: bool,

    /// Substitute generated labels for jump/call targets
    #[arg(short = 'l')]
    labels: bool,

    /// Origin address (decimal, or hex with leading 0x/$ or trailing h)
    #[arg(short = 't', value_name = "ADDR", default_value = "0")]
    origin: String,

    /// Output file (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), AsmError> {
    let org = config::parse_numeric_arg("-t", &args.origin)?;
    let bytes = std::fs::read(&args.input)?;

    let opts = DisasOptions {
        opt_addr: args.addr,
        opt_source: args.source_dump,
        opt_labels: args.labels,
        org: org as u16,
    };
    let text = disassemble(&bytes, &opts);

    match &args.output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing_defaults() {
        let args = Args::try_parse_from(["disasm", "game.bin"]).unwrap();
        assert_eq!(args.origin, "0");
        assert!(!args.addr);
        assert!(!args.labels);
    }

    #[test]
    fn test_args_parsing_flags() {
        let args = Args::try_parse_from(["disasm", "-a", "-s", "-l", "-t", "0x8000", "game.bin"]).unwrap();
        assert!(args.addr);
        assert!(args.source_dump);
        assert!(args.labels);
        assert_eq!(args.origin, "0x8000");
    }
}
