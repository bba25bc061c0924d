//! bc80asm command-line assembler.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;

use bc80asm::config::{self, Target};
use bc80asm::driver::{compile, CompileOptions};
use bc80asm::parser::parse_source;
use bc80asm::render::{elf::render_elf, raw::render_raw, sna::render_sna};
use bc80asm::{arena::Arena, AsmError};

/// Z80 assembler: source to raw/ELF/SNA output.
#[derive(Parser, Debug)]
#[command(name = "asm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source file to assemble
    input: PathBuf,

    /// Output file (default: input with extension replaced)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Append to include search path
    #[arg(short = 'I', value_name = "PATH")]
    include: Vec<PathBuf>,

    /// Predefine symbol: `-Dkey` or `-Dkey=value`
    #[arg(short = 'D', value_name = "KEY[=VALUE]")]
    define: Vec<String>,

    /// Output target
    #[arg(short = 't', long = "target", default_value = "raw")]
    target: String,

    /// Enable profiling; bare flag profiles global labels only, `=all` profiles every label
    #[arg(long = "profile", num_args = 0..=1, default_missing_value = "")]
    profile: Option<String>,

    /// Include data (non-code) blocks in profile output
    #[arg(long = "profile-data")]
    profile_data: bool,

    /// Use generic (non-ZX) device defaults for SNA output
    #[arg(long = "sna-generic")]
    sna_generic: bool,

    /// Initial PC for SNA output
    #[arg(long = "sna-pc", value_name = "VALUE")]
    sna_pc: Option<String>,

    /// RAM top / initial stack pointer for SNA output
    #[arg(long = "sna-ramtop", value_name = "ADDR")]
    sna_ramtop: Option<String>,

    /// Increase log verbosity (can be repeated)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "bc80asm=warn",
        1 => "bc80asm=debug",
        _ => "bc80asm=trace",
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run(args: &Args) -> Result<(), AsmError> {
    let target: Target = args.target.parse()?;
    let profile_mode = config::parse_profile_mode(args.profile.as_deref())?;

    let sna_pc = args.sna_pc.as_deref().map(|v| config::parse_numeric_arg("--sna-pc", v)).transpose()?;
    let sna_ramtop =
        args.sna_ramtop.as_deref().map(|v| config::parse_numeric_arg("--sna-ramtop", v)).transpose()?;

    let source = bc80asm::fs::read_source_file(&args.input)?;
    let file_name = args.input.to_string_lossy().into_owned();

    let opts = CompileOptions {
        defines: args.define.iter().map(|d| config::split_define(d)).collect(),
        include_paths: args.include.clone(),
        profile_mode,
        profile_data: args.profile_data,
    };

    let mut arena = Arena::new();
    let stmts = parse_source(&mut arena, &source, &file_name)?;
    let output = compile(&mut arena, &stmts, &opts)?;

    for warning in output.diagnostics.warnings() {
        eprintln!("{} {warning}", "warning:".yellow().bold());
    }

    let bytes = match target {
        Target::Raw => render_raw(&output.render)?,
        Target::Object => render_elf(&output.render)?,
        Target::Sna => {
            let sna_opts = config::SnaArgs {
                generic: args.sna_generic,
                pc: sna_pc.map(|v| v as u16),
                ramtop: sna_ramtop.map(|v| v as u16),
            }
            .into_options();
            render_sna(&output.render, &sna_opts)?
        }
    };

    let out_path = args.output.clone().unwrap_or_else(|| config::default_output_path(&args.input, target));
    std::fs::write(&out_path, &bytes)?;

    eprintln!("{} bytes written to {}", bytes.len(), out_path.display());

    if !output.profiles.is_empty() {
        #[derive(serde::Serialize)]
        struct ProfileReport<'a> {
            name: &'a str,
            start_pc: String,
            end_pc: String,
            bytes: u64,
            cycles: u64,
        }
        let report: Vec<ProfileReport> = output
            .profiles
            .iter()
            .map(|w| ProfileReport {
                name: &w.name,
                start_pc: format!("{:#06x}", w.start_pc),
                end_pc: format!("{:#06x}", w.end_pc),
                bytes: w.bytes,
                cycles: w.cycles,
            })
            .collect();
        if let Ok(json) = serde_json::to_string_pretty(&report) {
            eprintln!("{json}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing_defaults() {
        let args = Args::try_parse_from(["asm", "game.asm"]).unwrap();
        assert_eq!(args.target, "raw");
        assert!(args.include.is_empty());
    }

    #[test]
    fn test_args_parsing_options() {
        let args = Args::try_parse_from([
            "asm", "-o", "out.bin", "-Iinc", "-DFOO=5", "-t", "sna", "--sna-generic", "game.asm",
        ])
        .unwrap();
        assert_eq!(args.output, Some(PathBuf::from("out.bin")));
        assert_eq!(args.include, vec![PathBuf::from("inc")]);
        assert_eq!(args.define, vec!["FOO=5".to_string()]);
        assert_eq!(args.target, "sna");
        assert!(args.sna_generic);
    }

    #[test]
    fn test_profile_flag_bare_and_valued() {
        let bare = Args::try_parse_from(["asm", "--profile", "game.asm"]).unwrap();
        assert_eq!(bare.profile, Some(String::new()));
        let all = Args::try_parse_from(["asm", "--profile=all", "game.asm"]).unwrap();
        assert_eq!(all.profile, Some("all".to_string()));
    }
}
