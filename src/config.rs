//! Shared CLI plumbing: target selection, `-D` seed parsing, include-path
//! and output-path derivation. Kept separate from the two `bin/` entry
//! points so both binaries parse these the same way.

use std::path::{Path, PathBuf};

use crate::driver::ProfileMode;
use crate::error::{AsmError, Result};
use crate::render::sna::SnaOptions;

/// Output container for the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Verbatim byte image of the single section.
    Raw,
    /// ELF32 `REL` object, one section header per assembled `SECTION`.
    Object,
    /// ZX Spectrum `.SNA` snapshot.
    Sna,
}

impl std::str::FromStr for Target {
    type Err = AsmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Target::Raw),
            "object" | "elf" => Ok(Target::Object),
            "sna" => Ok(Target::Sna),
            other => Err(AsmError::UnknownTarget { value: other.to_string() }),
        }
    }
}

/// Parses `--profile` / `--profile=all`. Bare `--profile` (no `=value`)
/// enables global-label profiling; `--profile=all` profiles every label.
pub fn parse_profile_mode(raw: Option<&str>) -> Result<ProfileMode> {
    match raw {
        None => Ok(ProfileMode::None),
        Some("") | Some("globals") => Ok(ProfileMode::Globals),
        Some("all") => Ok(ProfileMode::All),
        Some(other) => Err(AsmError::InvalidProfileMode { value: other.to_string() }),
    }
}

/// Splits a `-Dkey[=value]` argument into its key and optional value.
pub fn split_define(raw: &str) -> (String, Option<String>) {
    match raw.split_once('=') {
        Some((k, v)) => (k.to_string(), Some(v.to_string())),
        None => (raw.to_string(), None),
    }
}

/// Parses a numeric CLI argument such as `--sna-pc` / `--sna-ramtop`,
/// accepting the same decimal/hex/binary/octal forms as source literals.
pub fn parse_numeric_arg(option: &'static str, raw: &str) -> Result<i64> {
    crate::lexer::parse_numeric(raw)
        .ok_or_else(|| AsmError::InvalidNumericArg { option, value: raw.to_string() })
}

/// Default output path: the input file with its extension swapped for
/// one appropriate to `target`.
pub fn default_output_path(input: &Path, target: Target) -> PathBuf {
    let ext = match target {
        Target::Raw => "bin",
        Target::Object => "obj",
        Target::Sna => "sna",
    };
    crate::fs::default_output_path(input, ext)
}

/// Raw `--sna-*` CLI values, converted to [`SnaOptions`] once parsed.
#[derive(Debug, Default)]
pub struct SnaArgs {
    /// `--sna-generic`.
    pub generic: bool,
    /// `--sna-pc`.
    pub pc: Option<u16>,
    /// `--sna-ramtop`.
    pub ramtop: Option<u16>,
}

impl SnaArgs {
    /// Converts to the renderer's option type.
    pub fn into_options(self) -> SnaOptions {
        SnaOptions { generic: self.generic, pc: self.pc, ramtop: self.ramtop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing_case_insensitive() {
        assert_eq!("RAW".parse::<Target>().unwrap(), Target::Raw);
        assert_eq!("object".parse::<Target>().unwrap(), Target::Object);
        assert_eq!("Sna".parse::<Target>().unwrap(), Target::Sna);
        assert!("weird".parse::<Target>().is_err());
    }

    #[test]
    fn test_split_define() {
        assert_eq!(split_define("FOO=5"), ("FOO".to_string(), Some("5".to_string())));
        assert_eq!(split_define("FOO"), ("FOO".to_string(), None));
    }

    #[test]
    fn test_profile_mode_parsing() {
        assert_eq!(parse_profile_mode(None).unwrap(), ProfileMode::None);
        assert_eq!(parse_profile_mode(Some("")).unwrap(), ProfileMode::Globals);
        assert_eq!(parse_profile_mode(Some("all")).unwrap(), ProfileMode::All);
        assert!(parse_profile_mode(Some("bogus")).is_err());
    }

    #[test]
    fn test_default_output_path() {
        let input = Path::new("game.asm");
        assert_eq!(default_output_path(input, Target::Raw), PathBuf::from("game.bin"));
        assert_eq!(default_output_path(input, Target::Object), PathBuf::from("game.obj"));
        assert_eq!(default_output_path(input, Target::Sna), PathBuf::from("game.sna"));
    }

    #[test]
    fn test_parse_numeric_arg_hex() {
        assert_eq!(parse_numeric_arg("--sna-pc", "0x8000").unwrap(), 0x8000);
        assert!(parse_numeric_arg("--sna-pc", "nope").is_err());
    }
}
