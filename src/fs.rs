//! Filesystem access points shared by the driver and the CLI binaries.
//!
//! Every place this crate touches a file on disk funnels through here:
//! include-path search for `INCLUDE`/`INCBIN`, output-filename derivation
//! from an input path and target, and reading the top-level source file.
//! Kept as one module so a future sandboxed/virtual filesystem only needs
//! one seam to intercept.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Reads the top-level source file passed on the command line.
pub fn read_source_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Resolves an `INCLUDE`/`INCBIN` path against the direct path first, then
/// each entry of `include_paths` in order, and reads whichever exists.
/// Falls back to the direct path (surfacing its `io::Error`) if none match,
/// so the caller gets a sensible "file not found" message naming the path
/// the user actually wrote.
pub fn read_include_file(path: &str, include_paths: &[PathBuf]) -> Result<Vec<u8>> {
    let direct = Path::new(path);
    if direct.is_file() {
        return Ok(std::fs::read(direct)?);
    }
    for dir in include_paths {
        let candidate = dir.join(path);
        if candidate.is_file() {
            return Ok(std::fs::read(candidate)?);
        }
    }
    Ok(std::fs::read(direct)?)
}

/// Default output path: the input file with its extension swapped for
/// one appropriate to `ext` (e.g. `"bin"`, `"obj"`, `"sna"`).
pub fn default_output_path(input: &Path, ext: &str) -> PathBuf {
    input.with_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        let input = Path::new("game.asm");
        assert_eq!(default_output_path(input, "bin"), PathBuf::from("game.bin"));
        assert_eq!(default_output_path(input, "sna"), PathBuf::from("game.sna"));
    }

    #[test]
    fn test_read_include_file_searches_include_paths() {
        let dir = tempfile::tempdir().unwrap();
        let inc_dir = dir.path().join("inc");
        std::fs::create_dir(&inc_dir).unwrap();
        std::fs::write(inc_dir.join("data.inc"), b"\x01\x02\x03").unwrap();

        let found = read_include_file("data.inc", std::slice::from_ref(&inc_dir)).unwrap();
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_include_file_direct_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let direct = dir.path().join("direct.bin");
        std::fs::write(&direct, b"\xAA").unwrap();

        let found = read_include_file(direct.to_str().unwrap(), &[]).unwrap();
        assert_eq!(found, vec![0xAA]);
    }

    #[test]
    fn test_read_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("game.asm");
        std::fs::write(&file, "ORG 0\nNOP\n").unwrap();
        assert_eq!(read_source_file(&file).unwrap(), "ORG 0\nNOP\n");
    }
}
