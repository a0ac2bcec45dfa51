//! Embedded C runtime
//!
//! The runtime is embedded at compile time so the compiler binary is
//! self-contained; it is written next to the generated assembly right
//! before the C compiler is invoked, and both are handed to it in one
//! command.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The runtime source (array/string allocation plus the `rt_*` helpers).
pub static RUNTIME_C: &str = include_str!("../runtime/runtime.c");

/// Write the runtime source into `dir` and return its path.
pub fn write_runtime(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join("rook_runtime.c");
    fs::write(&path, RUNTIME_C)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_defines_the_abi() {
        for symbol in [
            "runtime_new_array",
            "runtime_new_string",
            "runtime_string_concat",
            "rt_assert",
            "rt_assert_long",
            "rt_assert_char",
            "rt_print",
            "rt_print_str",
        ] {
            assert!(RUNTIME_C.contains(symbol), "runtime lacks {}", symbol);
        }
    }

    #[test]
    fn test_write_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_runtime(dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_to_string(path).unwrap(), RUNTIME_C);
    }
}
