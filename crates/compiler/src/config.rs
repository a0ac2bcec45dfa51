//! Compiler configuration
//!
//! Defaults come from the host; a TOML config file can override them and
//! command-line flags win over both. The file only carries stable knobs so
//! a project can pin its toolchain behavior:
//!
//! ```toml
//! target = "sysv"
//! cc = "gcc"
//! optimize = true
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Calling-convention target for the emitted assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// System V AMD64 (Linux, macOS, BSDs)
    SysV,
    /// Microsoft x64
    Win64,
}

impl Target {
    pub fn host_default() -> Target {
        if cfg!(windows) {
            Target::Win64
        } else {
            Target::SysV
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub target: Target,
    /// C compiler used to assemble and link (also compiles the runtime)
    pub cc: String,
    /// Keep the generated `.s` next to the output executable
    pub keep_asm: bool,
    /// Run the SSA peephole passes (disable for IR debugging)
    pub optimize: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            target: Target::host_default(),
            cc: "gcc".to_string(),
            keep_asm: false,
            optimize: true,
        }
    }
}

/// Serde mirror of the config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    target: Option<String>,
    cc: Option<String>,
    optimize: Option<bool>,
}

impl CompilerConfig {
    /// Load a TOML config file over the defaults.
    pub fn from_file(path: &Path) -> Result<CompilerConfig, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
            .map_err(|e| format!("failed to parse config '{}': {}", path.display(), e))
    }

    fn from_toml(content: &str) -> Result<CompilerConfig, String> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut config = CompilerConfig::default();
        if let Some(target) = file.target {
            config.target = match target.as_str() {
                "sysv" => Target::SysV,
                "win64" => Target::Win64,
                other => return Err(format!("unknown target '{}'", other)),
            };
        }
        if let Some(cc) = file.cc {
            config.cc = cc;
        }
        if let Some(optimize) = file.optimize {
            config.optimize = optimize;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = CompilerConfig::default();
        assert!(c.optimize);
        assert_eq!(c.cc, "gcc");
    }

    #[test]
    fn test_parse_toml() {
        let c = CompilerConfig::from_toml("target = \"win64\"\noptimize = false\n").unwrap();
        assert_eq!(c.target, Target::Win64);
        assert!(!c.optimize);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(CompilerConfig::from_toml("tarket = \"sysv\"\n").is_err());
    }

    #[test]
    fn test_unknown_target_rejected() {
        assert!(CompilerConfig::from_toml("target = \"riscv\"\n").is_err());
    }
}
