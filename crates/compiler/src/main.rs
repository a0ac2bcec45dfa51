//! Rook compiler CLI
//!
//! Command-line interface for compiling `.rook` programs to executables.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use rookc::CompilerConfig;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "rookc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rook compiler - compile .rook programs to executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .rook file to an executable
    Build {
        /// Input .rook source file
        input: PathBuf,

        /// Output path (defaults to the input filename without .rook)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the generated assembly file (.s) next to the output
        #[arg(long)]
        keep_asm: bool,

        /// Stop after writing the assembly file; do not assemble or link
        #[arg(long)]
        emit_asm: bool,

        /// Skip the SSA optimizer (for debugging the IR)
        #[arg(long)]
        no_opt: bool,

        /// Compiler configuration file (TOML)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Parse and type-check a .rook file without generating code
    Check {
        /// Input .rook source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig, String> {
    match path {
        Some(p) => CompilerConfig::from_file(p),
        None => Ok(CompilerConfig::default()),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    input.with_file_name(stem)
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            keep_asm,
            emit_asm,
            no_opt,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.keep_asm = keep_asm;
            if no_opt {
                config.optimize = false;
            }
            let output = output.unwrap_or_else(|| default_output(&input));
            if output == input {
                return Err(format!(
                    "output '{}' would overwrite the input; pass -o",
                    output.display()
                ));
            }
            if emit_asm {
                let asm_path = output.with_extension("s");
                rookc::compile_to_asm_file(&input, &asm_path, &config)?;
                println!("wrote {}", asm_path.display());
            } else {
                rookc::compile_file(&input, &output, &config)?;
            }
            Ok(())
        }
        Commands::Check { input } => {
            let source = std::fs::read_to_string(&input)
                .map_err(|e| format!("failed to read '{}': {}", input.display(), e))?;
            rookc::check_source(&source, &input.display().to_string())?;
            println!("{}: ok", input.display());
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
