//! Rook compiler library
//!
//! Provides compilation from `.rook` source to x86-64 assembly and
//! executables. The pipeline per function is: parse, type-check, build SSA
//! (Braun-style incremental construction), verify, run the SSA peepholes,
//! re-verify, lower to two-operand LIR, and emit AT&T assembly. The
//! generated `.s` plus the embedded C runtime are handed to the system C
//! compiler in one invocation.
//!
//! ```rust,ignore
//! use rookc::{compile_file, CompilerConfig};
//!
//! compile_file(Path::new("fib.rook"), Path::new("fib"), &CompilerConfig::default())?;
//! ```

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod hir;
pub mod parser;
pub mod runtime;
pub mod typecheck;
pub mod types;

pub use config::{CompilerConfig, Target};
pub use parser::Parser;
pub use typecheck::TypeChecker;
pub use types::{Op, Type};

use ast::{FuncDecl, Package};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

/// Cache for the C compiler availability check; it only runs once per
/// process.
static CC_CHECKED: OnceLock<Result<(), String>> = OnceLock::new();

/// Check that the configured C compiler exists and answers `--version`.
fn check_cc(cc: &str) -> Result<(), String> {
    CC_CHECKED
        .get_or_init(|| {
            let output = Command::new(cc).arg("--version").output().map_err(|e| {
                format!(
                    "failed to run '{}': {}. A C compiler is required to \
                     assemble and link the generated code.",
                    cc, e
                )
            })?;
            if !output.status.success() {
                return Err(format!(
                    "'{} --version' failed with exit code {:?}",
                    cc,
                    output.status.code()
                ));
            }
            Ok(())
        })
        .clone()
}

/// Fold top-level statements into an implicit `main` and append the
/// builtin declarations.
fn prepare_package(mut package: Package) -> Result<Package, String> {
    if !package.top_level.is_empty() {
        if package.find_function("main").is_some() {
            return Err(
                "cannot mix top-level statements with an explicit main function".to_string(),
            );
        }
        let line = package.top_level[0].line();
        let body = std::mem::take(&mut package.top_level);
        package.functions.push(FuncDecl {
            name: "main".to_string(),
            params: Vec::new(),
            return_type: Type::Void,
            body,
            builtin: false,
            line,
        });
    }
    package.functions.extend(builtins::builtin_decls());
    Ok(package)
}

/// Compile source text to assembly.
pub fn compile_to_asm(source: &str, config: &CompilerConfig) -> Result<String, String> {
    compile_to_asm_named(source, "<input>", config)
}

fn compile_to_asm_named(
    source: &str,
    name: &str,
    config: &CompilerConfig,
) -> Result<String, String> {
    let mut parser = Parser::with_name(source, name);
    let package = parser.parse()?;
    let mut package = prepare_package(package)?;
    let mut checker = TypeChecker::new();
    let sigs = checker.check_package(&mut package)?;

    let mut lirs = Vec::with_capacity(package.functions.len());
    for decl in &package.functions {
        let mut func = hir::builder::build(decl, &sigs)?;
        hir::verify::verify(&func)?;
        if config.optimize {
            hir::opt::optimize(&mut func)?;
            hir::verify::verify(&func)?;
        }
        let lir = codegen::lower(&mut func, config.target).map_err(|e| e.to_string())?;
        lirs.push(lir);
    }
    codegen::emit_program(&lirs).map_err(|e| e.to_string())
}

/// Compile a source file to assembly text only, written to `asm_path`.
pub fn compile_to_asm_file(
    source_path: &Path,
    asm_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("failed to read '{}': {}", source_path.display(), e))?;
    let asm = compile_to_asm_named(&source, &source_path.display().to_string(), config)?;
    fs::write(asm_path, asm)
        .map_err(|e| format!("failed to write '{}': {}", asm_path.display(), e))
}

/// Compile a source file to an executable.
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let asm_path = output_path.with_extension("s");
    compile_to_asm_file(source_path, &asm_path, config)?;

    check_cc(&config.cc)?;

    let runtime_path = runtime::write_runtime(&std::env::temp_dir())
        .map_err(|e| format!("failed to extract the runtime: {}", e))?;

    let output = Command::new(&config.cc)
        // keep the emitter's absolute string-literal addressing linkable
        .arg("-no-pie")
        .arg(&asm_path)
        .arg(&runtime_path)
        .arg("-o")
        .arg(output_path)
        .output()
        .map_err(|e| format!("failed to run '{}': {}", config.cc, e))?;

    fs::remove_file(&runtime_path).ok();
    if !config.keep_asm {
        fs::remove_file(&asm_path).ok();
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} failed:\n{}", config.cc, stderr));
    }
    Ok(())
}

/// Parse and type-check only.
pub fn check_source(source: &str, name: &str) -> Result<(), String> {
    let mut parser = Parser::with_name(source, name);
    let package = parser.parse()?;
    let mut package = prepare_package(package)?;
    let mut checker = TypeChecker::new();
    checker.check_package(&mut package)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm(src: &str) -> String {
        compile_to_asm(src, &CompilerConfig::default()).expect("compile")
    }

    #[test]
    fn test_recursive_fibonacci() {
        let text = asm(
            "func fibo(n int) int {\n if n == 0 { return 0 }\n if n == 1 { return 1 }\n return fibo(n-1) + fibo(n-2)\n}\nfunc main() { assert(fibo(10), 55)\n assert(fibo(20), 6765) }",
        );
        assert!(text.contains("call fibo"));
        assert!(text.contains("call rt_assert"));
    }

    #[test]
    fn test_bubble_sort_loops_and_indexing() {
        let text = asm(
            "func main() {\n let a = [5, 4, 3, 2, 1]\n for i = 0; i < 4; i += 1 {\n for j = 0; j < 4 - i; j += 1 {\n if a[j] > a[j+1] { let t = a[j]\n a[j] = a[j+1]\n a[j+1] = t }\n }\n }\n assert(a[0], 1)\n assert(a[4], 5)\n}",
        );
        assert!(text.contains("call runtime_new_array"));
        assert!(text.contains("(%rax, %rcx, 4)"));
    }

    #[test]
    fn test_short_circuit_break_continue() {
        let text = asm(
            "func main() {\n let i = 0\n while true {\n if i < 5 { i += 1\n continue }\n i += 2\n if i == 7 { break }\n }\n assert(i, 7)\n}",
        );
        assert!(text.contains("call rt_assert"));
    }

    #[test]
    fn test_dead_branch_folded_out() {
        let text = asm("func main() { if false { assert(1, 2) } else { assert(1, 1) } }");
        assert!(
            !text.contains("movl $2, %esi"),
            "dead branch argument survived:\n{}",
            text
        );
        assert!(text.contains("call rt_assert"));
    }

    #[test]
    fn test_string_immutable_indexing() {
        let text =
            asm("func main() {\n let s = \"abc\"\n assert_char(s[0], 'a')\n assert_char(s[2], 'c')\n}");
        assert!(text.contains(".string \"abc\""));
        assert!(text.contains("call runtime_new_string"));
        assert!(text.contains("%r11"));
    }

    #[test]
    fn test_long_width_arithmetic() {
        let text = asm(
            "func main() {\n let a long = 55L\n let b long = 10L\n assert_long(a+b, 65L)\n assert_long(a%b, 5L)\n assert_long(a<<b, 56320L)\n}",
        );
        assert!(text.contains("cqto"));
        assert!(text.contains("salq %cl,"));
        assert!(text.contains("call rt_assert_long"));
    }

    #[test]
    fn test_top_level_statements_become_main() {
        let text = asm("let x = 2\nassert(x, 2)\n");
        assert!(text.contains(".globl main"));
    }

    #[test]
    fn test_top_level_plus_main_rejected() {
        let err =
            compile_to_asm("let x = 1\nfunc main() { }", &CompilerConfig::default()).unwrap_err();
        assert!(err.contains("top-level"), "{}", err);
    }

    #[test]
    fn test_unoptimized_build_also_compiles() {
        let config = CompilerConfig {
            optimize: false,
            ..CompilerConfig::default()
        };
        let text = compile_to_asm(
            "func main() { let i = 0\n while i < 3 { i += 1 }\n assert(i, 3) }",
            &config,
        )
        .expect("compile without optimizer");
        assert!(text.contains("call rt_assert"));
    }

    #[test]
    fn test_compile_to_asm_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("t.rook");
        let out = dir.path().join("t.s");
        fs::write(&src, "func main() { assert(1, 1) }").unwrap();
        compile_to_asm_file(&src, &out, &CompilerConfig::default()).expect("compile to file");
        let text = fs::read_to_string(out).unwrap();
        assert!(text.contains(".globl entrypoint"));
    }

    #[test]
    fn test_check_source_reports_type_errors() {
        assert!(check_source("func main() { assert(true, 1) }", "t.rook").is_err());
        assert!(check_source("func main() { assert(1, 1) }", "t.rook").is_ok());
    }

    #[test]
    fn test_error_messages_carry_line_numbers() {
        let err = compile_to_asm("func main() {\n let x = y\n}", &CompilerConfig::default())
            .unwrap_err();
        assert!(err.contains("at line 2"), "{}", err);
    }
}
