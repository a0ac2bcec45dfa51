//! AT&T assembly emission
//!
//! Every virtual register becomes a stack slot; memory-memory operand
//! combinations are broken up through `%r10` (or `%xmm15` for scalars in
//! xmm registers), which is what makes the missing register allocator
//! bearable. The frame size is not known until all slots are assigned, so
//! the prologue carries a literal `FRAME_SIZE` token that is back-patched
//! once the function body is complete.

use super::error::CodeGenError;
use super::lir::{Inst, LIROp, LIRType, Operand, Register, TextKind, LIR};
use super::regs;
use std::fmt::Write as _;

pub struct AsmEmitter {
    out: String,
    /// Next free slot offset from %rbp; grows downward in 8-byte steps
    offset: i64,
    /// Virtual register index -> stack offset
    slots: std::collections::HashMap<u32, i64>,
    /// Index of the function being emitted, for label mangling
    func_index: usize,
}

/// Emit the whole program: the `entrypoint` glue followed by every
/// function with its read-only pool.
pub fn emit_program(lirs: &[LIR]) -> Result<String, CodeGenError> {
    let mut emitter = AsmEmitter {
        out: String::new(),
        offset: -16,
        slots: std::collections::HashMap::new(),
        func_index: 0,
    };
    let mut program = String::new();
    program.push_str("\t.text\n");
    program.push_str("\t.globl entrypoint\n");
    program.push_str("entrypoint:\n");
    program.push_str("\tpushq %rbp\n");
    program.push_str("\tmovq %rsp, %rbp\n");
    program.push_str("\tandq $-16, %rsp\n");
    program.push_str("\tcallq main\n");
    program.push_str("\tmovq %rbp, %rsp\n");
    program.push_str("\tpopq %rbp\n");
    program.push_str("\tret\n\n");
    for (i, lir) in lirs.iter().enumerate() {
        program.push_str(&emitter.emit_function(lir, i)?);
        program.push('\n');
    }
    Ok(program)
}

fn round_up_16(n: i64) -> i64 {
    (n + 15) & !15
}

fn fits_i32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

/// Escape a string for a `.string` directive.
fn escape_asm_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

impl AsmEmitter {
    fn emit_function(&mut self, lir: &LIR, index: usize) -> Result<String, CodeGenError> {
        self.out.clear();
        self.slots.clear();
        self.offset = -16;
        self.func_index = index;

        if !lir.texts.is_empty() {
            writeln!(self.out, "\t.section .rodata")?;
            for t in &lir.texts {
                match t.kind {
                    TextKind::Str => {
                        writeln!(self.out, ".T_{}:\t.string \"{}\"", t.id, escape_asm_string(&t.data))?
                    }
                    TextKind::Float => writeln!(self.out, ".T_{}:\t.quad 0x{}", t.id, t.data)?,
                }
            }
            writeln!(self.out, "\t.text")?;
        }

        writeln!(self.out, "\t.globl {}", lir.name)?;
        writeln!(self.out, "{}:", lir.name)?;
        writeln!(self.out, "\tpushq %rbp")?;
        writeln!(self.out, "\tmovq %rsp, %rbp")?;
        writeln!(self.out, "\tsubq $FRAME_SIZE, %rsp")?;

        for (&block, insts) in &lir.blocks {
            writeln!(self.out, ".F{}_L{}:", self.func_index, block)?;
            for inst in insts {
                self.emit_inst(inst)?;
            }
        }

        let frame = round_up_16(self.offset.abs());
        Ok(self.out.replace("FRAME_SIZE", &frame.to_string()))
    }

    // ----- operand rendering -----

    /// Stack slot of a virtual register, allocated on first sight.
    fn slot(&mut self, r: &Register) -> String {
        let off = match self.slots.get(&r.index) {
            Some(&off) => off,
            None => {
                let off = self.offset;
                self.offset -= 8;
                self.slots.insert(r.index, off);
                off
            }
        };
        format!("{}(%rbp)", off)
    }

    fn reg(&mut self, r: &Register) -> String {
        if r.virt {
            self.slot(r)
        } else {
            format!("%{}", r.name)
        }
    }

    /// Render an addressing-mode operand. Virtual base/index registers are
    /// loaded into caller-save scratch first so the final expression names
    /// only physical registers.
    fn addr(
        &mut self,
        base: &Register,
        index: &Register,
        scale: u32,
        disp: i64,
    ) -> Result<String, CodeGenError> {
        let base_name = if base.virt {
            let slot = self.slot(base);
            writeln!(self.out, "\tmovq {}, %rax", slot)?;
            "rax".to_string()
        } else {
            base.name.to_string()
        };
        if index.is_none() {
            return Ok(if disp == 0 {
                format!("(%{})", base_name)
            } else {
                format!("{}(%{})", disp, base_name)
            });
        }
        let index_name = if index.virt {
            let slot = self.slot(index);
            if index.ty.width() == 8 {
                writeln!(self.out, "\tmovq {}, %rcx", slot)?;
            } else {
                writeln!(self.out, "\tmovl {}, %ecx", slot)?;
                // AT&T wants matching widths for base and index; the
                // self-move clears the upper half so %rcx is usable
                writeln!(self.out, "\tmovl %ecx, %ecx")?;
            }
            "rcx".to_string()
        } else {
            regs::gpr(index.index as usize, LIRType::QWord).name.to_string()
        };
        Ok(if disp == 0 {
            format!("(%{}, %{}, {})", base_name, index_name, scale)
        } else {
            format!("{}(%{}, %{}, {})", disp, base_name, index_name, scale)
        })
    }

    fn label(&self, l: &str) -> String {
        format!(".F{}_{}", self.func_index, l)
    }

    fn suffix(ty: LIRType) -> &'static str {
        match ty {
            LIRType::Byte => "b",
            LIRType::Word => "w",
            LIRType::DWord => "l",
            LIRType::QWord | LIRType::Void => "q",
            LIRType::Vector16S => "ss",
            LIRType::Vector16D => "sd",
        }
    }

    fn scratch_gpr(ty: LIRType) -> Register {
        regs::gpr(10, ty)
    }

    fn scratch_xmm(ty: LIRType) -> Register {
        regs::xmm(15, ty)
    }

    fn line(&mut self, text: String, comment: &str) -> Result<(), CodeGenError> {
        if comment.is_empty() {
            writeln!(self.out, "\t{}", text)?;
        } else {
            writeln!(self.out, "\t{}\t# {}", text, comment)?;
        }
        Ok(())
    }

    // ----- instructions -----

    fn emit_inst(&mut self, inst: &Inst) -> Result<(), CodeGenError> {
        match inst.op {
            LIROp::Mov => self.emit_mov(inst),
            LIROp::Add | LIROp::Sub | LIROp::Mul | LIROp::And | LIROp::Or | LIROp::Xor => {
                let base = match inst.op {
                    LIROp::Add => "add",
                    LIROp::Sub => "sub",
                    LIROp::Mul => {
                        if inst.result.ty().is_vector() {
                            "mul"
                        } else {
                            "imul"
                        }
                    }
                    LIROp::And => "and",
                    LIROp::Or => "or",
                    LIROp::Xor => "xor",
                    _ => unreachable!(),
                };
                self.emit_binop(base, inst)
            }
            LIROp::Div => self.emit_div(inst),
            LIROp::Not => {
                let ty = inst.result.ty();
                let dst = self.render_plain(&inst.result)?;
                self.line(format!("not{} {}", Self::suffix(ty), dst), &inst.comment)
            }
            LIROp::LShift | LIROp::RShift => {
                let base = if inst.op == LIROp::LShift { "sal" } else { "sar" };
                let ty = inst.result.ty();
                let dst = self.render_plain(&inst.result)?;
                self.line(
                    format!("{}{} %cl, {}", base, Self::suffix(ty), dst),
                    &inst.comment,
                )
            }
            LIROp::CmpLT
            | LIROp::CmpLE
            | LIROp::CmpGT
            | LIROp::CmpGE
            | LIROp::CmpEQ
            | LIROp::CmpNE => self.emit_cmp(inst),
            LIROp::Test => {
                let ty = inst.result.ty();
                let dst = self.render_plain(&inst.result)?;
                let src = self.render_plain(&inst.args[0])?;
                self.line(
                    format!("test{} {}, {}", Self::suffix(ty), src, dst),
                    &inst.comment,
                )
            }
            LIROp::Jmp | LIROp::Jle | LIROp::Jlt | LIROp::Jge | LIROp::Jgt | LIROp::Jeq
            | LIROp::Jne => {
                let mn = match inst.op {
                    LIROp::Jmp => "jmp",
                    LIROp::Jle => "jle",
                    LIROp::Jlt => "jl",
                    LIROp::Jge => "jge",
                    LIROp::Jgt => "jg",
                    LIROp::Jeq => "je",
                    LIROp::Jne => "jne",
                    _ => unreachable!(),
                };
                let Operand::Label(l) = &inst.result else {
                    return Err(CodeGenError::Logic("jump without a label".to_string()));
                };
                let target = self.label(l);
                self.line(format!("{} {}", mn, target), &inst.comment)
            }
            LIROp::Call => {
                let Operand::Symbol(name) = &inst.result else {
                    return Err(CodeGenError::Logic("call without a symbol".to_string()));
                };
                self.line(format!("call {}", name), &inst.comment)
            }
            LIROp::Ret => {
                self.line("addq $FRAME_SIZE, %rsp".to_string(), &inst.comment)?;
                self.line("popq %rbp".to_string(), "")?;
                self.line("ret".to_string(), "")
            }
        }
    }

    /// Render an operand that needs no scratch help: physical or virtual
    /// registers, immediates, labels, symbols, text references, addresses.
    fn render_plain(&mut self, op: &Operand) -> Result<String, CodeGenError> {
        Ok(match op {
            Operand::Reg(r) => self.reg(r),
            Operand::Imm { value, .. } => format!("${}", value),
            Operand::Offset(v) => format!("{}", v),
            Operand::Addr {
                base,
                index,
                scale,
                disp,
                ..
            } => self.addr(base, index, *scale, *disp)?,
            Operand::Label(l) => self.label(l),
            Operand::Symbol(s) => s.clone(),
            Operand::Text { kind, id, .. } => match kind {
                TextKind::Str => format!("$.T_{}", id),
                TextKind::Float => format!(".T_{}(%rip)", id),
            },
            Operand::None => {
                return Err(CodeGenError::Logic("rendering an absent operand".to_string()))
            }
        })
    }

    fn emit_mov(&mut self, inst: &Inst) -> Result<(), CodeGenError> {
        let dest = &inst.result;
        let src = &inst.args[0];
        let ty = if dest.ty() != LIRType::Void {
            dest.ty()
        } else {
            src.ty()
        };
        let sfx = Self::suffix(ty);

        if ty.is_vector() {
            if dest.is_memory() && src.is_memory() {
                let scratch = Self::scratch_xmm(ty);
                let s = self.render_plain(src)?;
                self.line(format!("mov{} {}, %{}", sfx, s, scratch.name), &inst.comment)?;
                let d = self.render_plain(dest)?;
                self.line(format!("mov{} %{}, {}", sfx, scratch.name, d), "")?;
            } else {
                let s = self.render_plain(src)?;
                let d = self.render_plain(dest)?;
                self.line(format!("mov{} {}, {}", sfx, s, d), &inst.comment)?;
            }
            return Ok(());
        }

        // wide immediates and string addresses cannot go straight to memory
        let needs_scratch = match src {
            Operand::Imm { value, .. } => dest.is_memory() && !fits_i32(*value),
            Operand::Text {
                kind: TextKind::Str,
                ..
            } => dest.is_memory(),
            _ => dest.is_memory() && src.is_memory(),
        };
        if needs_scratch {
            let wide = if matches!(src, Operand::Imm { .. } | Operand::Text { .. }) {
                LIRType::QWord
            } else {
                ty
            };
            let scratch = Self::scratch_gpr(wide);
            let s = self.render_plain(src)?;
            self.line(
                format!("mov{} {}, %{}", Self::suffix(wide), s, scratch.name),
                &inst.comment,
            )?;
            let scratch = Self::scratch_gpr(ty);
            let d = self.render_plain(dest)?;
            self.line(format!("mov{} %{}, {}", sfx, scratch.name, d), "")?;
        } else {
            let s = self.render_plain(src)?;
            let d = self.render_plain(dest)?;
            self.line(format!("mov{} {}, {}", sfx, s, d), &inst.comment)?;
        }
        Ok(())
    }

    /// Two-operand ALU op; a memory source goes through the scratch
    /// register so at most one operand touches memory.
    fn emit_binop(&mut self, base: &str, inst: &Inst) -> Result<(), CodeGenError> {
        let dest = &inst.result;
        let src = &inst.args[0];
        let ty = dest.ty();
        let sfx = Self::suffix(ty);
        if src.is_memory() {
            let (scratch, scratch_sfx) = if ty.is_vector() {
                (Self::scratch_xmm(ty).name, sfx)
            } else {
                (Self::scratch_gpr(ty).name, sfx)
            };
            let s = self.render_plain(src)?;
            self.line(
                format!("mov{} {}, %{}", scratch_sfx, s, scratch),
                &inst.comment,
            )?;
            let d = self.render_plain(dest)?;
            self.line(format!("{}{} %{}, {}", base, sfx, scratch, d), "")?;
        } else {
            let s = self.render_plain(src)?;
            let d = self.render_plain(dest)?;
            self.line(format!("{}{} {}, {}", base, sfx, s, d), &inst.comment)?;
        }
        Ok(())
    }

    /// Integer division: sign-extend the AX family, then `idiv`.
    /// Floating-point division is an ordinary two-operand `divss`/`divsd`.
    fn emit_div(&mut self, inst: &Inst) -> Result<(), CodeGenError> {
        if inst.result.ty().is_vector() {
            return self.emit_binop("div", inst);
        }
        let divisor = &inst.result;
        let ty = divisor.ty();
        let extend = match ty {
            LIRType::Byte => "cbtw",
            LIRType::Word => "cwtd",
            LIRType::DWord => "cltd",
            _ => "cqto",
        };
        self.line(extend.to_string(), &inst.comment)?;
        match divisor {
            Operand::Imm { .. } => {
                // idiv cannot take an immediate
                let scratch = Self::scratch_gpr(ty);
                let s = self.render_plain(divisor)?;
                self.line(format!("mov{} {}, %{}", Self::suffix(ty), s, scratch.name), "")?;
                self.line(format!("idiv{} %{}", Self::suffix(ty), scratch.name), "")
            }
            _ => {
                let d = self.render_plain(divisor)?;
                self.line(format!("idiv{} {}", Self::suffix(ty), d), "")
            }
        }
    }

    /// `cmp right, left` in AT&T operand order; materialize the flag via
    /// `set<cc>` into AL when the value is consumed beyond the branch.
    fn emit_cmp(&mut self, inst: &Inst) -> Result<(), CodeGenError> {
        let left = &inst.args[0];
        let right = &inst.args[1];
        let ty = left.ty();
        let sfx = Self::suffix(ty);
        match left {
            Operand::Imm { .. } => {
                // an immediate cannot sit in the destination slot of cmp
                let scratch = Self::scratch_gpr(ty);
                let l = self.render_plain(left)?;
                self.line(format!("mov{} {}, %{}", sfx, l, scratch.name), &inst.comment)?;
                let r = self.render_plain(right)?;
                self.line(format!("cmp{} {}, %{}", sfx, r, scratch.name), "")?;
            }
            _ => {
                if right.is_memory() && left.is_memory() {
                    let scratch = Self::scratch_gpr(ty);
                    let r = self.render_plain(right)?;
                    self.line(format!("mov{} {}, %{}", sfx, r, scratch.name), &inst.comment)?;
                    let l = self.render_plain(left)?;
                    self.line(format!("cmp{} %{}, {}", sfx, scratch.name, l), "")?;
                } else {
                    let r = self.render_plain(right)?;
                    let l = self.render_plain(left)?;
                    self.line(format!("cmp{} {}, {}", sfx, r, l), &inst.comment)?;
                }
            }
        }
        if let Operand::Reg(dest) = &inst.result {
            let cc = match inst.op {
                LIROp::CmpLT => "setl",
                LIROp::CmpLE => "setle",
                LIROp::CmpGT => "setg",
                LIROp::CmpGE => "setge",
                LIROp::CmpEQ => "sete",
                LIROp::CmpNE => "setne",
                _ => unreachable!("emit_cmp"),
            };
            self.line(format!("{} %al", cc), "")?;
            let width = dest.ty.width();
            if width > 1 {
                let wide = regs::gpr(0, dest.ty);
                self.line(
                    format!("movzb{} %al, %{}", Self::suffix(dest.ty), wide.name),
                    "",
                )?;
            }
            let ax = regs::gpr(0, dest.ty);
            let d = self.reg(dest);
            self.line(
                format!("mov{} %{}, {}", Self::suffix(dest.ty), ax.name, d),
                "",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::codegen::lower;
    use crate::config::Target;
    use crate::hir::{builder, opt, verify::verify};
    use crate::parser::Parser;
    use crate::typecheck::TypeChecker;

    fn emit(src: &str) -> String {
        let mut package = Parser::new(src).parse().expect("parse");
        package.functions.extend(builtins::builtin_decls());
        let mut tc = TypeChecker::new();
        let sigs = tc.check_package(&mut package).expect("typecheck");
        let mut lirs = Vec::new();
        for decl in &package.functions {
            let mut func = builder::build(decl, &sigs).expect("build");
            verify(&func).expect("verify");
            opt::optimize(&mut func).expect("optimize");
            verify(&func).expect("reverify");
            lirs.push(lower::lower(&mut func, Target::SysV).expect("lower"));
        }
        emit_program(&lirs).expect("emit")
    }

    #[test]
    fn test_frame_size_is_patched_and_aligned() {
        let asm = emit("func main() { let x = 1\n let y = 2\n assert(x + y, 3) }");
        assert!(!asm.contains("FRAME_SIZE"), "unpatched frame size");
        for line in asm.lines().filter(|l| l.contains("subq $") && l.contains("%rsp")) {
            let n: i64 = line
                .trim()
                .trim_start_matches("subq $")
                .split(',')
                .next()
                .unwrap()
                .parse()
                .unwrap();
            assert_eq!(n % 16, 0, "frame not 16-byte aligned: {}", line);
        }
    }

    #[test]
    fn test_prologue_epilogue_pairing() {
        let asm = emit("func main() { }");
        assert!(asm.contains("\tpushq %rbp"));
        assert!(asm.contains("\tmovq %rsp, %rbp"));
        assert!(asm.contains("\tpopq %rbp"));
        assert!(asm.contains("\tret"));
    }

    #[test]
    fn test_labels_are_mangled_per_function() {
        let asm = emit("func f() int { return 1 }\nfunc main() { assert(f(), 1) }");
        assert!(asm.contains(".F0_L0:"));
        assert!(asm.contains(".F1_L0:"));
    }

    #[test]
    fn test_entrypoint_glue() {
        let asm = emit("func main() { }");
        assert!(asm.contains(".globl entrypoint"));
        assert!(asm.contains("\tandq $-16, %rsp"));
        assert!(asm.contains("\tcallq main"));
        assert!(asm.contains(".globl main"));
    }

    #[test]
    fn test_string_rodata() {
        let asm = emit("func main() { let s = \"abc\"\n print_str(s) }");
        assert!(asm.contains(".section .rodata"));
        assert!(asm.contains(".T_0:\t.string \"abc\""));
        assert!(asm.contains("call runtime_new_string"));
        assert!(asm.contains("$.T_0"));
    }

    #[test]
    fn test_double_rodata_rip_relative() {
        let asm = emit("func main() { print_float(1.5) }");
        assert!(asm.contains(&format!(".quad 0x{:016x}", 1.5f64.to_bits())));
        assert!(asm.contains(".T_0(%rip)"));
        assert!(asm.contains("movsd"));
    }

    #[test]
    fn test_memory_to_memory_goes_through_r10() {
        let asm = emit(
            "func f(c bool) int { let x = 0\n if c { x = 1 }\n return x }\nfunc main() { assert(f(true), 1) }",
        );
        assert!(asm.contains("%r10d"), "phi copies should use the scratch:\n{}", asm);
    }

    #[test]
    fn test_division_sequence() {
        let asm = emit("func main() { let a = 7\n let b = 2\n assert(a % b, 1) }");
        assert!(asm.contains("\tcltd"));
        assert!(asm.contains("idivl"));
        assert!(asm.contains("%edx"));
    }

    #[test]
    fn test_long_division_uses_cqto() {
        let asm = emit("func main() { let a long = 55L\n let b long = 10L\n assert_long(a % b, 5L) }");
        assert!(asm.contains("\tcqto"));
        assert!(asm.contains("idivq"));
    }

    #[test]
    fn test_shift_uses_cl() {
        let asm = emit("func main() { let a long = 55L\n let b long = 10L\n assert_long(a << b, 56320L) }");
        assert!(asm.contains("salq %cl,"));
    }

    #[test]
    fn test_indexed_addressing_with_zero_idiom() {
        let asm = emit("func main() { let a = [5, 4]\n assert(a[1], 4) }");
        assert!(asm.contains("call runtime_new_array"));
        // 32-bit index gets widened for the addressing mode
        assert!(asm.contains("movl %ecx, %ecx"), "{}", asm);
        assert!(asm.contains("(%rax, %rcx, 4)"), "{}", asm);
    }

    #[test]
    fn test_string_escapes_in_rodata() {
        let asm = emit("func main() { print_str(\"a\\nb\\\"c\") }");
        assert!(asm.contains(".string \"a\\nb\\\"c\""));
    }

    #[test]
    fn test_comparison_branch_uses_condition_codes() {
        let asm = emit("func f(n int) int { if n < 3 { return 1 }\n return 2 }\nfunc main() { assert(f(1), 1) }");
        assert!(asm.contains("\tjl .F0_L"), "{}", asm);
    }
}
