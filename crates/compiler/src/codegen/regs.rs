//! Physical register descriptors
//!
//! Register names follow the x86 encoding order so `gpr(0, QWord)` is
//! `%rax`. The emitter never spills these; every value lives in a stack
//! slot, and the physical registers named here appear only where the ISA
//! demands them or as scratch space inside a single instruction sequence.

use super::lir::{LIRType, Register};
use crate::config::Target;

/// Width-sibling names for the sixteen general-purpose registers,
/// indexed by x86 encoding; columns are byte/word/dword/qword.
const GPR_NAMES: [[&'static str; 4]; 16] = [
    ["al", "ax", "eax", "rax"],
    ["cl", "cx", "ecx", "rcx"],
    ["dl", "dx", "edx", "rdx"],
    ["bl", "bx", "ebx", "rbx"],
    ["spl", "sp", "esp", "rsp"],
    ["bpl", "bp", "ebp", "rbp"],
    ["sil", "si", "esi", "rsi"],
    ["dil", "di", "edi", "rdi"],
    ["r8b", "r8w", "r8d", "r8"],
    ["r9b", "r9w", "r9d", "r9"],
    ["r10b", "r10w", "r10d", "r10"],
    ["r11b", "r11w", "r11d", "r11"],
    ["r12b", "r12w", "r12d", "r12"],
    ["r13b", "r13w", "r13d", "r13"],
    ["r14b", "r14w", "r14d", "r14"],
    ["r15b", "r15w", "r15d", "r15"],
];

const XMM_NAMES: [&'static str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// A general-purpose register at the width of `ty`.
pub fn gpr(index: usize, ty: LIRType) -> Register {
    let col = match ty.width() {
        1 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    };
    Register {
        index: index as u32,
        virt: false,
        name: GPR_NAMES[index][col],
        ty,
    }
}

/// An xmm register; `ty` must be one of the vector types.
pub fn xmm(index: usize, ty: LIRType) -> Register {
    Register {
        index: 16 + index as u32,
        virt: false,
        name: XMM_NAMES[index],
        ty,
    }
}

/// The 8-bit-high half of AX, where `idiv` leaves the byte remainder.
pub const fn ah() -> Register {
    Register {
        index: 0,
        virt: false,
        name: "ah",
        ty: LIRType::Byte,
    }
}

/// Integer argument registers in ABI order.
pub fn int_arg_regs(target: Target) -> &'static [usize] {
    match target {
        // rdi, rsi, rdx, rcx, r8, r9
        Target::SysV => &[7, 6, 2, 1, 8, 9],
        // rcx, rdx, r8, r9
        Target::Win64 => &[1, 2, 8, 9],
    }
}

/// Number of xmm argument registers (xmm0..).
pub fn float_arg_count(target: Target) -> usize {
    match target {
        Target::SysV => 8,
        Target::Win64 => 4,
    }
}

/// Caller-save general-purpose registers, first one doubles as the
/// instruction-selection scratch.
pub const CALLER_SAVED: [usize; 9] = [0, 1, 2, 6, 7, 8, 9, 10, 11];

/// Integer return register at the given width.
pub fn int_ret(ty: LIRType) -> Register {
    gpr(0, ty)
}

/// Floating-point return register.
pub fn float_ret(ty: LIRType) -> Register {
    xmm(0, ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_siblings() {
        assert_eq!(gpr(0, LIRType::QWord).name, "rax");
        assert_eq!(gpr(0, LIRType::DWord).name, "eax");
        assert_eq!(gpr(0, LIRType::Byte).name, "al");
        assert_eq!(gpr(10, LIRType::Word).name, "r10w");
    }

    #[test]
    fn test_sysv_argument_order() {
        let regs = int_arg_regs(Target::SysV);
        assert_eq!(gpr(regs[0], LIRType::QWord).name, "rdi");
        assert_eq!(gpr(regs[1], LIRType::DWord).name, "esi");
        assert_eq!(gpr(regs[2], LIRType::QWord).name, "rdx");
    }

    #[test]
    fn test_win64_argument_order() {
        let regs = int_arg_regs(Target::Win64);
        assert_eq!(gpr(regs[0], LIRType::QWord).name, "rcx");
        assert_eq!(regs.len(), 4);
    }

    #[test]
    fn test_first_caller_save_is_rax() {
        assert_eq!(gpr(CALLER_SAVED[0], LIRType::QWord).name, "rax");
    }
}
