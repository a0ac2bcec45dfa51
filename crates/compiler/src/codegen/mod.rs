//! x86-64 code generation
//!
//! The back half of the pipeline: SSA functions are lowered to a
//! two-operand LIR with virtual registers (`lower`), which the emitter
//! turns into AT&T assembly with stack-slot allocation and scratch-register
//! plumbing (`emit`).
//!
//! # Module Structure
//!
//! - `lir.rs`: operand and instruction model, per-function instruction bag
//! - `regs.rs`: physical register descriptors and ABI argument tables
//! - `lower.rs`: critical-edge splitting, phi resolution, instruction
//!   selection
//! - `emit.rs`: assembly text emission and frame back-patching
//! - `error.rs`: error types

mod emit;
mod error;
mod lir;
mod lower;
mod regs;

pub use emit::emit_program;
pub use error::CodeGenError;
pub use lir::{Inst, LIROp, LIRType, Operand, Register, TextEntry, TextKind, LIR, NO_REG};
pub use lower::{lower, split_critical_edges};
