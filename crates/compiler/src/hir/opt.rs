//! SSA peephole optimizer
//!
//! Three passes run to a combined fixpoint: phi simplification, CFG
//! simplification (constant-condition folding and empty-goto bypass), and
//! dead-code elimination over the reachable subgraph. Each pass reports
//! whether it changed anything; a full round with no changes ends the loop,
//! which also makes the optimizer idempotent by construction.

use super::{BlockId, BlockKind, Func, Payload, ValueId};
use crate::types::Op;
use std::collections::HashSet;

/// Optimize to a fixpoint.
pub fn optimize(func: &mut Func) -> Result<(), String> {
    while run_passes(func)? {}
    Ok(())
}

/// One round of all passes; true if anything changed. Exposed so tests can
/// assert the fixpoint really is one.
pub fn run_passes(func: &mut Func) -> Result<bool, String> {
    let mut changed = simplify_phis(func)?;
    changed |= simplify_cfg(func);
    changed |= eliminate_dead_code(func);
    Ok(changed)
}

/// Replace phis with at most one distinct non-self argument.
fn simplify_phis(func: &mut Func) -> Result<bool, String> {
    let mut changed = false;
    for b in func.blocks.clone() {
        for phi in func.phis(b) {
            if func.value(phi).args.is_empty() {
                return Err(format!("phi {} in {} has no arguments", phi, b));
            }
            let mut same: Option<ValueId> = None;
            let mut trivial = true;
            for &arg in &func.value(phi).args {
                if arg == phi || Some(arg) == same {
                    continue;
                }
                if same.is_some() {
                    trivial = false;
                    break;
                }
                same = Some(arg);
            }
            if !trivial {
                continue;
            }
            let Some(same) = same else { continue };
            func.replace_all_uses(phi, same);
            func.remove_value(phi);
            changed = true;
        }
    }
    Ok(changed)
}

fn simplify_cfg(func: &mut Func) -> bool {
    let mut changed = false;

    // fold `if` blocks with a constant-bool condition into gotos
    for b in func.blocks.clone() {
        if func.block(b).kind != BlockKind::If {
            continue;
        }
        let Some(ctrl) = func.block(b).ctrl else {
            continue;
        };
        if func.value(ctrl).op != Op::CBool {
            continue;
        }
        let Payload::Int(v) = func.value(ctrl).payload else {
            continue;
        };
        let taken_idx = if v != 0 { 0 } else { 1 };
        let taken = func.block(b).succs[taken_idx];
        let not_taken = func.block(b).succs[1 - taken_idx];
        if let Some(pos) = func.block(not_taken).preds.iter().position(|&p| p == b) {
            func.remove_pred(not_taken, pos);
        }
        func.block_mut(b).succs = vec![taken];
        func.clear_ctrl(b);
        func.block_mut(b).kind = BlockKind::Goto;
        changed = true;
    }

    // bypass empty goto blocks with a single predecessor. Replacing the
    // block in place on both sides keeps phi argument positions intact.
    for m in func.blocks.clone() {
        if m == func.entry {
            continue;
        }
        let block = func.block(m);
        if block.kind != BlockKind::Goto
            || !block.values.is_empty()
            || block.preds.len() != 1
            || block.succs.len() != 1
        {
            continue;
        }
        let p = block.preds[0];
        let s = block.succs[0];
        if p == m || s == m {
            continue;
        }
        if func.block(s).preds.contains(&p) {
            // would create a duplicate predecessor; leave the block alone
            continue;
        }
        if let Some(sp) = func.block_mut(p).succs.iter_mut().find(|x| **x == m) {
            *sp = s;
        }
        if let Some(ps) = func.block_mut(s).preds.iter_mut().find(|x| **x == m) {
            *ps = p;
        }
        func.block_mut(m).preds.clear();
        func.block_mut(m).succs.clear();
        func.remove_block(m);
        changed = true;
    }

    changed
}

fn eliminate_dead_code(func: &mut Func) -> bool {
    let mut changed = false;

    let mut reachable = HashSet::new();
    let mut work = vec![func.entry];
    while let Some(b) = work.pop() {
        if !reachable.insert(b) {
            continue;
        }
        for &s in &func.block(b).succs {
            work.push(s);
        }
    }

    let dead: Vec<BlockId> = func
        .blocks
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    for &d in &dead {
        let succs = func.block(d).succs.clone();
        for s in succs {
            if let Some(pos) = func.block(s).preds.iter().position(|&p| p == d) {
                func.remove_pred(s, pos);
            }
        }
        func.block_mut(d).succs.clear();
    }
    for &d in &dead {
        func.clear_ctrl(d);
        for v in func.block(d).values.clone() {
            func.remove_value(v);
        }
        func.remove_block(d);
        changed = true;
    }

    // values with no uses and no observable effects
    for b in func.blocks.clone() {
        for v in func.block(b).values.clone().into_iter().rev() {
            let value = func.value(v);
            if value.uses.is_empty() && value.use_blocks.is_empty() && !value.op.is_pinned() {
                func.remove_value(v);
                changed = true;
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::hir::builder;
    use crate::hir::verify::verify;
    use crate::parser::Parser;
    use crate::typecheck::TypeChecker;

    fn build_fn(src: &str, name: &str) -> Func {
        let mut package = Parser::new(src).parse().expect("parse");
        package.functions.extend(builtins::builtin_decls());
        let mut tc = TypeChecker::new();
        let sigs = tc.check_package(&mut package).expect("typecheck");
        let decl = package.find_function(name).expect("function");
        let func = builder::build(decl, &sigs).expect("build");
        verify(&func).expect("verify before optimize");
        func
    }

    fn optimized(src: &str, name: &str) -> Func {
        let mut f = build_fn(src, name);
        optimize(&mut f).expect("optimize");
        verify(&f).expect("verify after optimize");
        f
    }

    #[test]
    fn test_constant_false_branch_is_deleted() {
        let f = optimized(
            "func main() { if false { assert(1, 2) } else { assert(1, 1) } }",
            "main",
        );
        // the then-side call and its argument constant must be gone
        for v in f.value_ids() {
            assert_ne!(
                f.value(v).payload,
                Payload::Int(2),
                "dead branch survived optimization"
            );
        }
        // no constant-condition if remains
        for &b in &f.blocks {
            if f.block(b).kind == BlockKind::If {
                let ctrl = f.block(b).ctrl.unwrap();
                assert_ne!(f.value(ctrl).op, Op::CBool);
            }
        }
    }

    #[test]
    fn test_constant_true_keeps_then_branch() {
        let f = optimized(
            "func main() { if true { assert(1, 1) } else { assert(1, 2) } }",
            "main",
        );
        for v in f.value_ids() {
            assert_ne!(f.value(v).payload, Payload::Int(2));
        }
    }

    #[test]
    fn test_optimizer_is_idempotent() {
        let srcs = [
            "func fibo(n int) int { if n == 0 { return 0 }\n if n == 1 { return 1 }\n return fibo(n-1) + fibo(n-2) }\nfunc main() { assert(fibo(10), 55) }",
            "func main() { let i = 0\n while true { if i < 5 { i += 1\n continue }\n i += 2\n if i == 7 { break } }\n assert(i, 7) }",
            "func main() { let a = [5, 4, 3, 2, 1]\n for i = 0; i < 4; i += 1 { for j = 0; j < 4 - i; j += 1 { if a[j] > a[j+1] { let t = a[j]\n a[j] = a[j+1]\n a[j+1] = t } } }\n assert(a[0], 1) }",
        ];
        for (i, src) in srcs.iter().enumerate() {
            let mut f = optimized(src, if i == 0 { "fibo" } else { "main" });
            assert!(
                !run_passes(&mut f).unwrap(),
                "optimizer not at fixpoint for program {}",
                i
            );
        }
    }

    #[test]
    fn test_unused_pure_value_is_removed() {
        let f = optimized("func main() { let x = 1 + 2\n assert(0, 0) }", "main");
        for v in f.value_ids() {
            assert_ne!(f.value(v).op, Op::Add, "dead add survived");
        }
    }

    #[test]
    fn test_calls_are_pinned() {
        let f = optimized(
            "func f() int { return 1 }\nfunc main() { f()\n assert(0, 0) }",
            "main",
        );
        let calls = f
            .value_ids()
            .filter(|&v| f.value(v).op == Op::Call)
            .count();
        assert_eq!(calls, 2, "the unused call must survive DCE");
    }

    #[test]
    fn test_while_true_folds_to_goto() {
        let f = optimized(
            "func main() { let i = 0\n while true { i += 1\n if i == 3 { break } }\n assert(i, 3) }",
            "main",
        );
        for &b in &f.blocks {
            if f.block(b).kind == BlockKind::If {
                assert_ne!(f.value(f.block(b).ctrl.unwrap()).op, Op::CBool);
            }
        }
    }
}
