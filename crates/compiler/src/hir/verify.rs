//! IR verifier
//!
//! Checks the structural invariants every pass must preserve. A failure
//! here means a bug in a preceding pass, so messages name the function and
//! the violated property; the driver reports and aborts.

use super::dom::DomTree;
use super::{BlockId, BlockKind, Func, ValueId};
use crate::types::Op;
use std::collections::{HashMap, HashSet};

fn fail(func: &Func, msg: String) -> Result<(), String> {
    Err(format!("verifier: {}: {}\n{}", func.name, msg, func))
}

pub fn verify(func: &Func) -> Result<(), String> {
    let live: HashSet<BlockId> = func.blocks.iter().copied().collect();

    // entry has no predecessors
    if !func.block(func.entry).preds.is_empty() {
        return fail(func, "entry block has predecessors".to_string());
    }

    // every block reachable from entry, and nothing dead in the list
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
    for &b in &func.blocks {
        if !reachable.contains(&b) {
            return fail(func, format!("block {} is unreachable", b));
        }
        if func.block(b).kind == BlockKind::Dead {
            return fail(func, format!("dead block {} in block list", b));
        }
    }
    for b in &reachable {
        if !live.contains(b) {
            return fail(func, format!("reachable block {} missing from block list", b));
        }
    }

    // kind arities and ctrl
    for &b in &func.blocks {
        let block = func.block(b);
        match block.kind {
            BlockKind::Goto => {
                if block.succs.len() != 1 {
                    return fail(func, format!("goto block {} has {} successors", b, block.succs.len()));
                }
            }
            BlockKind::If => {
                if block.succs.len() != 2 {
                    return fail(func, format!("if block {} has {} successors", b, block.succs.len()));
                }
                if block.ctrl.is_none() {
                    return fail(func, format!("if block {} has no condition", b));
                }
            }
            BlockKind::Return => {
                if !block.succs.is_empty() {
                    return fail(func, format!("return block {} has successors", b));
                }
            }
            BlockKind::Dead => unreachable!("checked above"),
        }
    }

    // succ/pred mirroring, edge by edge
    for &b in &func.blocks {
        for &s in &func.block(b).succs {
            let out = func.block(b).succs.iter().filter(|&&x| x == s).count();
            let back = func.block(s).preds.iter().filter(|&&x| x == b).count();
            if out != back {
                return fail(func, format!("edge {} -> {} not mirrored ({} vs {})", b, s, out, back));
            }
        }
        for &p in &func.block(b).preds {
            if !live.contains(&p) {
                return fail(func, format!("block {} has dead predecessor {}", b, p));
            }
        }
    }

    let dom = DomTree::compute(func);

    // per-value checks
    let mut expected_uses: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
    for &b in &func.blocks {
        let block = func.block(b);
        let mut seen_nonphi = false;
        for &v in &block.values {
            let value = func.value(v);
            if value.block != b {
                return fail(func, format!("{} listed in {} but owned by {}", v, b, value.block));
            }
            if value.ty.is_none() {
                return fail(func, format!("{} ({}) has no type", v, value.op));
            }
            if value.op == Op::Phi {
                if seen_nonphi {
                    return fail(func, format!("phi {} after non-phi values in {}", v, b));
                }
                if value.args.len() != block.preds.len() {
                    return fail(
                        func,
                        format!(
                            "phi {} in {} has {} args for {} preds",
                            v,
                            b,
                            value.args.len(),
                            block.preds.len()
                        ),
                    );
                }
                for (i, &arg) in value.args.iter().enumerate() {
                    let def_block = func.value(arg).block;
                    if !dom.dominates(def_block, block.preds[i]) {
                        return fail(
                            func,
                            format!(
                                "phi {} arg {} defined in {} does not dominate pred {}",
                                v, arg, def_block, block.preds[i]
                            ),
                        );
                    }
                }
            } else {
                seen_nonphi = true;
                for &arg in &value.args {
                    let def_block = func.value(arg).block;
                    if !dom.dominates(def_block, b) {
                        return fail(
                            func,
                            format!(
                                "{} uses {} defined in {} which does not dominate {}",
                                v, arg, def_block, b
                            ),
                        );
                    }
                }
            }
            for &arg in &value.args {
                expected_uses.entry(arg).or_default().push(v);
            }
        }
        if let Some(c) = block.ctrl {
            if !func.value(c).use_blocks.contains(&b) {
                return fail(func, format!("ctrl {} of {} missing the use-block backref", c, b));
            }
        }
    }

    // use lists are exact (as multisets), and use-blocks match ctrls
    for &b in &func.blocks {
        for &v in &func.block(b).values {
            let value = func.value(v);
            let mut expected = expected_uses.remove(&v).unwrap_or_default();
            let mut actual = value.uses.clone();
            expected.sort();
            actual.sort();
            if expected != actual {
                return fail(
                    func,
                    format!("use list of {} is {:?}, expected {:?}", v, actual, expected),
                );
            }
            for &ub in &value.use_blocks {
                if func.block(ub).ctrl != Some(v) {
                    return fail(func, format!("{} claims use-block {} whose ctrl differs", v, ub));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{BlockKind, Payload};
    use crate::types::Type;

    #[test]
    fn test_accepts_minimal_function() {
        let mut f = Func::new("t", Type::Void);
        f.block_mut(f.entry).kind = BlockKind::Return;
        assert!(verify(&f).is_ok());
    }

    #[test]
    fn test_rejects_unreachable_block() {
        let mut f = Func::new("t", Type::Void);
        f.block_mut(f.entry).kind = BlockKind::Return;
        let orphan = f.new_block(BlockKind::Return);
        let _ = orphan;
        let err = verify(&f).unwrap_err();
        assert!(err.contains("unreachable"), "{}", err);
    }

    #[test]
    fn test_rejects_untyped_value() {
        let mut f = Func::new("t", Type::Void);
        f.block_mut(f.entry).kind = BlockKind::Return;
        f.new_value(f.entry, Op::CInt, vec![], Payload::Int(1), None);
        let err = verify(&f).unwrap_err();
        assert!(err.contains("no type"), "{}", err);
    }

    #[test]
    fn test_rejects_goto_without_successor() {
        let f = Func::new("t", Type::Void);
        let err = verify(&f).unwrap_err();
        assert!(err.contains("goto block"), "{}", err);
    }

    #[test]
    fn test_rejects_phi_arity_mismatch() {
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let m = f.new_block(BlockKind::Return);
        f.add_edge(e, m);
        let c = f.new_value(e, Op::CInt, vec![], Payload::Int(1), Some(Type::Int));
        let phi = f.new_phi(m);
        f.phi_add_arg(phi, c);
        f.phi_add_arg(phi, c);
        f.value_mut(phi).ty = Some(Type::Int);
        let err = verify(&f).unwrap_err();
        assert!(err.contains("args for"), "{}", err);
    }
}
