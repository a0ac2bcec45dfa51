//! Dominator sets
//!
//! The iterative fixpoint formulation: dom(entry) = {entry}, and for every
//! other block dom(B) = {B} ∪ ⋂ dom(P) over the predecessors P. At the
//! sizes this compiler sees, set intersection over hash sets converges in a
//! handful of rounds and needs no ordering cleverness.

use super::{BlockId, Func};
use std::collections::{HashMap, HashSet};

pub struct DomTree {
    sets: HashMap<BlockId, HashSet<BlockId>>,
}

impl DomTree {
    pub fn compute(func: &Func) -> DomTree {
        let all: HashSet<BlockId> = func.blocks.iter().copied().collect();
        let mut sets: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
        for &b in &func.blocks {
            if b == func.entry {
                sets.insert(b, [b].into_iter().collect());
            } else {
                sets.insert(b, all.clone());
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &b in &func.blocks {
                if b == func.entry {
                    continue;
                }
                let mut next: Option<HashSet<BlockId>> = None;
                for &p in &func.block(b).preds {
                    let pd = &sets[&p];
                    next = Some(match next {
                        None => pd.clone(),
                        Some(acc) => acc.intersection(pd).copied().collect(),
                    });
                }
                let mut next = next.unwrap_or_default();
                next.insert(b);
                if next != sets[&b] {
                    sets.insert(b, next);
                    changed = true;
                }
            }
        }
        DomTree { sets }
    }

    /// True iff `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.sets.get(&b).is_some_and(|s| s.contains(&a))
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::BlockKind;
    use crate::types::Type;

    /// entry -> (then | else) -> merge
    fn diamond() -> (Func, BlockId, BlockId, BlockId, BlockId) {
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let t = f.new_block(BlockKind::Goto);
        let el = f.new_block(BlockKind::Goto);
        let m = f.new_block(BlockKind::Return);
        f.block_mut(e).kind = BlockKind::If;
        f.add_edge(e, t);
        f.add_edge(e, el);
        f.add_edge(t, m);
        f.add_edge(el, m);
        (f, e, t, el, m)
    }

    #[test]
    fn test_diamond_dominators() {
        let (f, e, t, el, m) = diamond();
        let dom = DomTree::compute(&f);
        assert!(dom.dominates(e, m));
        assert!(dom.dominates(e, t));
        assert!(dom.dominates(m, m));
        assert!(!dom.dominates(t, m));
        assert!(!dom.dominates(el, m));
        assert!(dom.strictly_dominates(e, m));
        assert!(!dom.strictly_dominates(m, m));
    }

    #[test]
    fn test_loop_header_dominates_body() {
        // entry -> header <-> body, header -> exit
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let h = f.new_block(BlockKind::If);
        let b = f.new_block(BlockKind::Goto);
        let x = f.new_block(BlockKind::Return);
        f.add_edge(e, h);
        f.add_edge(h, b);
        f.add_edge(h, x);
        f.add_edge(b, h);
        let dom = DomTree::compute(&f);
        assert!(dom.dominates(h, b));
        assert!(dom.dominates(h, x));
        assert!(!dom.dominates(b, h));
    }
}
