//! High-level IR in SSA form
//!
//! Values and blocks live in arenas owned by the enclosing `Func` and are
//! addressed by integer handles, which keeps the cyclic def-use and
//! pred-succ structure out of the ownership graph. Removal tombstones the
//! arena slot; the per-block value lists and the func block list only ever
//! hold live handles.
//!
//! Successor and predecessor lists are mirrored and positional: the i-th
//! argument of a phi corresponds to the i-th predecessor of its block.

pub mod builder;
pub mod dom;
pub mod opt;
pub mod verify;

use crate::types::{Op, Type};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Symbolic payload of a value: literal contents, a callee name, or a
/// parameter index.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Int(i64),
    Float(f64),
    Str(String),
    /// Callee name of a `Call`
    Func(String),
    /// Parameter index of a `Param`
    Index(usize),
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub op: Op,
    /// Ordered argument values
    pub args: Vec<ValueId>,
    pub payload: Payload,
    /// Owning block
    pub block: BlockId,
    /// Values that consume this one as an argument, one entry per use
    pub uses: Vec<ValueId>,
    /// Blocks whose `ctrl` is this value
    pub use_blocks: Vec<BlockId>,
    pub ty: Option<Type>,
    /// Tombstone set on removal
    dead: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    Goto,
    Return,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHint {
    None,
    Entry,
    LoopHeader,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Ordered values; phis precede all others
    pub values: Vec<ValueId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// The `If` condition or the `Return` value
    pub ctrl: Option<ValueId>,
    pub hint: BlockHint,
}

/// A function under compilation. Owns every block and value.
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub return_type: Type,
    pub entry: BlockId,
    /// Live blocks in creation order
    pub blocks: Vec<BlockId>,
    values_arena: Vec<Value>,
    blocks_arena: Vec<Block>,
}

impl Func {
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        let mut func = Func {
            name: name.into(),
            return_type,
            entry: BlockId(0),
            blocks: Vec::new(),
            values_arena: Vec::new(),
            blocks_arena: Vec::new(),
        };
        let entry = func.new_block(BlockKind::Goto);
        func.block_mut(entry).hint = BlockHint::Entry;
        func.entry = entry;
        func
    }

    // ----- accessors -----

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values_arena[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values_arena[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks_arena[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks_arena[id.0 as usize]
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.values_arena
            .iter()
            .filter(|v| !v.dead)
            .map(|v| v.id)
    }

    // ----- construction -----

    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks_arena.len() as u32);
        self.blocks_arena.push(Block {
            id,
            kind,
            values: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            ctrl: None,
            hint: BlockHint::None,
        });
        self.blocks.push(id);
        id
    }

    /// Create a value at the end of `block` and register its uses.
    pub fn new_value(
        &mut self,
        block: BlockId,
        op: Op,
        args: Vec<ValueId>,
        payload: Payload,
        ty: Option<Type>,
    ) -> ValueId {
        let id = ValueId(self.values_arena.len() as u32);
        for &a in &args {
            self.value_mut(a).uses.push(id);
        }
        self.values_arena.push(Value {
            id,
            op,
            args,
            payload,
            block,
            uses: Vec::new(),
            use_blocks: Vec::new(),
            ty,
            dead: false,
        });
        self.block_mut(block).values.push(id);
        id
    }

    /// Create an argument-less, untyped phi. Phis are kept ahead of all
    /// non-phi values in the block list.
    pub fn new_phi(&mut self, block: BlockId) -> ValueId {
        let id = ValueId(self.values_arena.len() as u32);
        self.values_arena.push(Value {
            id,
            op: Op::Phi,
            args: Vec::new(),
            payload: Payload::None,
            block,
            uses: Vec::new(),
            use_blocks: Vec::new(),
            ty: None,
            dead: false,
        });
        let at = self
            .block(block)
            .values
            .iter()
            .position(|&v| self.value(v).op != Op::Phi)
            .unwrap_or(self.block(block).values.len());
        self.block_mut(block).values.insert(at, id);
        id
    }

    pub fn phi_add_arg(&mut self, phi: ValueId, arg: ValueId) {
        self.value_mut(arg).uses.push(phi);
        self.value_mut(phi).args.push(arg);
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).succs.push(to);
        self.block_mut(to).preds.push(from);
    }

    pub fn set_ctrl(&mut self, block: BlockId, value: ValueId) {
        if let Some(old) = self.block(block).ctrl {
            remove_one(&mut self.value_mut(old).use_blocks, &block);
        }
        self.block_mut(block).ctrl = Some(value);
        self.value_mut(value).use_blocks.push(block);
    }

    pub fn clear_ctrl(&mut self, block: BlockId) {
        if let Some(old) = self.block_mut(block).ctrl.take() {
            remove_one(&mut self.value_mut(old).use_blocks, &block);
        }
    }

    // ----- graph surgery -----

    /// Rewrite every use of `old` (argument positions and block ctrls) to
    /// `new`. `old` keeps its own argument list.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        let users = std::mem::take(&mut self.value_mut(old).uses);
        for &u in &users {
            if u == old {
                // a phi may reference itself; drop such entries with the value
                self.value_mut(old).uses.push(u);
                continue;
            }
            for i in 0..self.value(u).args.len() {
                if self.value(u).args[i] == old {
                    self.value_mut(u).args[i] = new;
                    self.value_mut(new).uses.push(u);
                }
            }
        }
        let use_blocks = std::mem::take(&mut self.value_mut(old).use_blocks);
        for &b in &use_blocks {
            self.block_mut(b).ctrl = Some(new);
            self.value_mut(new).use_blocks.push(b);
        }
    }

    /// Remove a value from the graph. Its argument uses are unregistered;
    /// the caller must have rewritten or dropped all remaining uses.
    pub fn remove_value(&mut self, id: ValueId) {
        let args = self.value(id).args.clone();
        for a in args {
            remove_one(&mut self.value_mut(a).uses, &id);
        }
        let block = self.value(id).block;
        remove_one(&mut self.block_mut(block).values, &id);
        let v = self.value_mut(id);
        v.args.clear();
        v.uses.clear();
        v.use_blocks.clear();
        v.dead = true;
    }

    /// Drop the predecessor at position `index` of `block`, removing the
    /// matching argument from every phi in the block.
    pub fn remove_pred(&mut self, block: BlockId, index: usize) {
        self.block_mut(block).preds.remove(index);
        let phis: Vec<ValueId> = self
            .block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| self.value(v).op == Op::Phi)
            .collect();
        for phi in phis {
            if index < self.value(phi).args.len() {
                let arg = self.value_mut(phi).args.remove(index);
                remove_one(&mut self.value_mut(arg).uses, &phi);
            }
        }
    }

    /// Phi values of a block, in order.
    pub fn phis(&self, block: BlockId) -> Vec<ValueId> {
        self.block(block)
            .values
            .iter()
            .copied()
            .filter(|&v| self.value(v).op == Op::Phi)
            .collect()
    }

    /// Detach an entire block: marks it dead and removes it from the block
    /// list. The caller is responsible for edges and values.
    pub fn remove_block(&mut self, id: BlockId) {
        self.block_mut(id).kind = BlockKind::Dead;
        remove_one(&mut self.blocks, &id);
    }
}

/// Remove the first occurrence of `item` from `list`.
fn remove_one<T: PartialEq>(list: &mut Vec<T>, item: &T) {
    if let Some(pos) = list.iter().position(|x| x == item) {
        list.remove(pos);
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} -> {} {{", self.name, self.return_type)?;
        for &b in &self.blocks {
            let block = self.block(b);
            write!(f, "  {} {:?}", b, block.kind)?;
            if !block.preds.is_empty() {
                write!(f, " preds={:?}", block.preds.iter().map(|p| p.0).collect::<Vec<_>>())?;
            }
            if !block.succs.is_empty() {
                write!(f, " succs={:?}", block.succs.iter().map(|s| s.0).collect::<Vec<_>>())?;
            }
            if let Some(c) = block.ctrl {
                write!(f, " ctrl={}", c)?;
            }
            writeln!(f, ":")?;
            for &v in &block.values {
                let value = self.value(v);
                write!(f, "    {} = {}", v, value.op)?;
                for a in &value.args {
                    write!(f, " {}", a)?;
                }
                match &value.payload {
                    Payload::None => {}
                    p => write!(f, " {:?}", p)?,
                }
                match &value.ty {
                    Some(t) => writeln!(f, " : {}", t)?,
                    None => writeln!(f, " : ?")?,
                }
            }
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_mirrored() {
        let mut f = Func::new("t", Type::Void);
        let a = f.entry;
        let b = f.new_block(BlockKind::Goto);
        f.add_edge(a, b);
        assert_eq!(f.block(a).succs, vec![b]);
        assert_eq!(f.block(b).preds, vec![a]);
    }

    #[test]
    fn test_use_lists_track_args() {
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let c = f.new_value(e, Op::CInt, vec![], Payload::Int(1), Some(Type::Int));
        let add = f.new_value(e, Op::Add, vec![c, c], Payload::None, Some(Type::Int));
        assert_eq!(f.value(c).uses, vec![add, add]);
        f.remove_value(add);
        assert!(f.value(c).uses.is_empty());
    }

    #[test]
    fn test_replace_all_uses() {
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let a = f.new_value(e, Op::CInt, vec![], Payload::Int(1), Some(Type::Int));
        let b = f.new_value(e, Op::CInt, vec![], Payload::Int(2), Some(Type::Int));
        let add = f.new_value(e, Op::Add, vec![a, a], Payload::None, Some(Type::Int));
        f.replace_all_uses(a, b);
        assert_eq!(f.value(add).args, vec![b, b]);
        assert!(f.value(a).uses.is_empty());
        assert_eq!(f.value(b).uses, vec![add, add]);
    }

    #[test]
    fn test_remove_pred_drops_phi_arg() {
        let mut f = Func::new("t", Type::Void);
        let e = f.entry;
        let b1 = f.new_block(BlockKind::Goto);
        let b2 = f.new_block(BlockKind::Goto);
        let m = f.new_block(BlockKind::Goto);
        f.add_edge(e, b1);
        f.add_edge(e, b2);
        f.add_edge(b1, m);
        f.add_edge(b2, m);
        let c1 = f.new_value(b1, Op::CInt, vec![], Payload::Int(1), Some(Type::Int));
        let c2 = f.new_value(b2, Op::CInt, vec![], Payload::Int(2), Some(Type::Int));
        let phi = f.new_phi(m);
        f.phi_add_arg(phi, c1);
        f.phi_add_arg(phi, c2);
        f.remove_pred(m, 0);
        assert_eq!(f.value(phi).args, vec![c2]);
        assert!(f.value(c1).uses.is_empty());
    }
}
