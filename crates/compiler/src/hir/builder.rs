//! AST to SSA construction
//!
//! Incremental SSA construction in the style of Braun et al.: variables are
//! resolved per block, joins materialize phis on demand, and blocks are
//! sealed once all their predecessors are wired. Loop headers defer sealing
//! until the back edge exists; everything else seals automatically when the
//! builder moves to the next block.
//!
//! Failures here ("unknown variable", an unsealed block at exit) indicate a
//! front-end bug: the type checker accepts only programs this pass can
//! build.

use super::{BlockId, BlockKind, BlockHint, Func, Payload, ValueId};
use crate::ast::{Expr, ExprKind, FuncDecl, Lit, Stmt};
use crate::builtins;
use crate::typecheck::FuncSig;
use crate::types::{Op, Type};
use std::collections::{HashMap, HashSet};

/// break / continue targets of the innermost enclosing loop
struct LoopScope {
    exit: BlockId,
    post: BlockId,
}

pub struct Builder<'a> {
    func: Func,
    sigs: &'a HashMap<String, FuncSig>,
    cur: Option<BlockId>,
    sealed: HashSet<BlockId>,
    /// Loop headers whose sealing waits for the back edge
    deferred: HashSet<BlockId>,
    /// Per-block variable environment
    defs: HashMap<BlockId, HashMap<String, ValueId>>,
    /// Phis created in unsealed blocks, completed at seal time
    orphans: HashMap<BlockId, Vec<(String, ValueId)>>,
    scopes: Vec<LoopScope>,
    /// Set after break/continue/return; cleared when a new block becomes
    /// current. While set, no values or edges are emitted.
    stopped: bool,
}

/// Build a verified-ready SSA function from a typed declaration.
pub fn build(decl: &FuncDecl, sigs: &HashMap<String, FuncSig>) -> Result<Func, String> {
    let mut b = Builder {
        func: Func::new(decl.name.clone(), decl.return_type.clone()),
        sigs,
        cur: None,
        sealed: HashSet::new(),
        deferred: HashSet::new(),
        defs: HashMap::new(),
        orphans: HashMap::new(),
        scopes: Vec::new(),
        stopped: false,
    };
    b.run(decl)?;
    Ok(b.func)
}

impl<'a> Builder<'a> {
    fn run(&mut self, decl: &FuncDecl) -> Result<(), String> {
        let entry = self.func.entry;
        self.sealed.insert(entry);
        self.cur = Some(entry);
        for (i, p) in decl.params.iter().enumerate() {
            let v = self.func.new_value(
                entry,
                Op::Param,
                vec![],
                Payload::Index(i),
                Some(p.ty.clone()),
            );
            self.write_variable(&p.name, entry, v);
        }
        if decl.builtin {
            self.build_builtin_body(decl)?;
        } else {
            for stmt in &decl.body {
                self.build_stmt(stmt)?;
            }
            if !self.stopped {
                self.terminate_return(None)?;
            }
        }
        if let Some(cur) = self.cur {
            self.seal_block(cur)?;
        }
        if !self.orphans.is_empty() {
            return Err(format!(
                "internal: function '{}' has unsealed blocks on exit",
                self.func.name
            ));
        }
        Ok(())
    }

    /// Builtins compile to a wrapper whose body is one call to the runtime
    /// symbol, forwarding the parameters.
    fn build_builtin_body(&mut self, decl: &FuncDecl) -> Result<(), String> {
        let entry = self.func.entry;
        let args: Vec<ValueId> = self.func.block(entry).values.clone();
        let symbol = builtins::runtime_symbol(&decl.name);
        let call = self.func.new_value(
            entry,
            Op::Call,
            args,
            Payload::Func(symbol),
            Some(decl.return_type.clone()),
        );
        let value = (decl.return_type != Type::Void).then_some(call);
        self.terminate_return(value)
    }

    // ----- control-flow plumbing -----

    fn cur_block(&self) -> Result<BlockId, String> {
        self.cur
            .ok_or_else(|| "internal: no current block".to_string())
    }

    /// Switch the build point. The previously current block is sealed
    /// unless its sealing is deferred (loop headers).
    fn set_current(&mut self, b: BlockId) -> Result<(), String> {
        if let Some(old) = self.cur {
            if old != b && !self.deferred.contains(&old) {
                self.seal_block(old)?;
            }
        }
        self.cur = Some(b);
        self.stopped = false;
        Ok(())
    }

    /// Enter a join block; if nothing reaches it, drop it and stay stopped.
    fn enter_merge(&mut self, b: BlockId) -> Result<(), String> {
        if self.func.block(b).preds.is_empty() {
            self.func.remove_block(b);
            self.stopped = true;
            Ok(())
        } else {
            self.set_current(b)
        }
    }

    fn seal_block(&mut self, b: BlockId) -> Result<(), String> {
        if self.sealed.contains(&b) {
            return Ok(());
        }
        for (name, phi) in self.orphans.remove(&b).unwrap_or_default() {
            self.add_phi_operands(&name, phi)?;
        }
        self.sealed.insert(b);
        self.deferred.remove(&b);
        Ok(())
    }

    fn terminate_return(&mut self, value: Option<ValueId>) -> Result<(), String> {
        let cur = self.cur_block()?;
        self.func.block_mut(cur).kind = BlockKind::Return;
        if let Some(v) = value {
            self.func.set_ctrl(cur, v);
        }
        self.stopped = true;
        Ok(())
    }

    // ----- variable environment -----

    fn write_variable(&mut self, name: &str, block: BlockId, value: ValueId) {
        self.defs
            .entry(block)
            .or_default()
            .insert(name.to_string(), value);
    }

    fn read_variable(&mut self, name: &str, block: BlockId) -> Result<ValueId, String> {
        if let Some(&v) = self.defs.get(&block).and_then(|m| m.get(name)) {
            return Ok(v);
        }
        self.read_variable_recursive(name, block)
    }

    fn read_variable_recursive(&mut self, name: &str, block: BlockId) -> Result<ValueId, String> {
        let val;
        if !self.sealed.contains(&block) {
            // incomplete CFG: park a phi, complete it at seal time
            let phi = self.func.new_phi(block);
            self.orphans
                .entry(block)
                .or_default()
                .push((name.to_string(), phi));
            val = phi;
        } else if self.func.block(block).preds.len() == 1 {
            let pred = self.func.block(block).preds[0];
            val = self.read_variable(name, pred)?;
        } else if self.func.block(block).preds.is_empty() {
            return Err(format!("unknown variable '{}'", name));
        } else {
            // write before the recursive lookups to break cycles
            let phi = self.func.new_phi(block);
            self.write_variable(name, block, phi);
            val = self.add_phi_operands(name, phi)?;
        }
        self.write_variable(name, block, val);
        Ok(val)
    }

    fn add_phi_operands(&mut self, name: &str, phi: ValueId) -> Result<ValueId, String> {
        let block = self.func.value(phi).block;
        let preds = self.func.block(block).preds.clone();
        for p in preds {
            let arg = self.read_variable(name, p)?;
            self.func.phi_add_arg(phi, arg);
            self.propagate_phi_type(phi);
        }
        Ok(self.try_remove_trivial_phi(phi))
    }

    /// The first typed argument fixes an untyped phi's type, which then
    /// flows into any dependent untyped phis.
    fn propagate_phi_type(&mut self, phi: ValueId) {
        if self.func.value(phi).ty.is_some() {
            return;
        }
        let ty = self
            .func
            .value(phi)
            .args
            .iter()
            .find_map(|&a| self.func.value(a).ty.clone());
        if let Some(ty) = ty {
            self.func.value_mut(phi).ty = Some(ty);
            let users: Vec<ValueId> = self.func.value(phi).uses.clone();
            for u in users {
                if self.func.value(u).op == Op::Phi {
                    self.propagate_phi_type(u);
                }
            }
        }
    }

    /// Replace a phi that has at most one distinct non-self argument.
    /// Rewriting may make other phis trivial, so they are re-examined.
    fn try_remove_trivial_phi(&mut self, phi: ValueId) -> ValueId {
        let mut same: Option<ValueId> = None;
        for &arg in &self.func.value(phi).args {
            if arg == phi || Some(arg) == same {
                continue;
            }
            if same.is_some() {
                return phi; // two distinct operands: not trivial
            }
            same = Some(arg);
        }
        let Some(same) = same else { return phi };
        let users: Vec<ValueId> = self
            .func
            .value(phi)
            .uses
            .iter()
            .copied()
            .filter(|&u| u != phi)
            .collect();
        self.func.replace_all_uses(phi, same);
        self.replace_in_defs(phi, same);
        self.func.remove_value(phi);
        for u in users {
            if self.func.value(u).op == Op::Phi {
                self.try_remove_trivial_phi(u);
            }
        }
        same
    }

    fn replace_in_defs(&mut self, old: ValueId, new: ValueId) {
        for map in self.defs.values_mut() {
            for v in map.values_mut() {
                if *v == old {
                    *v = new;
                }
            }
        }
    }

    // ----- statements -----

    fn build_stmt(&mut self, stmt: &Stmt) -> Result<(), String> {
        if self.stopped {
            // unreachable code after break/continue/return is dropped
            return Ok(());
        }
        match stmt {
            Stmt::Let { name, value, .. } => {
                let v = self.build_expr(value)?;
                let cur = self.cur_block()?;
                self.write_variable(name, cur, v);
                Ok(())
            }
            Stmt::Simple { expr, .. } => {
                self.build_expr(expr)?;
                Ok(())
            }
            Stmt::IncDec { target, dec, .. } => {
                let op = if *dec { Op::Sub } else { Op::Add };
                let ty = Self::ty_of(target)?;
                let lit = match ty {
                    Type::Int => Lit::Int(1),
                    Type::Long => Lit::Long(1),
                    Type::Short => Lit::Short(1),
                    Type::Byte => Lit::Byte(1),
                    Type::Char => Lit::Char(1),
                    other => {
                        return Err(format!("internal: ++/-- on {}", other));
                    }
                };
                let one = Expr {
                    kind: ExprKind::Lit(lit),
                    ty: Some(ty),
                    line: target.line,
                };
                self.build_assign(target, Some(op), &one)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => self.build_if(cond, then_body, else_body.as_deref()),
            Stmt::While { cond, body, .. } => self.build_while(cond, body),
            Stmt::DoWhile { body, cond, .. } => self.build_do_while(body, cond),
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => self.build_for(init.as_deref(), cond, post.as_deref(), body),
            Stmt::Break { line } => {
                let scope_exit = match self.scopes.last() {
                    Some(s) => s.exit,
                    None => return Err(format!("at line {}: break outside a loop", line + 1)),
                };
                let cur = self.cur_block()?;
                self.func.add_edge(cur, scope_exit);
                self.stopped = true;
                Ok(())
            }
            Stmt::Continue { line } => {
                let scope_post = match self.scopes.last() {
                    Some(s) => s.post,
                    None => return Err(format!("at line {}: continue outside a loop", line + 1)),
                };
                let cur = self.cur_block()?;
                self.func.add_edge(cur, scope_post);
                self.stopped = true;
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(e) => Some(self.build_expr(e)?),
                    None => None,
                };
                self.terminate_return(v)
            }
        }
    }

    fn build_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), String> {
        let c = self.build_expr(cond)?;
        let cur = self.cur_block()?;
        self.func.block_mut(cur).kind = BlockKind::If;
        self.func.set_ctrl(cur, c);
        let then_b = self.func.new_block(BlockKind::Goto);
        match else_body {
            None => {
                let merge = self.func.new_block(BlockKind::Goto);
                self.func.add_edge(cur, then_b);
                self.func.add_edge(cur, merge);
                self.set_current(then_b)?;
                for s in then_body {
                    self.build_stmt(s)?;
                }
                if !self.stopped {
                    let end = self.cur_block()?;
                    self.func.add_edge(end, merge);
                }
                self.enter_merge(merge)
            }
            Some(else_stmts) => {
                let else_b = self.func.new_block(BlockKind::Goto);
                self.func.add_edge(cur, then_b);
                self.func.add_edge(cur, else_b);
                self.set_current(then_b)?;
                for s in then_body {
                    self.build_stmt(s)?;
                }
                let then_end = if self.stopped {
                    None
                } else {
                    Some(self.cur_block()?)
                };
                self.set_current(else_b)?;
                for s in else_stmts {
                    self.build_stmt(s)?;
                }
                let else_end = if self.stopped {
                    None
                } else {
                    Some(self.cur_block()?)
                };
                let merge = self.func.new_block(BlockKind::Goto);
                if let Some(te) = then_end {
                    self.func.add_edge(te, merge);
                }
                if let Some(ee) = else_end {
                    self.func.add_edge(ee, merge);
                }
                self.enter_merge(merge)
            }
        }
    }

    fn build_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), String> {
        let cur = self.cur_block()?;
        let header = self.func.new_block(BlockKind::Goto);
        self.func.block_mut(header).hint = BlockHint::LoopHeader;
        self.func.add_edge(cur, header);
        self.deferred.insert(header);
        self.set_current(header)?;
        let c = self.build_expr(cond)?;
        let cond_end = self.cur_block()?;
        self.func.block_mut(cond_end).kind = BlockKind::If;
        self.func.set_ctrl(cond_end, c);
        let body_b = self.func.new_block(BlockKind::Goto);
        let exit = self.func.new_block(BlockKind::Goto);
        self.func.add_edge(cond_end, body_b);
        self.func.add_edge(cond_end, exit);
        self.scopes.push(LoopScope { exit, post: header });
        self.set_current(body_b)?;
        for s in body {
            self.build_stmt(s)?;
        }
        if !self.stopped {
            let end = self.cur_block()?;
            self.func.add_edge(end, header);
        }
        self.scopes.pop();
        // back edge wired (or provably absent): the header is complete
        if let Some(last) = self.cur {
            if !self.deferred.contains(&last) {
                self.seal_block(last)?;
            }
        }
        self.seal_block(header)?;
        self.enter_merge(exit)
    }

    fn build_do_while(&mut self, body: &[Stmt], cond: &Expr) -> Result<(), String> {
        let cur = self.cur_block()?;
        let body_b = self.func.new_block(BlockKind::Goto);
        self.func.block_mut(body_b).hint = BlockHint::LoopHeader;
        self.func.add_edge(cur, body_b);
        self.deferred.insert(body_b);
        let latch = self.func.new_block(BlockKind::Goto);
        let exit = self.func.new_block(BlockKind::Goto);
        self.scopes.push(LoopScope { exit, post: latch });
        self.set_current(body_b)?;
        for s in body {
            self.build_stmt(s)?;
        }
        if !self.stopped {
            let end = self.cur_block()?;
            self.func.add_edge(end, latch);
        }
        self.scopes.pop();
        if self.func.block(latch).preds.is_empty() {
            // the body never falls through or continues; no condition to test
            self.func.remove_block(latch);
            self.seal_block(body_b)?;
            return self.enter_merge(exit);
        }
        self.set_current(latch)?;
        let c = self.build_expr(cond)?;
        let latch_end = self.cur_block()?;
        self.func.block_mut(latch_end).kind = BlockKind::If;
        self.func.set_ctrl(latch_end, c);
        self.func.add_edge(latch_end, body_b);
        self.func.add_edge(latch_end, exit);
        self.seal_block(latch_end)?;
        self.seal_block(body_b)?;
        self.enter_merge(exit)
    }

    fn build_for(
        &mut self,
        init: Option<&Stmt>,
        cond: &Expr,
        post: Option<&Stmt>,
        body: &[Stmt],
    ) -> Result<(), String> {
        if let Some(s) = init {
            self.build_stmt(s)?;
        }
        let cur = self.cur_block()?;
        let header = self.func.new_block(BlockKind::Goto);
        self.func.block_mut(header).hint = BlockHint::LoopHeader;
        self.func.add_edge(cur, header);
        self.deferred.insert(header);
        self.set_current(header)?;
        let c = self.build_expr(cond)?;
        let cond_end = self.cur_block()?;
        self.func.block_mut(cond_end).kind = BlockKind::If;
        self.func.set_ctrl(cond_end, c);
        let body_b = self.func.new_block(BlockKind::Goto);
        let post_b = self.func.new_block(BlockKind::Goto);
        let exit = self.func.new_block(BlockKind::Goto);
        self.func.add_edge(cond_end, body_b);
        self.func.add_edge(cond_end, exit);
        self.scopes.push(LoopScope { exit, post: post_b });
        self.set_current(body_b)?;
        for s in body {
            self.build_stmt(s)?;
        }
        if !self.stopped {
            let end = self.cur_block()?;
            self.func.add_edge(end, post_b);
        }
        self.scopes.pop();
        if self.func.block(post_b).preds.is_empty() {
            // body neither falls through nor continues
            self.func.remove_block(post_b);
            if let Some(last) = self.cur {
                if !self.deferred.contains(&last) {
                    self.seal_block(last)?;
                }
            }
            self.seal_block(header)?;
            return self.enter_merge(exit);
        }
        self.set_current(post_b)?;
        if let Some(s) = post {
            self.build_stmt(s)?;
        }
        let post_end = self.cur_block()?;
        self.func.add_edge(post_end, header);
        self.seal_block(post_end)?;
        self.seal_block(header)?;
        self.enter_merge(exit)
    }

    // ----- expressions -----

    fn ty_of(expr: &Expr) -> Result<Type, String> {
        expr.ty
            .clone()
            .ok_or_else(|| format!("internal: untyped expression at line {}", expr.line + 1))
    }

    fn build_expr(&mut self, expr: &Expr) -> Result<ValueId, String> {
        let ty = Self::ty_of(expr)?;
        match &expr.kind {
            ExprKind::Lit(lit) => self.build_lit(lit),
            ExprKind::Var(name) => {
                let cur = self.cur_block()?;
                self.read_variable(name, cur)
            }
            ExprKind::Index { base, index } => {
                let b = self.build_expr(base)?;
                let i = self.build_expr(index)?;
                let cur = self.cur_block()?;
                Ok(self
                    .func
                    .new_value(cur, Op::LoadIndex, vec![b, i], Payload::None, Some(ty)))
            }
            ExprKind::Array(elems) => {
                let cur = self.cur_block()?;
                let arr = self.func.new_value(
                    cur,
                    Op::CArray,
                    vec![],
                    Payload::Int(elems.len() as i64),
                    Some(ty),
                );
                for (i, e) in elems.iter().enumerate() {
                    let idx = self.func.new_value(
                        self.cur_block()?,
                        Op::CInt,
                        vec![],
                        Payload::Int(i as i64),
                        Some(Type::Int),
                    );
                    let v = self.build_expr(e)?;
                    let cur = self.cur_block()?;
                    self.func.new_value(
                        cur,
                        Op::StoreIndex,
                        vec![arr, idx, v],
                        Payload::None,
                        Some(Type::Void),
                    );
                }
                Ok(arr)
            }
            ExprKind::FuncCall { name, args } => {
                if !self.sigs.contains_key(name) {
                    return Err(format!("internal: call to unknown function '{}'", name));
                }
                let mut built = Vec::with_capacity(args.len());
                for a in args {
                    built.push(self.build_expr(a)?);
                }
                let cur = self.cur_block()?;
                Ok(self.func.new_value(
                    cur,
                    Op::Call,
                    built,
                    Payload::Func(name.clone()),
                    Some(ty),
                ))
            }
            ExprKind::Unary { op, operand } => match op {
                Op::Sub => {
                    let operand_ty = Self::ty_of(operand)?;
                    let zero = self.build_zero(&operand_ty)?;
                    let v = self.build_expr(operand)?;
                    let cur = self.cur_block()?;
                    Ok(self
                        .func
                        .new_value(cur, Op::Sub, vec![zero, v], Payload::None, Some(ty)))
                }
                Op::LogNot => {
                    let v = self.build_expr(operand)?;
                    let cur = self.cur_block()?;
                    Ok(self
                        .func
                        .new_value(cur, Op::Negate, vec![v], Payload::None, Some(ty)))
                }
                Op::Not => {
                    let v = self.build_expr(operand)?;
                    let cur = self.cur_block()?;
                    Ok(self
                        .func
                        .new_value(cur, Op::Not, vec![v], Payload::None, Some(ty)))
                }
                other => Err(format!("internal: '{}' is not a unary operator", other)),
            },
            ExprKind::Binary { op, left, right } => match op {
                Op::LogAnd | Op::LogOr => self.build_short_circuit(*op, left, right),
                _ => {
                    let l = self.build_expr(left)?;
                    let r = self.build_expr(right)?;
                    let cur = self.cur_block()?;
                    Ok(self
                        .func
                        .new_value(cur, *op, vec![l, r], Payload::None, Some(ty)))
                }
            },
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                let c = self.build_expr(cond)?;
                let cur = self.cur_block()?;
                self.func.block_mut(cur).kind = BlockKind::If;
                self.func.set_ctrl(cur, c);
                let then_b = self.func.new_block(BlockKind::Goto);
                let else_b = self.func.new_block(BlockKind::Goto);
                self.func.add_edge(cur, then_b);
                self.func.add_edge(cur, else_b);
                self.set_current(then_b)?;
                let v1 = self.build_expr(then_val)?;
                let t_end = self.cur_block()?;
                self.set_current(else_b)?;
                let v2 = self.build_expr(else_val)?;
                let e_end = self.cur_block()?;
                let merge = self.func.new_block(BlockKind::Goto);
                self.func.add_edge(t_end, merge);
                self.func.add_edge(e_end, merge);
                self.set_current(merge)?;
                let phi = self.func.new_phi(merge);
                self.func.phi_add_arg(phi, v1);
                self.func.phi_add_arg(phi, v2);
                self.func.value_mut(phi).ty = Some(ty);
                Ok(phi)
            }
            ExprKind::Assign { target, op, value } => {
                self.build_assign(target, *op, value)
            }
        }
    }

    /// `a && b` / `a || b` as a mini CFG whose merge phi carries the
    /// source-level boolean result: the first phi argument is `a` from the
    /// block that tested it, the second is `b` from the block that only
    /// runs when `a` did not decide the answer.
    fn build_short_circuit(&mut self, op: Op, left: &Expr, right: &Expr) -> Result<ValueId, String> {
        let a = self.build_expr(left)?;
        let a_end = self.cur_block()?;
        self.func.block_mut(a_end).kind = BlockKind::If;
        self.func.set_ctrl(a_end, a);
        let b_block = self.func.new_block(BlockKind::Goto);
        let merge = self.func.new_block(BlockKind::Goto);
        if op == Op::LogAnd {
            // false skips to the merge
            self.func.add_edge(a_end, b_block);
            self.func.add_edge(a_end, merge);
        } else {
            // true skips to the merge
            self.func.add_edge(a_end, merge);
            self.func.add_edge(a_end, b_block);
        }
        self.set_current(b_block)?;
        let b = self.build_expr(right)?;
        let b_end = self.cur_block()?;
        self.func.add_edge(b_end, merge);
        self.set_current(merge)?;
        let phi = self.func.new_phi(merge);
        self.func.phi_add_arg(phi, a);
        self.func.phi_add_arg(phi, b);
        self.func.value_mut(phi).ty = Some(Type::Bool);
        Ok(phi)
    }

    fn build_assign(
        &mut self,
        target: &Expr,
        op: Option<Op>,
        value: &Expr,
    ) -> Result<ValueId, String> {
        match &target.kind {
            ExprKind::Var(name) => {
                let v = match op {
                    None => self.build_expr(value)?,
                    Some(binop) => {
                        let cur = self.cur_block()?;
                        let old = self.read_variable(name, cur)?;
                        let rhs = self.build_expr(value)?;
                        let ty = Self::ty_of(target)?;
                        let cur = self.cur_block()?;
                        self.func
                            .new_value(cur, binop, vec![old, rhs], Payload::None, Some(ty))
                    }
                };
                let cur = self.cur_block()?;
                self.write_variable(name, cur, v);
                Ok(v)
            }
            ExprKind::Index { base, index } => {
                if Self::ty_of(base)? == Type::String {
                    return Err(format!(
                        "at line {}: strings are immutable",
                        target.line + 1
                    ));
                }
                let b = self.build_expr(base)?;
                let i = self.build_expr(index)?;
                let v = match op {
                    None => self.build_expr(value)?,
                    Some(binop) => {
                        let elem_ty = Self::ty_of(target)?;
                        let cur = self.cur_block()?;
                        let loaded = self.func.new_value(
                            cur,
                            Op::LoadIndex,
                            vec![b, i],
                            Payload::None,
                            Some(elem_ty.clone()),
                        );
                        let rhs = self.build_expr(value)?;
                        let cur = self.cur_block()?;
                        self.func.new_value(
                            cur,
                            binop,
                            vec![loaded, rhs],
                            Payload::None,
                            Some(elem_ty),
                        )
                    }
                };
                let cur = self.cur_block()?;
                self.func.new_value(
                    cur,
                    Op::StoreIndex,
                    vec![b, i, v],
                    Payload::None,
                    Some(Type::Void),
                );
                Ok(v)
            }
            _ => Err("internal: invalid assignment target".to_string()),
        }
    }

    fn build_lit(&mut self, lit: &Lit) -> Result<ValueId, String> {
        let cur = self.cur_block()?;
        let (op, payload) = match lit {
            Lit::Int(v) => (Op::CInt, Payload::Int(*v as i64)),
            Lit::Long(v) => (Op::CLong, Payload::Int(*v)),
            Lit::Short(v) => (Op::CShort, Payload::Int(*v as i64)),
            Lit::Byte(v) => (Op::CByte, Payload::Int(*v as i64)),
            Lit::Char(v) => (Op::CChar, Payload::Int(*v as i64)),
            Lit::Bool(v) => (Op::CBool, Payload::Int(*v as i64)),
            Lit::Float(v) => (Op::CFloat, Payload::Float(*v as f64)),
            Lit::Double(v) => (Op::CDouble, Payload::Float(*v)),
            Lit::Str(s) => (Op::CStr, Payload::Str(s.clone())),
        };
        Ok(self.func.new_value(cur, op, vec![], payload, Some(lit.ty())))
    }

    fn build_zero(&mut self, ty: &Type) -> Result<ValueId, String> {
        let cur = self.cur_block()?;
        let op = Op::const_for(ty)
            .ok_or_else(|| format!("internal: no zero constant for {}", ty))?;
        let payload = if ty.is_float() {
            Payload::Float(0.0)
        } else {
            Payload::Int(0)
        };
        Ok(self.func.new_value(cur, op, vec![], payload, Some(ty.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::hir::verify::verify;
    use crate::hir::BlockHint;
    use crate::parser::Parser;
    use crate::typecheck::TypeChecker;

    /// Parse, check, and build one function from source.
    fn build_fn(src: &str, name: &str) -> Func {
        let mut package = Parser::new(src).parse().expect("parse");
        package.functions.extend(builtins::builtin_decls());
        let mut tc = TypeChecker::new();
        let sigs = tc.check_package(&mut package).expect("typecheck");
        let decl = package.find_function(name).expect("function");
        let func = build(decl, &sigs).expect("build");
        verify(&func).expect("verify");
        func
    }

    #[test]
    fn test_straight_line_function() {
        let f = build_fn("func main() { let x = 1\n let y = x + 2\n print(y) }", "main");
        assert_eq!(f.blocks.len(), 1);
    }

    #[test]
    fn test_loop_variable_has_single_phi_in_header() {
        let f = build_fn(
            "func f() int { let i = 0\n while i < 5 { i += 1 }\n return i }\nfunc main() {}",
            "f",
        );
        let header = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).hint == BlockHint::LoopHeader)
            .expect("loop header");
        let phis = f.phis(header);
        assert_eq!(phis.len(), 1, "expected one phi for i, got {:?}", phis);
        assert_eq!(f.value(phis[0]).args.len(), f.block(header).preds.len());
    }

    #[test]
    fn test_if_else_merge_has_single_phi_of_branch_values() {
        let f = build_fn(
            "func f(c bool) int { let x = 0\n if c { x = 1 } else { x = 2 }\n return x }\nfunc main() {}",
            "f",
        );
        // the merge is the two-predecessor block
        let merge = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).preds.len() == 2)
            .expect("merge block");
        let phis = f.phis(merge);
        assert_eq!(phis.len(), 1);
        let args = &f.value(phis[0]).args;
        let payloads: Vec<_> = args.iter().map(|&a| f.value(a).payload.clone()).collect();
        assert!(payloads.contains(&Payload::Int(1)));
        assert!(payloads.contains(&Payload::Int(2)));
    }

    #[test]
    fn test_logical_or_merge_phi_argument_order() {
        let f = build_fn("func f(a bool, b bool) bool { return a || b }\nfunc main() {}", "f");
        let merge = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).preds.len() == 2)
            .expect("merge block");
        let phis = f.phis(merge);
        assert_eq!(phis.len(), 1);
        let phi = f.value(phis[0]);
        // first argument is `a` from the block that tested it; the block's
        // true edge goes straight to the merge
        let a_block = f.block(merge).preds[0];
        assert_eq!(f.value(phi.args[0]).op, Op::Param);
        assert_eq!(f.value(phi.args[0]).payload, Payload::Index(0));
        assert_eq!(f.block(a_block).succs[0], merge);
        // second argument is `b`, evaluated in its own block
        assert_eq!(f.value(phi.args[1]).payload, Payload::Index(1));
        assert_eq!(f.value(phi.args[1]).block, f.block(merge).preds[1]);
    }

    #[test]
    fn test_logical_and_merge_phi_argument_order() {
        let f = build_fn("func f(a bool, b bool) bool { return a && b }\nfunc main() {}", "f");
        let merge = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).preds.len() == 2)
            .expect("merge block");
        let phi = f.value(f.phis(merge)[0]);
        // first argument is `a` from the testing block, whose false edge
        // (successor 1) jumps to the merge
        let a_block = f.block(merge).preds[0];
        assert_eq!(f.value(phi.args[0]).payload, Payload::Index(0));
        assert_eq!(f.block(a_block).succs[1], merge);
        // second argument is `b` from the both-true path
        assert_eq!(f.value(phi.args[1]).payload, Payload::Index(1));
    }

    #[test]
    fn test_break_continue_shapes() {
        let f = build_fn(
            "func f() int {\n let i = 0\n while true {\n if i < 5 { i += 1\n continue }\n i += 2\n if i == 7 { break }\n }\n return i\n}\nfunc main() {}",
            "f",
        );
        // verified above; make sure both a back-path and an exit path exist
        let header = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).hint == BlockHint::LoopHeader)
            .unwrap();
        assert!(f.block(header).preds.len() >= 2);
    }

    #[test]
    fn test_return_in_both_branches_drops_merge() {
        let f = build_fn(
            "func f(n int) int { if n == 0 { return 0 } else { return 1 } }\nfunc main() {}",
            "f",
        );
        for &b in &f.blocks {
            assert!(
                !f.block(b).preds.is_empty() || b == f.entry,
                "unexpected orphan block"
            );
        }
    }

    #[test]
    fn test_builtin_wrapper_calls_runtime() {
        let mut package = Parser::new("func main() { }").parse().unwrap();
        package.functions.extend(builtins::builtin_decls());
        let mut tc = TypeChecker::new();
        let sigs = tc.check_package(&mut package).unwrap();
        let decl = package.find_function("assert").unwrap();
        let f = build(decl, &sigs).expect("build");
        verify(&f).expect("verify");
        let entry = f.block(f.entry);
        let call = entry
            .values
            .iter()
            .copied()
            .find(|&v| f.value(v).op == Op::Call)
            .expect("call value");
        assert_eq!(f.value(call).payload, Payload::Func("rt_assert".into()));
        assert_eq!(f.value(call).args.len(), 2);
    }

    #[test]
    fn test_array_literal_emits_stores() {
        let f = build_fn("func main() { let a = [5, 4]\n assert(a[0], 5) }", "main");
        let entry = f.block(f.entry);
        let stores = entry
            .values
            .iter()
            .filter(|&&v| f.value(v).op == Op::StoreIndex)
            .count();
        assert_eq!(stores, 2);
    }

    #[test]
    fn test_do_while_condition_in_latch() {
        let f = build_fn(
            "func f() int { let i = 0\n do { i += 1 } while i < 3\n return i }\nfunc main() {}",
            "f",
        );
        let header = f
            .blocks
            .iter()
            .copied()
            .find(|&b| f.block(b).hint == BlockHint::LoopHeader)
            .unwrap();
        // the body is the loop header; the latch holds the comparison
        let latch = *f
            .block(header)
            .preds
            .iter()
            .find(|&&p| f.block(p).kind == BlockKind::If)
            .expect("latch");
        let ctrl = f.block(latch).ctrl.unwrap();
        assert!(f.value(ctrl).op.is_comparison());
    }

    #[test]
    fn test_fibo_builds_and_verifies() {
        build_fn(
            "func fibo(n int) int {\n if n == 0 { return 0 }\n if n == 1 { return 1 }\n return fibo(n-1) + fibo(n-2)\n}\nfunc main() { assert(fibo(10), 55) }",
            "fibo",
        );
    }
}
