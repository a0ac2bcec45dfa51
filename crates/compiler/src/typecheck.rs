//! Type checker for Rook
//!
//! Checks a parsed package and annotates every expression with its type.
//! The SSA builder consumes the annotated AST and treats any missing
//! annotation as a front-end bug, so this pass must visit every expression.
//!
//! Variables are function-scoped. Assigning to a name that has not been
//! declared introduces it with the type of the right-hand side, which is
//! what makes `for i = 0; ...` well-formed without a `let`.

use crate::ast::{Expr, ExprKind, FuncDecl, Lit, Package, Stmt};
use crate::types::{Op, Type};
use std::collections::HashMap;

/// A function signature as seen by call sites.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub params: Vec<Type>,
    pub ret: Type,
    pub builtin: bool,
}

/// Format a line number as an error message prefix (e.g., "at line 42: ").
/// Line numbers are 0-indexed internally, so we add 1 for display.
fn format_line_prefix(line: usize) -> String {
    format!("at line {}: ", line + 1)
}

pub struct TypeChecker {
    /// Environment mapping function names to their signatures
    sigs: HashMap<String, FuncSig>,
    /// Variables of the function currently being checked
    vars: HashMap<String, Type>,
    /// Return type of the function currently being checked
    current_ret: Type,
}

impl TypeChecker {
    pub fn new() -> Self {
        TypeChecker {
            sigs: HashMap::new(),
            vars: HashMap::new(),
            current_ret: Type::Void,
        }
    }

    /// Check the whole package and return the signature table for the
    /// later passes. The package must already contain the builtin decls
    /// and the implicit `main` (see `lib.rs`).
    pub fn check_package(&mut self, package: &mut Package) -> Result<HashMap<String, FuncSig>, String> {
        for f in &package.functions {
            if self.sigs.contains_key(&f.name) {
                return Err(format!(
                    "{}function '{}' is defined more than once",
                    format_line_prefix(f.line),
                    f.name
                ));
            }
            self.sigs.insert(
                f.name.clone(),
                FuncSig {
                    params: f.params.iter().map(|p| p.ty.clone()).collect(),
                    ret: f.return_type.clone(),
                    builtin: f.builtin,
                },
            );
        }
        if !self.sigs.contains_key("main") {
            return Err("no main function defined".to_string());
        }
        for f in &mut package.functions {
            if !f.builtin {
                self.check_function(f)?;
            }
        }
        Ok(self.sigs.clone())
    }

    fn check_function(&mut self, f: &mut FuncDecl) -> Result<(), String> {
        self.vars.clear();
        for p in &f.params {
            if p.ty == Type::Void {
                return Err(format!(
                    "{}parameter '{}' cannot be void",
                    format_line_prefix(p.line),
                    p.name
                ));
            }
            self.vars.insert(p.name.clone(), p.ty.clone());
        }
        self.current_ret = f.return_type.clone();
        for stmt in &mut f.body {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<(), String> {
        match stmt {
            Stmt::Let {
                name,
                declared,
                value,
                line,
            } => {
                if let Some(want) = declared.clone() {
                    adapt_literal(value, &want);
                    let got = self.check_expr(value)?;
                    if got != want {
                        return Err(format!(
                            "{}cannot initialize '{}' of type {} with {}",
                            format_line_prefix(*line),
                            name,
                            want,
                            got
                        ));
                    }
                    self.vars.insert(name.clone(), want);
                } else {
                    let got = self.check_expr(value)?;
                    if got == Type::Void {
                        return Err(format!(
                            "{}cannot bind '{}' to a void expression",
                            format_line_prefix(*line),
                            name
                        ));
                    }
                    self.vars.insert(name.clone(), got);
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.check_cond(cond)?;
                for s in then_body {
                    self.check_stmt(s)?;
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.check_stmt(s)?;
                    }
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                self.check_cond(cond)?;
                for s in body {
                    self.check_stmt(s)?;
                }
                Ok(())
            }
            Stmt::DoWhile { body, cond, .. } => {
                for s in body {
                    self.check_stmt(s)?;
                }
                self.check_cond(cond)
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => {
                if let Some(s) = init {
                    self.check_stmt(s)?;
                }
                self.check_cond(cond)?;
                for s in body {
                    self.check_stmt(s)?;
                }
                if let Some(s) = post {
                    self.check_stmt(s)?;
                }
                Ok(())
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
            Stmt::Return { value, line } => match value {
                Some(e) => {
                    adapt_literal(e, &self.current_ret.clone());
                    let got = self.check_expr(e)?;
                    if got != self.current_ret {
                        return Err(format!(
                            "{}return type mismatch: expected {}, found {}",
                            format_line_prefix(*line),
                            self.current_ret,
                            got
                        ));
                    }
                    Ok(())
                }
                None => {
                    if self.current_ret != Type::Void {
                        return Err(format!(
                            "{}missing return value, function returns {}",
                            format_line_prefix(*line),
                            self.current_ret
                        ));
                    }
                    Ok(())
                }
            },
            Stmt::Simple { expr, .. } => {
                self.check_expr(expr)?;
                Ok(())
            }
            Stmt::IncDec { target, line, .. } => {
                let ty = self.check_expr(target)?;
                if !ty.is_integer() {
                    return Err(format!(
                        "{}++/-- requires an integer operand, found {}",
                        format_line_prefix(*line),
                        ty
                    ));
                }
                match target.kind {
                    ExprKind::Var(_) | ExprKind::Index { .. } => Ok(()),
                    _ => Err(format!(
                        "{}invalid ++/-- target",
                        format_line_prefix(*line)
                    )),
                }
            }
        }
    }

    fn check_cond(&mut self, cond: &mut Expr) -> Result<(), String> {
        let ty = self.check_expr(cond)?;
        if ty != Type::Bool {
            return Err(format!(
                "{}condition must be bool, found {}",
                format_line_prefix(cond.line),
                ty
            ));
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &mut Expr) -> Result<Type, String> {
        let line = expr.line;
        let ty = match &mut expr.kind {
            ExprKind::Lit(lit) => lit.ty(),
            ExprKind::Var(name) => match self.vars.get(name) {
                Some(t) => t.clone(),
                None => {
                    return Err(format!(
                        "{}unknown variable '{}'",
                        format_line_prefix(line),
                        name
                    ))
                }
            },
            ExprKind::Index { base, index } => {
                let base_ty = self.check_expr(base)?;
                let index_ty = self.check_expr(index)?;
                if index_ty != Type::Int {
                    return Err(format!(
                        "{}index must be int, found {}",
                        format_line_prefix(line),
                        index_ty
                    ));
                }
                match base_ty {
                    Type::Array(elem) => *elem,
                    Type::String => Type::Char,
                    other => {
                        return Err(format!(
                            "{}cannot index into {}",
                            format_line_prefix(line),
                            other
                        ))
                    }
                }
            }
            ExprKind::Array(elems) => {
                if elems.is_empty() {
                    return Err(format!(
                        "{}cannot infer the element type of an empty array literal",
                        format_line_prefix(line)
                    ));
                }
                let first = self.check_expr(&mut elems[0])?;
                for e in elems.iter_mut().skip(1) {
                    adapt_literal(e, &first);
                    let t = self.check_expr(e)?;
                    if t != first {
                        return Err(format!(
                            "{}mixed element types in array literal: {} and {}",
                            format_line_prefix(line),
                            first,
                            t
                        ));
                    }
                }
                Type::Array(Box::new(first))
            }
            ExprKind::FuncCall { name, args } => {
                let sig = match self.sigs.get(name) {
                    Some(s) => s.clone(),
                    None => {
                        return Err(format!(
                            "{}call to unknown function '{}'",
                            format_line_prefix(line),
                            name
                        ))
                    }
                };
                if args.len() != sig.params.len() {
                    return Err(format!(
                        "{}'{}' takes {} argument(s), found {}",
                        format_line_prefix(line),
                        name,
                        sig.params.len(),
                        args.len()
                    ));
                }
                for (arg, want) in args.iter_mut().zip(&sig.params) {
                    adapt_literal(arg, want);
                    let got = self.check_expr(arg)?;
                    if got != *want {
                        return Err(format!(
                            "{}argument type mismatch in call to '{}': expected {}, found {}",
                            format_line_prefix(line),
                            name,
                            want,
                            got
                        ));
                    }
                }
                sig.ret
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let t = self.check_expr(operand)?;
                match op {
                    Op::Sub if t.is_numeric() => t,
                    Op::LogNot if t == Type::Bool => Type::Bool,
                    Op::Not if t.is_integer() => t,
                    _ => {
                        return Err(format!(
                            "{}operator '{}' cannot be applied to {}",
                            format_line_prefix(line),
                            op,
                            t
                        ))
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                if matches!(op, Op::LogAnd | Op::LogOr) {
                    let lt = self.check_expr(left)?;
                    let rt = self.check_expr(right)?;
                    if lt != Type::Bool || rt != Type::Bool {
                        return Err(format!(
                            "{}logical operator requires bool operands",
                            format_line_prefix(line)
                        ));
                    }
                    Type::Bool
                } else {
                    // let a literal on either side adapt to the other side
                    if let Some(t) = self.peek_type(left) {
                        adapt_literal(right, &t);
                    }
                    if let Some(t) = self.peek_type(right) {
                        adapt_literal(left, &t);
                    }
                    let lt = self.check_expr(left)?;
                    let rt = self.check_expr(right)?;
                    if lt != rt {
                        return Err(format!(
                            "{}operand type mismatch: {} {} {}",
                            format_line_prefix(line),
                            lt,
                            op,
                            rt
                        ));
                    }
                    self.binary_result(op, lt, line)?
                }
            }
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                self.check_cond(cond)?;
                let tt = self.check_expr(then_val)?;
                adapt_literal(else_val, &tt);
                let et = self.check_expr(else_val)?;
                if tt != et {
                    return Err(format!(
                        "{}ternary branches disagree: {} vs {}",
                        format_line_prefix(line),
                        tt,
                        et
                    ));
                }
                tt
            }
            ExprKind::Assign { target, op, value } => {
                let op = *op;
                let target_ty = match &mut target.kind {
                    ExprKind::Var(name) => match self.vars.get(name) {
                        Some(t) => {
                            let t = t.clone();
                            target.ty = Some(t.clone());
                            t
                        }
                        None => {
                            if op.is_some() {
                                return Err(format!(
                                    "{}unknown variable '{}'",
                                    format_line_prefix(line),
                                    name
                                ));
                            }
                            // plain assignment introduces the variable
                            let got = self.check_expr(value)?;
                            if got == Type::Void {
                                return Err(format!(
                                    "{}cannot assign a void expression",
                                    format_line_prefix(line)
                                ));
                            }
                            self.vars.insert(name.clone(), got.clone());
                            target.ty = Some(got);
                            expr.ty = Some(Type::Void);
                            return Ok(Type::Void);
                        }
                    },
                    ExprKind::Index { .. } => {
                        let t = self.check_expr(target)?;
                        if let ExprKind::Index { base, .. } = &target.kind {
                            if base.ty == Some(Type::String) {
                                return Err(format!(
                                    "{}strings are immutable, cannot assign to an index",
                                    format_line_prefix(line)
                                ));
                            }
                        }
                        t
                    }
                    _ => {
                        return Err(format!(
                            "{}invalid assignment target",
                            format_line_prefix(line)
                        ))
                    }
                };
                adapt_literal(value, &target_ty);
                let got = self.check_expr(value)?;
                if got != target_ty {
                    return Err(format!(
                        "{}cannot assign {} to {}",
                        format_line_prefix(line),
                        got,
                        target_ty
                    ));
                }
                if let Some(op) = op {
                    // the compound form must itself be a valid binary op
                    self.binary_result(op, target_ty, line)?;
                }
                Type::Void
            }
        };
        expr.ty = Some(ty.clone());
        Ok(ty)
    }

    /// Result type of a (non-logical) binary operator over operands of the
    /// given common type.
    fn binary_result(&self, op: Op, operand: Type, line: usize) -> Result<Type, String> {
        let prefix = || format_line_prefix(line);
        match op {
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                if operand.is_numeric() {
                    Ok(operand)
                } else {
                    Err(format!("{}arithmetic on {}", prefix(), operand))
                }
            }
            Op::Mod => {
                if operand.is_numeric() {
                    Ok(operand)
                } else {
                    Err(format!("{}'%' on {}", prefix(), operand))
                }
            }
            Op::And | Op::Or | Op::Xor | Op::LShift | Op::RShift => {
                if operand.is_integer() {
                    Ok(operand)
                } else {
                    Err(format!("{}bitwise operator on {}", prefix(), operand))
                }
            }
            Op::CmpEQ | Op::CmpNE => {
                if operand.is_numeric() || operand == Type::Bool || operand == Type::Char {
                    Ok(Type::Bool)
                } else {
                    Err(format!("{}cannot compare {}", prefix(), operand))
                }
            }
            Op::CmpLT | Op::CmpLE | Op::CmpGT | Op::CmpGE => {
                if operand.is_numeric() {
                    Ok(Type::Bool)
                } else {
                    Err(format!("{}cannot order {}", prefix(), operand))
                }
            }
            other => Err(format!("{}'{}' is not a binary operator", prefix(), other)),
        }
    }

    /// Type of an expression if it is knowable without side effects:
    /// literals and already-declared variables. Used to steer literal
    /// adaptation before full checking.
    fn peek_type(&self, expr: &Expr) -> Option<Type> {
        match &expr.kind {
            ExprKind::Lit(Lit::Int(_)) => None,
            ExprKind::Lit(l) => Some(l.ty()),
            ExprKind::Var(name) => self.vars.get(name).cloned(),
            _ => None,
        }
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        TypeChecker::new()
    }
}

/// Rewrite an `int` literal into a wider or narrower integer literal when
/// the context wants one and the value fits. `let a long = 5` and
/// `x % 10L` both read naturally because of this.
fn adapt_literal(expr: &mut Expr, want: &Type) {
    let ExprKind::Lit(Lit::Int(v)) = &expr.kind else {
        return;
    };
    let v = *v;
    let adapted = match want {
        Type::Long => Some(Lit::Long(v as i64)),
        Type::Short => i16::try_from(v).ok().map(Lit::Short),
        Type::Byte => i8::try_from(v).ok().map(Lit::Byte),
        _ => None,
    };
    if let Some(lit) = adapted {
        expr.ty = Some(lit.ty());
        expr.kind = ExprKind::Lit(lit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::parser::Parser;

    fn check(src: &str) -> Result<Package, String> {
        let mut package = Parser::new(src).parse()?;
        package.functions.extend(builtins::builtin_decls());
        let mut tc = TypeChecker::new();
        tc.check_package(&mut package)?;
        Ok(package)
    }

    #[test]
    fn test_annotates_expressions() {
        let p = check("func main() { let x = 1 + 2\n print(x) }").unwrap();
        let f = p.find_function("main").unwrap();
        let Stmt::Let { value, .. } = &f.body[0] else {
            panic!("expected let");
        };
        assert_eq!(value.ty, Some(Type::Int));
    }

    #[test]
    fn test_literal_adapts_to_declared_type() {
        let p = check("func main() { let a long = 5\n assert_long(a, 5L) }").unwrap();
        let f = p.find_function("main").unwrap();
        let Stmt::Let { value, .. } = &f.body[0] else {
            panic!("expected let");
        };
        assert_eq!(value.ty, Some(Type::Long));
    }

    #[test]
    fn test_literal_adapts_against_long_var() {
        assert!(check("func main() { let a long = 55L\n let b = a % 10 }").is_ok());
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = check("func main() { if 1 { print(1) } }").unwrap_err();
        assert!(err.contains("condition must be bool"), "{}", err);
    }

    #[test]
    fn test_unknown_variable() {
        let err = check("func main() { print(x) }").unwrap_err();
        assert!(err.contains("unknown variable"), "{}", err);
    }

    #[test]
    fn test_string_index_is_char_and_immutable() {
        assert!(check("func main() { let s = \"abc\"\n assert_char(s[0], 'a') }").is_ok());
        let err = check("func main() { let s = \"abc\"\n s[0] = 'x' }").unwrap_err();
        assert!(err.contains("immutable"), "{}", err);
    }

    #[test]
    fn test_implicit_declaration_via_assignment() {
        assert!(check("func main() { for i = 0; i < 3; i += 1 { print(i) } }").is_ok());
    }

    #[test]
    fn test_compound_assign_on_unknown_is_error() {
        let err = check("func main() { i += 1 }").unwrap_err();
        assert!(err.contains("unknown variable"), "{}", err);
    }

    #[test]
    fn test_call_arity_and_types() {
        let err = check("func main() { assert(1) }").unwrap_err();
        assert!(err.contains("takes 2 argument"), "{}", err);
        let err = check("func main() { assert(true, 1) }").unwrap_err();
        assert!(err.contains("argument type mismatch"), "{}", err);
    }

    #[test]
    fn test_return_type_checked() {
        let err = check("func f() int { return true }\nfunc main() { print(f()) }").unwrap_err();
        assert!(err.contains("return type mismatch"), "{}", err);
    }

    #[test]
    fn test_array_literal_homogeneous() {
        assert!(check("func main() { let a = [1, 2, 3]\n assert(a[0], 1) }").is_ok());
        let err = check("func main() { let a = [1, true] }").unwrap_err();
        assert!(err.contains("mixed element types"), "{}", err);
    }

    #[test]
    fn test_no_main_is_error() {
        let mut package = Parser::new("func f() {}").parse().unwrap();
        package.functions.extend(builtins::builtin_decls());
        let err = TypeChecker::new().check_package(&mut package).unwrap_err();
        assert!(err.contains("no main function"), "{}", err);
    }

    #[test]
    fn test_ternary_branches_must_agree() {
        let err = check("func main() { let x = true ? 1 : false }").unwrap_err();
        assert!(err.contains("ternary branches disagree"), "{}", err);
    }
}
