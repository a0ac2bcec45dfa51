//! Builtin function declarations
//!
//! Builtins have no user body. Each one is compiled as a native wrapper
//! whose body is a single call to the matching `rt_*` symbol in the C
//! runtime, so call sites treat builtins exactly like user functions.

use crate::ast::{FuncDecl, VarExpr};
use crate::types::Type;

/// The runtime symbol a builtin wrapper forwards to.
pub fn runtime_symbol(name: &str) -> String {
    format!("rt_{}", name)
}

fn decl(name: &str, params: &[(&str, Type)], ret: Type) -> FuncDecl {
    FuncDecl {
        name: name.to_string(),
        params: params
            .iter()
            .map(|(n, t)| VarExpr {
                name: n.to_string(),
                ty: t.clone(),
                line: 0,
            })
            .collect(),
        return_type: ret,
        body: Vec::new(),
        builtin: true,
        line: 0,
    }
}

/// All builtin declarations, in a stable order.
pub fn builtin_decls() -> Vec<FuncDecl> {
    vec![
        decl("print", &[("value", Type::Int)], Type::Void),
        decl("print_long", &[("value", Type::Long)], Type::Void),
        decl("print_char", &[("value", Type::Char)], Type::Void),
        decl("print_bool", &[("value", Type::Bool)], Type::Void),
        decl("print_float", &[("value", Type::Double)], Type::Void),
        decl("print_str", &[("value", Type::String)], Type::Void),
        decl("assert", &[("actual", Type::Int), ("expected", Type::Int)], Type::Void),
        decl(
            "assert_long",
            &[("actual", Type::Long), ("expected", Type::Long)],
            Type::Void,
        ),
        decl(
            "assert_char",
            &[("actual", Type::Char), ("expected", Type::Char)],
            Type::Void,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_bodyless() {
        for d in builtin_decls() {
            assert!(d.builtin);
            assert!(d.body.is_empty());
        }
    }

    #[test]
    fn test_runtime_symbol_prefix() {
        assert_eq!(runtime_symbol("assert"), "rt_assert");
    }
}
