//! Tokenizer and parser for Rook source
//!
//! Statements are terminated by newlines, semicolons, or a closing brace;
//! `for` headers use explicit semicolons. Comments run from `//` to the end
//! of the line.

use crate::ast::{Expr, ExprKind, FuncDecl, Lit, Package, Stmt, VarExpr};
use crate::types::{Op, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Int,
    Float,
    Str,
    Char,
    Punct,
    Newline,
    Eof,
}

/// A token with source position information.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokKind,
    /// Raw text for idents/puncts/numbers; decoded content for strings and
    /// character literals
    pub text: String,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed)
    pub column: usize,
}

impl Token {
    fn new(kind: TokKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.kind != TokKind::Str && self.kind != TokKind::Char && self.text == *other
    }
}

const KEYWORDS: &[&str] = &[
    "func", "let", "if", "else", "while", "do", "for", "break", "continue", "return", "true",
    "false",
];

const TYPE_NAMES: &[(&str, Type)] = &[
    ("int", Type::Int),
    ("long", Type::Long),
    ("short", Type::Short),
    ("byte", Type::Byte),
    ("char", Type::Char),
    ("bool", Type::Bool),
    ("float", Type::Float),
    ("double", Type::Double),
    ("string", Type::String),
    ("void", Type::Void),
];

fn err_at(line: usize, msg: impl Into<String>) -> String {
    format!("at line {}: {}", line + 1, msg.into())
}

/// Decode one escape sequence after a backslash.
fn unescape(c: char, line: usize) -> Result<char, String> {
    Ok(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        '0' => '\0',
        _ => return Err(err_at(line, format!("unknown escape '\\{}'", c))),
    })
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 0;
    let mut col = 0;

    macro_rules! advance {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];
        let (tline, tcol) = (line, col);
        if c == '\n' {
            // collapse runs of newlines into one terminator token
            if !matches!(
                tokens.last(),
                Some(Token {
                    kind: TokKind::Newline,
                    ..
                })
            ) {
                tokens.push(Token::new(TokKind::Newline, "\n", tline, tcol));
            }
            advance!();
            continue;
        }
        if c.is_whitespace() {
            advance!();
            continue;
        }
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                advance!();
            }
            continue;
        }
        if c.is_ascii_digit() {
            let mut text = String::new();
            let mut is_float = false;
            while i < chars.len() && chars[i].is_ascii_digit() {
                text.push(chars[i]);
                advance!();
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_float = true;
                text.push('.');
                advance!();
                while i < chars.len() && chars[i].is_ascii_digit() {
                    text.push(chars[i]);
                    advance!();
                }
            }
            if i < chars.len() && (chars[i] == 'L' || chars[i] == 'f') {
                if chars[i] == 'f' {
                    is_float = true;
                }
                text.push(chars[i]);
                advance!();
            }
            let kind = if is_float { TokKind::Float } else { TokKind::Int };
            tokens.push(Token::new(kind, text, tline, tcol));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                text.push(chars[i]);
                advance!();
            }
            tokens.push(Token::new(TokKind::Ident, text, tline, tcol));
            continue;
        }
        if c == '"' {
            advance!();
            let mut text = String::new();
            loop {
                if i >= chars.len() || chars[i] == '\n' {
                    return Err(err_at(tline, "unclosed string literal"));
                }
                if chars[i] == '"' {
                    advance!();
                    break;
                }
                if chars[i] == '\\' {
                    advance!();
                    if i >= chars.len() {
                        return Err(err_at(tline, "unclosed string literal"));
                    }
                    text.push(unescape(chars[i], tline)?);
                    advance!();
                } else {
                    text.push(chars[i]);
                    advance!();
                }
            }
            tokens.push(Token::new(TokKind::Str, text, tline, tcol));
            continue;
        }
        if c == '\'' {
            advance!();
            if i >= chars.len() {
                return Err(err_at(tline, "unclosed character literal"));
            }
            let ch = if chars[i] == '\\' {
                advance!();
                if i >= chars.len() {
                    return Err(err_at(tline, "unclosed character literal"));
                }
                let e = unescape(chars[i], tline)?;
                advance!();
                e
            } else {
                let ch = chars[i];
                advance!();
                ch
            };
            if i >= chars.len() || chars[i] != '\'' {
                return Err(err_at(tline, "unclosed character literal"));
            }
            advance!();
            tokens.push(Token::new(TokKind::Char, ch.to_string(), tline, tcol));
            continue;
        }
        // punctuation, longest match first
        let three = ["<<=", ">>="];
        let two = [
            "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
            "<<", ">>", "++", "--",
        ];
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let matched = three
            .iter()
            .find(|p| rest.starts_with(**p))
            .or_else(|| two.iter().find(|p| rest.starts_with(**p)));
        if let Some(p) = matched {
            for _ in 0..p.len() {
                advance!();
            }
            tokens.push(Token::new(TokKind::Punct, *p, tline, tcol));
            continue;
        }
        if "(){}[],;?:+-*/%&|^~!<>=".contains(c) {
            advance!();
            tokens.push(Token::new(TokKind::Punct, c.to_string(), tline, tcol));
            continue;
        }
        return Err(err_at(tline, format!("unexpected character '{}'", c)));
    }
    tokens.push(Token::new(TokKind::Eof, "", line, col));
    Ok(tokens)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
    /// Tokenizer failure, reported from `parse`
    tok_err: Option<String>,
}

impl Parser {
    pub fn new(source: &str) -> Self {
        Parser::with_name(source, "<input>")
    }

    pub fn with_name(source: &str, name: &str) -> Self {
        let (tokens, tok_err) = match tokenize(source) {
            Ok(tokens) => (tokens, None),
            Err(e) => (vec![Token::new(TokKind::Eof, "", 0, 0)], Some(e)),
        };
        Parser {
            tokens,
            pos: 0,
            source: name.to_string(),
            tok_err,
        }
    }

    pub fn parse(&mut self) -> Result<Package, String> {
        if let Some(e) = self.tok_err.take() {
            return Err(e);
        }
        let mut package = Package::new(self.source.clone());
        self.skip_newlines();
        while !self.at_eof() {
            if self.check("func") {
                package.functions.push(self.parse_func()?);
            } else {
                package.top_level.push(self.parse_stmt()?);
            }
            self.skip_newlines();
        }
        Ok(package)
    }

    // ----- token plumbing -----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokKind::Eof
    }

    fn check(&self, text: &str) -> bool {
        *self.peek() == text
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn accept(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<Token, String> {
        if self.check(text) {
            Ok(self.advance())
        } else {
            let t = self.peek();
            Err(err_at(
                t.line,
                format!("expected '{}', found '{}'", text, t.text),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokKind::Newline {
            self.advance();
        }
    }

    /// A statement ends at a newline, a semicolon, a `}`, or end of input.
    fn expect_terminator(&mut self) -> Result<(), String> {
        match self.peek().kind {
            TokKind::Newline => {
                self.advance();
                Ok(())
            }
            TokKind::Eof => Ok(()),
            _ if self.check(";") => {
                self.advance();
                Ok(())
            }
            _ if self.check("}") => Ok(()),
            _ => {
                let t = self.peek();
                Err(err_at(
                    t.line,
                    format!("expected end of statement, found '{}'", t.text),
                ))
            }
        }
    }

    fn expect_ident(&mut self) -> Result<Token, String> {
        let t = self.peek().clone();
        if t.kind == TokKind::Ident && !KEYWORDS.contains(&t.text.as_str()) {
            self.advance();
            Ok(t)
        } else {
            Err(err_at(t.line, format!("expected identifier, found '{}'", t.text)))
        }
    }

    fn is_type_start(&self) -> bool {
        self.check("[") && self.tokens.get(self.pos + 1).is_some_and(|t| *t == "]")
            || TYPE_NAMES.iter().any(|(n, _)| self.check(n))
    }

    fn parse_type(&mut self) -> Result<Type, String> {
        if self.accept("[") {
            self.expect("]")?;
            let elem = self.parse_type()?;
            return Ok(Type::Array(Box::new(elem)));
        }
        let t = self.peek().clone();
        for (name, ty) in TYPE_NAMES {
            if t == *name {
                self.advance();
                return Ok(ty.clone());
            }
        }
        Err(err_at(t.line, format!("expected type, found '{}'", t.text)))
    }

    // ----- declarations -----

    fn parse_func(&mut self) -> Result<FuncDecl, String> {
        let kw = self.expect("func")?;
        let name = self.expect_ident()?;
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.check(")") {
            loop {
                let p = self.expect_ident()?;
                let ty = self.parse_type()?;
                params.push(VarExpr {
                    name: p.text,
                    ty,
                    line: p.line,
                });
                if !self.accept(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        let return_type = if self.is_type_start() {
            self.parse_type()?
        } else {
            Type::Void
        };
        let body = self.parse_block()?;
        Ok(FuncDecl {
            name: name.text,
            params,
            return_type,
            body,
            builtin: false,
            line: kw.line,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, String> {
        self.skip_newlines();
        self.expect("{")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.accept("}") {
                return Ok(stmts);
            }
            if self.at_eof() {
                return Err(err_at(self.peek().line, "unexpected end of input in block"));
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    // ----- statements -----

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        if self.check("let") {
            let stmt = self.parse_let()?;
            self.expect_terminator()?;
            return Ok(stmt);
        }
        if self.check("if") {
            return self.parse_if();
        }
        if self.check("while") {
            let kw = self.expect("while")?;
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Stmt::While {
                cond,
                body,
                line: kw.line,
            });
        }
        if self.check("do") {
            let kw = self.expect("do")?;
            let body = self.parse_block()?;
            self.skip_newlines();
            self.expect("while")?;
            let cond = self.parse_expr()?;
            self.expect_terminator()?;
            return Ok(Stmt::DoWhile {
                body,
                cond,
                line: kw.line,
            });
        }
        if self.check("for") {
            return self.parse_for();
        }
        if self.check("break") {
            let kw = self.advance();
            self.expect_terminator()?;
            return Ok(Stmt::Break { line: kw.line });
        }
        if self.check("continue") {
            let kw = self.advance();
            self.expect_terminator()?;
            return Ok(Stmt::Continue { line: kw.line });
        }
        if self.check("return") {
            let kw = self.advance();
            let value = if self.peek().kind == TokKind::Newline
                || self.check(";")
                || self.check("}")
                || self.at_eof()
            {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_terminator()?;
            return Ok(Stmt::Return {
                value,
                line: kw.line,
            });
        }
        let stmt = self.parse_simple()?;
        self.expect_terminator()?;
        Ok(stmt)
    }

    fn parse_let(&mut self) -> Result<Stmt, String> {
        let kw = self.expect("let")?;
        let name = self.expect_ident()?;
        let declared = if self.is_type_start() {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect("=")?;
        let value = self.parse_expr()?;
        Ok(Stmt::Let {
            name: name.text,
            declared,
            value,
            line: kw.line,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, String> {
        let kw = self.expect("if")?;
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let mut else_body = None;
        let save = self.pos;
        self.skip_newlines();
        if self.check("else") {
            self.advance();
            if self.check("if") {
                else_body = Some(vec![self.parse_if()?]);
            } else {
                else_body = Some(self.parse_block()?);
            }
        } else {
            self.pos = save;
        }
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            line: kw.line,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, String> {
        let kw = self.expect("for")?;
        let init = if self.check(";") {
            None
        } else if self.check("let") {
            Some(Box::new(self.parse_let()?))
        } else {
            Some(Box::new(self.parse_simple()?))
        };
        self.expect(";")?;
        let cond = self.parse_expr()?;
        self.expect(";")?;
        let post = if self.check("{") {
            None
        } else {
            Some(Box::new(self.parse_simple()?))
        };
        let body = self.parse_block()?;
        Ok(Stmt::For {
            init,
            cond,
            post,
            body,
            line: kw.line,
        })
    }

    const ASSIGN_OPS: &'static [(&'static str, Option<Op>)] = &[
        ("=", None),
        ("+=", Some(Op::Add)),
        ("-=", Some(Op::Sub)),
        ("*=", Some(Op::Mul)),
        ("/=", Some(Op::Div)),
        ("%=", Some(Op::Mod)),
        ("&=", Some(Op::And)),
        ("|=", Some(Op::Or)),
        ("^=", Some(Op::Xor)),
        ("<<=", Some(Op::LShift)),
        (">>=", Some(Op::RShift)),
    ];

    /// An expression statement, an assignment, or `++`/`--`. Used in
    /// statement position and in `for` headers.
    fn parse_simple(&mut self) -> Result<Stmt, String> {
        let expr = self.parse_expr()?;
        let line = expr.line;
        for (text, op) in Self::ASSIGN_OPS {
            if self.check(text) {
                self.advance();
                Self::check_lvalue(&expr)?;
                let value = self.parse_expr()?;
                return Ok(Stmt::Simple {
                    expr: Expr::new(
                        ExprKind::Assign {
                            target: Box::new(expr),
                            op: *op,
                            value: Box::new(value),
                        },
                        line,
                    ),
                    line,
                });
            }
        }
        if self.check("++") || self.check("--") {
            let t = self.advance();
            Self::check_lvalue(&expr)?;
            return Ok(Stmt::IncDec {
                target: expr,
                dec: t == "--",
                line,
            });
        }
        Ok(Stmt::Simple { expr, line })
    }

    fn check_lvalue(expr: &Expr) -> Result<(), String> {
        match &expr.kind {
            ExprKind::Var(_) | ExprKind::Index { .. } => Ok(()),
            _ => Err(err_at(expr.line, "invalid assignment target")),
        }
    }

    // ----- expressions, precedence climbing -----

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_binary(0)?;
        if self.accept("?") {
            let then_val = self.parse_expr()?;
            self.expect(":")?;
            let else_val = self.parse_ternary()?;
            let line = cond.line;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_val: Box::new(then_val),
                    else_val: Box::new(else_val),
                },
                line,
            ));
        }
        Ok(cond)
    }

    /// Binary operator tiers, loosest first.
    const BINARY_TIERS: &'static [&'static [(&'static str, Op)]] = &[
        &[("||", Op::LogOr)],
        &[("&&", Op::LogAnd)],
        &[("|", Op::Or)],
        &[("^", Op::Xor)],
        &[("&", Op::And)],
        &[("==", Op::CmpEQ), ("!=", Op::CmpNE)],
        &[
            ("<=", Op::CmpLE),
            (">=", Op::CmpGE),
            ("<", Op::CmpLT),
            (">", Op::CmpGT),
        ],
        &[("<<", Op::LShift), (">>", Op::RShift)],
        &[("+", Op::Add), ("-", Op::Sub)],
        &[("*", Op::Mul), ("/", Op::Div), ("%", Op::Mod)],
    ];

    fn parse_binary(&mut self, tier: usize) -> Result<Expr, String> {
        if tier >= Self::BINARY_TIERS.len() {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(tier + 1)?;
        loop {
            let mut matched = None;
            for (text, op) in Self::BINARY_TIERS[tier] {
                if self.check(text) {
                    matched = Some(*op);
                    self.advance();
                    break;
                }
            }
            let Some(op) = matched else { return Ok(left) };
            let right = self.parse_binary(tier + 1)?;
            let line = left.line;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let t = self.peek().clone();
        let op = if t == "-" {
            Some(Op::Sub)
        } else if t == "!" {
            Some(Op::LogNot)
        } else if t == "~" {
            Some(Op::Not)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                t.line,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        while self.check("[") {
            self.advance();
            let index = self.parse_expr()?;
            self.expect("]")?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let t = self.peek().clone();
        match t.kind {
            TokKind::Int => {
                self.advance();
                if let Some(digits) = t.text.strip_suffix('L') {
                    let v: i64 = digits
                        .parse()
                        .map_err(|_| err_at(t.line, "long literal out of range"))?;
                    Ok(Expr::lit(Lit::Long(v), t.line))
                } else {
                    let v: i64 = t
                        .text
                        .parse()
                        .map_err(|_| err_at(t.line, "integer literal out of range"))?;
                    let v = i32::try_from(v).map_err(|_| {
                        err_at(t.line, "integer literal out of range, add an L suffix")
                    })?;
                    Ok(Expr::lit(Lit::Int(v), t.line))
                }
            }
            TokKind::Float => {
                self.advance();
                if let Some(digits) = t.text.strip_suffix('f') {
                    let v: f32 = digits
                        .parse()
                        .map_err(|_| err_at(t.line, "bad float literal"))?;
                    Ok(Expr::lit(Lit::Float(v), t.line))
                } else {
                    let v: f64 = t
                        .text
                        .parse()
                        .map_err(|_| err_at(t.line, "bad float literal"))?;
                    Ok(Expr::lit(Lit::Double(v), t.line))
                }
            }
            TokKind::Str => {
                self.advance();
                Ok(Expr::lit(Lit::Str(t.text), t.line))
            }
            TokKind::Char => {
                self.advance();
                let c = t.text.chars().next().unwrap_or('\0');
                if !c.is_ascii() {
                    return Err(err_at(t.line, "character literal is not ASCII"));
                }
                Ok(Expr::lit(Lit::Char(c as u8), t.line))
            }
            TokKind::Ident if t == "true" || t == "false" => {
                self.advance();
                Ok(Expr::lit(Lit::Bool(t == "true"), t.line))
            }
            TokKind::Ident if !KEYWORDS.contains(&t.text.as_str()) => {
                self.advance();
                if self.accept("(") {
                    let mut args = Vec::new();
                    self.skip_newlines();
                    if !self.check(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.accept(",") {
                                break;
                            }
                            self.skip_newlines();
                        }
                    }
                    self.expect(")")?;
                    return Ok(Expr::new(
                        ExprKind::FuncCall { name: t.text, args },
                        t.line,
                    ));
                }
                Ok(Expr::new(ExprKind::Var(t.text), t.line))
            }
            TokKind::Punct if t == "(" => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(")")?;
                Ok(e)
            }
            TokKind::Punct if t == "[" => {
                self.advance();
                let mut elems = Vec::new();
                self.skip_newlines();
                if !self.check("]") {
                    loop {
                        elems.push(self.parse_expr()?);
                        if !self.accept(",") {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.expect("]")?;
                Ok(Expr::new(ExprKind::Array(elems), t.line))
            }
            _ => Err(err_at(
                t.line,
                format!("expected expression, found '{}'", t.text),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Package {
        Parser::new(src).parse().expect("parse failed")
    }

    #[test]
    fn test_parse_function_with_params() {
        let p = parse_ok("func add(a int, b int) int { return a + b }");
        assert_eq!(p.functions.len(), 1);
        let f = &p.functions[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].ty, Type::Int);
        assert_eq!(f.return_type, Type::Int);
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn test_parse_void_function() {
        let p = parse_ok("func main() { print(1) }");
        assert_eq!(p.functions[0].return_type, Type::Void);
    }

    #[test]
    fn test_precedence() {
        let p = parse_ok("func main() { let x = 1 + 2 * 3 }");
        let Stmt::Let { value, .. } = &p.functions[0].body[0] else {
            panic!("expected let");
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, Op::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: Op::Mul, .. }
        ));
    }

    #[test]
    fn test_array_type_and_literal() {
        let p = parse_ok("func main() { let a []int = [5, 4, 3] }");
        let Stmt::Let {
            declared, value, ..
        } = &p.functions[0].body[0]
        else {
            panic!("expected let");
        };
        assert_eq!(*declared, Some(Type::Array(Box::new(Type::Int))));
        assert!(matches!(&value.kind, ExprKind::Array(v) if v.len() == 3));
    }

    #[test]
    fn test_for_with_compound_assign() {
        let p = parse_ok("func main() { for i = 0; i < 4; i += 1 { print(i) } }");
        let Stmt::For { init, post, .. } = &p.functions[0].body[0] else {
            panic!("expected for");
        };
        assert!(init.is_some());
        assert!(post.is_some());
    }

    #[test]
    fn test_long_literal_suffix() {
        let p = parse_ok("func main() { let a long = 55L }");
        let Stmt::Let { value, .. } = &p.functions[0].body[0] else {
            panic!("expected let");
        };
        assert_eq!(value.ty, Some(Type::Long));
    }

    #[test]
    fn test_do_while_and_ternary() {
        let p = parse_ok("func main() { let i = 0\n do { i += 1 } while i < 3\n let m = i > 2 ? i : 0 }");
        assert!(matches!(p.functions[0].body[1], Stmt::DoWhile { .. }));
    }

    #[test]
    fn test_else_if_chain() {
        let p = parse_ok("func f(n int) int {\n if n == 0 { return 0 }\n else if n == 1 { return 1 }\n else { return 2 }\n}");
        let Stmt::If { else_body, .. } = &p.functions[0].body[0] else {
            panic!("expected if");
        };
        assert!(matches!(
            else_body.as_deref(),
            Some([Stmt::If { .. }])
        ));
    }

    #[test]
    fn test_top_level_statements() {
        let p = parse_ok("let x = 1\nprint(x)\n");
        assert!(p.functions.is_empty());
        assert_eq!(p.top_level.len(), 2);
    }

    #[test]
    fn test_string_escapes() {
        let p = parse_ok("func main() { let s = \"a\\nb\" }");
        let Stmt::Let { value, .. } = &p.functions[0].body[0] else {
            panic!("expected let");
        };
        assert!(matches!(&value.kind, ExprKind::Lit(Lit::Str(s)) if s == "a\nb"));
    }

    #[test]
    fn test_unclosed_string_is_error() {
        assert!(Parser::new("func main() { let s = \"abc }").parse().is_err());
    }

    #[test]
    fn test_incdec_statement() {
        let p = parse_ok("func main() { let i = 0\n i++\n i-- }");
        assert!(matches!(
            p.functions[0].body[1],
            Stmt::IncDec { dec: false, .. }
        ));
        assert!(matches!(
            p.functions[0].body[2],
            Stmt::IncDec { dec: true, .. }
        ));
    }
}
