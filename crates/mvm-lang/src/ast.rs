//! Syntax tree for the contract language subset.
//!
//! The tree is intentionally shallow where the pipeline never looks:
//! struct bodies keep only field names and types, interface bodies are
//! not retained. Statements and expressions are parsed in full so the
//! screener can reject constructs by structural shape and the extractor
//! can walk function bodies for log calls.

use crate::token::Comment;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub package: String,
    pub package_line: u32,
    pub imports: Vec<ImportSpec>,
    pub decls: Vec<Decl>,
    pub comments: Vec<Comment>,
}

impl SourceFile {
    /// Exported top-level functions, receiver-bound methods excluded.
    pub fn exported_functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Func(f) if f.receiver.is_none() && f.is_exported() => Some(f),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Func(f) => Some(f),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpec {
    pub path: String,
    pub alias: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Func(FuncDecl),
    /// const/var declaration group.
    Gen(GenDecl),
    Type(TypeDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenDecl {
    pub is_const: bool,
    pub specs: Vec<ValueSpec>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSpec {
    pub names: Vec<String>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub line: u32,
    pub receiver: Option<Param>,
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub body: Option<Block>,
}

impl FuncDecl {
    /// Exported means an uppercase first rune, the language's
    /// visibility rule.
    pub fn is_exported(&self) -> bool {
        self.name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
    }
}

/// One parameter group: `a, b uint64` keeps both names with one type.
/// Unnamed positions have an empty `names` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub names: Vec<String>,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Ident(String),
    Qualified(String, String),
    Pointer(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    /// Fixed-length array; the length expression is kept as text.
    Array(String, Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
    /// `interface{}` or any interface literal (body not retained).
    Interface,
    /// `struct{...}` with field groups.
    Struct(Vec<Param>),
    Func(Vec<TypeExpr>, Vec<TypeExpr>),
    Chan(Box<TypeExpr>),
    /// `...T` in a final parameter position.
    Variadic(Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        lhs: Vec<Expr>,
        rhs: Vec<Expr>,
        /// `:=` when true, any `=`/compound form otherwise.
        define: bool,
        line: u32,
    },
    IncDec {
        expr: Expr,
        line: u32,
    },
    Go {
        call: Expr,
        line: u32,
    },
    Defer {
        call: Expr,
        line: u32,
    },
    Return {
        exprs: Vec<Expr>,
        line: u32,
    },
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        /// Either `Stmt::Block` or a chained `Stmt::If`.
        els: Option<Box<Stmt>>,
        line: u32,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
        line: u32,
    },
    /// `for k, v := range expr { ... }` — the iteration variant the
    /// screener rejects.
    ForRange {
        key: Option<Expr>,
        value: Option<Expr>,
        expr: Expr,
        body: Block,
        line: u32,
    },
    Switch {
        init: Option<Box<Stmt>>,
        tag: Option<Expr>,
        cases: Vec<SwitchCase>,
        line: u32,
    },
    Select {
        cases: Vec<Block>,
        line: u32,
    },
    Send {
        chan: Expr,
        value: Expr,
        line: u32,
    },
    Block(Block),
    Gen(GenDecl),
    Type(TypeDecl),
    Break,
    Continue,
    Goto(String),
    Fallthrough,
    Labeled {
        label: String,
        stmt: Box<Stmt>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Empty for `default`.
    pub exprs: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LitKind {
    Int,
    Float,
    Str,
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    Caret,
    Star,
    Amp,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    AndNot,
    Add,
    Sub,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::And
            | BinaryOp::AndNot => 5,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor => 4,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::LAnd => 2,
            BinaryOp::LOr => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident {
        name: String,
        line: u32,
    },
    Selector {
        recv: Box<Expr>,
        sel: String,
        line: u32,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    Lit {
        kind: LitKind,
        value: String,
        line: u32,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    SliceExpr {
        expr: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
    },
    Composite {
        ty: Option<TypeExpr>,
        elts: Vec<Expr>,
    },
    KeyValue {
        key: Box<Expr>,
        value: Box<Expr>,
    },
    FuncLit {
        params: Vec<Param>,
        results: Vec<Param>,
        body: Block,
    },
    TypeAssert {
        expr: Box<Expr>,
        /// None for `x.(type)` inside a type switch.
        ty: Option<TypeExpr>,
    },
    Paren(Box<Expr>),
    /// A type used in expression position (conversions, composite
    /// literal types the parser recognized structurally).
    Type(TypeExpr),
}

impl Expr {
    pub fn string_lit(&self) -> Option<&str> {
        match self {
            Expr::Lit {
                kind: LitKind::Str,
                value,
                ..
            } => Some(value),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Walkers
// ─────────────────────────────────────────────────────────────────

/// Visit every statement in a block, depth first, including statements
/// nested in function literals.
pub fn walk_stmts<'a>(block: &'a Block, visit: &mut dyn FnMut(&'a Stmt)) {
    for stmt in &block.stmts {
        walk_stmt(stmt, visit);
    }
}

fn walk_stmt<'a>(stmt: &'a Stmt, visit: &mut dyn FnMut(&'a Stmt)) {
    visit(stmt);
    // Function literals hide statements inside expressions; descend
    // into their bodies so structural screening sees them.
    for expr in stmt_exprs(stmt) {
        for_each_func_lit(expr, &mut |body| walk_stmts(body, visit));
    }
    match stmt {
        Stmt::If { init, then, els, .. } => {
            if let Some(init) = init {
                walk_stmt(init, visit);
            }
            walk_stmts(then, visit);
            if let Some(els) = els {
                walk_stmt(els, visit);
            }
        }
        Stmt::For {
            init, post, body, ..
        } => {
            if let Some(init) = init {
                walk_stmt(init, visit);
            }
            if let Some(post) = post {
                walk_stmt(post, visit);
            }
            walk_stmts(body, visit);
        }
        Stmt::ForRange { body, .. } => walk_stmts(body, visit),
        Stmt::Switch { init, cases, .. } => {
            if let Some(init) = init {
                walk_stmt(init, visit);
            }
            for case in cases {
                for s in &case.body {
                    walk_stmt(s, visit);
                }
            }
        }
        Stmt::Select { cases, .. } => {
            for case in cases {
                walk_stmts(case, visit);
            }
        }
        Stmt::Block(b) => walk_stmts(b, visit),
        Stmt::Labeled { stmt, .. } => walk_stmt(stmt, visit),
        _ => {}
    }
}

/// Visit every expression reachable from a block, including inside
/// nested statements and function literals.
pub fn walk_exprs<'a>(block: &'a Block, visit: &mut dyn FnMut(&'a Expr)) {
    walk_stmts(block, &mut |stmt| {
        for expr in stmt_exprs(stmt) {
            walk_expr(expr, visit);
        }
    });
}

fn stmt_exprs(stmt: &Stmt) -> Vec<&Expr> {
    match stmt {
        Stmt::Expr(e) | Stmt::IncDec { expr: e, .. } => vec![e],
        Stmt::Assign { lhs, rhs, .. } => lhs.iter().chain(rhs.iter()).collect(),
        Stmt::Go { call, .. } | Stmt::Defer { call, .. } => vec![call],
        Stmt::Return { exprs, .. } => exprs.iter().collect(),
        Stmt::If { cond, .. } => vec![cond],
        Stmt::For { cond, .. } => cond.iter().collect(),
        Stmt::ForRange {
            key, value, expr, ..
        } => key
            .iter()
            .chain(value.iter())
            .chain(std::iter::once(expr))
            .collect(),
        Stmt::Switch { tag, cases, .. } => tag
            .iter()
            .chain(cases.iter().flat_map(|c| c.exprs.iter()))
            .collect(),
        Stmt::Send { chan, value, .. } => vec![chan, value],
        Stmt::Gen(decl) => decl
            .specs
            .iter()
            .flat_map(|s| s.values.iter())
            .collect(),
        _ => Vec::new(),
    }
}

fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Selector { recv, .. } => walk_expr(recv, visit),
        Expr::Call { func, args, .. } => {
            walk_expr(func, visit);
            for arg in args {
                walk_expr(arg, visit);
            }
        }
        Expr::Unary { expr, .. } | Expr::Paren(expr) => walk_expr(expr, visit),
        Expr::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, visit);
            walk_expr(rhs, visit);
        }
        Expr::Index { expr, index } => {
            walk_expr(expr, visit);
            walk_expr(index, visit);
        }
        Expr::SliceExpr { expr, low, high } => {
            walk_expr(expr, visit);
            if let Some(low) = low {
                walk_expr(low, visit);
            }
            if let Some(high) = high {
                walk_expr(high, visit);
            }
        }
        Expr::Composite { elts, .. } => {
            for elt in elts {
                walk_expr(elt, visit);
            }
        }
        Expr::KeyValue { key, value } => {
            walk_expr(key, visit);
            walk_expr(value, visit);
        }
        // Function-literal bodies are reached through walk_stmts, which
        // already feeds every nested statement's expressions back here.
        Expr::FuncLit { .. } => {}
        Expr::TypeAssert { expr, .. } => walk_expr(expr, visit),
        _ => {}
    }
}

fn for_each_func_lit<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Block)) {
    match expr {
        Expr::FuncLit { body, .. } => f(body),
        Expr::Selector { recv, .. } => for_each_func_lit(recv, f),
        Expr::Call { func, args, .. } => {
            for_each_func_lit(func, f);
            for arg in args {
                for_each_func_lit(arg, f);
            }
        }
        Expr::Unary { expr, .. } | Expr::Paren(expr) => for_each_func_lit(expr, f),
        Expr::Binary { lhs, rhs, .. } => {
            for_each_func_lit(lhs, f);
            for_each_func_lit(rhs, f);
        }
        Expr::Index { expr, index } => {
            for_each_func_lit(expr, f);
            for_each_func_lit(index, f);
        }
        Expr::SliceExpr { expr, low, high } => {
            for_each_func_lit(expr, f);
            if let Some(low) = low {
                for_each_func_lit(low, f);
            }
            if let Some(high) = high {
                for_each_func_lit(high, f);
            }
        }
        Expr::Composite { elts, .. } => {
            for elt in elts {
                for_each_func_lit(elt, f);
            }
        }
        Expr::KeyValue { key, value } => {
            for_each_func_lit(key, f);
            for_each_func_lit(value, f);
        }
        Expr::TypeAssert { expr, .. } => for_each_func_lit(expr, f),
        _ => {}
    }
}
