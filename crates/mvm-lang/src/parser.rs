//! Recursive-descent parser for the contract language subset.
//!
//! The parser accepts a superset of what the screener allows: a `go`
//! statement or a `select` block must parse so the policy can reject it
//! by structural shape rather than by substring. It is lenient where
//! the pipeline never looks (interface bodies, channel element types)
//! and precise where it does (signatures, imports, call expressions).

use thiserror::Error;

use crate::ast::*;
use crate::lexer::{lex, LexError};
use crate::token::{Keyword, Token, TokenKind};

#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            line: err.pos.line,
            message: err.message,
        }
    }
}

/// Parse a full source file.
pub fn parse_source(source: &str) -> Result<SourceFile, ParseError> {
    let out = lex(source)?;
    let mut parser = Parser {
        tokens: out.tokens,
        pos: 0,
        no_composite: false,
    };
    let mut file = parser.source_file()?;
    file.comments = out.comments;
    Ok(file)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Set while parsing if/for/switch headers, where a `{` opens the
    /// body rather than a composite literal.
    no_composite: bool,
}

impl Parser {
    // ── token plumbing ───────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos.line
    }

    fn bump(&mut self) -> TokenKind {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.at_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {}", self.peek().describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(self.error(format!("expected {what}, found {}", other.describe()))),
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&TokenKind::Semi) {}
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn with_composites<T>(
        &mut self,
        allowed: bool,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = self.no_composite;
        self.no_composite = !allowed;
        let result = f(self);
        self.no_composite = saved;
        result
    }

    // ── file structure ───────────────────────────────────────────

    fn source_file(&mut self) -> Result<SourceFile, ParseError> {
        self.skip_semis();
        let package_line = self.line();
        if !self.eat_keyword(Keyword::Package) {
            return Err(self.error("expected package clause"));
        }
        let package = self.expect_ident("package name")?;
        self.skip_semis();

        let mut imports = Vec::new();
        while self.at_keyword(Keyword::Import) {
            self.bump();
            if self.eat(&TokenKind::LParen) {
                self.skip_semis();
                while !self.eat(&TokenKind::RParen) {
                    imports.push(self.import_spec()?);
                    self.skip_semis();
                }
            } else {
                imports.push(self.import_spec()?);
            }
            self.skip_semis();
        }

        let mut decls = Vec::new();
        loop {
            self.skip_semis();
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Keyword(Keyword::Func) => decls.push(Decl::Func(self.func_decl()?)),
                TokenKind::Keyword(Keyword::Var) => {
                    decls.push(Decl::Gen(self.gen_decl(false)?))
                }
                TokenKind::Keyword(Keyword::Const) => {
                    decls.push(Decl::Gen(self.gen_decl(true)?))
                }
                TokenKind::Keyword(Keyword::Type) => decls.push(Decl::Type(self.type_decl()?)),
                other => {
                    return Err(
                        self.error(format!("expected declaration, found {}", other.describe()))
                    )
                }
            }
        }

        Ok(SourceFile {
            package,
            package_line,
            imports,
            decls,
            comments: Vec::new(),
        })
    }

    fn import_spec(&mut self) -> Result<ImportSpec, ParseError> {
        let line = self.line();
        let alias = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Some(name)
            }
            TokenKind::Dot => {
                self.bump();
                Some(".".to_string())
            }
            _ => None,
        };
        match self.bump() {
            TokenKind::Str(path) => Ok(ImportSpec { path, alias, line }),
            other => Err(self.error(format!("expected import path, found {}", other.describe()))),
        }
    }

    // ── declarations ─────────────────────────────────────────────

    fn func_decl(&mut self) -> Result<FuncDecl, ParseError> {
        let line = self.line();
        self.bump(); // func

        let receiver = if self.at(&TokenKind::LParen) {
            // Distinguish a receiver from the parameter list of a
            // top-level function: a receiver is always followed by the
            // function name, so peek past the matching paren.
            let Some(close) = self.find_matching_paren() else {
                return Err(self.error("unbalanced receiver list"));
            };
            if matches!(self.tokens[close + 1].kind, TokenKind::Ident(_)) {
                self.bump(); // (
                let groups = self.param_groups(&TokenKind::RParen)?;
                self.expect(&TokenKind::RParen, "`)`")?;
                groups.into_iter().next()
            } else {
                None
            }
        } else {
            None
        };

        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "`(`")?;
        let params = self.param_groups(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen, "`)`")?;
        let results = self.result_list()?;

        let body = if self.at(&TokenKind::LBrace) {
            Some(self.block()?)
        } else {
            None
        };

        Ok(FuncDecl {
            name,
            line,
            receiver,
            params,
            results,
            body,
        })
    }

    fn find_matching_paren(&self) -> Option<usize> {
        let mut depth = 0usize;
        for (idx, tok) in self.tokens.iter().enumerate().skip(self.pos) {
            match tok.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                TokenKind::Eof => return None,
                _ => {}
            }
        }
        None
    }

    /// Parse a parameter list up to (not including) `close`. Handles
    /// the grouped-name form: in `a, b uint64`, both names share one
    /// type, and naming is decided per the whole list.
    fn param_groups(&mut self, close: &TokenKind) -> Result<Vec<Param>, ParseError> {
        // Each entry is one or two parts: `T` or `name T`.
        struct Entry {
            first: TypeExpr,
            second: Option<TypeExpr>,
        }

        let mut entries: Vec<Entry> = Vec::new();
        while !self.at(close) {
            let first = self.type_expr()?;
            let second = if !self.at(close) && !self.at(&TokenKind::Comma) {
                Some(self.type_expr()?)
            } else {
                None
            };
            entries.push(Entry { first, second });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        let named = entries.iter().any(|e| e.second.is_some());
        if !named {
            return Ok(entries
                .into_iter()
                .map(|e| Param {
                    names: Vec::new(),
                    ty: e.first,
                })
                .collect());
        }

        // Named mode: bare-ident entries are names joining the next
        // entry that carries a type.
        let mut groups: Vec<Param> = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for entry in entries {
            match entry.second {
                Some(ty) => {
                    let name = match entry.first {
                        TypeExpr::Ident(name) => name,
                        other => {
                            return Err(self.error(format!(
                                "expected parameter name, found type {}",
                                print_type(&other)
                            )))
                        }
                    };
                    pending.push(name);
                    groups.push(Param {
                        names: std::mem::take(&mut pending),
                        ty,
                    });
                }
                None => match entry.first {
                    TypeExpr::Ident(name) => pending.push(name),
                    other => {
                        // Mixed named/unnamed lists are invalid source;
                        // accept leniently as an unnamed slot.
                        groups.push(Param {
                            names: Vec::new(),
                            ty: other,
                        });
                    }
                },
            }
        }
        if !pending.is_empty() {
            return Err(self.error("parameter names without a type"));
        }
        Ok(groups)
    }

    fn result_list(&mut self) -> Result<Vec<Param>, ParseError> {
        if self.eat(&TokenKind::LParen) {
            let groups = self.param_groups(&TokenKind::RParen)?;
            self.expect(&TokenKind::RParen, "`)`")?;
            return Ok(groups);
        }
        if self.starts_type() {
            let ty = self.type_expr()?;
            return Ok(vec![Param {
                names: Vec::new(),
                ty,
            }]);
        }
        Ok(Vec::new())
    }

    fn starts_type(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Ident(_)
                | TokenKind::Star
                | TokenKind::LBracket
                | TokenKind::Arrow
                | TokenKind::Ellipsis
                | TokenKind::LParen
                | TokenKind::Keyword(
                    Keyword::Map | Keyword::Interface | Keyword::Struct | Keyword::Func
                        | Keyword::Chan
                )
        )
    }

    fn gen_decl(&mut self, is_const: bool) -> Result<GenDecl, ParseError> {
        let line = self.line();
        self.bump(); // var | const
        let mut specs = Vec::new();
        if self.eat(&TokenKind::LParen) {
            self.skip_semis();
            while !self.eat(&TokenKind::RParen) {
                specs.push(self.value_spec()?);
                self.skip_semis();
            }
        } else {
            specs.push(self.value_spec()?);
        }
        Ok(GenDecl {
            is_const,
            specs,
            line,
        })
    }

    fn value_spec(&mut self) -> Result<ValueSpec, ParseError> {
        let mut names = vec![self.expect_ident("name")?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident("name")?);
        }
        let ty = if !self.at(&TokenKind::Assign)
            && !self.at(&TokenKind::Semi)
            && !self.at(&TokenKind::RParen)
        {
            Some(self.type_expr()?)
        } else {
            None
        };
        let mut values = Vec::new();
        if self.eat(&TokenKind::Assign) {
            values.push(self.expr()?);
            while self.eat(&TokenKind::Comma) {
                values.push(self.expr()?);
            }
        }
        Ok(ValueSpec { names, ty, values })
    }

    fn type_decl(&mut self) -> Result<TypeDecl, ParseError> {
        let line = self.line();
        self.bump(); // type
        let name = self.expect_ident("type name")?;
        self.eat(&TokenKind::Assign); // alias form
        let ty = self.type_expr()?;
        Ok(TypeDecl { name, ty, line })
    }

    // ── types ────────────────────────────────────────────────────

    fn type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        match self.peek().clone() {
            TokenKind::Star => {
                self.bump();
                Ok(TypeExpr::Pointer(Box::new(self.type_expr()?)))
            }
            TokenKind::Ellipsis => {
                self.bump();
                Ok(TypeExpr::Variadic(Box::new(self.type_expr()?)))
            }
            TokenKind::LBracket => {
                self.bump();
                if self.eat(&TokenKind::RBracket) {
                    Ok(TypeExpr::Slice(Box::new(self.type_expr()?)))
                } else {
                    let len = self.bracketed_text()?;
                    Ok(TypeExpr::Array(len, Box::new(self.type_expr()?)))
                }
            }
            TokenKind::Keyword(Keyword::Map) => {
                self.bump();
                self.expect(&TokenKind::LBracket, "`[`")?;
                let key = self.type_expr()?;
                self.expect(&TokenKind::RBracket, "`]`")?;
                let value = self.type_expr()?;
                Ok(TypeExpr::Map(Box::new(key), Box::new(value)))
            }
            TokenKind::Keyword(Keyword::Interface) => {
                self.bump();
                self.expect(&TokenKind::LBrace, "`{`")?;
                self.skip_balanced_braces()?;
                Ok(TypeExpr::Interface)
            }
            TokenKind::Keyword(Keyword::Struct) => {
                self.bump();
                self.expect(&TokenKind::LBrace, "`{`")?;
                let mut fields = Vec::new();
                self.skip_semis();
                while !self.eat(&TokenKind::RBrace) {
                    fields.push(self.struct_field()?);
                    self.skip_semis();
                }
                Ok(TypeExpr::Struct(fields))
            }
            TokenKind::Keyword(Keyword::Func) => {
                self.bump();
                self.expect(&TokenKind::LParen, "`(`")?;
                let params = self.param_groups(&TokenKind::RParen)?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let results = self.result_list()?;
                Ok(TypeExpr::Func(
                    params.into_iter().map(|p| p.ty).collect(),
                    results.into_iter().map(|p| p.ty).collect(),
                ))
            }
            TokenKind::Keyword(Keyword::Chan) => {
                self.bump();
                self.eat(&TokenKind::Arrow);
                Ok(TypeExpr::Chan(Box::new(self.type_expr()?)))
            }
            TokenKind::Arrow => {
                self.bump();
                if !self.eat_keyword(Keyword::Chan) {
                    return Err(self.error("expected `chan` after `<-`"));
                }
                Ok(TypeExpr::Chan(Box::new(self.type_expr()?)))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.type_expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at(&TokenKind::Dot) && matches!(self.peek_at(1), TokenKind::Ident(_)) {
                    self.bump();
                    let sel = self.expect_ident("qualified type name")?;
                    Ok(TypeExpr::Qualified(name, sel))
                } else {
                    Ok(TypeExpr::Ident(name))
                }
            }
            other => Err(self.error(format!("expected type, found {}", other.describe()))),
        }
    }

    fn struct_field(&mut self) -> Result<Param, ParseError> {
        // Embedded field (`core.Context` alone) or named group
        // (`a, b uint64 `tag``). Reuse the entry logic through a tiny
        // lookahead: names are idents followed by `,` or a type start.
        let mut names = Vec::new();
        loop {
            if let TokenKind::Ident(name) = self.peek().clone() {
                match self.peek_at(1) {
                    TokenKind::Comma => {
                        self.bump();
                        self.bump();
                        names.push(name);
                        continue;
                    }
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Dot | TokenKind::Str(_) => {
                        // embedded field or qualified embedded field
                        break;
                    }
                    _ => {
                        self.bump();
                        names.push(name);
                        break;
                    }
                }
            }
            break;
        }
        let ty = self.type_expr()?;
        // optional field tag
        if let TokenKind::Str(_) = self.peek() {
            self.bump();
        }
        Ok(Param { names, ty })
    }

    fn skip_balanced_braces(&mut self) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.bump() {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                TokenKind::Eof => return Err(self.error("unbalanced braces")),
                _ => {}
            }
        }
    }

    /// Capture the textual form of an array length up to `]`.
    fn bracketed_text(&mut self) -> Result<String, ParseError> {
        let mut parts: Vec<String> = Vec::new();
        let mut depth = 1usize;
        loop {
            match self.peek().clone() {
                TokenKind::LBracket => {
                    depth += 1;
                    parts.push("[".into());
                    self.bump();
                }
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return Ok(parts.concat());
                    }
                    parts.push("]".into());
                    self.bump();
                }
                TokenKind::Eof => return Err(self.error("unbalanced `[`")),
                other => {
                    parts.push(token_text(&other));
                    self.bump();
                }
            }
        }
    }

    // ── statements ───────────────────────────────────────────────

    fn block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        // The body of a block is ordinary expression territory.
        self.with_composites(true, |p| {
            let mut stmts = Vec::new();
            p.skip_semis();
            while !p.eat(&TokenKind::RBrace) {
                if p.at(&TokenKind::Eof) {
                    return Err(p.error("unterminated block"));
                }
                stmts.push(p.stmt()?);
                p.skip_semis();
            }
            Ok(Block { stmts })
        })
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Keyword(Keyword::Var) => Ok(Stmt::Gen(self.gen_decl(false)?)),
            TokenKind::Keyword(Keyword::Const) => Ok(Stmt::Gen(self.gen_decl(true)?)),
            TokenKind::Keyword(Keyword::Type) => Ok(Stmt::Type(self.type_decl()?)),
            TokenKind::Keyword(Keyword::Return) => {
                self.bump();
                let mut exprs = Vec::new();
                if !self.at(&TokenKind::Semi) && !self.at(&TokenKind::RBrace) {
                    exprs.push(self.expr()?);
                    while self.eat(&TokenKind::Comma) {
                        exprs.push(self.expr()?);
                    }
                }
                Ok(Stmt::Return { exprs, line })
            }
            TokenKind::Keyword(Keyword::Go) => {
                self.bump();
                let call = self.expr()?;
                Ok(Stmt::Go { call, line })
            }
            TokenKind::Keyword(Keyword::Defer) => {
                self.bump();
                let call = self.expr()?;
                Ok(Stmt::Defer { call, line })
            }
            TokenKind::Keyword(Keyword::If) => self.if_stmt(),
            TokenKind::Keyword(Keyword::For) => self.for_stmt(),
            TokenKind::Keyword(Keyword::Switch) => self.switch_stmt(),
            TokenKind::Keyword(Keyword::Select) => self.select_stmt(),
            TokenKind::Keyword(Keyword::Break) => {
                self.bump();
                if let TokenKind::Ident(_) = self.peek() {
                    self.bump();
                }
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.bump();
                if let TokenKind::Ident(_) = self.peek() {
                    self.bump();
                }
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Goto) => {
                self.bump();
                let label = self.expect_ident("label")?;
                Ok(Stmt::Goto(label))
            }
            TokenKind::Keyword(Keyword::Fallthrough) => {
                self.bump();
                Ok(Stmt::Fallthrough)
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            TokenKind::Semi => Ok(Stmt::Empty),
            _ => self.simple_stmt(),
        }
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let first = self.expr()?;

        // label: `name: stmt`
        if self.at(&TokenKind::Colon) {
            if let Expr::Ident { name, .. } = &first {
                let label = name.clone();
                self.bump();
                self.skip_semis();
                let stmt = if self.at(&TokenKind::RBrace) {
                    Stmt::Empty
                } else {
                    self.stmt()?
                };
                return Ok(Stmt::Labeled {
                    label,
                    stmt: Box::new(stmt),
                });
            }
        }

        let mut lhs = vec![first];
        while self.eat(&TokenKind::Comma) {
            lhs.push(self.expr()?);
        }

        match self.peek().clone() {
            TokenKind::Define => {
                self.bump();
                let rhs = self.expr_list()?;
                Ok(Stmt::Assign {
                    lhs,
                    rhs,
                    define: true,
                    line,
                })
            }
            TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign
            | TokenKind::AmpAssign
            | TokenKind::PipeAssign
            | TokenKind::CaretAssign
            | TokenKind::ShlAssign
            | TokenKind::ShrAssign
            | TokenKind::AmpCaretAssign => {
                self.bump();
                let rhs = self.expr_list()?;
                Ok(Stmt::Assign {
                    lhs,
                    rhs,
                    define: false,
                    line,
                })
            }
            TokenKind::Inc | TokenKind::Dec => {
                self.bump();
                Ok(Stmt::IncDec {
                    expr: lhs.into_iter().next().expect("nonempty lhs"),
                    line,
                })
            }
            TokenKind::Arrow => {
                self.bump();
                let value = self.expr()?;
                Ok(Stmt::Send {
                    chan: lhs.into_iter().next().expect("nonempty lhs"),
                    value,
                    line,
                })
            }
            _ => {
                if lhs.len() != 1 {
                    return Err(self.error("expected assignment after expression list"));
                }
                Ok(Stmt::Expr(lhs.into_iter().next().expect("single expr")))
            }
        }
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.bump(); // if
        let (init, cond) = self.with_composites(false, |p| {
            let first = p.simple_stmt()?;
            if p.eat(&TokenKind::Semi) {
                let cond = p.expr()?;
                Ok((Some(Box::new(first)), cond))
            } else {
                match first {
                    Stmt::Expr(cond) => Ok((None, cond)),
                    _ => Err(p.error("if header needs a condition")),
                }
            }
        })?;
        let then = self.block()?;
        let els = if self.eat_keyword(Keyword::Else) {
            if self.at_keyword(Keyword::If) {
                Some(Box::new(self.if_stmt()?))
            } else {
                Some(Box::new(Stmt::Block(self.block()?)))
            }
        } else {
            None
        };
        Ok(Stmt::If {
            init,
            cond,
            then,
            els,
            line,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.bump(); // for

        // `for { ... }`
        if self.at(&TokenKind::LBrace) {
            let body = self.block()?;
            return Ok(Stmt::For {
                init: None,
                cond: None,
                post: None,
                body,
                line,
            });
        }

        // `for range expr { ... }`
        if self.at_keyword(Keyword::Range) {
            self.bump();
            let expr = self.with_composites(false, |p| p.expr())?;
            let body = self.block()?;
            return Ok(Stmt::ForRange {
                key: None,
                value: None,
                expr,
                body,
                line,
            });
        }

        enum Header {
            Range {
                key: Option<Expr>,
                value: Option<Expr>,
                expr: Expr,
            },
            Clauses {
                init: Option<Box<Stmt>>,
                cond: Option<Expr>,
                post: Option<Box<Stmt>>,
            },
            Cond(Expr),
        }

        let header = self.with_composites(false, |p| {
            // Leading `;`: three-clause form with empty init.
            if p.eat(&TokenKind::Semi) {
                let cond = if p.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(p.expr()?)
                };
                p.expect(&TokenKind::Semi, "`;`")?;
                let post = if p.at(&TokenKind::LBrace) {
                    None
                } else {
                    Some(Box::new(p.simple_stmt()?))
                };
                return Ok(Header::Clauses {
                    init: None,
                    cond,
                    post,
                });
            }

            let mut lhs = vec![p.expr()?];
            while p.eat(&TokenKind::Comma) {
                lhs.push(p.expr()?);
            }

            // `for k, v := range expr` / `for k = range expr`
            if p.at(&TokenKind::Define) || p.at(&TokenKind::Assign) {
                if matches!(p.peek_at(1), TokenKind::Keyword(Keyword::Range)) {
                    p.bump(); // := or =
                    p.bump(); // range
                    let expr = p.expr()?;
                    let mut iter = lhs.into_iter();
                    return Ok(Header::Range {
                        key: iter.next(),
                        value: iter.next(),
                        expr,
                    });
                }
                // assignment init of a three-clause for
                let define = p.at(&TokenKind::Define);
                let stmt_line = p.line();
                p.bump();
                let rhs = p.expr_list()?;
                let init = Stmt::Assign {
                    lhs,
                    rhs,
                    define,
                    line: stmt_line,
                };
                p.expect(&TokenKind::Semi, "`;`")?;
                let cond = if p.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(p.expr()?)
                };
                p.expect(&TokenKind::Semi, "`;`")?;
                let post = if p.at(&TokenKind::LBrace) {
                    None
                } else {
                    Some(Box::new(p.simple_stmt()?))
                };
                return Ok(Header::Clauses {
                    init: Some(Box::new(init)),
                    cond,
                    post,
                });
            }

            // `for cond { ... }` or `expr; cond; post`
            if p.eat(&TokenKind::Semi) {
                if lhs.len() != 1 {
                    return Err(p.error("for-init expression list"));
                }
                let init = Stmt::Expr(lhs.into_iter().next().expect("single"));
                let cond = if p.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(p.expr()?)
                };
                p.expect(&TokenKind::Semi, "`;`")?;
                let post = if p.at(&TokenKind::LBrace) {
                    None
                } else {
                    Some(Box::new(p.simple_stmt()?))
                };
                Ok(Header::Clauses {
                    init: Some(Box::new(init)),
                    cond,
                    post,
                })
            } else {
                if lhs.len() != 1 {
                    return Err(p.error("for header needs a single condition"));
                }
                Ok(Header::Cond(lhs.into_iter().next().expect("single")))
            }
        })?;

        let body = self.block()?;
        Ok(match header {
            Header::Range { key, value, expr } => Stmt::ForRange {
                key,
                value,
                expr,
                body,
                line,
            },
            Header::Clauses { init, cond, post } => Stmt::For {
                init,
                cond,
                post,
                body,
                line,
            },
            Header::Cond(cond) => Stmt::For {
                init: None,
                cond: Some(cond),
                post: None,
                body,
                line,
            },
        })
    }

    fn switch_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.bump(); // switch

        let (init, tag) = self.with_composites(false, |p| {
            if p.at(&TokenKind::LBrace) {
                return Ok((None, None));
            }
            let first = p.simple_stmt()?;
            if p.eat(&TokenKind::Semi) {
                if p.at(&TokenKind::LBrace) {
                    return Ok((Some(Box::new(first)), None));
                }
                let tag_stmt = p.simple_stmt()?;
                let tag = match tag_stmt {
                    Stmt::Expr(e) => Some(e),
                    // `switch x := y.(type)` parses as an assign; keep
                    // the whole thing as the init.
                    other => {
                        return Ok((
                            Some(Box::new(Stmt::Block(Block {
                                stmts: vec![first, other],
                            }))),
                            None,
                        ))
                    }
                };
                Ok((Some(Box::new(first)), tag))
            } else {
                match first {
                    Stmt::Expr(e) => Ok((None, Some(e))),
                    other => Ok((Some(Box::new(other)), None)),
                }
            }
        })?;

        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut cases = Vec::new();
        self.skip_semis();
        while !self.eat(&TokenKind::RBrace) {
            let exprs = if self.eat_keyword(Keyword::Case) {
                let exprs = self.expr_list()?;
                self.expect(&TokenKind::Colon, "`:`")?;
                exprs
            } else if self.eat_keyword(Keyword::Default) {
                self.expect(&TokenKind::Colon, "`:`")?;
                Vec::new()
            } else {
                return Err(self.error("expected `case` or `default`"));
            };
            let mut body = Vec::new();
            self.skip_semis();
            while !self.at_keyword(Keyword::Case)
                && !self.at_keyword(Keyword::Default)
                && !self.at(&TokenKind::RBrace)
            {
                body.push(self.stmt()?);
                self.skip_semis();
            }
            cases.push(SwitchCase { exprs, body });
        }

        Ok(Stmt::Switch {
            init,
            tag,
            cases,
            line,
        })
    }

    fn select_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.bump(); // select
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut cases = Vec::new();
        self.skip_semis();
        while !self.eat(&TokenKind::RBrace) {
            if self.eat_keyword(Keyword::Case) {
                // communication clause
                let _ = self.simple_stmt()?;
                self.expect(&TokenKind::Colon, "`:`")?;
            } else if self.eat_keyword(Keyword::Default) {
                self.expect(&TokenKind::Colon, "`:`")?;
            } else {
                return Err(self.error("expected `case` or `default`"));
            }
            let mut body = Vec::new();
            self.skip_semis();
            while !self.at_keyword(Keyword::Case)
                && !self.at_keyword(Keyword::Default)
                && !self.at(&TokenKind::RBrace)
            {
                body.push(self.stmt()?);
                self.skip_semis();
            }
            cases.push(Block { stmts: body });
        }
        Ok(Stmt::Select { cases, line })
    }

    // ── expressions ──────────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_expr(1)
    }

    fn binary_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary_expr()?;
        loop {
            let Some(op) = binary_op(self.peek()) else {
                return Ok(lhs);
            };
            let prec = op.precedence();
            if prec < min_prec {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.binary_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Caret => Some(UnaryOp::Caret),
            TokenKind::Star => Some(UnaryOp::Star),
            TokenKind::Amp => Some(UnaryOp::Amp),
            TokenKind::Arrow => Some(UnaryOp::Recv),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            return Ok(Expr::Unary {
                op,
                expr: Box::new(self.unary_expr()?),
            });
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.operand()?;
        loop {
            match self.peek().clone() {
                TokenKind::Dot => {
                    let line = self.line();
                    self.bump();
                    if self.eat(&TokenKind::LParen) {
                        // type assertion: `.(Type)` or `.(type)`
                        let ty = if self.at_keyword(Keyword::Type) {
                            self.bump();
                            None
                        } else {
                            Some(self.type_expr()?)
                        };
                        self.expect(&TokenKind::RParen, "`)`")?;
                        expr = Expr::TypeAssert {
                            expr: Box::new(expr),
                            ty,
                        };
                    } else {
                        let sel = self.expect_ident("selector")?;
                        expr = Expr::Selector {
                            recv: Box::new(expr),
                            sel,
                            line,
                        };
                    }
                }
                TokenKind::LParen => {
                    let line = self.line();
                    self.bump();
                    let args = self.with_composites(true, |p| {
                        let mut args = Vec::new();
                        while !p.at(&TokenKind::RParen) {
                            args.push(p.expr()?);
                            p.eat(&TokenKind::Ellipsis); // spread of final arg
                            if !p.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        Ok(args)
                    })?;
                    self.expect(&TokenKind::RParen, "`)`")?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                TokenKind::LBracket => {
                    self.bump();
                    let (low, high, is_slice) = self.with_composites(true, |p| {
                        if p.eat(&TokenKind::Colon) {
                            let high = if p.at(&TokenKind::RBracket) {
                                None
                            } else {
                                Some(Box::new(p.expr()?))
                            };
                            return Ok((None, high, true));
                        }
                        let low = Some(Box::new(p.expr()?));
                        if p.eat(&TokenKind::Colon) {
                            let high = if p.at(&TokenKind::RBracket) {
                                None
                            } else {
                                Some(Box::new(p.expr()?))
                            };
                            Ok((low, high, true))
                        } else {
                            Ok((low, None, false))
                        }
                    })?;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    expr = if is_slice {
                        Expr::SliceExpr {
                            expr: Box::new(expr),
                            low,
                            high,
                        }
                    } else {
                        Expr::Index {
                            expr: Box::new(expr),
                            index: low.expect("index expression"),
                        }
                    };
                }
                TokenKind::LBrace if !self.no_composite && is_composite_base(&expr) => {
                    let ty = match &expr {
                        Expr::Ident { name, .. } => Some(TypeExpr::Ident(name.clone())),
                        Expr::Selector { recv, sel, .. } => match recv.as_ref() {
                            Expr::Ident { name, .. } => {
                                Some(TypeExpr::Qualified(name.clone(), sel.clone()))
                            }
                            _ => None,
                        },
                        Expr::Type(ty) => Some(ty.clone()),
                        _ => None,
                    };
                    expr = self.composite_lit(ty)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Expr::Ident { name, line })
            }
            TokenKind::Int(value) => {
                self.bump();
                Ok(Expr::Lit {
                    kind: LitKind::Int,
                    value,
                    line,
                })
            }
            TokenKind::Float(value) => {
                self.bump();
                Ok(Expr::Lit {
                    kind: LitKind::Float,
                    value,
                    line,
                })
            }
            TokenKind::Str(value) => {
                self.bump();
                Ok(Expr::Lit {
                    kind: LitKind::Str,
                    value,
                    line,
                })
            }
            TokenKind::Char(value) => {
                self.bump();
                Ok(Expr::Lit {
                    kind: LitKind::Char,
                    value,
                    line,
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.with_composites(true, |p| p.expr())?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::Keyword(Keyword::Func) => {
                self.bump();
                self.expect(&TokenKind::LParen, "`(`")?;
                let params = self.param_groups(&TokenKind::RParen)?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let results = self.result_list()?;
                let body = self.block()?;
                Ok(Expr::FuncLit {
                    params,
                    results,
                    body,
                })
            }
            TokenKind::LBracket
            | TokenKind::Star
            | TokenKind::Keyword(
                Keyword::Map | Keyword::Struct | Keyword::Interface | Keyword::Chan,
            ) => {
                // Type in expression position: conversion or composite
                // literal base.
                let ty = self.type_expr()?;
                Ok(Expr::Type(ty))
            }
            other => Err(self.error(format!("expected expression, found {}", other.describe()))),
        }
    }

    fn composite_lit(&mut self, ty: Option<TypeExpr>) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let elts = self.with_composites(true, |p| {
            let mut elts = Vec::new();
            p.skip_semis();
            while !p.at(&TokenKind::RBrace) {
                let elt = p.composite_elt()?;
                elts.push(elt);
                if !p.eat(&TokenKind::Comma) {
                    p.skip_semis();
                    break;
                }
                p.skip_semis();
            }
            Ok(elts)
        })?;
        self.expect(&TokenKind::RBrace, "`}`")?;
        Ok(Expr::Composite { ty, elts })
    }

    fn composite_elt(&mut self) -> Result<Expr, ParseError> {
        let value = if self.at(&TokenKind::LBrace) {
            // untyped nested literal
            self.composite_lit(None)?
        } else {
            self.expr()?
        };
        if self.eat(&TokenKind::Colon) {
            let inner = if self.at(&TokenKind::LBrace) {
                self.composite_lit(None)?
            } else {
                self.expr()?
            };
            Ok(Expr::KeyValue {
                key: Box::new(value),
                value: Box::new(inner),
            })
        } else {
            Ok(value)
        }
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::Amp => BinaryOp::And,
        TokenKind::AmpCaret => BinaryOp::AndNot,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Pipe => BinaryOp::Or,
        TokenKind::Caret => BinaryOp::Xor,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::LtEq => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::GtEq => BinaryOp::Ge,
        TokenKind::AndAnd => BinaryOp::LAnd,
        TokenKind::OrOr => BinaryOp::LOr,
        _ => return None,
    })
}

fn is_composite_base(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident { .. } | Expr::Selector { .. } | Expr::Type(_)
    )
}

/// Deterministic textual rendering of a type, shared by the ABI
/// extractor.
pub fn print_type(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Ident(name) => name.clone(),
        TypeExpr::Qualified(pkg, name) => format!("{pkg}.{name}"),
        TypeExpr::Pointer(inner) => format!("*{}", print_type(inner)),
        TypeExpr::Slice(inner) => format!("[]{}", print_type(inner)),
        TypeExpr::Array(len, inner) => format!("[{len}]{}", print_type(inner)),
        TypeExpr::Map(key, value) => {
            format!("map[{}]{}", print_type(key), print_type(value))
        }
        TypeExpr::Interface => "interface{}".to_string(),
        TypeExpr::Struct(_) => "struct{...}".to_string(),
        TypeExpr::Func(params, results) => {
            let params: Vec<String> = params.iter().map(print_type).collect();
            let mut out = format!("func({})", params.join(", "));
            match results.len() {
                0 => {}
                1 => {
                    out.push(' ');
                    out.push_str(&print_type(&results[0]));
                }
                _ => {
                    let results: Vec<String> = results.iter().map(print_type).collect();
                    out.push_str(&format!(" ({})", results.join(", ")));
                }
            }
            out
        }
        TypeExpr::Chan(inner) => format!("chan {}", print_type(inner)),
        TypeExpr::Variadic(inner) => format!("...{}", print_type(inner)),
    }
}

fn token_text(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => name.clone(),
        TokenKind::Keyword(kw) => kw.as_str().to_string(),
        TokenKind::Int(v) | TokenKind::Float(v) => v.clone(),
        TokenKind::Str(v) => format!("{v:?}"),
        TokenKind::Char(v) => format!("'{v}'"),
        TokenKind::Plus => "+".into(),
        TokenKind::Minus => "-".into(),
        TokenKind::Star => "*".into(),
        TokenKind::Slash => "/".into(),
        TokenKind::Percent => "%".into(),
        TokenKind::Shl => "<<".into(),
        TokenKind::Shr => ">>".into(),
        TokenKind::Dot => ".".into(),
        other => format!("{other:?}"),
    }
}
