//! Recursive-descent parser for the script dialect.
//!
//! Builds the typed tree in [`crate::ast`]. Recursion is capped at
//! [`MAX_NESTING`] levels so hostile input fails with
//! [`SafeError::NestingTooDeep`] instead of exhausting the stack.

use std::rc::Rc;

use crate::ast::*;
use crate::error::SafeError;
use crate::lexer::{tokenize, Kw, Tok, Token};

/// Maximum combined depth of nested expressions and blocks.
pub const MAX_NESTING: usize = 64;

/// Parse a whole script.
pub fn parse_module(source: &str) -> Result<Module, SafeError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.at_eof() {
        parser.statement(&mut body)?;
        parser.skip_newlines();
    }
    let doc = take_docstring(&mut body);
    Ok(Module { doc, body })
}

/// Parse a single expression (the form `eval` accepts).
pub fn parse_expression(source: &str) -> Result<Expr, SafeError> {
    let mut parser = Parser::new(tokenize(source)?);
    parser.skip_newlines();
    let expr = parser.testlist()?;
    parser.skip_newlines();
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

fn take_docstring(body: &mut Vec<Stmt>) -> Option<String> {
    let doc = match body.first() {
        Some(Stmt {
            kind:
                StmtKind::Expr(Expr {
                    kind: ExprKind::Const(Constant::Str(text)),
                    ..
                }),
            ..
        }) => text.to_string(),
        _ => return None,
    };
    body.remove(0);
    Some(doc)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Enclosing `def` bodies; reset inside class bodies.
    func_depth: usize,
    /// Enclosing loop bodies within the current function.
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            func_depth: 0,
            loop_depth: 0,
        }
    }

    // --- token helpers ---

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_nth(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> Line {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: Kw) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SafeError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn expect_kw(&mut self, kw: Kw) -> Result<(), SafeError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw.as_str())))
        }
    }

    fn expect_name(&mut self) -> Result<String, SafeError> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn expect_newline(&mut self) -> Result<(), SafeError> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> SafeError {
        SafeError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> SafeError {
        let found = match self.peek() {
            Tok::Name(n) => format!("name '{n}'"),
            Tok::Int(i) => format!("number {i}"),
            Tok::Float(f) => format!("number {f}"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Kw(k) => format!("keyword '{}'", k.as_str()),
            Tok::Op(o) => format!("'{o}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax: unexpected {found}"))
    }

    fn enter(&mut self) -> Result<(), SafeError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SafeError::NestingTooDeep {
                max: MAX_NESTING,
                actual: self.depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // --- statements ---

    fn statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), SafeError> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw(Kw::If) => self.if_stmt()?,
            Tok::Kw(Kw::While) => self.while_stmt()?,
            Tok::Kw(Kw::For) => self.for_stmt()?,
            Tok::Kw(Kw::Try) => self.try_stmt()?,
            Tok::Kw(Kw::Def) => self.funcdef(Vec::new())?,
            Tok::Kw(Kw::Class) => self.classdef()?,
            Tok::Kw(Kw::With) => return Err(self.error("'with' statements are not supported")),
            Tok::Op("@") => self.decorated()?,
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => return self.simple_stmt(out),
        };
        out.push(Stmt { line, kind });
        Ok(())
    }

    fn simple_stmt(&mut self, out: &mut Vec<Stmt>) -> Result<(), SafeError> {
        loop {
            let line = self.line();
            let kind = self.small_stmt()?;
            out.push(Stmt { line, kind });
            if !self.eat_op(";") {
                break;
            }
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        self.expect_newline()
    }

    fn small_stmt(&mut self) -> Result<StmtKind, SafeError> {
        let Tok::Kw(kw) = *self.peek() else {
            return self.expr_stmt();
        };
        match kw {
            Kw::Pass => {
                self.pos += 1;
                Ok(StmtKind::Pass)
            }
            Kw::Break => {
                if self.loop_depth == 0 {
                    return Err(self.error("'break' outside loop"));
                }
                self.pos += 1;
                Ok(StmtKind::Break)
            }
            Kw::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.error("'continue' not properly in loop"));
                }
                self.pos += 1;
                Ok(StmtKind::Continue)
            }
            Kw::Return => {
                if self.func_depth == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.pos += 1;
                if self.at_stmt_end() {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.testlist()?)))
                }
            }
            Kw::Raise => self.raise_stmt(),
            Kw::Global => {
                self.pos += 1;
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                Ok(StmtKind::Global(names))
            }
            Kw::Del => {
                self.pos += 1;
                let expr = self.exprlist()?;
                Ok(StmtKind::Delete(self.to_target(expr)?))
            }
            Kw::Print => self.print_stmt(),
            Kw::Assert => {
                self.pos += 1;
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { test, msg })
            }
            Kw::Import => self.import_stmt(),
            Kw::From => self.from_stmt(),
            Kw::Exec => {
                self.pos += 1;
                let code = self.expr()?;
                let globals = if self.eat_kw(Kw::In) {
                    let globals = self.test()?;
                    if self.eat_op(",") {
                        return Err(self.error("exec with separate locals is not supported"));
                    }
                    Some(globals)
                } else {
                    None
                };
                Ok(StmtKind::Exec { code, globals })
            }
            Kw::Yield => Err(self.error("'yield' is not supported")),
            _ => self.expr_stmt(),
        }
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op(";"))
    }

    fn raise_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        if self.at_stmt_end() {
            return Ok(StmtKind::Raise {
                exc: None,
                arg: None,
            });
        }
        let exc = Some(self.test()?);
        let arg = if self.eat_op(",") {
            Some(self.test()?)
        } else {
            None
        };
        if self.at_op(",") {
            return Err(self.error("raise with a traceback is not supported"));
        }
        Ok(StmtKind::Raise { exc, arg })
    }

    fn print_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        if self.at_op(">>") {
            return Err(self.error("print redirection is not supported"));
        }
        let mut values = Vec::new();
        let mut newline = true;
        while !self.at_stmt_end() {
            values.push(self.test()?);
            if self.eat_op(",") {
                newline = false;
            } else {
                newline = true;
                break;
            }
        }
        if values.is_empty() {
            newline = true;
        }
        Ok(StmtKind::Print { values, newline })
    }

    fn dotted_name(&mut self) -> Result<String, SafeError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat_kw(Kw::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn from_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        let mut module = String::new();
        while self.eat_op(".") {
            module.push('.');
        }
        if matches!(self.peek(), Tok::Name(_)) {
            module.push_str(&self.dotted_name()?);
        }
        if module.is_empty() {
            return Err(self.error("expected a module name"));
        }
        self.expect_kw(Kw::Import)?;
        let mut names = Vec::new();
        if self.eat_op("*") {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
            return Ok(StmtKind::From { module, names });
        }
        let parens = self.eat_op("(");
        loop {
            let name = self.expect_name()?;
            let asname = if self.eat_kw(Kw::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
            if parens && self.at_op(")") {
                break;
            }
        }
        if parens {
            self.expect_op(")")?;
        }
        Ok(StmtKind::From { module, names })
    }

    fn expr_stmt(&mut self) -> Result<StmtKind, SafeError> {
        let first = self.testlist()?;

        if let Tok::Op(op) = *self.peek() {
            if let Some(binop) = BinOp::from_aug_symbol(op) {
                self.pos += 1;
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple { .. } | Target::List { .. }) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target,
                    op: binop,
                    value,
                });
            }
        }

        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat_op("=") {
            if self.at_kw(Kw::Yield) {
                return Err(self.error("'yield' is not supported"));
            }
            exprs.push(self.testlist()?);
        }
        let value = exprs.pop().ok_or_else(|| self.error("expected a value"))?;
        let targets = exprs
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SafeError> {
        let line = expr.line;
        Ok(match expr.kind {
            ExprKind::Name(name) => Target::Name { line, name },
            ExprKind::Attribute { value, attr } => Target::Attribute {
                line,
                value: *value,
                attr,
            },
            ExprKind::Subscript { value, index } => Target::Subscript {
                line,
                value: *value,
                index: *index,
            },
            ExprKind::Slice {
                value,
                lower,
                upper,
            } => Target::Slice {
                line,
                value: *value,
                lower: lower.map(|b| *b),
                upper: upper.map(|b| *b),
            },
            ExprKind::Tuple(elts) => Target::Tuple {
                line,
                elts: elts
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            },
            ExprKind::List(elts) => Target::List {
                line,
                elts: elts
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            },
            _ => {
                return Err(SafeError::Syntax {
                    line,
                    message: "can't assign to this expression".to_string(),
                })
            }
        })
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, SafeError> {
        self.expect_op(":")?;
        self.enter()?;
        let mut body = Vec::new();
        if !matches!(self.peek(), Tok::Newline) {
            self.simple_stmt(&mut body)?;
            self.leave();
            return Ok(body);
        }
        self.skip_newlines();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        loop {
            self.skip_newlines();
            if matches!(self.peek(), Tok::Dedent) {
                self.pos += 1;
                break;
            }
            if self.at_eof() {
                break;
            }
            self.statement(&mut body)?;
        }
        self.leave();
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        let mut branches = Vec::new();
        let test = self.test()?;
        let body = self.suite()?;
        branches.push((test, body));
        let mut orelse = None;
        loop {
            if self.eat_kw(Kw::Elif) {
                let test = self.test()?;
                let body = self.suite()?;
                branches.push((test, body));
            } else if self.eat_kw(Kw::Else) {
                orelse = Some(self.suite()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn while_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        let test = self.test()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw(Kw::Else) {
            Some(self.suite()?)
        } else {
            None
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, SafeError> {
        self.pos += 1;
        let target_expr = self.exprlist()?;
        let target = self.to_target(target_expr)?;
        self.expect_kw(Kw::In)?;
        let iter = self.testlist()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw(Kw::Else) {
            Some(self.suite()?)
        } else {
            None
        };
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn try_stmt(&mut self) -> Result<StmtKind, SafeError> {
        let try_line = self.line();
        self.pos += 1;
        let body = self.suite()?;

        let mut handlers = Vec::new();
        while self.at_kw(Kw::Except) {
            let line = self.line();
            self.pos += 1;
            let mut typ = None;
            let mut name = None;
            if !self.at_op(":") {
                typ = Some(self.test()?);
                if self.eat_kw(Kw::As) || self.eat_op(",") {
                    let target = self.test()?;
                    name = Some(self.to_target(target)?);
                }
            }
            let body = self.suite()?;
            handlers.push(Handler {
                line,
                typ,
                name,
                body,
            });
        }

        let orelse = if !handlers.is_empty() && self.eat_kw(Kw::Else) {
            Some(self.suite()?)
        } else {
            None
        };

        let finalbody = if self.eat_kw(Kw::Finally) {
            Some(self.suite()?)
        } else {
            None
        };

        match (handlers.is_empty(), finalbody) {
            (true, None) => Err(self.error("expected 'except' or 'finally' block")),
            (true, Some(finalbody)) => Ok(StmtKind::TryFinally { body, finalbody }),
            (false, None) => Ok(StmtKind::TryExcept {
                body,
                handlers,
                orelse,
            }),
            (false, Some(finalbody)) => Ok(StmtKind::TryFinally {
                body: vec![Stmt {
                    line: try_line,
                    kind: StmtKind::TryExcept {
                        body,
                        handlers,
                        orelse,
                    },
                }],
                finalbody,
            }),
        }
    }

    fn decorated(&mut self) -> Result<StmtKind, SafeError> {
        let mut decorators = Vec::new();
        while self.at_op("@") {
            self.pos += 1;
            let line = self.line();
            let mut expr = Expr::new(line, ExprKind::Name(self.expect_name()?));
            while self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    line,
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                );
            }
            if self.eat_op("(") {
                expr = self.call_trailer(expr, line)?;
            }
            self.expect_newline()?;
            self.skip_newlines();
            decorators.push(expr);
        }
        if !self.at_kw(Kw::Def) {
            return Err(self.error("decorators may only precede a function definition"));
        }
        self.funcdef(decorators)
    }

    fn funcdef(&mut self, decorators: Vec<Expr>) -> Result<StmtKind, SafeError> {
        let line = self.line();
        self.pos += 1;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        let mut body = self.nested_body(self.func_depth + 1)?;
        let doc = take_docstring(&mut body);
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            line,
            name,
            params,
            doc,
            body: FunctionBody::Block(body),
            decorators,
        })))
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, SafeError> {
        self.loop_depth += 1;
        let body = self.suite();
        self.loop_depth -= 1;
        body
    }

    /// A `def` or `class` body, which starts outside any loop.
    fn nested_body(&mut self, func_depth: usize) -> Result<Vec<Stmt>, SafeError> {
        let saved = (self.func_depth, self.loop_depth);
        self.func_depth = func_depth;
        self.loop_depth = 0;
        let body = self.suite();
        (self.func_depth, self.loop_depth) = saved;
        body
    }

    /// Parameter list up to (not including) `close`.
    fn params(&mut self, close: &str) -> Result<Params, SafeError> {
        let mut params = Params::default();
        let mut seen_default = false;
        while !self.at_op(close) {
            if self.eat_op("**") {
                params.kwarg = Some(self.expect_name()?);
                self.eat_op(",");
                break;
            }
            if self.eat_op("*") {
                params.vararg = Some(self.expect_name()?);
                if !self.eat_op(",") {
                    break;
                }
                continue;
            }
            if params.vararg.is_some() {
                return Err(self.error("parameters may not follow *args"));
            }
            if self.at_op("(") {
                return Err(self.error("tuple parameters are not supported"));
            }
            let name = self.expect_name()?;
            if params.names().contains(&name) {
                return Err(self.error(format!(
                    "duplicate argument '{name}' in function definition"
                )));
            }
            let default = if self.eat_op("=") {
                seen_default = true;
                Some(self.test()?)
            } else {
                if seen_default {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.args.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn classdef(&mut self) -> Result<StmtKind, SafeError> {
        let line = self.line();
        self.pos += 1;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op("(") {
            while !self.at_op(")") {
                bases.push(self.test()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        let mut body = self.nested_body(0)?;
        let doc = take_docstring(&mut body);
        Ok(StmtKind::ClassDef(Rc::new(ClassDef {
            line,
            name,
            bases,
            doc,
            body,
        })))
    }

    // --- expressions ---

    /// `test (',' test)* [',']`, a tuple when any comma is present.
    fn testlist(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            elts.push(self.test()?);
        }
        Ok(Expr::new(line, ExprKind::Tuple(elts)))
    }

    /// Like [`Self::testlist`] but over bitwise-or expressions (assignment
    /// targets in `for` and `del`).
    fn exprlist(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            elts.push(self.expr()?);
        }
        Ok(Expr::new(line, ExprKind::Tuple(elts)))
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Kw(Kw::Not) | Tok::Kw(Kw::Lambda) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "`"),
            _ => false,
        }
    }

    fn test(&mut self) -> Result<Expr, SafeError> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> Result<Expr, SafeError> {
        if self.at_kw(Kw::Lambda) {
            return self.lambda();
        }
        let line = self.line();
        let body = self.or_test()?;
        if !self.eat_kw(Kw::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw(Kw::Else)?;
        let orelse = self.test()?;
        Ok(Expr::new(
            line,
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
        ))
    }

    fn lambda(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        self.pos += 1;
        let params = self.params(":")?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::new(
            line,
            ExprKind::Lambda(Rc::new(FunctionDef {
                line,
                name: "<lambda>".to_string(),
                params,
                doc: None,
                body: FunctionBody::Expr(body),
                decorators: Vec::new(),
            })),
        ))
    }

    fn or_test(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let first = self.and_test()?;
        if !self.at_kw(Kw::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::Or) {
            values.push(self.and_test()?);
        }
        Ok(Expr::new(
            line,
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
        ))
    }

    fn and_test(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let first = self.not_test()?;
        if !self.at_kw(Kw::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::And) {
            values.push(self.not_test()?);
        }
        Ok(Expr::new(
            line,
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
        ))
    }

    fn not_test(&mut self) -> Result<Expr, SafeError> {
        if !self.at_kw(Kw::Not) {
            return self.comparison();
        }
        let line = self.line();
        self.pos += 1;
        self.enter()?;
        let operand = self.not_test();
        self.leave();
        Ok(Expr::new(
            line,
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            },
        ))
    }

    fn comp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") | Tok::Op("<>") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Kw(Kw::In) => CmpOp::In,
            Tok::Kw(Kw::Is) => {
                if matches!(self.peek_nth(1), Tok::Kw(Kw::Not)) {
                    self.pos += 2;
                    return Some(CmpOp::IsNot);
                }
                CmpOp::Is
            }
            Tok::Kw(Kw::Not) if matches!(self.peek_nth(1), Tok::Kw(Kw::In)) => {
                self.pos += 2;
                return Some(CmpOp::NotIn);
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let left = self.expr()?;
        let mut ops = Vec::new();
        while let Some(op) = self.comp_op() {
            ops.push((op, self.expr()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            line,
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
        ))
    }

    fn binary(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SafeError>,
    ) -> Result<Expr, SafeError> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.at_op(symbol) {
                    let line = self.line();
                    self.pos += 1;
                    let right = next(self)?;
                    left = Expr::new(
                        line,
                        ExprKind::BinOp {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    );
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn expr(&mut self) -> Result<Expr, SafeError> {
        self.binary(&[("|", BinOp::BitOr)], Self::xor_expr)
    }

    fn xor_expr(&mut self) -> Result<Expr, SafeError> {
        self.binary(&[("^", BinOp::BitXor)], Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr, SafeError> {
        self.binary(&[("&", BinOp::BitAnd)], Self::shift_expr)
    }

    fn shift_expr(&mut self) -> Result<Expr, SafeError> {
        self.binary(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::arith_expr,
        )
    }

    fn arith_expr(&mut self) -> Result<Expr, SafeError> {
        self.binary(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, SafeError> {
        self.binary(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("%", BinOp::Mod),
                ("//", BinOp::FloorDiv),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, SafeError> {
        let op = match self.peek() {
            Tok::Op("+") => UnaryOp::Plus,
            Tok::Op("-") => UnaryOp::Minus,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        let line = self.line();
        self.pos += 1;
        self.enter()?;
        let operand = self.factor();
        self.leave();
        Ok(Expr::new(
            line,
            ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
        ))
    }

    fn power(&mut self) -> Result<Expr, SafeError> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                expr = self.call_trailer(expr, line)?;
            } else if self.eat_op("[") {
                expr = self.subscript_trailer(expr, line)?;
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    line,
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                );
            } else {
                break;
            }
        }
        if self.at_op("**") {
            let line = self.line();
            self.pos += 1;
            let right = self.factor()?;
            expr = Expr::new(
                line,
                ExprKind::BinOp {
                    op: BinOp::Pow,
                    left: Box::new(expr),
                    right: Box::new(right),
                },
            );
        }
        Ok(expr)
    }

    /// Arguments of a call; the opening parenthesis is already consumed.
    fn call_trailer(&mut self, func: Expr, line: Line) -> Result<Expr, SafeError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut star = None;
        let mut dstar = None;
        while !self.at_op(")") {
            if self.eat_op("**") {
                dstar = Some(Box::new(self.test()?));
                self.eat_op(",");
                break;
            }
            if self.eat_op("*") {
                star = Some(Box::new(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_nth(1), Tok::Op("="))
            {
                let kw_line = self.line();
                let name = self.expect_name()?;
                self.pos += 1;
                let value = self.test()?;
                if keywords.iter().any(|k: &Keyword| k.name == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                keywords.push(Keyword {
                    line: kw_line,
                    name,
                    value,
                });
            } else {
                if !keywords.is_empty() || star.is_some() {
                    return Err(self.error("non-keyword argument after keyword argument"));
                }
                args.push(self.test()?);
                if self.at_kw(Kw::For) {
                    return Err(self.error("generator expressions are not supported"));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::new(
            line,
            ExprKind::Call {
                func: Box::new(func),
                args,
                keywords,
                star,
                dstar,
            },
        ))
    }

    /// `[index]`, `[lower:upper]` or `[lower:upper:step]`; the opening
    /// bracket is already consumed.
    fn subscript_trailer(&mut self, value: Expr, line: Line) -> Result<Expr, SafeError> {
        let lower = if self.at_op(":") {
            None
        } else {
            Some(self.test()?)
        };

        if !self.at_op(":") {
            let first = lower.ok_or_else(|| self.error("expected an index"))?;
            let index = if self.at_op(",") {
                let mut elts = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    elts.push(self.test()?);
                }
                Expr::new(line, ExprKind::Tuple(elts))
            } else {
                first
            };
            self.expect_op("]")?;
            return Ok(Expr::new(
                line,
                ExprKind::Subscript {
                    value: Box::new(value),
                    index: Box::new(index),
                },
            ));
        }

        self.pos += 1;
        let upper = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(self.test()?)
        };

        if self.eat_op(":") {
            let step = if self.at_op("]") {
                None
            } else {
                Some(Box::new(self.test()?))
            };
            self.expect_op("]")?;
            let index = Expr::new(
                line,
                ExprKind::SliceObj {
                    lower: lower.map(Box::new),
                    upper: upper.map(Box::new),
                    step,
                },
            );
            return Ok(Expr::new(
                line,
                ExprKind::Subscript {
                    value: Box::new(value),
                    index: Box::new(index),
                },
            ));
        }

        self.expect_op("]")?;
        Ok(Expr::new(
            line,
            ExprKind::Slice {
                value: Box::new(value),
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
            },
        ))
    }

    fn atom(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(Expr::new(line, ExprKind::Name(name)))
            }
            Tok::Int(value) => {
                self.pos += 1;
                Ok(Expr::new(line, ExprKind::Const(Constant::Int(value))))
            }
            Tok::Float(value) => {
                self.pos += 1;
                Ok(Expr::new(line, ExprKind::Const(Constant::Float(value))))
            }
            Tok::Str(first) => {
                self.pos += 1;
                let mut text = first;
                while let Tok::Str(next) = self.peek() {
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::new(
                    line,
                    ExprKind::Const(Constant::Str(Rc::from(text.as_str()))),
                ))
            }
            Tok::Op("(") => {
                self.pos += 1;
                self.paren(line)
            }
            Tok::Op("[") => {
                self.pos += 1;
                self.list_display(line)
            }
            Tok::Op("{") => {
                self.pos += 1;
                self.dict_display(line)
            }
            Tok::Op("`") => Err(self.error("backquote repr is not supported")),
            Tok::Kw(Kw::Yield) => Err(self.error("'yield' is not supported")),
            _ => Err(self.unexpected()),
        }
    }

    fn paren(&mut self, line: Line) -> Result<Expr, SafeError> {
        if self.eat_op(")") {
            return Ok(Expr::new(line, ExprKind::Tuple(Vec::new())));
        }
        let first = self.test()?;
        if self.at_kw(Kw::For) {
            return Err(self.error("generator expressions are not supported"));
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            elts.push(self.test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::new(line, ExprKind::Tuple(elts)))
    }

    fn list_display(&mut self, line: Line) -> Result<Expr, SafeError> {
        if self.eat_op("]") {
            return Ok(Expr::new(line, ExprKind::List(Vec::new())));
        }
        let first = self.test()?;
        if self.at_kw(Kw::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::new(
                line,
                ExprKind::ListComp {
                    elt: Box::new(first),
                    generators,
                },
            ));
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            elts.push(self.test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::new(line, ExprKind::List(elts)))
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SafeError> {
        let mut generators = Vec::new();
        while self.at_kw(Kw::For) {
            let line = self.line();
            self.pos += 1;
            let target_expr = self.exprlist()?;
            let target = self.to_target(target_expr)?;
            self.expect_kw(Kw::In)?;
            let iter = self.comprehension_iter()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Kw::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension {
                line,
                target,
                iter,
                ifs,
            });
        }
        Ok(generators)
    }

    /// `testlist_safe`: or-tests separated by commas, no conditional
    /// expressions.
    fn comprehension_iter(&mut self) -> Result<Expr, SafeError> {
        let line = self.line();
        let first = self.or_test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            elts.push(self.or_test()?);
        }
        Ok(Expr::new(line, ExprKind::Tuple(elts)))
    }

    fn dict_display(&mut self, line: Line) -> Result<Expr, SafeError> {
        let mut items = Vec::new();
        while !self.at_op("}") {
            let key = self.test()?;
            if !self.eat_op(":") {
                return Err(self.error("set literals are not supported"));
            }
            let value = self.test()?;
            if self.at_kw(Kw::For) {
                return Err(self.error("dict comprehensions are not supported"));
            }
            items.push((key, value));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::new(line, ExprKind::Dict(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(src: &str) -> Module {
        parse_module(src).unwrap()
    }

    fn syntax_error(src: &str) -> (u32, String) {
        match parse_module(src) {
            Err(SafeError::Syntax { line, message }) => (line, message),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn module_docstring_is_split_off() {
        let m = module("\"\"\"Doc.\"\"\"\nx = 1\n");
        assert_eq!(m.doc.as_deref(), Some("Doc."));
        assert_eq!(m.body.len(), 1);
    }

    #[test]
    fn function_docstring_and_params() {
        let m = module("def f(a, b=2, *rest, **kw):\n    'doc'\n    return a\n");
        let StmtKind::FunctionDef(def) = &m.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.doc.as_deref(), Some("doc"));
        assert_eq!(def.params.names(), vec!["a", "b", "rest", "kw"]);
        assert!(def.params.args[1].default.is_some());
    }

    #[test]
    fn chained_assignment() {
        let m = module("a = b = 3");
        let StmtKind::Assign { targets, .. } = &m.body[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn tuple_unpacking_target() {
        let m = module("a, (b, c) = 1, (2, 3)");
        let StmtKind::Assign { targets, .. } = &m.body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(targets[0], Target::Tuple { .. }));
    }

    #[test]
    fn augmented_assignment() {
        let m = module("x //= 2");
        assert!(matches!(
            m.body[0].kind,
            StmtKind::AugAssign {
                op: BinOp::FloorDiv,
                ..
            }
        ));
    }

    #[test]
    fn print_trailing_comma() {
        let m = module("print 1, 2,\nprint 3\nprint");
        assert!(matches!(
            m.body[0].kind,
            StmtKind::Print { newline: false, .. }
        ));
        assert!(matches!(m.body[1].kind, StmtKind::Print { newline: true, .. }));
        assert!(matches!(m.body[2].kind, StmtKind::Print { newline: true, .. }));
    }

    #[test]
    fn slices() {
        let m = module("a[1:2]\na[::2]\na[1]");
        let kinds: Vec<_> = m
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Expr(e) => match &e.kind {
                    ExprKind::Slice { .. } => "slice",
                    ExprKind::Subscript { index, .. } => match index.kind {
                        ExprKind::SliceObj { .. } => "sliceobj",
                        _ => "subscript",
                    },
                    _ => "other",
                },
                _ => "stmt",
            })
            .collect();
        assert_eq!(kinds, vec!["slice", "sliceobj", "subscript"]);
    }

    #[test]
    fn try_except_finally_nests() {
        let m = module("try:\n    x\nexcept ValueError, e:\n    pass\nfinally:\n    y\n");
        let StmtKind::TryFinally { body, .. } = &m.body[0].kind else {
            panic!("expected try/finally");
        };
        assert!(matches!(body[0].kind, StmtKind::TryExcept { .. }));
    }

    #[test]
    fn comparison_chains() {
        let m = module("1 < x <= 3 is not None not in y");
        let StmtKind::Expr(Expr {
            kind: ExprKind::Compare { ops, .. },
            ..
        }) = &m.body[0].kind
        else {
            panic!("expected compare");
        };
        let ops: Vec<_> = ops.iter().map(|(op, _)| *op).collect();
        assert_eq!(
            ops,
            vec![CmpOp::Lt, CmpOp::LtE, CmpOp::IsNot, CmpOp::NotIn]
        );
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let m = module("-2 ** 2");
        let StmtKind::Expr(Expr {
            kind: ExprKind::Unary { op, operand },
            ..
        }) = &m.body[0].kind
        else {
            panic!("expected unary");
        };
        assert_eq!(*op, UnaryOp::Minus);
        assert!(matches!(
            operand.kind,
            ExprKind::BinOp { op: BinOp::Pow, .. }
        ));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let m = module("x = 'a' \"b\"");
        let StmtKind::Assign { value, .. } = &m.body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(&value.kind, ExprKind::Const(Constant::Str(s)) if &**s == "ab"));
    }

    #[test]
    fn lines_are_tracked() {
        let m = module("x = 1\n\n\ny = 2\n");
        assert_eq!(m.body[1].line, 4);
    }

    #[test]
    fn unsupported_syntax_is_rejected() {
        assert!(syntax_error("x = (i for i in y)").1.contains("generator"));
        assert!(syntax_error("x = {1, 2}").1.contains("set"));
        assert!(syntax_error("with f:\n    pass\n").1.contains("with"));
        assert!(syntax_error("def g():\n    yield 1\n").1.contains("yield"));
    }

    #[test]
    fn control_flow_must_be_enclosed() {
        assert!(syntax_error("return 1\n").1.contains("outside function"));
        assert!(syntax_error("break\n").1.contains("outside loop"));
        assert!(syntax_error("def f():\n    continue\n").1.contains("not properly in loop"));
        assert!(syntax_error("def f():\n    class C:\n        return 1\n")
            .1
            .contains("outside function"));
        assert!(syntax_error("while 1:\n    def g():\n        break\n").1.contains("outside loop"));
        module("while 1:\n    if x:\n        break\n    continue\n");
        module("def f():\n    for i in x:\n        return i\n");
    }

    #[test]
    fn syntax_error_reports_line() {
        let (line, _) = syntax_error("x = 1\ny = (\n");
        assert!(line >= 2);
        let (line, _) = syntax_error("x = 1\nif x\n    pass\n");
        assert_eq!(line, 2);
    }

    #[test]
    fn deep_nesting_is_refused() {
        let src = format!("x = {}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(
            parse_module(&src),
            Err(SafeError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn expression_mode() {
        let expr = parse_expression("1 + 2").unwrap();
        assert!(matches!(expr.kind, ExprKind::BinOp { op: BinOp::Add, .. }));
        assert!(parse_expression("x = 1").is_err());
    }

    #[test]
    fn semicolon_separated_statements() {
        let m = module("a = 1; b = 2;\n");
        assert_eq!(m.body.len(), 2);
    }
}
