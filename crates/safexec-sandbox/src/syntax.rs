//! Uniform, read-only view over the typed syntax tree.
//!
//! The checker does not care about the concrete shape of each construct. It
//! needs a kind name, a line, the scalar fields and the child nodes, in that
//! order. [`NodeRef`] provides exactly that, naming every node after the
//! Python 2 `compiler` AST class it corresponds to.

use std::fmt;
use std::str::FromStr;

use crate::ast::*;
use crate::error::SafeError;

macro_rules! node_kinds {
    ($($kind:ident),* $(,)?) => {
        /// Every node kind the parser can produce.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NodeKind {
            $($kind,)*
        }

        impl NodeKind {
            /// All kinds, alphabetically.
            pub const ALL: &'static [NodeKind] = &[$(NodeKind::$kind,)*];

            /// The kind's name as it appears in policies and diagnostics.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(NodeKind::$kind => stringify!($kind),)*
                }
            }
        }

        impl FromStr for NodeKind {
            type Err = SafeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($kind) => Ok(NodeKind::$kind),)*
                    other => Err(SafeError::InvalidPolicy(format!(
                        "unknown node kind `{other}`"
                    ))),
                }
            }
        }
    };
}

node_kinds! {
    Add, And, AssAttr, AssList, AssName, AssTuple, Assert, Assign, AugAssign,
    Bitand, Bitor, Bitxor, Break, CallFunc, Class, Compare, Const, Continue,
    Decorators, Dict, Discard, Div, Exec, Expression, FloorDiv, For, From,
    Function, Getattr, Global, If, IfExp, Import, Invert, Keyword, Lambda,
    LeftShift, List, ListComp, ListCompFor, ListCompIf, Mod, Module, Mul, Name,
    Not, Or, Pass, Power, Print, Printnl, Raise, Return, RightShift, Slice,
    Sliceobj, Stmt, Sub, Subscript, TryExcept, TryFinally, Tuple, UnaryAdd,
    UnarySub, While,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar attribute of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
    /// A list of names; never scanned as a string.
    List(Vec<&'a str>),
    None,
}

impl<'a> Field<'a> {
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Field::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// How a target is being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetUse {
    Assign,
    Delete,
    /// Augmented assignment reads the target first, so it shows up in its
    /// load form.
    Load,
}

impl TargetUse {
    fn flag(self) -> &'static str {
        match self {
            TargetUse::Assign => "OP_ASSIGN",
            TargetUse::Delete => "OP_DELETE",
            TargetUse::Load => "OP_APPLY",
        }
    }
}

const OP_APPLY: &str = "OP_APPLY";
const CO_VARARGS: i64 = 0x04;
const CO_VARKEYWORDS: i64 = 0x08;

/// Borrowed view of one node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Module(&'a Module),
    /// Root of an expression-mode parse.
    Expression(&'a Expr),
    /// A statement list.
    Suite(&'a [Stmt], Line),
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    Target(&'a Target, TargetUse),
    Decorators(&'a [Expr], Line),
    Keyword(&'a Keyword),
    ListCompFor(&'a Comprehension),
    ListCompIf(&'a Expr),
}

impl<'a> NodeRef<'a> {
    fn stmt(stmt: &'a Stmt) -> Self {
        match &stmt.kind {
            StmtKind::Delete(target) => NodeRef::Target(target, TargetUse::Delete),
            _ => NodeRef::Stmt(stmt),
        }
    }

    fn suite(body: &'a [Stmt], fallback: Line) -> Self {
        let line = body.first().map(|s| s.line).unwrap_or(fallback);
        NodeRef::Suite(body, line)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Module(_) => NodeKind::Module,
            NodeRef::Expression(_) => NodeKind::Expression,
            NodeRef::Suite(..) => NodeKind::Stmt,
            NodeRef::Stmt(stmt) => stmt_kind(stmt),
            NodeRef::Expr(expr) => expr_kind(expr),
            NodeRef::Target(target, usage) => target_kind(target, *usage),
            NodeRef::Decorators(..) => NodeKind::Decorators,
            NodeRef::Keyword(_) => NodeKind::Keyword,
            NodeRef::ListCompFor(_) => NodeKind::ListCompFor,
            NodeRef::ListCompIf(_) => NodeKind::ListCompIf,
        }
    }

    pub fn line(&self) -> Line {
        match self {
            NodeRef::Module(m) => m.body.first().map(|s| s.line).unwrap_or(1),
            NodeRef::Expression(e) | NodeRef::Expr(e) | NodeRef::ListCompIf(e) => e.line,
            NodeRef::Suite(_, line) | NodeRef::Decorators(_, line) => *line,
            NodeRef::Stmt(s) => s.line,
            NodeRef::Target(t, _) => t.line(),
            NodeRef::Keyword(k) => k.line,
            NodeRef::ListCompFor(c) => c.line,
        }
    }

    /// Scalar fields in declaration order.
    pub fn fields(&self) -> Vec<(&'static str, Field<'a>)> {
        match *self {
            NodeRef::Module(m) => vec![("doc", opt_str(&m.doc))],
            NodeRef::Stmt(stmt) => stmt_fields(stmt),
            NodeRef::Expr(expr) => expr_fields(expr),
            NodeRef::Target(target, usage) => target_fields(target, usage),
            NodeRef::Keyword(k) => vec![("name", Field::Str(&k.name))],
            NodeRef::Expression(_)
            | NodeRef::Suite(..)
            | NodeRef::Decorators(..)
            | NodeRef::ListCompFor(_)
            | NodeRef::ListCompIf(_) => Vec::new(),
        }
    }

    /// Child nodes in source order.
    pub fn children(&self) -> Vec<NodeRef<'a>> {
        match *self {
            NodeRef::Module(m) => vec![NodeRef::suite(&m.body, 1)],
            NodeRef::Expression(e) => vec![NodeRef::Expr(e)],
            NodeRef::Suite(body, _) => body.iter().map(NodeRef::stmt).collect(),
            NodeRef::Stmt(stmt) => stmt_children(stmt),
            NodeRef::Expr(expr) => expr_children(expr),
            NodeRef::Target(target, usage) => target_children(target, usage),
            NodeRef::Decorators(exprs, _) => exprs.iter().map(NodeRef::Expr).collect(),
            NodeRef::Keyword(k) => vec![NodeRef::Expr(&k.value)],
            NodeRef::ListCompFor(c) => {
                let mut out = vec![
                    NodeRef::Target(&c.target, TargetUse::Assign),
                    NodeRef::Expr(&c.iter),
                ];
                out.extend(c.ifs.iter().map(NodeRef::ListCompIf));
                out
            }
            NodeRef::ListCompIf(e) => vec![NodeRef::Expr(e)],
        }
    }
}

fn opt_str(value: &Option<String>) -> Field<'_> {
    match value {
        Some(s) => Field::Str(s),
        None => Field::None,
    }
}

fn function_flags(params: &Params) -> i64 {
    let mut flags = 0;
    if params.vararg.is_some() {
        flags |= CO_VARARGS;
    }
    if params.kwarg.is_some() {
        flags |= CO_VARKEYWORDS;
    }
    flags
}

fn stmt_kind(stmt: &Stmt) -> NodeKind {
    match &stmt.kind {
        StmtKind::Expr(_) => NodeKind::Discard,
        StmtKind::Assign { .. } => NodeKind::Assign,
        StmtKind::AugAssign { .. } => NodeKind::AugAssign,
        StmtKind::Print { newline: true, .. } => NodeKind::Printnl,
        StmtKind::Print { newline: false, .. } => NodeKind::Print,
        StmtKind::Pass => NodeKind::Pass,
        StmtKind::Break => NodeKind::Break,
        StmtKind::Continue => NodeKind::Continue,
        StmtKind::Return(_) => NodeKind::Return,
        StmtKind::If { .. } => NodeKind::If,
        StmtKind::While { .. } => NodeKind::While,
        StmtKind::For { .. } => NodeKind::For,
        StmtKind::FunctionDef(_) => NodeKind::Function,
        StmtKind::ClassDef(_) => NodeKind::Class,
        StmtKind::TryExcept { .. } => NodeKind::TryExcept,
        StmtKind::TryFinally { .. } => NodeKind::TryFinally,
        StmtKind::Raise { .. } => NodeKind::Raise,
        StmtKind::Assert { .. } => NodeKind::Assert,
        StmtKind::Delete(target) => target_kind(target, TargetUse::Delete),
        StmtKind::Import(_) => NodeKind::Import,
        StmtKind::From { .. } => NodeKind::From,
        StmtKind::Global(_) => NodeKind::Global,
        StmtKind::Exec { .. } => NodeKind::Exec,
    }
}

fn stmt_fields(stmt: &Stmt) -> Vec<(&'static str, Field<'_>)> {
    match &stmt.kind {
        StmtKind::AugAssign { op, .. } => vec![("op", Field::Str(op.aug_symbol()))],
        StmtKind::FunctionDef(def) => vec![
            ("name", Field::Str(&def.name)),
            (
                "argnames",
                Field::List(def.params.args.iter().map(|p| p.name.as_str()).collect()),
            ),
            ("flags", Field::Int(function_flags(&def.params))),
            ("doc", opt_str(&def.doc)),
        ],
        StmtKind::ClassDef(class) => vec![
            ("name", Field::Str(&class.name)),
            ("doc", opt_str(&class.doc)),
        ],
        StmtKind::Delete(target) => target_fields(target, TargetUse::Delete),
        StmtKind::Import(names) => vec![(
            "names",
            Field::List(names.iter().map(|a| a.name.as_str()).collect()),
        )],
        StmtKind::From { module, names } => vec![
            ("modname", Field::Str(module)),
            (
                "names",
                Field::List(names.iter().map(|a| a.name.as_str()).collect()),
            ),
            ("level", Field::Int(0)),
        ],
        StmtKind::Global(names) => vec![(
            "names",
            Field::List(names.iter().map(String::as_str).collect()),
        )],
        _ => Vec::new(),
    }
}

fn stmt_children(stmt: &Stmt) -> Vec<NodeRef<'_>> {
    let line = stmt.line;
    let mut out = Vec::new();
    match &stmt.kind {
        StmtKind::Expr(e) => out.push(NodeRef::Expr(e)),
        StmtKind::Assign { targets, value } => {
            out.extend(
                targets
                    .iter()
                    .map(|t| NodeRef::Target(t, TargetUse::Assign)),
            );
            out.push(NodeRef::Expr(value));
        }
        StmtKind::AugAssign { target, value, .. } => {
            out.push(NodeRef::Target(target, TargetUse::Load));
            out.push(NodeRef::Expr(value));
        }
        StmtKind::Print { values, .. } => out.extend(values.iter().map(NodeRef::Expr)),
        StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Return(value) => out.extend(value.iter().map(NodeRef::Expr)),
        StmtKind::If { branches, orelse } => {
            for (test, body) in branches {
                out.push(NodeRef::Expr(test));
                out.push(NodeRef::suite(body, test.line));
            }
            if let Some(orelse) = orelse {
                out.push(NodeRef::suite(orelse, line));
            }
        }
        StmtKind::While { test, body, orelse } => {
            out.push(NodeRef::Expr(test));
            out.push(NodeRef::suite(body, line));
            if let Some(orelse) = orelse {
                out.push(NodeRef::suite(orelse, line));
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            out.push(NodeRef::Target(target, TargetUse::Assign));
            out.push(NodeRef::Expr(iter));
            out.push(NodeRef::suite(body, line));
            if let Some(orelse) = orelse {
                out.push(NodeRef::suite(orelse, line));
            }
        }
        StmtKind::FunctionDef(def) => function_children(def, &mut out),
        StmtKind::ClassDef(class) => {
            out.extend(class.bases.iter().map(NodeRef::Expr));
            out.push(NodeRef::suite(&class.body, class.line));
        }
        StmtKind::TryExcept {
            body,
            handlers,
            orelse,
        } => {
            out.push(NodeRef::suite(body, line));
            for handler in handlers {
                out.extend(handler.typ.iter().map(NodeRef::Expr));
                out.extend(
                    handler
                        .name
                        .iter()
                        .map(|t| NodeRef::Target(t, TargetUse::Assign)),
                );
                out.push(NodeRef::suite(&handler.body, handler.line));
            }
            if let Some(orelse) = orelse {
                out.push(NodeRef::suite(orelse, line));
            }
        }
        StmtKind::TryFinally { body, finalbody } => {
            out.push(NodeRef::suite(body, line));
            out.push(NodeRef::suite(finalbody, line));
        }
        StmtKind::Raise { exc, arg } => {
            out.extend(exc.iter().map(NodeRef::Expr));
            out.extend(arg.iter().map(NodeRef::Expr));
        }
        StmtKind::Assert { test, msg } => {
            out.push(NodeRef::Expr(test));
            out.extend(msg.iter().map(NodeRef::Expr));
        }
        StmtKind::Delete(target) => return target_children(target, TargetUse::Delete),
        StmtKind::Import(_) | StmtKind::From { .. } | StmtKind::Global(_) => {}
        StmtKind::Exec { code, globals } => {
            out.push(NodeRef::Expr(code));
            out.extend(globals.iter().map(NodeRef::Expr));
        }
    }
    out
}

fn function_children<'a>(def: &'a FunctionDef, out: &mut Vec<NodeRef<'a>>) {
    if !def.decorators.is_empty() {
        out.push(NodeRef::Decorators(&def.decorators, def.line));
    }
    out.extend(
        def.params
            .args
            .iter()
            .filter_map(|p| p.default.as_ref())
            .map(NodeRef::Expr),
    );
    match &def.body {
        FunctionBody::Block(body) => out.push(NodeRef::suite(body, def.line)),
        FunctionBody::Expr(expr) => out.push(NodeRef::Expr(expr)),
    }
}

fn expr_kind(expr: &Expr) -> NodeKind {
    match &expr.kind {
        ExprKind::Const(_) => NodeKind::Const,
        ExprKind::Name(_) => NodeKind::Name,
        ExprKind::Tuple(_) => NodeKind::Tuple,
        ExprKind::List(_) => NodeKind::List,
        ExprKind::Dict(_) => NodeKind::Dict,
        ExprKind::ListComp { .. } => NodeKind::ListComp,
        ExprKind::BinOp { op, .. } => match op {
            BinOp::Add => NodeKind::Add,
            BinOp::Sub => NodeKind::Sub,
            BinOp::Mul => NodeKind::Mul,
            BinOp::Div => NodeKind::Div,
            BinOp::FloorDiv => NodeKind::FloorDiv,
            BinOp::Mod => NodeKind::Mod,
            BinOp::Pow => NodeKind::Power,
            BinOp::LShift => NodeKind::LeftShift,
            BinOp::RShift => NodeKind::RightShift,
            BinOp::BitAnd => NodeKind::Bitand,
            BinOp::BitOr => NodeKind::Bitor,
            BinOp::BitXor => NodeKind::Bitxor,
        },
        ExprKind::Unary { op, .. } => match op {
            UnaryOp::Plus => NodeKind::UnaryAdd,
            UnaryOp::Minus => NodeKind::UnarySub,
            UnaryOp::Not => NodeKind::Not,
            UnaryOp::Invert => NodeKind::Invert,
        },
        ExprKind::BoolOp { op: BoolOp::And, .. } => NodeKind::And,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => NodeKind::Or,
        ExprKind::Compare { .. } => NodeKind::Compare,
        ExprKind::Call { .. } => NodeKind::CallFunc,
        ExprKind::Attribute { .. } => NodeKind::Getattr,
        ExprKind::Subscript { .. } => NodeKind::Subscript,
        ExprKind::Slice { .. } => NodeKind::Slice,
        ExprKind::SliceObj { .. } => NodeKind::Sliceobj,
        ExprKind::Lambda(_) => NodeKind::Lambda,
        ExprKind::IfExp { .. } => NodeKind::IfExp,
    }
}

fn expr_fields(expr: &Expr) -> Vec<(&'static str, Field<'_>)> {
    match &expr.kind {
        ExprKind::Const(Constant::Str(s)) => vec![("value", Field::Str(s))],
        ExprKind::Const(Constant::Int(i)) => vec![("value", Field::Int(*i))],
        ExprKind::Const(Constant::Float(f)) => vec![("value", Field::Float(*f))],
        ExprKind::Name(name) => vec![("name", Field::Str(name))],
        ExprKind::Attribute { attr, .. } => vec![("attrname", Field::Str(attr))],
        ExprKind::Subscript { .. } | ExprKind::Slice { .. } => {
            vec![("flags", Field::Str(OP_APPLY))]
        }
        ExprKind::Lambda(def) => vec![
            (
                "argnames",
                Field::List(def.params.args.iter().map(|p| p.name.as_str()).collect()),
            ),
            ("flags", Field::Int(function_flags(&def.params))),
        ],
        _ => Vec::new(),
    }
}

fn expr_children(expr: &Expr) -> Vec<NodeRef<'_>> {
    let mut out = Vec::new();
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::Name(_) => {}
        ExprKind::Tuple(elts) | ExprKind::List(elts) => out.extend(elts.iter().map(NodeRef::Expr)),
        ExprKind::Dict(items) => {
            for (k, v) in items {
                out.push(NodeRef::Expr(k));
                out.push(NodeRef::Expr(v));
            }
        }
        ExprKind::ListComp { elt, generators } => {
            out.push(NodeRef::Expr(elt));
            out.extend(generators.iter().map(NodeRef::ListCompFor));
        }
        ExprKind::BinOp { left, right, .. } => {
            out.push(NodeRef::Expr(left));
            out.push(NodeRef::Expr(right));
        }
        ExprKind::Unary { operand, .. } => out.push(NodeRef::Expr(operand)),
        ExprKind::BoolOp { values, .. } => out.extend(values.iter().map(NodeRef::Expr)),
        ExprKind::Compare { left, ops } => {
            out.push(NodeRef::Expr(left));
            out.extend(ops.iter().map(|(_, e)| NodeRef::Expr(e)));
        }
        ExprKind::Call {
            func,
            args,
            keywords,
            star,
            dstar,
        } => {
            out.push(NodeRef::Expr(func));
            out.extend(args.iter().map(NodeRef::Expr));
            out.extend(keywords.iter().map(NodeRef::Keyword));
            out.extend(star.iter().map(|e| NodeRef::Expr(e)));
            out.extend(dstar.iter().map(|e| NodeRef::Expr(e)));
        }
        ExprKind::Attribute { value, .. } => out.push(NodeRef::Expr(value)),
        ExprKind::Subscript { value, index } => {
            out.push(NodeRef::Expr(value));
            out.push(NodeRef::Expr(index));
        }
        ExprKind::Slice {
            value,
            lower,
            upper,
        } => {
            out.push(NodeRef::Expr(value));
            out.extend(lower.iter().map(|e| NodeRef::Expr(e)));
            out.extend(upper.iter().map(|e| NodeRef::Expr(e)));
        }
        ExprKind::SliceObj { lower, upper, step } => {
            out.extend(lower.iter().map(|e| NodeRef::Expr(e)));
            out.extend(upper.iter().map(|e| NodeRef::Expr(e)));
            out.extend(step.iter().map(|e| NodeRef::Expr(e)));
        }
        ExprKind::Lambda(def) => function_children(def, &mut out),
        ExprKind::IfExp { test, body, orelse } => {
            out.push(NodeRef::Expr(test));
            out.push(NodeRef::Expr(body));
            out.push(NodeRef::Expr(orelse));
        }
    }
    out
}

fn target_kind(target: &Target, usage: TargetUse) -> NodeKind {
    match (target, usage) {
        (Target::Name { .. }, TargetUse::Load) => NodeKind::Name,
        (Target::Name { .. }, _) => NodeKind::AssName,
        (Target::Attribute { .. }, TargetUse::Load) => NodeKind::Getattr,
        (Target::Attribute { .. }, _) => NodeKind::AssAttr,
        (Target::Subscript { .. }, _) => NodeKind::Subscript,
        (Target::Slice { .. }, _) => NodeKind::Slice,
        (Target::Tuple { .. }, _) => NodeKind::AssTuple,
        (Target::List { .. }, _) => NodeKind::AssList,
    }
}

fn target_fields(target: &Target, usage: TargetUse) -> Vec<(&'static str, Field<'_>)> {
    let flags = ("flags", Field::Str(usage.flag()));
    match (target, usage) {
        (Target::Name { name, .. }, TargetUse::Load) => vec![("name", Field::Str(name))],
        (Target::Name { name, .. }, _) => vec![("name", Field::Str(name)), flags],
        (Target::Attribute { attr, .. }, TargetUse::Load) => {
            vec![("attrname", Field::Str(attr))]
        }
        (Target::Attribute { attr, .. }, _) => vec![("attrname", Field::Str(attr)), flags],
        (Target::Subscript { .. }, _) | (Target::Slice { .. }, _) => vec![flags],
        (Target::Tuple { .. }, _) | (Target::List { .. }, _) => Vec::new(),
    }
}

fn target_children(target: &Target, usage: TargetUse) -> Vec<NodeRef<'_>> {
    match target {
        Target::Name { .. } => Vec::new(),
        Target::Attribute { value, .. } => vec![NodeRef::Expr(value)],
        Target::Subscript { value, index, .. } => vec![NodeRef::Expr(value), NodeRef::Expr(index)],
        Target::Slice {
            value,
            lower,
            upper,
            ..
        } => {
            let mut out = vec![NodeRef::Expr(value)];
            out.extend(lower.iter().map(NodeRef::Expr));
            out.extend(upper.iter().map(NodeRef::Expr));
            out
        }
        Target::Tuple { elts, .. } | Target::List { elts, .. } => {
            elts.iter().map(|t| NodeRef::Target(t, usage)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn kinds(src: &str) -> Vec<NodeKind> {
        let module = parse_module(src).unwrap();
        let mut out = Vec::new();
        let mut stack = vec![NodeRef::Module(&module)];
        while let Some(node) = stack.pop() {
            out.push(node.kind());
            let mut children = node.children();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), *kind);
        }
        assert!("Ellipsis".parse::<NodeKind>().is_err());
    }

    #[test]
    fn assignment_shape() {
        assert_eq!(
            kinds("x = 1"),
            vec![
                NodeKind::Module,
                NodeKind::Stmt,
                NodeKind::Assign,
                NodeKind::AssName,
                NodeKind::Const
            ]
        );
    }

    #[test]
    fn delete_is_the_target_itself() {
        let module = parse_module("del a.b").unwrap();
        let suite = NodeRef::Module(&module).children()[0];
        let node = suite.children()[0];
        assert_eq!(node.kind(), NodeKind::AssAttr);
        assert!(node
            .fields()
            .contains(&("flags", Field::Str("OP_DELETE"))));
    }

    #[test]
    fn aug_assign_target_is_in_load_form() {
        assert_eq!(
            kinds("x += 1"),
            vec![
                NodeKind::Module,
                NodeKind::Stmt,
                NodeKind::AugAssign,
                NodeKind::Name,
                NodeKind::Const
            ]
        );
    }

    #[test]
    fn print_kinds() {
        assert!(kinds("print 1").contains(&NodeKind::Printnl));
        assert!(kinds("print 1,").contains(&NodeKind::Print));
    }

    #[test]
    fn function_fields() {
        let module = parse_module("def f(a, *b):\n    'doc'\n    pass\n").unwrap();
        let suite = NodeRef::Module(&module).children()[0];
        let func = suite.children()[0];
        assert_eq!(func.kind(), NodeKind::Function);
        let fields = func.fields();
        assert_eq!(fields[0], ("name", Field::Str("f")));
        assert_eq!(fields[1], ("argnames", Field::List(vec!["a"])));
        assert_eq!(fields[2], ("flags", Field::Int(CO_VARARGS)));
        assert_eq!(fields[3], ("doc", Field::Str("doc")));
    }

    #[test]
    fn decorators_node_present_only_when_decorated() {
        assert!(kinds("@d\ndef f():\n    pass\n").contains(&NodeKind::Decorators));
        assert!(!kinds("def f():\n    pass\n").contains(&NodeKind::Decorators));
    }

    #[test]
    fn list_comprehension_kinds() {
        let k = kinds("[x for x in y if x]");
        assert!(k.contains(&NodeKind::ListComp));
        assert!(k.contains(&NodeKind::ListCompFor));
        assert!(k.contains(&NodeKind::ListCompIf));
    }

    #[test]
    fn slice_kinds() {
        assert!(kinds("a[1:2]").contains(&NodeKind::Slice));
        assert!(kinds("a[::2]").contains(&NodeKind::Sliceobj));
    }
}
