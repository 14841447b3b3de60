//! Typed syntax tree for the script dialect.
//!
//! The parser only ever builds these shapes. The static checker sees them
//! through [`crate::syntax::NodeRef`], which names each node after the
//! classic Python 2 `compiler` AST class it corresponds to.

use std::rc::Rc;

/// 1-based source line.
pub type Line = u32;

/// A parsed script.
#[derive(Debug, Clone)]
pub struct Module {
    /// Leading string literal, if any.
    pub doc: Option<String>,
    /// Top-level statements.
    pub body: Vec<Stmt>,
}

/// A statement with its source line.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: Line,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression evaluated for its side effects.
    Expr(Expr),
    /// `a = b = value`
    Assign { targets: Vec<Target>, value: Expr },
    /// `target op= value`
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    /// `print a, b` (`newline`) or `print a, b,`
    Print { values: Vec<Expr>, newline: bool },
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Option<Vec<Stmt>>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Option<Vec<Stmt>>,
    },
    FunctionDef(Rc<FunctionDef>),
    ClassDef(Rc<ClassDef>),
    TryExcept {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Option<Vec<Stmt>>,
    },
    TryFinally {
        body: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    /// `raise`, `raise exc` or `raise exc, arg`
    Raise {
        exc: Option<Expr>,
        arg: Option<Expr>,
    },
    Assert { test: Expr, msg: Option<Expr> },
    /// `del target`
    Delete(Target),
    Import(Vec<Alias>),
    From { module: String, names: Vec<Alias> },
    Global(Vec<String>),
    /// `exec code [in globals]`
    Exec { code: Expr, globals: Option<Expr> },
}

/// One `except` clause.
#[derive(Debug, Clone)]
pub struct Handler {
    pub line: Line,
    pub typ: Option<Expr>,
    pub name: Option<Target>,
    pub body: Vec<Stmt>,
}

/// `name [as asname]` in import statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name the import binds locally.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(alias) => alias,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

/// A `def` or a `lambda`.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub line: Line,
    pub name: String,
    pub params: Params,
    pub doc: Option<String>,
    pub body: FunctionBody,
    pub decorators: Vec<Expr>,
}

impl FunctionDef {
    pub fn is_lambda(&self) -> bool {
        matches!(self.body, FunctionBody::Expr(_))
    }
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Lambda body.
    Expr(Expr),
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub args: Vec<Param>,
    pub vararg: Option<String>,
    pub kwarg: Option<String>,
}

impl Params {
    /// Parameter names in declaration order, including `*args` and `**kwargs`.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.args.iter().map(|p| p.name.clone()).collect();
        names.extend(self.vararg.iter().cloned());
        names.extend(self.kwarg.iter().cloned());
        names
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub line: Line,
    pub name: String,
    pub bases: Vec<Expr>,
    pub doc: Option<String>,
    pub body: Vec<Stmt>,
}

/// An expression with its source line.
#[derive(Debug, Clone)]
pub struct Expr {
    pub line: Line,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(line: Line, kind: ExprKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Const(Constant),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        star: Option<Box<Expr>>,
        dstar: Option<Box<Expr>>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    /// `value[lower:upper]`
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    /// `lower:upper:step` inside a subscript.
    SliceObj {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Lambda(Rc<FunctionDef>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
}

#[derive(Debug, Clone)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

/// `for target in iter if cond ...` inside a list comprehension.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub line: Line,
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// `name=value` in a call.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub line: Line,
    pub name: String,
    pub value: Expr,
}

/// Something that can be assigned to or deleted.
#[derive(Debug, Clone)]
pub enum Target {
    Name {
        line: Line,
        name: String,
    },
    Attribute {
        line: Line,
        value: Expr,
        attr: String,
    },
    Subscript {
        line: Line,
        value: Expr,
        index: Expr,
    },
    Slice {
        line: Line,
        value: Expr,
        lower: Option<Expr>,
        upper: Option<Expr>,
    },
    Tuple {
        line: Line,
        elts: Vec<Target>,
    },
    List {
        line: Line,
        elts: Vec<Target>,
    },
}

impl Target {
    pub fn line(&self) -> Line {
        match self {
            Self::Name { line, .. }
            | Self::Attribute { line, .. }
            | Self::Subscript { line, .. }
            | Self::Slice { line, .. }
            | Self::Tuple { line, .. }
            | Self::List { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }

    /// The augmented-assignment spelling, e.g. `+=`.
    pub fn aug_symbol(self) -> &'static str {
        match self {
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
            Self::FloorDiv => "//=",
            Self::Mod => "%=",
            Self::Pow => "**=",
            Self::LShift => "<<=",
            Self::RShift => ">>=",
            Self::BitAnd => "&=",
            Self::BitOr => "|=",
            Self::BitXor => "^=",
        }
    }

    pub fn from_aug_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+=" => Self::Add,
            "-=" => Self::Sub,
            "*=" => Self::Mul,
            "/=" => Self::Div,
            "//=" => Self::FloorDiv,
            "%=" => Self::Mod,
            "**=" => Self::Pow,
            "<<=" => Self::LShift,
            ">>=" => Self::RShift,
            "&=" => Self::BitAnd,
            "|=" => Self::BitOr,
            "^=" => Self::BitXor,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}
