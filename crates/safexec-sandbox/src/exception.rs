//! Built-in exception hierarchy and the unwinding signal used by the
//! interpreter.

use std::rc::Rc;

use crate::ast::Line;
use crate::error::SafeError;
use crate::value::Value;

macro_rules! exc_kinds {
    ($($kind:ident => $parent:expr),* $(,)?) => {
        /// Built-in exception classes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ExcKind {
            $($kind,)*
        }

        impl ExcKind {
            pub const ALL: &'static [ExcKind] = &[$(ExcKind::$kind,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(ExcKind::$kind => stringify!($kind),)*
                }
            }

            pub fn parent(self) -> Option<ExcKind> {
                match self {
                    $(ExcKind::$kind => $parent,)*
                }
            }

            pub fn from_name(name: &str) -> Option<ExcKind> {
                match name {
                    $(stringify!($kind) => Some(ExcKind::$kind),)*
                    _ => None,
                }
            }
        }
    };
}

use ExcKind as E;

exc_kinds! {
    BaseException => None,
    SystemExit => Some(E::BaseException),
    Exception => Some(E::BaseException),
    StopIteration => Some(E::Exception),
    Warning => Some(E::Exception),
    RuntimeWarning => Some(E::Warning),
    StandardError => Some(E::Exception),
    ArithmeticError => Some(E::StandardError),
    ZeroDivisionError => Some(E::ArithmeticError),
    OverflowError => Some(E::ArithmeticError),
    AssertionError => Some(E::StandardError),
    AttributeError => Some(E::StandardError),
    LookupError => Some(E::StandardError),
    IndexError => Some(E::LookupError),
    KeyError => Some(E::LookupError),
    NameError => Some(E::StandardError),
    RuntimeError => Some(E::StandardError),
    NotImplementedError => Some(E::RuntimeError),
    TypeError => Some(E::StandardError),
    ValueError => Some(E::StandardError),
    ImportError => Some(E::StandardError),
    IOError => Some(E::StandardError),
    MemoryError => Some(E::StandardError),
}

impl ExcKind {
    /// `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut cur = Some(self);
        while let Some(kind) = cur {
            if kind == other {
                return true;
            }
            cur = kind.parent();
        }
        false
    }
}

/// An instance of a built-in exception class.
pub struct ExceptionObj {
    pub kind: ExcKind,
    pub args: Vec<Value>,
}

/// A raised exception on its way up the stack.
#[derive(Debug)]
pub struct ScriptException {
    /// The exception object: a built-in exception or an instance of a
    /// class deriving from one.
    pub value: Value,
    /// Line it was raised on, filled in by the innermost statement.
    pub line: Option<Line>,
}

/// Why evaluation stopped early.
#[derive(Debug)]
pub enum Unwind {
    /// A script-level exception that `try/except` may catch.
    Raise(Box<ScriptException>),
    /// A sandbox-level failure that unwinds straight to the host.
    Fatal(Box<SafeError>),
}

impl Unwind {
    pub fn raise(value: Value) -> Self {
        Unwind::Raise(Box::new(ScriptException { value, line: None }))
    }

    pub fn exc(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::raise(Value::Exception(Rc::new(ExceptionObj {
            kind,
            args: vec![Value::str(message.into())],
        })))
    }

    pub fn fatal(err: SafeError) -> Self {
        Unwind::Fatal(Box::new(err))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::exc(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::exc(ExcKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::exc(ExcKind::IndexError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::exc(ExcKind::AttributeError, message)
    }

    pub fn overflow() -> Self {
        Self::exc(ExcKind::OverflowError, "integer overflow")
    }

    pub fn zero_division(message: &str) -> Self {
        Self::exc(ExcKind::ZeroDivisionError, message)
    }

    pub fn key_error(key: Value) -> Self {
        Self::raise(Value::Exception(Rc::new(ExceptionObj {
            kind: ExcKind::KeyError,
            args: vec![key],
        })))
    }

    /// Attach a line to a script exception that does not have one yet.
    pub fn at_line(mut self, line: Line) -> Self {
        if let Unwind::Raise(exc) = &mut self {
            if exc.line.is_none() {
                exc.line = Some(line);
            }
        }
        self
    }
}

impl From<SafeError> for Unwind {
    fn from(err: SafeError) -> Self {
        Unwind::fatal(err)
    }
}
