//! Host modules reachable through `__import__` in unrestricted runs.

use std::rc::Rc;
use std::sync::LazyLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use crate::builtins::arity;
use crate::exception::{ExcKind, Unwind};
use crate::value::{ModuleObj, Value};

type EvalResult = Result<Value, Unwind>;

/// Process start, for `time.clock()`.
static STARTED: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Functions exported by host modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFn {
    Acos,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Cos,
    Degrees,
    Exp,
    Fabs,
    Floor,
    Fmod,
    Hypot,
    Log,
    Log10,
    Pow,
    Radians,
    Sin,
    Sqrt,
    Tan,
    Clock,
    Time,
    Getcwd,
    Getenv,
}

impl HostFn {
    pub fn name(self) -> &'static str {
        match self {
            HostFn::Acos => "acos",
            HostFn::Asin => "asin",
            HostFn::Atan => "atan",
            HostFn::Atan2 => "atan2",
            HostFn::Ceil => "ceil",
            HostFn::Cos => "cos",
            HostFn::Degrees => "degrees",
            HostFn::Exp => "exp",
            HostFn::Fabs => "fabs",
            HostFn::Floor => "floor",
            HostFn::Fmod => "fmod",
            HostFn::Hypot => "hypot",
            HostFn::Log => "log",
            HostFn::Log10 => "log10",
            HostFn::Pow => "pow",
            HostFn::Radians => "radians",
            HostFn::Sin => "sin",
            HostFn::Sqrt => "sqrt",
            HostFn::Tan => "tan",
            HostFn::Clock => "clock",
            HostFn::Time => "time",
            HostFn::Getcwd => "getcwd",
            HostFn::Getenv => "getenv",
        }
    }
}

const MATH_FNS: &[HostFn] = &[
    HostFn::Acos,
    HostFn::Asin,
    HostFn::Atan,
    HostFn::Atan2,
    HostFn::Ceil,
    HostFn::Cos,
    HostFn::Degrees,
    HostFn::Exp,
    HostFn::Fabs,
    HostFn::Floor,
    HostFn::Fmod,
    HostFn::Hypot,
    HostFn::Log,
    HostFn::Log10,
    HostFn::Pow,
    HostFn::Radians,
    HostFn::Sin,
    HostFn::Sqrt,
    HostFn::Tan,
];

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const WHITESPACE: &str = "\t\n\x0b\x0c\r ";

/// Names `__import__` can resolve.
const MODULE_NAMES: &[&str] = &["math", "os", "string", "time"];

/// Closest importable module within edit distance 2.
fn closest_module(name: &str) -> Option<&'static str> {
    MODULE_NAMES
        .iter()
        .map(|m| (strsim::levenshtein(name, m), *m))
        .filter(|(d, _)| *d > 0 && *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, m)| m)
}

/// Build the module called `name`.
pub(crate) fn import(name: &str) -> EvalResult {
    let mut attrs: IndexMap<&'static str, Value> = IndexMap::new();
    let name: &'static str = match name {
        "math" => {
            attrs.insert("pi", Value::Float(std::f64::consts::PI));
            attrs.insert("e", Value::Float(std::f64::consts::E));
            for f in MATH_FNS {
                attrs.insert(f.name(), Value::HostFn(*f));
            }
            "math"
        }
        "time" => {
            attrs.insert("time", Value::HostFn(HostFn::Time));
            attrs.insert("clock", Value::HostFn(HostFn::Clock));
            "time"
        }
        "os" => {
            attrs.insert("getcwd", Value::HostFn(HostFn::Getcwd));
            attrs.insert("getenv", Value::HostFn(HostFn::Getenv));
            attrs.insert("sep", Value::str(std::path::MAIN_SEPARATOR.to_string()));
            attrs.insert("linesep", Value::str(if cfg!(windows) { "\r\n" } else { "\n" }));
            attrs.insert("name", Value::str(if cfg!(windows) { "nt" } else { "posix" }));
            "os"
        }
        "string" => {
            let letters = format!("{LOWER}{UPPER}");
            let printable = format!("{DIGITS}{letters}{PUNCTUATION}{WHITESPACE}");
            attrs.insert("ascii_letters", Value::str(&letters));
            attrs.insert("ascii_lowercase", Value::str(LOWER));
            attrs.insert("ascii_uppercase", Value::str(UPPER));
            attrs.insert("letters", Value::str(&letters));
            attrs.insert("lowercase", Value::str(LOWER));
            attrs.insert("uppercase", Value::str(UPPER));
            attrs.insert("digits", Value::str(DIGITS));
            attrs.insert("hexdigits", Value::str("0123456789abcdefABCDEF"));
            attrs.insert("octdigits", Value::str("01234567"));
            attrs.insert("punctuation", Value::str(PUNCTUATION));
            attrs.insert("whitespace", Value::str(WHITESPACE));
            attrs.insert("printable", Value::str(printable));
            "string"
        }
        other => {
            let mut message = format!("No module named {other}");
            if let Some(hint) = closest_module(other) {
                message.push_str(&format!(" (did you mean '{hint}'?)"));
            }
            return Err(Unwind::exc(ExcKind::ImportError, message));
        }
    };
    tracing::debug!(module = name, "script imported a host module");
    Ok(Value::Module(Rc::new(ModuleObj { name, attrs })))
}

fn float_arg(f: HostFn, v: &Value) -> Result<f64, Unwind> {
    v.as_float()
        .ok_or_else(|| Unwind::type_error(format!("{}() requires a float argument", f.name())))
}

fn math_result(x: f64) -> EvalResult {
    if x.is_nan() {
        return Err(Unwind::value_error("math domain error"));
    }
    if x.is_infinite() {
        return Err(Unwind::exc(ExcKind::OverflowError, "math range error"));
    }
    Ok(Value::Float(x))
}

/// Call a host-module function.
pub(crate) fn call(f: HostFn, args: Vec<Value>, kwargs: &[(String, Value)]) -> EvalResult {
    let name = f.name();
    if let Some((k, _)) = kwargs.first() {
        return Err(Unwind::type_error(format!(
            "{name}() takes no keyword arguments (got '{k}')"
        )));
    }

    let unary = |op: fn(f64) -> f64| -> EvalResult {
        arity(name, &args, 1, 1)?;
        math_result(op(float_arg(f, &args[0])?))
    };
    let binary = |op: fn(f64, f64) -> f64| -> EvalResult {
        arity(name, &args, 2, 2)?;
        math_result(op(float_arg(f, &args[0])?, float_arg(f, &args[1])?))
    };

    match f {
        HostFn::Acos => unary(f64::acos),
        HostFn::Asin => unary(f64::asin),
        HostFn::Atan => unary(f64::atan),
        HostFn::Atan2 => binary(f64::atan2),
        HostFn::Ceil => unary(f64::ceil),
        HostFn::Cos => unary(f64::cos),
        HostFn::Degrees => unary(f64::to_degrees),
        HostFn::Exp => unary(f64::exp),
        HostFn::Fabs => unary(f64::abs),
        HostFn::Floor => unary(f64::floor),
        HostFn::Fmod => {
            arity(name, &args, 2, 2)?;
            let (x, y) = (float_arg(f, &args[0])?, float_arg(f, &args[1])?);
            if y == 0.0 {
                return Err(Unwind::value_error("math domain error"));
            }
            math_result(x % y)
        }
        HostFn::Hypot => binary(f64::hypot),
        HostFn::Log => {
            arity(name, &args, 1, 2)?;
            let x = float_arg(f, &args[0])?;
            if x <= 0.0 {
                return Err(Unwind::value_error("math domain error"));
            }
            match args.get(1) {
                None => math_result(x.ln()),
                Some(base) => math_result(x.ln() / float_arg(f, base)?.ln()),
            }
        }
        HostFn::Log10 => {
            arity(name, &args, 1, 1)?;
            let x = float_arg(f, &args[0])?;
            if x <= 0.0 {
                return Err(Unwind::value_error("math domain error"));
            }
            math_result(x.log10())
        }
        HostFn::Pow => binary(f64::powf),
        HostFn::Radians => unary(f64::to_radians),
        HostFn::Sin => unary(f64::sin),
        HostFn::Sqrt => unary(f64::sqrt),
        HostFn::Tan => unary(f64::tan),
        HostFn::Clock => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Float(STARTED.elapsed().as_secs_f64()))
        }
        HostFn::Time => {
            arity(name, &args, 0, 0)?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Ok(Value::Float(now))
        }
        HostFn::Getcwd => {
            arity(name, &args, 0, 0)?;
            let cwd = std::env::current_dir()
                .map_err(|e| Unwind::exc(ExcKind::IOError, e.to_string()))?;
            Ok(Value::str(cwd.to_string_lossy()))
        }
        HostFn::Getenv => {
            arity(name, &args, 1, 2)?;
            let Value::Str(key) = &args[0] else {
                return Err(Unwind::type_error("getenv() argument 1 must be string"));
            };
            Ok(match std::env::var(&**key) {
                Ok(v) => Value::str(v),
                Err(_) => args.get(1).cloned().unwrap_or(Value::None),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> Rc<ModuleObj> {
        match import(name) {
            Ok(Value::Module(m)) => m,
            _ => panic!("module {name} should import"),
        }
    }

    #[test]
    fn every_listed_module_imports() {
        for name in MODULE_NAMES {
            assert_eq!(module(name).name, *name);
        }
    }

    #[test]
    fn misspelled_module_suggests_a_name() {
        match import("maths") {
            Err(Unwind::Raise(exc)) => match &exc.value {
                Value::Exception(e) => {
                    let message = e.args[0].as_str().unwrap_or_default();
                    assert!(message.contains("did you mean 'math'"), "{message}");
                }
                _ => panic!("expected an exception value"),
            },
            _ => panic!("expected ImportError"),
        }
        assert_eq!(closest_module("subprocess"), None);
    }

    #[test]
    fn unknown_module_is_import_error() {
        match import("subprocess") {
            Err(Unwind::Raise(exc)) => match &exc.value {
                Value::Exception(e) => assert_eq!(e.kind, ExcKind::ImportError),
                _ => panic!("expected an exception value"),
            },
            _ => panic!("expected ImportError"),
        }
    }

    #[test]
    fn math_functions() {
        let r = call(HostFn::Sqrt, vec![Value::Int(16)], &[]);
        assert!(matches!(r, Ok(Value::Float(x)) if x == 4.0));
        assert!(call(HostFn::Sqrt, vec![Value::Int(-1)], &[]).is_err());
        assert!(call(HostFn::Log, vec![Value::Int(0)], &[]).is_err());
        let r = call(HostFn::Log, vec![Value::Int(8), Value::Int(2)], &[]);
        assert!(matches!(r, Ok(Value::Float(x)) if (x - 3.0).abs() < 1e-12));
    }

    #[test]
    fn string_constants() {
        let m = module("string");
        assert_eq!(m.attrs.get("digits").and_then(Value::as_str), Some(DIGITS));
    }

    #[test]
    #[serial_test::serial]
    fn getenv_falls_back_to_default() {
        std::env::remove_var("SAFEXEC_TEST_UNSET");
        let r = call(
            HostFn::Getenv,
            vec![Value::str("SAFEXEC_TEST_UNSET"), Value::str("fallback")],
            &[],
        );
        assert_eq!(r.ok().and_then(|v| v.as_str().map(str::to_string)), Some("fallback".into()));
    }
}
