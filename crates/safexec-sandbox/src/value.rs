//! Runtime values of the script dialect.
//!
//! Values are reference-counted and never leave the thread that created
//! them. Containers use interior mutability so aliasing behaves the way
//! script authors expect (`b = a; b.append(1)` changes `a`).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::FunctionDef;
use crate::builtins::BuiltinFn;
use crate::exception::{ExcKind, ExceptionObj, Unwind};
use crate::format;
use crate::interp::Frame;
use crate::methods::FileObj;
use crate::modules::HostFn;

/// Global variables of a run; shared by every function defined in it.
pub type Globals = Rc<RefCell<IndexMap<String, Value>>>;

/// Dictionary storage: hash key to the original key and the value.
pub type DictMap = IndexMap<HashKey, (Value, Value)>;

/// Set storage: hash key to the original element.
pub type SetMap = IndexMap<HashKey, Value>;

/// Built-in types that can be named and called as constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    XRange,
    Object,
    Type,
    Function,
    BuiltinFunction,
    Method,
    Module,
    File,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::FrozenSet => "frozenset",
            TypeKind::XRange => "xrange",
            TypeKind::Object => "object",
            TypeKind::Type => "type",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "instancemethod",
            TypeKind::Module => "module",
            TypeKind::File => "file",
        }
    }
}

/// A function defined by the script.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub globals: Globals,
    pub closure: Option<Rc<Frame>>,
}

/// A class defined by the script.
pub struct Class {
    pub name: String,
    /// Script classes, built-in exception classes or `object`.
    pub bases: Vec<Value>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Class {
    /// Method resolution order: depth-first, left to right, without
    /// duplicates.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        fn visit(class: &Rc<Class>, out: &mut Vec<Rc<Class>>) {
            if out.iter().any(|c| Rc::ptr_eq(c, class)) {
                return;
            }
            out.push(class.clone());
            for base in &class.bases {
                if let Value::Class(base) = base {
                    visit(base, out);
                }
            }
        }
        let mut out = Vec::new();
        visit(self, &mut out);
        out
    }

    /// Look an attribute up along the MRO.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .find_map(|c| c.attrs.borrow().get(name).cloned())
    }

    /// The built-in exception class this class derives from, if any.
    pub fn exception_base(self: &Rc<Self>) -> Option<ExcKind> {
        self.mro().iter().find_map(|c| {
            c.bases.iter().find_map(|b| match b {
                Value::ExcClass(kind) => Some(*kind),
                _ => None,
            })
        })
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|c| Rc::ptr_eq(c, other))
    }
}

/// An instance of a script class.
pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

/// A function bound to its receiver.
pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

/// A native method of a built-in value, e.g. `"abc".upper`.
pub struct NativeMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// `super(Class, obj)`.
pub struct SuperObj {
    pub class: Rc<Class>,
    pub receiver: Value,
}

/// A host module made available through `__import__`.
pub struct ModuleObj {
    pub name: &'static str,
    pub attrs: IndexMap<&'static str, Value>,
}

/// Lazy integer range produced by `xrange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRange {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl XRange {
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if lo >= hi {
            0
        } else {
            ((hi - lo + step - 1) / step) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some((self.start as i128 + index as i128 * self.step as i128) as i64)
    }
}

/// A script value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<DictMap>>),
    Set(Rc<RefCell<SetMap>>),
    FrozenSet(Rc<SetMap>),
    XRange(XRange),
    Function(Rc<Function>),
    Method(Rc<BoundMethod>),
    NativeMethod(Rc<NativeMethod>),
    Builtin(BuiltinFn),
    HostFn(HostFn),
    Type(TypeKind),
    ExcClass(ExcKind),
    Exception(Rc<ExceptionObj>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Super(Rc<SuperObj>),
    Module(Rc<ModuleObj>),
    File(Rc<RefCell<FileObj>>),
    /// Stand-in for a built-in the restricted namespace denies.
    Guard(Rc<str>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr_basic())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(map: DictMap) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn set(map: SetMap) -> Self {
        Value::Set(Rc::new(RefCell::new(map)))
    }

    /// Build a dict from string keys.
    pub fn dict_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let map = items
            .into_iter()
            .map(|(k, v)| {
                let key: Rc<str> = Rc::from(k);
                (HashKey::Str(key.clone()), (Value::Str(key), v))
            })
            .collect();
        Value::dict(map)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    /// Name of the value's type, as shown in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::XRange(_) => "xrange",
            Value::Function(_) => "function",
            Value::Method(_) => "instancemethod",
            Value::NativeMethod(_) | Value::Builtin(_) | Value::HostFn(_) | Value::Guard(_) => {
                "builtin_function_or_method"
            }
            Value::Type(_) | Value::ExcClass(_) => "type",
            Value::Exception(e) => e.kind.name(),
            Value::Class(_) => "classobj",
            Value::Instance(i) => &i.class.name,
            Value::Super(_) => "super",
            Value::Module(_) => "module",
            Value::File(_) => "file",
        }
    }

    /// The built-in type of a value; `None` for script classes and their
    /// instances.
    pub fn type_kind(&self) -> Option<TypeKind> {
        Some(match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::FrozenSet(_) => TypeKind::FrozenSet,
            Value::XRange(_) => TypeKind::XRange,
            Value::Function(_) => TypeKind::Function,
            Value::Method(_) => TypeKind::Method,
            Value::NativeMethod(_) | Value::Builtin(_) | Value::HostFn(_) | Value::Guard(_) => {
                TypeKind::BuiltinFunction
            }
            Value::Type(_) | Value::ExcClass(_) | Value::Class(_) => TypeKind::Type,
            Value::Module(_) => TypeKind::Module,
            Value::File(_) => TypeKind::File,
            Value::Exception(_) | Value::Instance(_) | Value::Super(_) => return None,
        })
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::FrozenSet(s) => !s.is_empty(),
            Value::XRange(r) => !r.is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Method(_)
                | Value::NativeMethod(_)
                | Value::Builtin(_)
                | Value::HostFn(_)
                | Value::Type(_)
                | Value::ExcClass(_)
                | Value::Class(_)
                | Value::Guard(_)
        )
    }

    /// Identity for `is`, `id()` and hashing of reference values.
    pub fn identity(&self) -> Option<usize> {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc) as *const () as usize
        }
        Some(match self {
            Value::Str(s) => addr(s),
            Value::List(l) => addr(l),
            Value::Tuple(t) => addr(t),
            Value::Dict(d) => addr(d),
            Value::Set(s) => addr(s),
            Value::FrozenSet(s) => addr(s),
            Value::Function(f) => addr(f),
            Value::Method(m) => addr(m),
            Value::NativeMethod(m) => addr(m),
            Value::Exception(e) => addr(e),
            Value::Class(c) => addr(c),
            Value::Instance(i) => addr(i),
            Value::Super(s) => addr(s),
            Value::Module(m) => addr(m),
            Value::File(f) => addr(f),
            Value::Guard(g) => addr(g),
            _ => return None,
        })
    }

    /// `a is b`.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::HostFn(a), Value::HostFn(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExcClass(a), Value::ExcClass(b)) => a == b,
            (Value::XRange(a), Value::XRange(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Structural equality (`==`).
    pub fn equals(&self, other: &Value) -> bool {
        equals_depth(self, other, 0)
    }

    /// Total ordering with the classic mixed-type rules: `None` first, then
    /// numbers, then everything else grouped by type name.
    pub fn compare(&self, other: &Value) -> Ordering {
        compare_depth(self, other, 0)
    }

    /// Key used by dicts and sets.
    pub fn hash_key(&self) -> Result<HashKey, Unwind> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<Result<_, _>>()?,
            ),
            Value::FrozenSet(items) => {
                let mut keys: Vec<HashKey> = items.keys().cloned().collect();
                keys.sort();
                HashKey::FrozenSet(keys)
            }
            Value::XRange(r) => {
                HashKey::Tag("xrange", format!("{}:{}:{}", r.start, r.stop, r.step))
            }
            Value::Builtin(f) => HashKey::Tag("builtin", f.name().to_string()),
            Value::HostFn(f) => HashKey::Tag("host", f.name().to_string()),
            Value::Type(t) => HashKey::Tag("type", t.name().to_string()),
            Value::ExcClass(e) => HashKey::Tag("exception", e.name().to_string()),
            Value::List(_) | Value::Dict(_) | Value::Set(_) => {
                return Err(Unwind::type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
            other => HashKey::Ptr(other.identity().unwrap_or(0)),
        })
    }

    /// Length of a sized value.
    pub fn len(&self) -> Option<usize> {
        Some(match self {
            Value::Str(s) => s.chars().count(),
            Value::List(l) => l.borrow().len(),
            Value::Tuple(t) => t.len(),
            Value::Dict(d) => d.borrow().len(),
            Value::Set(s) => s.borrow().len(),
            Value::FrozenSet(s) => s.len(),
            Value::XRange(r) => r.len(),
            _ => return None,
        })
    }

    /// `repr()` without calling any script code.
    pub fn repr_basic(&self) -> String {
        let mut out = String::new();
        let mut seen = Vec::new();
        // The hook never fails, so neither does the writer.
        let _ = write_repr(self, &mut out, &mut |_| None, &mut seen);
        out
    }

    /// `str()` without calling any script code.
    pub fn str_basic(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Float(f) => format::float_str(*f),
            Value::Exception(e) => exception_message(&e.args, &mut |v| Ok(v.str_basic()))
                .unwrap_or_default(),
            other => other.repr_basic(),
        }
    }
}

/// Hook consulted for values whose representation may be user-defined.
pub type ReprHook<'a> = dyn FnMut(&Value) -> Option<Result<String, Unwind>> + 'a;

/// Write the `repr()` of `value`, consulting `hook` for script instances.
///
/// `seen` tracks containers currently being printed so self-references
/// render as `[...]`.
pub fn write_repr(
    value: &Value,
    out: &mut String,
    hook: &mut ReprHook<'_>,
    seen: &mut Vec<usize>,
) -> Result<(), Unwind> {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format::float_repr(*f)),
        Value::Str(s) => format::quote_str(s, out),
        Value::List(items) => {
            let id = Rc::as_ptr(items) as *const () as usize;
            if seen.contains(&id) {
                out.push_str("[...]");
                return Ok(());
            }
            seen.push(id);
            let items = items.borrow().clone();
            out.push('[');
            write_items(&items, out, hook, seen)?;
            out.push(']');
            seen.pop();
        }
        Value::Tuple(items) => {
            out.push('(');
            write_items(items, out, hook, seen)?;
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(map) => {
            let id = Rc::as_ptr(map) as *const () as usize;
            if seen.contains(&id) {
                out.push_str("{...}");
                return Ok(());
            }
            seen.push(id);
            let entries: Vec<(Value, Value)> = map.borrow().values().cloned().collect();
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, hook, seen)?;
                out.push_str(": ");
                write_repr(v, out, hook, seen)?;
            }
            out.push('}');
            seen.pop();
        }
        Value::Set(map) => {
            let items: Vec<Value> = map.borrow().values().cloned().collect();
            out.push_str("set([");
            write_items(&items, out, hook, seen)?;
            out.push_str("])");
        }
        Value::FrozenSet(map) => {
            let items: Vec<Value> = map.values().cloned().collect();
            out.push_str("frozenset([");
            write_items(&items, out, hook, seen)?;
            out.push_str("])");
        }
        Value::XRange(r) => {
            if r.step == 1 {
                if r.start == 0 {
                    out.push_str(&format!("xrange({})", r.stop));
                } else {
                    out.push_str(&format!("xrange({}, {})", r.start, r.stop));
                }
            } else {
                out.push_str(&format!("xrange({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::Function(f) => out.push_str(&format!(
            "<function {} at {:#x}>",
            f.def.name,
            value.identity().unwrap_or(0)
        )),
        Value::Method(m) => {
            let name = match &m.func {
                Value::Function(f) => f.def.name.as_str(),
                _ => "?",
            };
            out.push_str(&format!(
                "<bound method {}.{} of ",
                m.receiver.type_name(),
                name
            ));
            write_repr(&m.receiver, out, hook, seen)?;
            out.push('>');
        }
        Value::NativeMethod(m) => out.push_str(&format!(
            "<built-in method {} of {} object>",
            m.name,
            m.receiver.type_name()
        )),
        Value::Builtin(f) => out.push_str(&format!("<built-in function {}>", f.name())),
        Value::HostFn(f) => out.push_str(&format!("<built-in function {}>", f.name())),
        Value::Guard(name) => out.push_str(&format!("<built-in function {name}>")),
        Value::Type(t) => out.push_str(&format!("<type '{}'>", t.name())),
        Value::ExcClass(e) => out.push_str(&format!("<type 'exceptions.{}'>", e.name())),
        Value::Exception(e) => {
            out.push_str(e.kind.name());
            out.push('(');
            write_items(&e.args, out, hook, seen)?;
            if e.args.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Class(c) => out.push_str(&format!("<class '{}'>", c.name)),
        Value::Instance(inst) => match hook(value) {
            Some(result) => out.push_str(&result?),
            None => out.push_str(&format!(
                "<{} instance at {:#x}>",
                inst.class.name,
                value.identity().unwrap_or(0)
            )),
        },
        Value::Super(s) => out.push_str(&format!("<super: <class '{}'>>", s.class.name)),
        Value::Module(m) => out.push_str(&format!("<module '{}' (built-in)>", m.name)),
        Value::File(f) => {
            let f = f.borrow();
            out.push_str(&format!(
                "<{} file '{}', mode '{}'>",
                if f.closed { "closed" } else { "open" },
                f.path,
                f.mode
            ));
        }
    }
    Ok(())
}

fn write_items(
    items: &[Value],
    out: &mut String,
    hook: &mut ReprHook<'_>,
    seen: &mut Vec<usize>,
) -> Result<(), Unwind> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, hook, seen)?;
    }
    Ok(())
}

/// `str()` of an exception given its arguments.
pub fn exception_message(
    args: &[Value],
    str_of: &mut dyn FnMut(&Value) -> Result<String, Unwind>,
) -> Result<String, Unwind> {
    match args {
        [] => Ok(String::new()),
        [single] => str_of(single),
        many => Ok(Value::tuple(many.to_vec()).repr_basic()),
    }
}

const MAX_COMPARE_DEPTH: usize = 200;

fn equals_depth(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_COMPARE_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Float(_), _) | (_, Value::Float(_)) if a.is_number() && b.is_number() => {
            a.as_float() == b.as_float()
        }
        (x, y) if x.is_number() && y.is_number() => x.as_int() == y.as_int(),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            seq_equals(&x, &y, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equals(x, y, depth),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, (_, v))| {
                    y.get(k)
                        .is_some_and(|(_, w)| equals_depth(v, w, depth + 1))
                })
        }
        (Value::Set(x), Value::Set(y)) => set_equals(&x.borrow(), &y.borrow()),
        (Value::Set(x), Value::FrozenSet(y)) => set_equals(&x.borrow(), y),
        (Value::FrozenSet(x), Value::Set(y)) => set_equals(x, &y.borrow()),
        (Value::FrozenSet(x), Value::FrozenSet(y)) => set_equals(x, y),
        (Value::Method(x), Value::Method(y)) => {
            x.receiver.is(&y.receiver) && x.func.is(&y.func)
        }
        (Value::NativeMethod(x), Value::NativeMethod(y)) => {
            x.name == y.name && x.receiver.is(&y.receiver)
        }
        _ => a.is(b),
    }
}

fn seq_equals(x: &[Value], y: &[Value], depth: usize) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| equals_depth(a, b, depth + 1))
}

fn set_equals(x: &SetMap, y: &SetMap) -> bool {
    x.len() == y.len() && x.keys().all(|k| y.contains_key(k))
}

fn compare_depth(a: &Value, b: &Value, depth: usize) -> Ordering {
    if depth > MAX_COMPARE_DEPTH {
        return Ordering::Equal;
    }
    match (a, b) {
        (Value::None, Value::None) => Ordering::Equal,
        (Value::None, _) => Ordering::Less,
        (_, Value::None) => Ordering::Greater,
        (x, y) if x.is_number() && y.is_number() => match (x, y) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                let (fx, fy) = (x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0));
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            }
            _ => x.as_int().cmp(&y.as_int()),
        },
        (x, _) if x.is_number() => Ordering::Less,
        (_, y) if y.is_number() => Ordering::Greater,
        (Value::Str(x), Value::Str(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            seq_compare(&x, &y, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_compare(x, y, depth),
        (Value::Dict(x), Value::Dict(y)) => x.borrow().len().cmp(&y.borrow().len()),
        _ => {
            let by_type = a.type_name().cmp(b.type_name());
            if by_type != Ordering::Equal {
                return by_type;
            }
            a.identity().cmp(&b.identity())
        }
    }
}

fn seq_compare(x: &[Value], y: &[Value], depth: usize) -> Ordering {
    for (a, b) in x.iter().zip(y) {
        if !equals_depth(a, b, depth + 1) {
            return compare_depth(a, b, depth + 1);
        }
    }
    x.len().cmp(&y.len())
}

/// Hashable identity of a dict key or set element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    FrozenSet(Vec<HashKey>),
    Tag(&'static str, String),
    Ptr(usize),
}

impl HashKey {
    /// A stable integer for `hash()`.
    pub fn to_hash(&self) -> i64 {
        use std::hash::{Hash, Hasher};
        match self {
            HashKey::Int(i) => *i,
            other => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                other.hash(&mut hasher);
                hasher.finish() as i64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(1).equals(&Value::str("1")));
    }

    #[test]
    fn hash_keys_unify_numbers() {
        assert_eq!(
            Value::Float(2.0).hash_key().ok(),
            Value::Int(2).hash_key().ok()
        );
        assert_eq!(
            Value::Bool(true).hash_key().ok(),
            Value::Int(1).hash_key().ok()
        );
    }

    #[test]
    fn lists_are_unhashable() {
        assert!(Value::list(vec![]).hash_key().is_err());
        assert!(Value::tuple(vec![Value::Int(1)]).hash_key().is_ok());
    }

    #[test]
    fn mixed_type_ordering() {
        assert_eq!(Value::None.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(5).compare(&Value::str("a")), Ordering::Less);
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Int(2)])
                .compare(&Value::tuple(vec![Value::Int(1), Value::Int(3)])),
            Ordering::Less
        );
    }

    #[test]
    fn repr_of_containers() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::str("a"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(v.repr_basic(), "[1, 'a', (None,)]");
        let d = Value::dict_from([("k".to_string(), Value::Float(1.5))]);
        assert_eq!(d.repr_basic(), "{'k': 1.5}");
    }

    #[test]
    fn self_referential_list() {
        let v = Value::list(vec![]);
        if let Value::List(items) = &v {
            items.borrow_mut().push(v.clone());
        }
        assert_eq!(v.repr_basic(), "[[...]]");
    }

    #[test]
    fn xrange_len_and_index() {
        let r = XRange {
            start: 10,
            stop: 0,
            step: -3,
        };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(1));
        assert_eq!(r.get(4), None);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::str("").truthy());
        assert!(Value::list(vec![Value::None]).truthy());
        assert!(!Value::Float(0.0).truthy());
    }
}
