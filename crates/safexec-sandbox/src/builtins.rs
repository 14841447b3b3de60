//! Built-in functions and type constructors.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::BinOp;
use crate::error::SafeError;
use crate::exception::{ExcKind, ExceptionObj, Unwind};
use crate::interp::Interp;
use crate::methods::FileObj;
use crate::modules;
use crate::value::{Class, DictMap, Instance, SetMap, SuperObj, TypeKind, Value, XRange};

type EvalResult = Result<Value, Unwind>;
type Kwargs = Vec<(String, Value)>;

macro_rules! builtin_fns {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Built-in functions of the ambient namespace.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum BuiltinFn {
            $($variant,)*
        }

        impl BuiltinFn {
            pub const ALL: &'static [BuiltinFn] = &[$(BuiltinFn::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(BuiltinFn::$variant => $name,)*
                }
            }
        }
    };
}

builtin_fns! {
    Abs => "abs",
    All => "all",
    Any => "any",
    Callable => "callable",
    Chr => "chr",
    Cmp => "cmp",
    DelAttr => "delattr",
    Dir => "dir",
    Divmod => "divmod",
    Enumerate => "enumerate",
    Eval => "eval",
    Exit => "exit",
    Filter => "filter",
    GetAttr => "getattr",
    Globals => "globals",
    HasAttr => "hasattr",
    Hash => "hash",
    Hex => "hex",
    Id => "id",
    Import => "__import__",
    IsInstance => "isinstance",
    IsSubclass => "issubclass",
    Len => "len",
    Locals => "locals",
    Map => "map",
    Max => "max",
    Min => "min",
    Oct => "oct",
    Open => "open",
    Ord => "ord",
    Pow => "pow",
    Quit => "quit",
    Range => "range",
    Reduce => "reduce",
    Repr => "repr",
    Reversed => "reversed",
    Round => "round",
    SetAttr => "setattr",
    Sorted => "sorted",
    Sum => "sum",
    Super => "super",
    Unichr => "unichr",
    XRange => "xrange",
    Zip => "zip",
}

/// Fail unless `args.len()` lies in `min..=max`.
pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Unwind> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let message = if min == max {
        match min {
            0 => format!("{name}() takes no arguments ({n} given)"),
            1 => format!("{name}() takes exactly one argument ({n} given)"),
            _ => format!("{name}() takes exactly {min} arguments ({n} given)"),
        }
    } else if n < min {
        format!("{name} expected at least {min} arguments, got {n}")
    } else {
        format!("{name} expected at most {max} arguments, got {n}")
    };
    Err(Unwind::type_error(message))
}

/// Remove a keyword argument by name.
pub(crate) fn take_kw(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == name)?;
    Some(kwargs.remove(pos).1)
}

/// Fail if any keyword arguments are left over.
pub(crate) fn no_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), Unwind> {
    match kwargs.first() {
        None => Ok(()),
        Some((k, _)) => Err(Unwind::type_error(format!(
            "'{k}' is an invalid keyword argument for {name}()"
        ))),
    }
}

pub(crate) fn int_arg(name: &str, v: &Value) -> Result<i64, Unwind> {
    v.as_int().ok_or_else(|| {
        Unwind::type_error(format!(
            "{name}() integer argument expected, got {}",
            v.type_name()
        ))
    })
}

/// Call a built-in function.
pub(crate) fn call(
    interp: &mut Interp,
    f: BuiltinFn,
    mut args: Vec<Value>,
    mut kwargs: Kwargs,
) -> EvalResult {
    use BuiltinFn as B;
    let name = f.name();

    // Functions that take keyword arguments handle them themselves.
    if !matches!(f, B::Sorted | B::Max | B::Min | B::Open) {
        no_kwargs(name, &kwargs)?;
    }

    match f {
        B::Sorted => sorted(interp, args, kwargs),
        B::Max | B::Min => {
            let key = take_kw(&mut kwargs, "key");
            no_kwargs(name, &kwargs)?;
            min_max(interp, f == B::Max, args, key)
        }
        B::Open => {
            let mode = take_kw(&mut kwargs, "mode");
            no_kwargs(name, &kwargs)?;
            if let Some(mode) = mode {
                args.push(mode);
            }
            open(args)
        }
        B::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(Unwind::overflow),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(x) => Ok(Value::Float(x.abs())),
                other => Err(Unwind::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        B::All | B::Any => {
            arity(name, &args, 1, 1)?;
            let want = f == B::Any;
            for item in interp.iterate(&args[0])? {
                interp.budget.tick()?;
                if item.truthy() == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        B::Callable => {
            arity(name, &args, 1, 1)?;
            let callable = match &args[0] {
                Value::Instance(inst) => inst.class.lookup("__call__").is_some(),
                other => other.is_callable(),
            };
            Ok(Value::Bool(callable))
        }
        B::Chr | B::Unichr => {
            arity(name, &args, 1, 1)?;
            let code = int_arg(name, &args[0])?;
            let (limit, shown) = if f == B::Chr {
                (256, "256")
            } else {
                (0x11_0000, "0x110000")
            };
            u32::try_from(code)
                .ok()
                .filter(|c| (*c as i64) < limit)
                .and_then(char::from_u32)
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| Unwind::value_error(format!("{name}() arg not in range({shown})")))
        }
        B::Cmp => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Int(three_way(&args[0], &args[1])))
        }
        B::Divmod => {
            arity(name, &args, 2, 2)?;
            let q = interp.binop(BinOp::FloorDiv, &args[0], &args[1])?;
            let r = interp.binop(BinOp::Mod, &args[0], &args[1])?;
            Ok(Value::tuple(vec![q, r]))
        }
        B::Enumerate => {
            arity(name, &args, 1, 2)?;
            let mut index = match args.get(1) {
                Some(v) => int_arg(name, v)?,
                None => 0,
            };
            let mut out = Vec::new();
            for item in interp.iterate(&args[0])? {
                interp.budget.tick()?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
                index += 1;
            }
            Ok(Value::list(out))
        }
        B::Eval => {
            arity(name, &args, 1, 1)?;
            let Value::Str(source) = &args[0] else {
                return Err(Unwind::type_error("eval() arg 1 must be a string"));
            };
            interp.eval_source(source)
        }
        B::Exit | B::Quit => {
            arity(name, &args, 0, 1)?;
            Err(Unwind::raise(Value::Exception(Rc::new(ExceptionObj {
                kind: ExcKind::SystemExit,
                args,
            }))))
        }
        B::Filter => {
            arity(name, &args, 2, 2)?;
            let func = args[0].clone();
            let mut kept = Vec::new();
            for item in interp.iterate(&args[1])? {
                interp.budget.tick()?;
                let keep = if func.is_none() {
                    item.truthy()
                } else {
                    interp.call(&func, vec![item.clone()], Vec::new())?.truthy()
                };
                if keep {
                    kept.push(item);
                }
            }
            Ok(match &args[1] {
                Value::Str(_) => Value::str(
                    kept.iter()
                        .filter_map(|v| v.as_str())
                        .collect::<String>(),
                ),
                Value::Tuple(_) => Value::tuple(kept),
                _ => Value::list(kept),
            })
        }
        B::GetAttr => {
            arity(name, &args, 2, 3)?;
            let attr = attr_name(name, &args[1])?;
            match args.get(2) {
                None => interp.get_attr(&args[0], &attr),
                Some(default) => Ok(interp
                    .try_attr(&args[0], &attr)?
                    .unwrap_or_else(|| default.clone())),
            }
        }
        B::SetAttr => {
            arity(name, &args, 3, 3)?;
            let attr = attr_name(name, &args[1])?;
            interp.set_attr(&args[0], &attr, args[2].clone())?;
            Ok(Value::None)
        }
        B::HasAttr => {
            arity(name, &args, 2, 2)?;
            let attr = attr_name(name, &args[1])?;
            Ok(Value::Bool(interp.try_attr(&args[0], &attr)?.is_some()))
        }
        B::DelAttr => {
            arity(name, &args, 2, 2)?;
            let attr = attr_name(name, &args[1])?;
            interp.del_attr(&args[0], &attr)?;
            Ok(Value::None)
        }
        B::Dir => {
            arity(name, &args, 0, 1)?;
            let mut names: Vec<String> = match args.first() {
                None => interp.locals_snapshot().into_iter().map(|(k, _)| k).collect(),
                Some(obj) => attribute_names(obj),
            };
            names.sort();
            names.dedup();
            Ok(Value::list(names.into_iter().map(Value::from).collect()))
        }
        B::Globals => {
            arity(name, &args, 0, 0)?;
            let vars: Vec<(String, Value)> = interp
                .globals()
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok(Value::dict_from(vars))
        }
        B::Locals => {
            arity(name, &args, 0, 0)?;
            Ok(Value::dict_from(interp.locals_snapshot()))
        }
        B::Hash => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(args[0].hash_key()?.to_hash()))
        }
        B::Hex | B::Oct => {
            arity(name, &args, 1, 1)?;
            let i = args[0].as_int().ok_or_else(|| {
                Unwind::type_error(format!("{name}() argument can't be converted to {name}"))
            })?;
            let sign = if i < 0 { "-" } else { "" };
            let text = if f == B::Hex {
                format!("{sign}0x{:x}", i.unsigned_abs())
            } else if i == 0 {
                "0".to_string()
            } else {
                format!("{sign}0{:o}", i.unsigned_abs())
            };
            Ok(Value::str(text))
        }
        B::Id => {
            arity(name, &args, 1, 1)?;
            let id = match args[0].identity() {
                Some(addr) => addr as i64,
                None => args[0].hash_key()?.to_hash(),
            };
            Ok(Value::Int(id))
        }
        B::Import => {
            arity(name, &args, 1, 5)?;
            let Value::Str(module) = &args[0] else {
                return Err(Unwind::type_error("__import__() argument 1 must be string"));
            };
            modules::import(module)
        }
        B::IsInstance => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(is_instance(&args[0], &args[1])?))
        }
        B::IsSubclass => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(is_subclass(&args[0], &args[1])?))
        }
        B::Len => {
            arity(name, &args, 1, 1)?;
            args[0]
                .len()
                .map(|n| Value::Int(n as i64))
                .ok_or_else(|| {
                    Unwind::type_error(format!(
                        "object of type '{}' has no len()",
                        args[0].type_name()
                    ))
                })
        }
        B::Map => map(interp, args),
        B::Ord => {
            arity(name, &args, 1, 1)?;
            let Value::Str(s) = &args[0] else {
                return Err(Unwind::type_error(format!(
                    "ord() expected string of length 1, but {} found",
                    args[0].type_name()
                )));
            };
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(Unwind::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        B::Pow => {
            arity(name, &args, 2, 3)?;
            match args.get(2) {
                None => interp.binop(BinOp::Pow, &args[0], &args[1]),
                Some(modulus) => modular_pow(&args[0], &args[1], modulus),
            }
        }
        B::Range => {
            arity(name, &args, 1, 3)?;
            let range = make_range(name, &args)?;
            interp.budget.check_len(range.len())?;
            Ok(Value::list(
                (0..range.len())
                    .filter_map(|i| range.get(i))
                    .map(Value::Int)
                    .collect(),
            ))
        }
        B::XRange => {
            arity(name, &args, 1, 3)?;
            Ok(Value::XRange(make_range(name, &args)?))
        }
        B::Reduce => {
            arity(name, &args, 2, 3)?;
            let func = args[0].clone();
            let mut items = interp.iterate(&args[1])?;
            let mut acc = match args.get(2) {
                Some(init) => init.clone(),
                None => items.next().ok_or_else(|| {
                    Unwind::type_error("reduce() of empty sequence with no initial value")
                })?,
            };
            for item in items {
                interp.budget.tick()?;
                acc = interp.call(&func, vec![acc, item], Vec::new())?;
            }
            Ok(acc)
        }
        B::Repr => {
            arity(name, &args, 1, 1)?;
            Ok(Value::str(interp.repr_of(&args[0])?))
        }
        B::Reversed => {
            arity(name, &args, 1, 1)?;
            let mut items = interp.collect(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        B::Round => {
            arity(name, &args, 1, 2)?;
            let x = args[0].as_float().ok_or_else(|| {
                Unwind::type_error("a float is required")
            })?;
            let digits = match args.get(1) {
                Some(v) => int_arg(name, v)?,
                None => 0,
            };
            let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float((x * scale).round() / scale))
        }
        B::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(Unwind::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in interp.iterate(&args[0])? {
                interp.budget.tick()?;
                total = interp.binop(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        B::Super => {
            arity(name, &args, 2, 2)?;
            let Value::Class(class) = &args[0] else {
                return Err(Unwind::type_error("super() argument 1 must be a class"));
            };
            Ok(Value::Super(Rc::new(SuperObj {
                class: class.clone(),
                receiver: args[1].clone(),
            })))
        }
        B::Zip => {
            let seqs = args
                .iter()
                .map(|a| interp.collect(a))
                .collect::<Result<Vec<_>, _>>()?;
            let len = seqs.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(seqs.iter().map(|s| s[i].clone()).collect()))
                    .collect(),
            ))
        }
    }
}

fn attr_name(func: &str, v: &Value) -> Result<String, Unwind> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        _ => Err(Unwind::type_error(format!(
            "{func}(): attribute name must be string"
        ))),
    }
}

/// `cmp(a, b)` as -1, 0 or 1.
pub(crate) fn three_way(a: &Value, b: &Value) -> i64 {
    if a.equals(b) {
        return 0;
    }
    match a.compare(b) {
        Ordering::Less => -1,
        Ordering::Greater => 1,
        Ordering::Equal => 0,
    }
}

fn make_range(name: &str, args: &[Value]) -> Result<XRange, Unwind> {
    let ints = args
        .iter()
        .map(|a| int_arg(name, a))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Unwind::type_error(format!("{name} expected 1 to 3 arguments"))),
    };
    if step == 0 {
        return Err(Unwind::value_error(format!("{name}() step argument must not be zero")));
    }
    Ok(XRange { start, stop, step })
}

fn modular_pow(base: &Value, exp: &Value, modulus: &Value) -> EvalResult {
    let (Some(b), Some(e), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return Err(Unwind::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if e < 0 {
        return Err(Unwind::type_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    if m == 0 {
        return Err(Unwind::value_error("pow() 3rd argument cannot be 0"));
    }
    let m128 = m as i128;
    let mut result: i128 = 1;
    let mut b = (b as i128).rem_euclid(m128.abs());
    let mut e = e;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m128.abs());
        }
        b = (b * b).rem_euclid(m128.abs());
        e >>= 1;
    }
    // Result takes the sign of the modulus.
    if m < 0 && result != 0 {
        result += m128;
    }
    Ok(Value::Int(result as i64))
}

fn map(interp: &mut Interp, args: Vec<Value>) -> EvalResult {
    if args.len() < 2 {
        return Err(Unwind::type_error("map() requires at least two args"));
    }
    let func = args[0].clone();
    let seqs = args[1..]
        .iter()
        .map(|a| interp.collect(a))
        .collect::<Result<Vec<_>, _>>()?;
    let len = seqs.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        interp.budget.tick()?;
        let row: Vec<Value> = seqs
            .iter()
            .map(|s| s.get(i).cloned().unwrap_or(Value::None))
            .collect();
        let value = if func.is_none() {
            if row.len() == 1 {
                row.into_iter().next().unwrap_or(Value::None)
            } else {
                Value::tuple(row)
            }
        } else {
            interp.call(&func, row, Vec::new())?
        };
        out.push(value);
    }
    Ok(Value::list(out))
}

fn min_max(
    interp: &mut Interp,
    want_max: bool,
    args: Vec<Value>,
    key: Option<Value>,
) -> EvalResult {
    let name = if want_max { "max" } else { "min" };
    let items = match args.len() {
        0 => {
            return Err(Unwind::type_error(format!(
                "{name} expected 1 arguments, got 0"
            )))
        }
        1 => interp.collect(&args[0])?,
        _ => args,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                let ord = k.compare(best_key);
                if want_max {
                    ord == Ordering::Greater && !k.equals(best_key)
                } else {
                    ord == Ordering::Less && !k.equals(best_key)
                }
            }
        };
        if replace {
            best = Some((k, item));
        }
    }
    best.map(|(_, v)| v)
        .ok_or_else(|| Unwind::value_error(format!("{name}() arg is an empty sequence")))
}

fn sorted(interp: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> EvalResult {
    arity("sorted", &args, 1, 1)?;
    let cmp = take_kw(&mut kwargs, "cmp");
    let key = take_kw(&mut kwargs, "key");
    let reverse = take_kw(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
    no_kwargs("sorted", &kwargs)?;
    let mut items = interp.collect(&args[0])?;
    sort_values(interp, &mut items, cmp, key, reverse)?;
    Ok(Value::list(items))
}

/// Stable sort honouring `cmp=`, `key=` and `reverse=`.
pub(crate) fn sort_values(
    interp: &mut Interp,
    items: &mut Vec<Value>,
    cmp: Option<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<(), Unwind> {
    let cmp = cmp.filter(|v| !v.is_none());
    let key = key.filter(|v| !v.is_none());

    let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let k = match &key {
            Some(f) => interp.call(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        keyed.push((k, item));
    }

    let mut compare = |a: &Value, b: &Value| -> Result<Ordering, Unwind> {
        interp.budget.tick()?;
        match &cmp {
            Some(f) => {
                let r = interp.call(f, vec![a.clone(), b.clone()], Vec::new())?;
                let n = r.as_int().ok_or_else(|| {
                    Unwind::type_error("comparison function must return int")
                })?;
                Ok(n.cmp(&0))
            }
            None => Ok(if a.equals(b) {
                Ordering::Equal
            } else {
                a.compare(b)
            }),
        }
    };

    let sorted = merge_sort(keyed, &mut |x, y| {
        let ord = compare(&x.0, &y.0)?;
        Ok(if reverse { ord.reverse() } else { ord })
    })?;
    items.extend(sorted.into_iter().map(|(_, v)| v));
    Ok(())
}

/// Stable merge sort with a fallible comparator.
fn merge_sort<T, F>(mut items: Vec<T>, cmp: &mut F) -> Result<Vec<T>, Unwind>
where
    F: FnMut(&T, &T) -> Result<Ordering, Unwind>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, cmp)?;
    let right = merge_sort(right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(r, l)? == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    Ok(out)
}

fn open(args: Vec<Value>) -> EvalResult {
    arity("open", &args, 1, 2)?;
    let Value::Str(path) = &args[0] else {
        return Err(Unwind::type_error("coercing to Unicode: need string"));
    };
    let mode = match args.get(1) {
        Some(Value::Str(m)) => m.to_string(),
        Some(_) => return Err(Unwind::type_error("open() mode must be a string")),
        None => "r".to_string(),
    };
    FileObj::open(path, &mode).map(|f| Value::File(Rc::new(std::cell::RefCell::new(f))))
}

/// The value `type(v)` returns.
pub(crate) fn type_of(v: &Value) -> Value {
    match v {
        Value::Instance(inst) => Value::Class(inst.class.clone()),
        Value::Exception(e) => Value::ExcClass(e.kind),
        other => Value::Type(other.type_kind().unwrap_or(TypeKind::Object)),
    }
}

/// `isinstance(obj, classinfo)`.
pub(crate) fn is_instance(obj: &Value, classinfo: &Value) -> Result<bool, Unwind> {
    Ok(match classinfo {
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(obj, option)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Type(TypeKind::Object) => true,
        Value::Type(TypeKind::Int) => matches!(obj, Value::Int(_) | Value::Bool(_)),
        Value::Type(kind) => obj.type_kind() == Some(*kind),
        Value::ExcClass(kind) => match obj {
            Value::Exception(e) => e.kind.is_subclass_of(*kind),
            Value::Instance(inst) => inst
                .class
                .exception_base()
                .is_some_and(|base| base.is_subclass_of(*kind)),
            _ => false,
        },
        Value::Class(class) => match obj {
            Value::Instance(inst) => inst.class.is_subclass_of(class),
            _ => false,
        },
        _ => {
            return Err(Unwind::type_error(
                "isinstance() arg 2 must be a class, type, or tuple of classes and types",
            ))
        }
    })
}

/// `issubclass(cls, classinfo)`.
pub(crate) fn is_subclass(cls: &Value, classinfo: &Value) -> Result<bool, Unwind> {
    if let Value::Tuple(options) = classinfo {
        for option in options.iter() {
            if is_subclass(cls, option)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(match (cls, classinfo) {
        (Value::Class(_) | Value::ExcClass(_) | Value::Type(_), Value::Type(TypeKind::Object)) => {
            true
        }
        (Value::Class(a), Value::Class(b)) => a.is_subclass_of(b),
        (Value::Class(a), Value::ExcClass(k)) => {
            a.exception_base().is_some_and(|base| base.is_subclass_of(*k))
        }
        (Value::ExcClass(a), Value::ExcClass(b)) => a.is_subclass_of(*b),
        (Value::Type(a), Value::Type(b)) => a == b || (*a == TypeKind::Bool && *b == TypeKind::Int),
        (Value::Class(_) | Value::ExcClass(_) | Value::Type(_), _) => false,
        _ => {
            return Err(Unwind::type_error(
                "issubclass() arg 1 must be a class",
            ))
        }
    })
}

/// Attribute names reported by `dir(obj)`.
fn attribute_names(obj: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    match obj {
        Value::Instance(inst) => {
            names.extend(inst.attrs.borrow().keys().cloned());
            for class in inst.class.mro() {
                names.extend(class.attrs.borrow().keys().cloned());
            }
        }
        Value::Class(class) => {
            for c in class.mro() {
                names.extend(c.attrs.borrow().keys().cloned());
            }
        }
        Value::Module(m) => names.extend(m.attrs.keys().map(|k| k.to_string())),
        other => names.extend(
            crate::methods::method_names(other)
                .iter()
                .map(|s| s.to_string()),
        ),
    }
    names
}

/// Call a built-in type as a constructor.
pub(crate) fn construct(
    interp: &mut Interp,
    kind: TypeKind,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> EvalResult {
    let name = kind.name();
    if kind != TypeKind::Dict {
        no_kwargs(name, &kwargs)?;
    }
    match kind {
        TypeKind::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        TypeKind::Int => {
            arity(name, &args, 0, 2)?;
            match (args.first(), args.get(1)) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => {
                    let base = match base {
                        Some(b) => int_arg(name, b)?,
                        None => 10,
                    };
                    parse_int(s, base).map(Value::Int)
                }
                (Some(_), Some(_)) => Err(Unwind::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(Value::Int(i)), None) => Ok(Value::Int(*i)),
                (Some(Value::Bool(b)), None) => Ok(Value::Int(*b as i64)),
                (Some(Value::Float(f)), None) => float_to_int(*f).map(Value::Int),
                (Some(other), None) => Err(Unwind::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        TypeKind::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => v.as_float().map(Value::Float).ok_or_else(|| {
                    Unwind::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        TypeKind::Str => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::str("")),
                Some(v @ Value::Str(_)) => Ok(v.clone()),
                Some(v) => Ok(Value::str(interp.str_of(v)?)),
            }
        }
        TypeKind::List => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(v) => Ok(Value::list(interp.collect(v)?)),
            }
        }
        TypeKind::Tuple => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(v @ Value::Tuple(_)) => Ok(v.clone()),
                Some(v) => Ok(Value::tuple(interp.collect(v)?)),
            }
        }
        TypeKind::Dict => {
            arity(name, &args, 0, 1)?;
            let mut map = DictMap::new();
            if let Some(source) = args.first() {
                fill_dict(interp, &mut map, source)?;
            }
            for (k, v) in kwargs.drain(..) {
                let key = Value::from(k);
                map.insert(key.hash_key()?, (key, v));
            }
            Ok(Value::dict(map))
        }
        TypeKind::Set | TypeKind::FrozenSet => {
            arity(name, &args, 0, 1)?;
            let mut map = SetMap::new();
            if let Some(source) = args.first() {
                for item in interp.iterate(source)? {
                    map.insert(item.hash_key()?, item);
                }
            }
            Ok(if kind == TypeKind::Set {
                Value::set(map)
            } else {
                Value::FrozenSet(Rc::new(map))
            })
        }
        TypeKind::Object => {
            arity(name, &args, 0, 0)?;
            Ok(Value::Instance(Rc::new(Instance {
                class: Rc::new(Class {
                    name: "object".to_string(),
                    bases: Vec::new(),
                    attrs: Default::default(),
                }),
                attrs: Default::default(),
            })))
        }
        TypeKind::Type => {
            arity(name, &args, 1, 1)?;
            Ok(type_of(&args[0]))
        }
        other => Err(Unwind::type_error(format!(
            "cannot create '{}' instances",
            other.name()
        ))),
    }
}

/// Fill a dict from a mapping or an iterable of pairs.
pub(crate) fn fill_dict(
    interp: &mut Interp,
    map: &mut DictMap,
    source: &Value,
) -> Result<(), Unwind> {
    if let Value::Dict(other) = source {
        let entries: Vec<_> = other.borrow().iter().map(|(k, e)| (k.clone(), e.clone())).collect();
        map.extend(entries);
        return Ok(());
    }
    for (i, pair) in interp.collect(source)?.into_iter().enumerate() {
        let items = interp.collect(&pair).map_err(|_| {
            Unwind::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [k, v]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
            Unwind::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        map.insert(k.hash_key()?, (k, v));
    }
    Ok(())
}

fn float_to_int(f: f64) -> Result<i64, Unwind> {
    if f.is_nan() {
        return Err(Unwind::value_error("cannot convert float NaN to integer"));
    }
    let t = f.trunc();
    if t.is_infinite() || t.abs() >= 9.223_372_036_854_775_807e18 {
        return Err(Unwind::overflow());
    }
    Ok(t as i64)
}

pub(crate) fn parse_int(text: &str, base: i64) -> Result<i64, Unwind> {
    let invalid = || {
        Unwind::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr_basic()
        ))
    };
    if !(base == 0 || (2..=36).contains(&base)) {
        return Err(Unwind::value_error("int() base must be >= 2 and <= 36"));
    }
    let s = text.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = match base {
        0 | 16 if lower.starts_with("0x") => (16, &digits[2..]),
        0 | 8 if lower.starts_with("0o") => (8, &digits[2..]),
        0 | 2 if lower.starts_with("0b") => (2, &digits[2..]),
        0 if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
        0 => (10, digits),
        b => (b as u32, digits),
    };
    let body = body.strip_suffix(['l', 'L']).unwrap_or(body);
    if body.is_empty() {
        return Err(invalid());
    }
    let magnitude = i128::from_str_radix(body, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| Unwind::overflow())
}

pub(crate) fn parse_float(text: &str) -> Result<f64, Unwind> {
    let s = text.trim();
    match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => return Ok(f64::INFINITY),
        "-inf" | "-infinity" => return Ok(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => return Ok(f64::NAN),
        _ => {}
    }
    s.parse::<f64>().map_err(|_| {
        Unwind::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr_basic()
        ))
    })
}

/// Turn a fatal guard call into the error the host sees.
pub(crate) fn denied(name: &str) -> Unwind {
    tracing::warn!(builtin = name, "restricted script called a denied built-in");
    Unwind::fatal(SafeError::RunBuiltin {
        name: name.to_string(),
    })
}

/// Turn a keyword list into a dict value (for `**kwargs` parameters).
pub(crate) fn kwargs_dict(kwargs: IndexMap<String, Value>) -> Value {
    Value::dict_from(kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = BuiltinFn::ALL.iter().map(|f| f.name()).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn parse_int_bases() {
        assert_eq!(parse_int(" 42 ", 10).ok(), Some(42));
        assert_eq!(parse_int("-ff", 16).ok(), Some(-255));
        assert_eq!(parse_int("0x10", 0).ok(), Some(16));
        assert_eq!(parse_int("010", 0).ok(), Some(8));
        assert_eq!(parse_int("12L", 10).ok(), Some(12));
        assert!(parse_int("abc", 10).is_err());
        assert!(parse_int("99999999999999999999", 10).is_err());
    }

    #[test]
    fn parse_float_specials() {
        assert_eq!(parse_float("2.5").ok(), Some(2.5));
        assert!(parse_float("inf").ok().is_some_and(f64::is_infinite));
        assert!(parse_float("x").is_err());
    }

    #[test]
    fn modular_pow_matches_naive() {
        let r = modular_pow(&Value::Int(3), &Value::Int(200), &Value::Int(13));
        assert_eq!(r.ok().and_then(|v| v.as_int()), Some(9));
        let r = modular_pow(&Value::Int(2), &Value::Int(5), &Value::Int(-3));
        // 32 % -3 == -1
        assert_eq!(r.ok().and_then(|v| v.as_int()), Some(-1));
    }

    #[test]
    fn isinstance_rules() {
        assert!(is_instance(&Value::Bool(true), &Value::Type(TypeKind::Int)).unwrap_or(false));
        assert!(!is_instance(&Value::Int(1), &Value::Type(TypeKind::Str)).unwrap_or(true));
        let err = Value::Exception(Rc::new(ExceptionObj {
            kind: ExcKind::KeyError,
            args: Vec::new(),
        }));
        assert!(is_instance(&err, &Value::ExcClass(ExcKind::LookupError)).unwrap_or(false));
        assert!(is_instance(&Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn merge_sort_is_stable() {
        let items = vec![(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        let sorted = merge_sort(items, &mut |x: &(i32, char), y: &(i32, char)| Ok(x.0.cmp(&y.0)));
        let sorted = sorted.ok().unwrap_or_default();
        assert_eq!(sorted, vec![(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]);
    }
}
