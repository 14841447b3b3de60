//! Native methods of built-in values and the `file` object.

use std::fs;
use std::io::{self, Write as _};
use std::rc::Rc;

use crate::builtins::{arity, fill_dict, int_arg, no_kwargs, sort_values, take_kw};
use crate::exception::{ExcKind, ExceptionObj, Unwind};
use crate::format;
use crate::interp::Interp;
use crate::value::{DictMap, SetMap, Value};

type EvalResult = Result<Value, Unwind>;
type Kwargs = Vec<(String, Value)>;

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "decode", "encode", "endswith", "expandtabs", "find",
    "format", "index", "isalnum", "isalpha", "isdigit", "islower", "isspace", "istitle",
    "isupper", "join", "ljust", "lower", "lstrip", "partition", "replace", "rfind", "rindex",
    "rjust", "rpartition", "rsplit", "rstrip", "split", "splitlines", "startswith", "strip",
    "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "has_key", "items", "iteritems", "iterkeys", "itervalues", "keys",
    "pop", "popitem", "setdefault", "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "issubset", "issuperset", "pop", "remove", "symmetric_difference",
    "union", "update",
];

const FROZENSET_METHODS: &[&str] = &[
    "copy", "difference", "intersection", "issubset", "issuperset", "symmetric_difference",
    "union",
];

const FILE_METHODS: &[&str] = &[
    "close", "flush", "read", "readline", "readlines", "write", "writelines",
];

/// Names of the native methods a value has.
pub(crate) fn method_names(v: &Value) -> &'static [&'static str] {
    match v {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::FrozenSet(_) => FROZENSET_METHODS,
        Value::File(_) => FILE_METHODS,
        _ => &[],
    }
}

/// The interned name of `name` if `v` has such a method.
pub(crate) fn lookup(v: &Value, name: &str) -> Option<&'static str> {
    method_names(v).iter().copied().find(|m| *m == name)
}

/// Resolve Python-style `[lower:upper]` bounds against a length.
pub(crate) fn clamp_range(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let fix = |i: i64| -> usize {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len) as usize
    };
    let lo = lower.map_or(0, fix);
    let hi = upper.map_or(len as usize, fix);
    (lo, hi.max(lo))
}

/// Resolve a single index, allowing negatives.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let i = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&i).then_some(i as usize)
}

fn opt_int(name: &str, v: Option<&Value>) -> Result<Option<i64>, Unwind> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => int_arg(name, v).map(Some),
    }
}

fn str_arg<'v>(name: &str, v: &'v Value) -> Result<&'v str, Unwind> {
    v.as_str().ok_or_else(|| {
        Unwind::type_error(format!(
            "{name}() argument must be str, not {}",
            v.type_name()
        ))
    })
}

/// Call the native method `name` on `receiver`.
pub(crate) fn call(
    interp: &mut Interp,
    receiver: &Value,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> EvalResult {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(_) => list_method(interp, receiver, name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(name, &kwargs)?;
            seq_method(name, items, &args)
        }
        Value::Dict(_) => dict_method(interp, receiver, name, args, kwargs),
        Value::Set(_) | Value::FrozenSet(_) => {
            no_kwargs(name, &kwargs)?;
            set_method(interp, receiver, name, args)
        }
        Value::File(file) => {
            no_kwargs(name, &kwargs)?;
            file_method(interp, &mut file.borrow_mut(), name, args)
        }
        other => Err(Unwind::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

// --- str -------------------------------------------------------------------

/// Char-index window of `s` selected by optional start/end arguments.
fn window<'s>(name: &str, s: &'s str, args: &[Value]) -> Result<(&'s str, usize), Unwind> {
    let len = s.chars().count();
    let (lo, hi) = clamp_range(len, opt_int(name, args.first())?, opt_int(name, args.get(1))?);
    let start = byte_offset(s, lo);
    let end = byte_offset(s, hi);
    Ok((&s[start..end], lo))
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

fn char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

fn pad(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let total = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, total),
        '>' => (total, 0),
        _ => {
            // Odd widths put the extra fill on the left.
            let left = total / 2 + (total & width as usize & 1);
            (left, total - left)
        }
    };
    let fill_n = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    format!("{}{s}{}", fill_n(left), fill_n(right))
}

fn fill_char(name: &str, v: Option<&Value>) -> Result<char, Unwind> {
    match v {
        None => Ok(' '),
        Some(v) => {
            let s = str_arg(name, v)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(Unwind::type_error(
                    "must be char, not str",
                )),
            }
        }
    }
}

fn strip_chars<'s>(
    s: &'s str,
    chars: Option<&Value>,
    left: bool,
    right: bool,
) -> Result<&'s str, Unwind> {
    let set: Option<Vec<char>> = match chars {
        None | Some(Value::None) => None,
        Some(v) => Some(str_arg("strip", v)?.chars().collect()),
    };
    let pred = |c: char| match &set {
        None => c.is_whitespace(),
        Some(set) => set.contains(&c),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(pred);
    }
    if right {
        out = out.trim_end_matches(pred);
    }
    Ok(out)
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| parts.len() >= m) {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(Value::str(&rest[..i]));
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn rsplit_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| parts.len() >= m) {
            parts.push(Value::str(rest));
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                parts.push(Value::str(&rest[i + ws_len..]));
                rest = rest[..i].trim_end();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts.reverse();
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

fn str_method(
    interp: &mut Interp,
    s: &Rc<str>,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> EvalResult {
    if name == "format" {
        let max_len = interp.budget.limits().max_sequence_len;
        let mut convert = |v: &Value, repr: bool| {
            if repr {
                interp.repr_of(v)
            } else {
                interp.str_of(v)
            }
        };
        let text = format::brace_format(s, &args, &kwargs, max_len, &mut convert)?;
        interp.budget.check_len(text.len())?;
        return Ok(Value::str(text));
    }
    no_kwargs(name, &kwargs)?;

    let result = match name {
        "capitalize" => {
            arity(name, &args, 0, 0)?;
            let mut chars = s.chars();
            let text = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            };
            Value::str(text)
        }
        "center" | "ljust" | "rjust" => {
            arity(name, &args, 1, 2)?;
            let width = int_arg(name, &args[0])?;
            interp.budget.check_len(width.max(0) as usize)?;
            let fill = fill_char(name, args.get(1))?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Value::str(pad(s, width, fill, align))
        }
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = int_arg(name, &args[0])?;
            interp.budget.check_len(width.max(0) as usize)?;
            let len = s.chars().count() as i64;
            if width <= len {
                Value::Str(s.clone())
            } else {
                let zeros = "0".repeat((width - len) as usize);
                let text = match s.strip_prefix(['-', '+']) {
                    Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
                    None => format!("{zeros}{s}"),
                };
                Value::str(text)
            }
        }
        "count" => {
            arity(name, &args, 1, 3)?;
            let sub = str_arg(name, &args[0])?;
            let (hay, _) = window(name, s, &args[1..])?;
            let n = if sub.is_empty() {
                hay.chars().count() + 1
            } else {
                hay.matches(sub).count()
            };
            Value::Int(n as i64)
        }
        "decode" | "encode" => {
            arity(name, &args, 0, 2)?;
            Value::Str(s.clone())
        }
        "endswith" | "startswith" => {
            arity(name, &args, 1, 3)?;
            let (hay, _) = window(name, s, &args[1..])?;
            let candidates: Vec<Value> = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = str_arg(name, c)?;
                if (name == "endswith" && hay.ends_with(c))
                    || (name == "startswith" && hay.starts_with(c))
                {
                    hit = true;
                    break;
                }
            }
            Value::Bool(hit)
        }
        "expandtabs" => {
            arity(name, &args, 0, 1)?;
            let size = opt_int(name, args.first())?.unwrap_or(8).max(0) as usize;
            let mut out = String::new();
            let mut col = 0usize;
            for c in s.chars() {
                match c {
                    '\t' if size > 0 => {
                        let n = size - col % size;
                        out.push_str(&" ".repeat(n));
                        col += n;
                    }
                    '\t' => {}
                    '\n' | '\r' => {
                        out.push(c);
                        col = 0;
                    }
                    _ => {
                        out.push(c);
                        col += 1;
                    }
                }
            }
            interp.budget.check_len(out.len())?;
            Value::str(out)
        }
        "find" | "index" | "rfind" | "rindex" => {
            arity(name, &args, 1, 3)?;
            let sub = str_arg(name, &args[0])?;
            let (hay, offset) = window(name, s, &args[1..])?;
            let found = if name.starts_with('r') {
                hay.rfind(sub)
            } else {
                hay.find(sub)
            };
            match found {
                Some(byte) => Value::Int((offset + char_index(hay, byte)) as i64),
                None if name.ends_with("index") => {
                    return Err(Unwind::value_error("substring not found"))
                }
                None => Value::Int(-1),
            }
        }
        "isalnum" | "isalpha" | "isdigit" | "isspace" => {
            arity(name, &args, 0, 0)?;
            let pred: fn(char) -> bool = match name {
                "isalnum" => char::is_alphanumeric,
                "isalpha" => char::is_alphabetic,
                "isdigit" => |c| c.is_ascii_digit(),
                _ => char::is_whitespace,
            };
            Value::Bool(!s.is_empty() && s.chars().all(pred))
        }
        "islower" | "isupper" => {
            arity(name, &args, 0, 0)?;
            let mut cased = false;
            let mut ok = true;
            for c in s.chars() {
                if c.is_lowercase() {
                    cased = true;
                    ok &= name == "islower";
                } else if c.is_uppercase() {
                    cased = true;
                    ok &= name == "isupper";
                }
            }
            Value::Bool(cased && ok)
        }
        "istitle" => {
            arity(name, &args, 0, 0)?;
            Value::Bool(s.chars().any(char::is_alphabetic) && title_case(s) == **s)
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = interp.collect(&args[0])?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(s);
                }
                let part = item.as_str().ok_or_else(|| {
                    Unwind::type_error(format!(
                        "sequence item {i}: expected string, {} found",
                        item.type_name()
                    ))
                })?;
                out.push_str(part);
                interp.budget.check_len(out.len())?;
            }
            Value::str(out)
        }
        "lower" => Value::str(s.to_lowercase()),
        "upper" => Value::str(s.to_uppercase()),
        "swapcase" => Value::str(
            s.chars()
                .flat_map(|c| -> Vec<char> {
                    if c.is_uppercase() {
                        c.to_lowercase().collect()
                    } else {
                        c.to_uppercase().collect()
                    }
                })
                .collect::<String>(),
        ),
        "title" => Value::str(title_case(s)),
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let left = name != "rstrip";
            let right = name != "lstrip";
            Value::str(strip_chars(s, args.first(), left, right)?)
        }
        "partition" | "rpartition" => {
            arity(name, &args, 1, 1)?;
            let sep = str_arg(name, &args[0])?;
            if sep.is_empty() {
                return Err(Unwind::value_error("empty separator"));
            }
            let found = if name == "partition" { s.find(sep) } else { s.rfind(sep) };
            let parts = match found {
                Some(i) => [&s[..i], sep, &s[i + sep.len()..]],
                None if name == "partition" => [&s[..], "", ""],
                None => ["", "", &s[..]],
            };
            Value::tuple(parts.iter().map(|p| Value::str(*p)).collect())
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let count = opt_int(name, args.get(2))?.filter(|n| *n >= 0);
            let text = match count {
                Some(n) => s.replacen(old, new, n as usize),
                None => s.replace(old, new),
            };
            interp.budget.check_len(text.len())?;
            Value::str(text)
        }
        "split" | "rsplit" => {
            arity(name, &args, 0, 2)?;
            let maxsplit = opt_int(name, args.get(1))?
                .filter(|n| *n >= 0)
                .map(|n| n as usize);
            let parts = match args.first() {
                None | Some(Value::None) => {
                    if name == "split" {
                        split_whitespace(s, maxsplit)
                    } else {
                        rsplit_whitespace(s, maxsplit)
                    }
                }
                Some(sep) => {
                    let sep = str_arg(name, sep)?;
                    if sep.is_empty() {
                        return Err(Unwind::value_error("empty separator"));
                    }
                    match (name, maxsplit) {
                        ("split", Some(m)) => s.splitn(m + 1, sep).map(Value::str).collect(),
                        ("split", None) => s.split(sep).map(Value::str).collect(),
                        (_, Some(m)) => {
                            let mut parts: Vec<Value> =
                                s.rsplitn(m + 1, sep).map(Value::str).collect();
                            parts.reverse();
                            parts
                        }
                        (_, None) => s.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Value::list(parts)
        }
        "splitlines" => {
            arity(name, &args, 0, 1)?;
            let keep = args.first().is_some_and(Value::truthy);
            let mut parts = Vec::new();
            let mut rest: &str = s;
            while !rest.is_empty() {
                match rest.find(['\n', '\r']) {
                    Some(i) => {
                        let end = if rest[i..].starts_with("\r\n") { i + 2 } else { i + 1 };
                        parts.push(Value::str(if keep { &rest[..end] } else { &rest[..i] }));
                        rest = &rest[end..];
                    }
                    None => {
                        parts.push(Value::str(rest));
                        break;
                    }
                }
            }
            Value::list(parts)
        }
        _ => return Err(no_method("str", name)),
    };
    Ok(result)
}

fn no_method(type_name: &str, name: &str) -> Unwind {
    Unwind::attribute_error(format!("'{type_name}' object has no attribute '{name}'"))
}

// --- list and tuple --------------------------------------------------------

fn seq_method(name: &str, items: &[Value], args: &[Value]) -> EvalResult {
    match name {
        "count" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(items.iter().filter(|v| v.equals(&args[0])).count() as i64))
        }
        "index" => {
            arity(name, args, 1, 3)?;
            let (lo, hi) = clamp_range(
                items.len(),
                opt_int(name, args.get(1))?,
                opt_int(name, args.get(2))?,
            );
            items[lo..hi]
                .iter()
                .position(|v| v.equals(&args[0]))
                .map(|i| Value::Int((lo + i) as i64))
                .ok_or_else(|| {
                    Unwind::value_error(format!("{} is not in list", args[0].repr_basic()))
                })
        }
        _ => Err(no_method("tuple", name)),
    }
}

fn list_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &'static str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> EvalResult {
    let Value::List(list) = receiver else {
        return Err(no_method(receiver.type_name(), name));
    };
    if name == "sort" {
        arity(name, &args, 0, 3)?;
        let mut args = args.into_iter();
        let cmp = take_kw(&mut kwargs, "cmp").or_else(|| args.next());
        let key = take_kw(&mut kwargs, "key").or_else(|| args.next());
        let reverse = take_kw(&mut kwargs, "reverse")
            .or_else(|| args.next())
            .is_some_and(|v| v.truthy());
        no_kwargs(name, &kwargs)?;
        // Sort a copy so callbacks that touch the list see it unchanged.
        let mut items = list.borrow().clone();
        sort_values(interp, &mut items, cmp, key, reverse)?;
        *list.borrow_mut() = items;
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;

    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            interp.budget.check_len(list.borrow().len() + 1)?;
            list.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.collect(&args[0])?;
            interp.budget.check_len(list.borrow().len() + extra.len())?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let len = list.borrow().len();
            let index = int_arg(name, &args[0])?;
            let (at, _) = clamp_range(len, Some(index), None);
            interp.budget.check_len(len + 1)?;
            list.borrow_mut().insert(at, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let len = list.borrow().len();
            if len == 0 {
                return Err(Unwind::index_error("pop from empty list"));
            }
            let index = opt_int(name, args.first())?.unwrap_or(-1);
            let at = resolve_index(len, index)
                .ok_or_else(|| Unwind::index_error("pop index out of range"))?;
            Ok(list.borrow_mut().remove(at))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let pos = list.borrow().iter().position(|v| v.equals(&args[0]));
            match pos {
                Some(i) => {
                    list.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(Unwind::value_error("list.remove(x): x not in list")),
            }
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            seq_method(name, &items, &args)
        }
        _ => Err(no_method("list", name)),
    }
}

// --- dict ------------------------------------------------------------------

fn dict_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> EvalResult {
    let Value::Dict(map) = receiver else {
        return Err(no_method(receiver.type_name(), name));
    };
    if name == "update" {
        arity(name, &args, 0, 1)?;
        let mut staged = DictMap::new();
        if let Some(source) = args.first() {
            fill_dict(interp, &mut staged, source)?;
        }
        for (k, v) in kwargs {
            let key = Value::from(k);
            staged.insert(key.hash_key()?, (key, v));
        }
        map.borrow_mut().extend(staged);
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;

    match name {
        "clear" => {
            arity(name, &args, 0, 0)?;
            map.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::dict(map.borrow().clone()))
        }
        "get" => {
            arity(name, &args, 1, 2)?;
            let key = args[0].hash_key()?;
            Ok(map
                .borrow()
                .get(&key)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "has_key" => {
            arity(name, &args, 1, 1)?;
            let key = args[0].hash_key()?;
            Ok(Value::Bool(map.borrow().contains_key(&key)))
        }
        "items" | "iteritems" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(
                map.borrow()
                    .values()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "keys" | "iterkeys" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(map.borrow().values().map(|(k, _)| k.clone()).collect()))
        }
        "values" | "itervalues" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(map.borrow().values().map(|(_, v)| v.clone()).collect()))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let key = args[0].hash_key()?;
            let removed = map.borrow_mut().shift_remove(&key);
            match (removed, args.get(1)) {
                (Some((_, v)), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Unwind::key_error(args[0].clone())),
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = map.borrow_mut().pop();
            match last {
                Some((_, (k, v))) => Ok(Value::tuple(vec![k, v])),
                None => Err(Unwind::exc(ExcKind::KeyError, "popitem(): dictionary is empty")),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let key = args[0].hash_key()?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let mut map = map.borrow_mut();
            let entry = map.entry(key).or_insert_with(|| (args[0].clone(), default));
            Ok(entry.1.clone())
        }
        _ => Err(no_method("dict", name)),
    }
}

// --- set and frozenset -----------------------------------------------------

fn set_items(v: &Value) -> Option<SetMap> {
    match v {
        Value::Set(s) => Some(s.borrow().clone()),
        Value::FrozenSet(s) => Some((**s).clone()),
        _ => None,
    }
}

fn to_set(interp: &mut Interp, v: &Value) -> Result<SetMap, Unwind> {
    if let Some(items) = set_items(v) {
        return Ok(items);
    }
    let mut out = SetMap::new();
    for item in interp.iterate(v)? {
        out.insert(item.hash_key()?, item);
    }
    Ok(out)
}

/// Apply a binary set operation. Shared with the `|`, `&`, `-`, `^`
/// operators.
pub(crate) fn set_op(op: &str, a: &SetMap, b: &SetMap) -> SetMap {
    match op {
        "union" => {
            let mut out = a.clone();
            for (k, v) in b {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
            out
        }
        "intersection" => a
            .iter()
            .filter(|(k, _)| b.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        "difference" => a
            .iter()
            .filter(|(k, _)| !b.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => {
            let mut out = set_op("difference", a, b);
            out.extend(set_op("difference", b, a));
            out
        }
    }
}

fn wrap_like(receiver: &Value, items: SetMap) -> Value {
    match receiver {
        Value::FrozenSet(_) => Value::FrozenSet(Rc::new(items)),
        _ => Value::set(items),
    }
}

fn set_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &'static str,
    args: Vec<Value>,
) -> EvalResult {
    let current = set_items(receiver).unwrap_or_default();
    match name {
        "copy" => {
            arity(name, &args, 0, 0)?;
            return Ok(wrap_like(receiver, current));
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let mut acc = current;
            for other in &args {
                let other = to_set(interp, other)?;
                acc = set_op(name, &acc, &other);
            }
            return Ok(wrap_like(receiver, acc));
        }
        "issubset" | "issuperset" => {
            arity(name, &args, 1, 1)?;
            let other = to_set(interp, &args[0])?;
            let (small, big) = if name == "issubset" {
                (&current, &other)
            } else {
                (&other, &current)
            };
            return Ok(Value::Bool(small.keys().all(|k| big.contains_key(k))));
        }
        _ => {}
    }

    let Value::Set(set) = receiver else {
        return Err(no_method(receiver.type_name(), name));
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            let key = args[0].hash_key()?;
            set.borrow_mut().insert(key, args[0].clone());
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            set.borrow_mut().clear();
        }
        "discard" | "remove" => {
            arity(name, &args, 1, 1)?;
            let key = args[0].hash_key()?;
            let removed = set.borrow_mut().shift_remove(&key);
            if removed.is_none() && name == "remove" {
                return Err(Unwind::key_error(args[0].clone()));
            }
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            let first = set.borrow_mut().shift_remove_index(0);
            return first
                .map(|(_, v)| v)
                .ok_or_else(|| Unwind::exc(ExcKind::KeyError, "pop from an empty set"));
        }
        "update" | "difference_update" | "intersection_update" => {
            let mut acc = current;
            let op = match name {
                "update" => "union",
                "difference_update" => "difference",
                _ => "intersection",
            };
            for other in &args {
                let other = to_set(interp, other)?;
                acc = set_op(op, &acc, &other);
            }
            *set.borrow_mut() = acc;
        }
        _ => return Err(no_method("set", name)),
    }
    Ok(Value::None)
}

// --- file ------------------------------------------------------------------

/// An open file.
///
/// Reads load the whole file on open; writes go straight to the handle.
#[derive(Debug)]
pub struct FileObj {
    pub path: String,
    pub mode: String,
    pub closed: bool,
    content: String,
    pos: usize,
    handle: Option<fs::File>,
}

fn io_error(err: &io::Error, path: &str) -> Unwind {
    let errno = err.raw_os_error().unwrap_or(0);
    let reason = match err.kind() {
        io::ErrorKind::NotFound => "No such file or directory".to_string(),
        io::ErrorKind::PermissionDenied => "Permission denied".to_string(),
        _ => err.to_string(),
    };
    Unwind::raise(Value::Exception(Rc::new(ExceptionObj {
        kind: ExcKind::IOError,
        args: vec![
            Value::Int(errno as i64),
            Value::str(reason),
            Value::str(path),
        ],
    })))
}

impl FileObj {
    pub(crate) fn open(path: &str, mode: &str) -> Result<Self, Unwind> {
        let base = mode.trim_end_matches(['b', 't', 'U']);
        let plus = base.contains('+');
        let mut options = fs::OpenOptions::new();
        let (readable, writable) = match base.chars().next() {
            Some('r') | None => {
                options.read(true).write(plus);
                (true, plus)
            }
            Some('w') => {
                options.write(true).create(true).truncate(true).read(plus);
                (plus, true)
            }
            Some('a') => {
                options.append(true).create(true).read(plus);
                (plus, true)
            }
            Some(_) => {
                return Err(Unwind::value_error(format!(
                    "mode string must begin with one of 'r', 'w', 'a' or 'U', not '{mode}'"
                )))
            }
        };
        tracing::debug!(path, mode, "script opened a file");
        let mut handle = options.open(path).map_err(|e| io_error(&e, path))?;
        let content = if readable && !base.starts_with('w') {
            let mut text = String::new();
            io::Read::read_to_string(&mut handle, &mut text).map_err(|e| io_error(&e, path))?;
            text
        } else {
            String::new()
        };
        Ok(Self {
            path: path.to_string(),
            mode: mode.to_string(),
            closed: false,
            content,
            pos: 0,
            handle: writable.then_some(handle),
        })
    }

    fn ensure_open(&self) -> Result<(), Unwind> {
        if self.closed {
            return Err(Unwind::value_error("I/O operation on closed file"));
        }
        Ok(())
    }

    fn read_line(&mut self) -> String {
        let rest = &self.content[self.pos..];
        let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
        let line = rest[..end].to_string();
        self.pos += end;
        line
    }

    fn write_text(&mut self, text: &str) -> Result<(), Unwind> {
        let path = self.path.clone();
        match &mut self.handle {
            Some(handle) => handle
                .write_all(text.as_bytes())
                .map_err(|e| io_error(&e, &path)),
            None => Err(Unwind::exc(ExcKind::IOError, "File not open for writing")),
        }
    }
}

fn file_method(
    interp: &mut Interp,
    file: &mut FileObj,
    name: &'static str,
    args: Vec<Value>,
) -> EvalResult {
    if name == "close" {
        arity(name, &args, 0, 0)?;
        file.closed = true;
        file.handle = None;
        return Ok(Value::None);
    }
    file.ensure_open()?;
    match name {
        "flush" => {
            arity(name, &args, 0, 0)?;
            let path = file.path.clone();
            if let Some(handle) = &mut file.handle {
                handle.flush().map_err(|e| io_error(&e, &path))?;
            }
            Ok(Value::None)
        }
        "read" => {
            arity(name, &args, 0, 1)?;
            let rest = &file.content[file.pos..];
            let n = opt_int(name, args.first())?.filter(|n| *n >= 0);
            let end = match n {
                Some(n) => byte_offset(rest, n as usize),
                None => rest.len(),
            };
            let text = rest[..end].to_string();
            file.pos += end;
            Ok(Value::str(text))
        }
        "readline" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::str(file.read_line()))
        }
        "readlines" => {
            arity(name, &args, 0, 0)?;
            let mut lines = Vec::new();
            while file.pos < file.content.len() {
                interp.budget.tick()?;
                lines.push(Value::str(file.read_line()));
            }
            Ok(Value::list(lines))
        }
        "write" => {
            arity(name, &args, 1, 1)?;
            let text = str_arg(name, &args[0])?.to_string();
            file.write_text(&text)?;
            Ok(Value::None)
        }
        "writelines" => {
            arity(name, &args, 1, 1)?;
            for line in interp.collect(&args[0])? {
                let text = str_arg(name, &line)?.to_string();
                file.write_text(&text)?;
            }
            Ok(Value::None)
        }
        _ => Err(no_method("file", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_negatives() {
        assert_eq!(clamp_range(5, Some(-2), None), (3, 5));
        assert_eq!(clamp_range(5, Some(4), Some(2)), (4, 4));
        assert_eq!(clamp_range(5, None, Some(-10)), (0, 0));
        assert_eq!(clamp_range(5, Some(-10), Some(10)), (0, 5));
    }

    #[test]
    fn resolve_index_bounds() {
        assert_eq!(resolve_index(3, -1), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(3, -4), None);
    }

    #[test]
    fn padding() {
        assert_eq!(pad("ab", 5, '*', '^'), "**ab*");
        assert_eq!(pad("abc", 6, ' ', '^'), " abc  ");
        assert_eq!(pad("ab", 4, '-', '>'), "--ab");
        assert_eq!(pad("abcdef", 3, ' ', '<'), "abcdef");
    }

    #[test]
    fn whitespace_split() {
        let parts = split_whitespace("  a b\tc  ", None);
        let texts: Vec<String> = parts.iter().map(Value::str_basic).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        let parts = split_whitespace("a b c", Some(1));
        let texts: Vec<String> = parts.iter().map(Value::str_basic).collect();
        assert_eq!(texts, ["a", "b c"]);
        let parts = rsplit_whitespace("a b c", Some(1));
        let texts: Vec<String> = parts.iter().map(Value::str_basic).collect();
        assert_eq!(texts, ["a b", "c"]);
    }

    #[test]
    fn title_casing() {
        assert_eq!(title_case("hello wORLD-x"), "Hello World-X");
    }

    #[test]
    fn set_operations() {
        let make = |xs: &[i64]| -> SetMap {
            xs.iter()
                .map(|x| {
                    let key = Value::Int(*x).hash_key().unwrap_or(crate::value::HashKey::None);
                    (key, Value::Int(*x))
                })
                .collect()
        };
        let a = make(&[1, 2, 3]);
        let b = make(&[2, 3, 4]);
        assert_eq!(set_op("union", &a, &b).len(), 4);
        assert_eq!(set_op("intersection", &a, &b).len(), 2);
        assert_eq!(set_op("difference", &a, &b).len(), 1);
        assert_eq!(set_op("symmetric_difference", &a, &b).len(), 2);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        let path = path.to_string_lossy().to_string();

        let mut w = FileObj::open(&path, "w").unwrap_or_else(|_| panic!("open for write"));
        assert!(w.write_text("one\ntwo\n").is_ok());
        drop(w);

        let mut r = FileObj::open(&path, "r").unwrap_or_else(|_| panic!("open for read"));
        assert_eq!(r.read_line(), "one\n");
        assert_eq!(r.read_line(), "two\n");
        assert_eq!(r.read_line(), "");
        assert!(r.write_text("x").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        match FileObj::open("/definitely/not/here.txt", "r") {
            Err(Unwind::Raise(exc)) => match &exc.value {
                Value::Exception(e) => assert_eq!(e.kind, ExcKind::IOError),
                other => panic!("unexpected {other:?}"),
            },
            _ => panic!("expected IOError"),
        }
    }
}
