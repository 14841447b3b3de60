//! Number and string formatting: `repr`/`str` of floats, string quoting,
//! `%` interpolation and `str.format`.

use crate::exception::{ExcKind, Unwind};
use crate::value::{HashKey, Value};

/// Largest precision accepted by the float conversions.
const MAX_FLOAT_PRECISION: usize = u16::MAX as usize;

/// Converts a value with `str()` (`false`) or `repr()` (`true`).
pub type Convert<'a> = dyn FnMut(&Value, bool) -> Result<String, Unwind> + 'a;

/// Shortest representation that round-trips, in the classic style
/// (`1.0`, `0.1`, `1e+20`, `1e-05`).
pub fn float_repr(f: f64) -> String {
    if let Some(special) = special_float(f) {
        return special;
    }
    let sci = format!("{f:e}");
    let (mantissa, exp) = split_exponent(&sci);
    if (-4..16).contains(&exp) {
        let plain = format!("{f}");
        if plain.contains('.') {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        format!("{mantissa}{}", exponent_suffix(exp))
    }
}

/// `str()` of a float: twelve significant digits.
pub fn float_str(f: f64) -> String {
    if let Some(special) = special_float(f) {
        return special;
    }
    let s = format_g(f, 12, false);
    if s.contains(['.', 'e', 'n', 'i']) {
        s
    } else {
        format!("{s}.0")
    }
}

fn special_float(f: f64) -> Option<String> {
    if f.is_nan() {
        Some("nan".to_string())
    } else if f.is_infinite() {
        Some(if f > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        None
    }
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((m, e)) => (m, e.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn exponent_suffix(exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("e{sign}{:02}", exp.abs())
}

/// `%g` with the given precision.
pub fn format_g(f: f64, precision: usize, alternate: bool) -> String {
    if let Some(special) = special_float(f) {
        return special;
    }
    let precision = precision.max(1);
    if f == 0.0 {
        return if alternate {
            format!("{:.*}", precision - 1, 0.0)
        } else if f.is_sign_negative() {
            "-0".to_string()
        } else {
            "0".to_string()
        };
    }
    let sci = format!("{:.*e}", precision - 1, f);
    let (mantissa, exp) = split_exponent(&sci);
    if exp < -4 || exp >= precision as i32 {
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_zeros(mantissa)
        };
        format!("{mantissa}{}", exponent_suffix(exp))
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{f:.decimals$}");
        if alternate {
            fixed
        } else {
            strip_zeros(&fixed)
        }
    }
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// `%e` with the given precision.
pub fn format_e(f: f64, precision: usize) -> String {
    if let Some(special) = special_float(f) {
        return special;
    }
    let sci = format!("{:.*e}", precision, f);
    let (mantissa, exp) = split_exponent(&sci);
    format!("{mantissa}{}", exponent_suffix(exp))
}

/// Append the quoted `repr()` of a string.
pub fn quote_str(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String) -> String {
        let Some(width) = self.width else { return body };
        let len = body.chars().count();
        if len >= width {
            return body;
        }
        let fill = width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero {
            let (sign, digits) = match body.strip_prefix(['-', '+', ' ']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

enum Args<'a> {
    Positional(Vec<Value>, usize),
    Mapping(&'a Value),
}

impl Args<'_> {
    fn next(&mut self) -> Result<Value, Unwind> {
        match self {
            Args::Positional(items, pos) => {
                let item = items
                    .get(*pos)
                    .cloned()
                    .ok_or_else(|| Unwind::type_error("not enough arguments for format string"))?;
                *pos += 1;
                Ok(item)
            }
            Args::Mapping(v) => Ok((*v).clone()),
        }
    }
}

fn too_long(len: usize, max_len: usize) -> Unwind {
    Unwind::exc(
        ExcKind::MemoryError,
        format!("formatted string of length {len} exceeds the limit of {max_len}"),
    )
}

/// Fail before padding to a width or appending a field would pass `max_len`.
fn check_room(current: usize, added: usize, max_len: usize) -> Result<(), Unwind> {
    match current.checked_add(added) {
        Some(total) if total <= max_len => Ok(()),
        Some(total) => Err(too_long(total, max_len)),
        None => Err(too_long(usize::MAX, max_len)),
    }
}

fn float_precision(precision: usize) -> Result<usize, Unwind> {
    if precision > MAX_FLOAT_PRECISION {
        return Err(Unwind::exc(
            ExcKind::OverflowError,
            "formatted float is too long (precision too large?)",
        ));
    }
    Ok(precision)
}

/// `fmt % args`. The result, and every field width, is bounded by `max_len`.
pub fn percent_format(
    fmt: &str,
    args: &Value,
    max_len: usize,
    convert: &mut Convert<'_>,
) -> Result<String, Unwind> {
    let mut source = match args {
        Value::Tuple(items) => Args::Positional(items.to_vec(), 0),
        Value::Dict(_) if fmt.contains("%(") => Args::Mapping(args),
        other => Args::Positional(vec![other.clone()], 0),
    };

    let chars: Vec<char> = fmt.chars().collect();
    let mut out = String::with_capacity(fmt.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }
        if i >= chars.len() {
            return Err(Unwind::value_error("incomplete format"));
        }

        let mut mapped: Option<Value> = None;
        if chars[i] == '(' {
            let start = i + 1;
            let mut depth = 1;
            let mut end = start;
            while end < chars.len() && depth > 0 {
                match chars[end] {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
                end += 1;
            }
            if depth > 0 {
                return Err(Unwind::value_error("incomplete format key"));
            }
            let key: String = chars[start..end - 1].iter().collect();
            let Value::Dict(map) = args else {
                return Err(Unwind::type_error("format requires a mapping"));
            };
            let hk = HashKey::Str(key.as_str().into());
            let value = map
                .borrow()
                .get(&hk)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Unwind::key_error(Value::str(&key)))?;
            mapped = Some(value);
            i = end;
        }

        let mut spec = Spec::default();
        while i < chars.len() {
            match chars[i] {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        if i < chars.len() && chars[i] == '*' {
            i += 1;
            let w = source
                .next()?
                .as_int()
                .ok_or_else(|| Unwind::type_error("* wants int"))?;
            if w < 0 {
                spec.left = true;
            }
            spec.width = Some(usize::try_from(w.unsigned_abs()).unwrap_or(usize::MAX));
        } else {
            spec.width = read_number(&chars, &mut i);
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            if i < chars.len() && chars[i] == '*' {
                i += 1;
                let p = source
                    .next()?
                    .as_int()
                    .ok_or_else(|| Unwind::type_error("* wants int"))?;
                spec.precision = Some(usize::try_from(p.max(0)).unwrap_or(usize::MAX));
            } else {
                spec.precision = Some(read_number(&chars, &mut i).unwrap_or(0));
            }
        }
        // Length modifiers are accepted and ignored.
        while i < chars.len() && matches!(chars[i], 'h' | 'l' | 'L') {
            i += 1;
        }
        let Some(&conv) = chars.get(i) else {
            return Err(Unwind::value_error("incomplete format"));
        };
        i += 1;

        if conv == '%' {
            check_room(out.len(), 1, max_len)?;
            out.push('%');
            continue;
        }

        let value = match mapped {
            Some(v) => v,
            None => source.next()?,
        };
        check_room(out.len(), spec.width.unwrap_or(0), max_len)?;
        let body = format_one(conv, &value, &spec, convert)?;
        check_room(out.len(), body.len(), max_len)?;
        out.push_str(&spec.pad(body));
    }

    if let Args::Positional(items, pos) = &source {
        if *pos < items.len() && !matches!(args, Value::Dict(_)) {
            return Err(Unwind::type_error(
                "not all arguments converted during string formatting",
            ));
        }
    }
    Ok(out)
}

fn read_number(chars: &[char], i: &mut usize) -> Option<usize> {
    let start = *i;
    while *i < chars.len() && chars[*i].is_ascii_digit() {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    // Out-of-range numbers saturate so the length checks reject them.
    Some(
        chars[start..*i]
            .iter()
            .collect::<String>()
            .parse()
            .unwrap_or(usize::MAX),
    )
}

fn format_one(
    conv: char,
    value: &Value,
    spec: &Spec,
    convert: &mut Convert<'_>,
) -> Result<String, Unwind> {
    Ok(match conv {
        's' | 'r' => {
            let mut s = convert(value, conv == 'r')?;
            if let Some(p) = spec.precision {
                s = s.chars().take(p).collect();
            }
            s
        }
        'd' | 'i' | 'u' => {
            let n = int_arg(conv, value)?;
            format!("{}{}", spec.sign(n < 0), n.unsigned_abs())
        }
        'x' | 'X' | 'o' => {
            let n = int_arg(conv, value)?;
            let digits = match conv {
                'x' => format!("{:x}", n.unsigned_abs()),
                'X' => format!("{:X}", n.unsigned_abs()),
                _ => format!("{:o}", n.unsigned_abs()),
            };
            let prefix = match (spec.alternate, conv) {
                (true, 'x') => "0x",
                (true, 'X') => "0X",
                (true, _) => "0",
                _ => "",
            };
            format!("{}{prefix}{digits}", spec.sign(n < 0))
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let f = value.as_float().ok_or_else(|| {
                Unwind::type_error(format!(
                    "float argument required, not {}",
                    value.type_name()
                ))
            })?;
            let precision = float_precision(spec.precision.unwrap_or(6))?;
            let body = match conv {
                'f' | 'F' => match special_float(f) {
                    Some(s) => s,
                    None => format!("{:.*}", precision, f.abs()),
                },
                'e' | 'E' => format_e(f.abs(), precision),
                _ => format_g(f.abs(), precision, spec.alternate),
            };
            let body = if conv.is_uppercase() {
                body.to_uppercase()
            } else {
                body
            };
            let negative = f.is_sign_negative() && !f.is_nan();
            format!("{}{body}", spec.sign(negative))
        }
        'c' => match value {
            Value::Str(s) if s.chars().count() == 1 => s.to_string(),
            other => {
                let code = other
                    .as_int()
                    .ok_or_else(|| Unwind::type_error("%c requires int or char"))?;
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| Unwind::exc(ExcKind::OverflowError, "%c arg not in range"))?
                    .to_string()
            }
        },
        other => {
            return Err(Unwind::value_error(format!(
                "unsupported format character '{other}' ({:#x})",
                other as u32
            )))
        }
    })
}

fn int_arg(conv: char, value: &Value) -> Result<i64, Unwind> {
    match value {
        Value::Float(f) => {
            if f.is_finite() && f.abs() < 9.2e18 {
                Ok(f.trunc() as i64)
            } else {
                Err(Unwind::overflow())
            }
        }
        other => other.as_int().ok_or_else(|| {
            Unwind::type_error(format!(
                "%{conv} format: a number is required, not {}",
                other.type_name()
            ))
        }),
    }
}

/// `template.format(*args, **kwargs)` with `{}`, `{0}` and `{name}` fields.
///
/// Format specs after `:` support width, alignment and precision for the
/// common cases. The result is bounded by `max_len`.
pub fn brace_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    max_len: usize,
    convert: &mut Convert<'_>,
) -> Result<String, Unwind> {
    let mut out = String::new();
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(Unwind::value_error("Single '{' encountered in format string"));
                }
                let (name, format_spec) = match field.split_once(':') {
                    Some((n, s)) => (n.to_string(), Some(s.to_string())),
                    None => (field, None),
                };
                let (name, as_repr) = match name.strip_suffix("!r") {
                    Some(n) => (n.to_string(), true),
                    None => (name.trim_end_matches("!s").to_string(), false),
                };
                let value = if name.is_empty() {
                    let v = args.get(auto).cloned();
                    auto += 1;
                    v.ok_or_else(|| Unwind::index_error("tuple index out of range"))?
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index)
                        .cloned()
                        .ok_or_else(|| Unwind::index_error("tuple index out of range"))?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| Unwind::key_error(Value::str(&name)))?
                };
                let text = match format_spec {
                    Some(spec) if !spec.is_empty() => {
                        apply_format_spec(&value, &spec, out.len(), max_len, convert)?
                    }
                    _ => convert(&value, as_repr)?,
                };
                check_room(out.len(), text.len(), max_len)?;
                out.push_str(&text);
            }
            '}' => {
                return Err(Unwind::value_error("Single '}' encountered in format string"));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn apply_format_spec(
    value: &Value,
    spec: &str,
    used: usize,
    max_len: usize,
    convert: &mut Convert<'_>,
) -> Result<String, Unwind> {
    let mut chars: Vec<char> = spec.chars().collect();
    let mut align = None;
    let mut fill = ' ';
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        chars.drain(..2);
    } else if !chars.is_empty() && matches!(chars[0], '<' | '>' | '^') {
        align = Some(chars[0]);
        chars.drain(..1);
    }
    let mut i = 0;
    let zero = chars.first() == Some(&'0');
    let width = read_number(&chars, &mut i);
    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        precision = read_number(&chars, &mut i);
    }
    let kind = chars.get(i).copied();
    check_room(used, width.unwrap_or(0), max_len)?;

    let body = match kind {
        Some('f') | Some('e') | Some('g') | Some('%') => {
            let f = value
                .as_float()
                .ok_or_else(|| Unwind::value_error("unknown format code for object"))?;
            let p = float_precision(precision.unwrap_or(6))?;
            match kind {
                Some('f') => format!("{f:.p$}"),
                Some('e') => format_e(f, p),
                Some('%') => format!("{:.p$}%", f * 100.0),
                _ => format_g(f, p, false),
            }
        }
        Some('d') => value
            .as_int()
            .ok_or_else(|| Unwind::value_error("unknown format code 'd'"))?
            .to_string(),
        Some('s') | None => {
            let mut s = convert(value, false)?;
            if let Some(p) = precision {
                if !value.is_number() {
                    s = s.chars().take(p).collect();
                }
            }
            s
        }
        Some(other) => {
            return Err(Unwind::value_error(format!(
                "unknown format code '{other}'"
            )))
        }
    };

    let Some(width) = width else { return Ok(body) };
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = value.is_number();
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    let fill = if zero && align == '>' && numeric { '0' } else { fill };
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{body}{}", fill_str(pad)),
        '^' => format!("{}{body}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        _ => format!("{}{body}", fill_str(pad)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 4096;

    fn plain(v: &Value, repr: bool) -> Result<String, Unwind> {
        Ok(if repr { v.repr_basic() } else { v.str_basic() })
    }

    fn pct(fmt: &str, args: Value) -> String {
        match percent_format(fmt, &args, LIMIT, &mut plain) {
            Ok(s) => s,
            Err(_) => panic!("format failed"),
        }
    }

    fn raised_kind(result: Result<String, Unwind>) -> Option<ExcKind> {
        match result {
            Err(Unwind::Raise(exc)) => match &exc.value {
                Value::Exception(obj) => Some(obj.kind),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn float_repr_matches_classic_output() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(-2.5), "-2.5");
    }

    #[test]
    fn float_str_uses_twelve_digits() {
        assert_eq!(float_str(1.0 / 3.0), "0.333333333333");
        assert_eq!(float_str(2.0), "2.0");
        assert_eq!(float_str(1e20), "1e+20");
    }

    #[test]
    fn format_g_cases() {
        assert_eq!(format_g(0.0001, 6, false), "0.0001");
        assert_eq!(format_g(0.00001, 6, false), "1e-05");
        assert_eq!(format_g(123456789.0, 6, false), "1.23457e+08");
        assert_eq!(format_g(2.5, 6, false), "2.5");
    }

    #[test]
    fn quoting() {
        let mut out = String::new();
        quote_str("it's", &mut out);
        assert_eq!(out, "\"it's\"");
        let mut out = String::new();
        quote_str("a\nb", &mut out);
        assert_eq!(out, "'a\\nb'");
    }

    #[test]
    fn percent_basic() {
        assert_eq!(pct("%s-%d", Value::tuple(vec![Value::str("a"), Value::Int(3)])), "a-3");
        assert_eq!(pct("%5.2f|", Value::Float(3.14159)), " 3.14|");
        assert_eq!(pct("%-4d|", Value::Int(7)), "7   |");
        assert_eq!(pct("%04d", Value::Int(-7)), "-007");
        assert_eq!(pct("%x %o %%", Value::tuple(vec![Value::Int(255), Value::Int(8)])), "ff 10 %");
        assert_eq!(pct("%r", Value::str("q")), "'q'");
        assert_eq!(pct("%.3s", Value::str("abcdef")), "abc");
    }

    #[test]
    fn percent_mapping() {
        let d = Value::dict_from([("name".to_string(), Value::str("bob"))]);
        assert_eq!(pct("hi %(name)s", d), "hi bob");
    }

    #[test]
    fn percent_errors() {
        let err = percent_format("%d %d", &Value::Int(1), LIMIT, &mut plain);
        assert!(err.is_err());
        let two = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let err = percent_format("%d", &two, LIMIT, &mut plain);
        assert!(err.is_err());
        let err = percent_format("%d", &Value::str("x"), LIMIT, &mut plain);
        assert!(err.is_err());
    }

    #[test]
    fn brace_formatting() {
        let out = brace_format(
            "{} and {1} and {name} {{}}",
            &[Value::Int(1), Value::str("two")],
            &[("name".to_string(), Value::str("n"))],
            LIMIT,
            &mut plain,
        );
        assert_eq!(out.ok().as_deref(), Some("1 and two and n {}"));
        let args = [Value::str("ab"), Value::Float(1.0)];
        let out = brace_format("{0:>5}|{1:.2f}", &args, &[], LIMIT, &mut plain);
        assert_eq!(out.ok().as_deref(), Some("   ab|1.00"));
    }

    #[test]
    fn star_width_past_limit_raises_memory_error() {
        let args = Value::tuple(vec![Value::Int(1 << 45), Value::str("x")]);
        let result = percent_format("%*s", &args, LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));

        let args = Value::tuple(vec![Value::Int(-(1 << 45)), Value::str("x")]);
        let result = percent_format("%*s", &args, LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
    }

    #[test]
    fn literal_width_past_limit_raises_memory_error() {
        let result = percent_format("%5000s", &Value::str("x"), LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
        let huge = "%099999999999999999999999d";
        let result = percent_format(huge, &Value::Int(1), LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
        assert_eq!(pct("%4096s", Value::str("x")).len(), LIMIT);
    }

    #[test]
    fn accumulated_fields_are_bounded() {
        let args = Value::tuple(vec![Value::str("a"), Value::str("b")]);
        let result = percent_format("%3000s%3000s", &args, LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));

        let args = [Value::str("a"), Value::str("b")];
        let result = brace_format("{0:>3000}{1:<3000}", &args, &[], LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
    }

    #[test]
    fn brace_width_past_limit_raises_memory_error() {
        let args = [Value::str("x")];
        let result = brace_format("{:>35184372088832}", &args, &[], LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
        let result = brace_format("{0:*^5000}", &args, &[], LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::MemoryError));
    }

    #[test]
    fn huge_float_precision_raises_overflow_error() {
        let result = percent_format("%.2000000000000f", &Value::Float(1.5), LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::OverflowError));
        let args = Value::tuple(vec![Value::Int(1 << 40), Value::Float(1.5)]);
        let result = percent_format("%.*e", &args, LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::OverflowError));
        let args = [Value::Float(1.5)];
        let result = brace_format("{:.2000000000000f}", &args, &[], LIMIT, &mut plain);
        assert_eq!(raised_kind(result), Some(ExcKind::OverflowError));

        assert_eq!(pct("%.3f", Value::Float(1.5)), "1.500");
        assert_eq!(pct("%.1000s", Value::str("short")), "short");
    }
}
