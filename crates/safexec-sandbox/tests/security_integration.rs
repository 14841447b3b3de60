//! Security integration tests for the restricted sandbox.
//!
//! These go through the public entry points (check, run, safe_exec) rather
//! than the individual layers, so a regression in how the layers are wired
//! together shows up here.

use std::sync::Arc;

use safexec_sandbox::{
    check, check_with, run_restricted, run_unrestricted, safe_exec, CheckPolicy, Context,
    Namespace, SafeError,
};

fn text(ctx: &Context, name: &str) -> Option<String> {
    ctx.get(name).and_then(|v| v.as_str().map(str::to_string))
}

fn assert_denied_builtin(err: SafeError, expected: &str) {
    match err {
        SafeError::RunBuiltin { name } => assert_eq!(name, expected),
        other => panic!("expected RunBuiltin({expected}), got {other:?}"),
    }
}

// --- Concrete scenarios ---

#[test]
fn simple_assignment_checks_and_runs() {
    let source = "x = 1 + 2";
    check(source).unwrap();
    let mut ctx = Context::new();
    run_restricted(source, &mut ctx).unwrap();
    assert_eq!(ctx.names(), vec!["x".to_string()]);
    assert_eq!(ctx.get("x").and_then(|v| v.as_int()), Some(3));
}

#[test]
fn import_is_an_unrecognized_construct() {
    match check("import os").unwrap_err() {
        SafeError::CheckNode { line, kind } => {
            assert_eq!(line, 1);
            assert_eq!(kind, "Import");
        }
        other => panic!("expected CheckNode, got {other:?}"),
    }
}

#[test]
fn open_passes_check_but_is_denied_at_run_time() {
    let source = r#"open("f.txt","w")"#;
    check(source).unwrap();
    let mut ctx = Context::new();
    assert_denied_builtin(run_restricted(source, &mut ctx).unwrap_err(), "open");
}

#[test]
fn bare_dunder_identifier_is_rejected() {
    match check("y = __class__").unwrap_err() {
        SafeError::CheckStr { line, field, value } => {
            assert_eq!(line, 1);
            assert_eq!(field, "name");
            assert_eq!(value, "__class__");
        }
        other => panic!("expected CheckStr, got {other:?}"),
    }
}

// --- Checker properties ---

#[test]
fn scripts_of_allowed_constructs_pass() {
    let scripts = [
        "x = 1\ny = x * 2 + 3 - 4 / 5 // 6 % 7 ** 2\n",
        "a, b = 1, 2\n[c, d] = [3, 4]\n",
        "if a < b and not c:\n    x = a\nelif a == b or c:\n    x = b\nelse:\n    x = c\n",
        "total = 0\nfor i in range(10):\n    if i == 5:\n        continue\n    total += i\n",
        "i = 0\nwhile True:\n    i += 1\n    if i > 3:\n        break\n",
        "def f(a, b=2, *rest, **opts):\n    return a + b\n",
        "square = lambda n: n * n\n",
        "class Unit(object):\n    def __init__(self, hp):\n        self.hp = hp\n",
        "try:\n    x = 1 / 0\nexcept ZeroDivisionError, e:\n    x = 0\n",
        "evens = [n for n in range(10) if n % 2 == 0]\n",
        "d = {'a': 1, 'b': [1, 2][0:1]}\nd['c'] = d['a'] << 2 | 1 & 3 ^ 4 >> 1\n",
        "assert x, 'message'\nprint x,\nprint\n",
        "raise ValueError('bad input')\n",
        "from os import path\n",
    ];
    for script in scripts {
        if let Err(e) = check(script) {
            panic!("{script:?} should pass: {e}");
        }
    }
}

#[test]
fn disallowed_kind_reports_its_own_line() {
    let cases = [
        ("x = 1\ny = ~x\n", 2, "Invert"),
        ("x = 1\n\n\nimport os\n", 4, "Import"),
        ("def f():\n    global g\n", 2, "Global"),
        ("try:\n    pass\nfinally:\n    pass\n", 1, "TryFinally"),
        ("x = 1\nexec 'y = 2'\n", 2, "Exec"),
        ("@d\ndef f():\n    pass\n", 2, "Decorators"),
        ("y = 1 if x else 2\n", 1, "IfExp"),
    ];
    for (script, expected_line, expected_kind) in cases {
        match check(script) {
            Err(SafeError::CheckNode { line, kind }) => {
                assert_eq!(line, expected_line, "{script:?}");
                assert_eq!(kind, expected_kind, "{script:?}");
            }
            other => panic!("{script:?}: expected CheckNode, got {other:?}"),
        }
    }
}

#[test]
fn denied_suffix_reaches_every_string_field() {
    let cases = [
        "x.__class__",
        "x.__dict__ = 1",
        "s = '__globals__'",
        "def __secret__():\n    pass\n",
        "class __Meta__(object):\n    pass\n",
        "f(__builtins__=1)",
    ];
    for script in cases {
        assert!(
            matches!(check(script), Err(SafeError::CheckStr { .. })),
            "{script:?} should be rejected"
        );
    }
}

#[test]
fn exemptions_take_precedence_over_suffix_rule() {
    let script = "class Adder(object):\n    def __call__(self, a, b):\n        return a + b\n    def __repr__(self):\n        return 'Adder'\n";
    check(script).unwrap();
    let mut ctx = Context::new();
    run_restricted(&format!("{script}r = Adder()(2, 3)\ns = repr(Adder())\n"), &mut ctx).unwrap();
    assert_eq!(ctx.get("r").and_then(|v| v.as_int()), Some(5));
    assert_eq!(text(&ctx, "s"), Some("Adder".to_string()));
}

#[test]
fn hardened_and_strict_presets() {
    let hardened = CheckPolicy::hardened();
    assert!(check("n = f.func_name").is_ok());
    assert!(matches!(
        check_with("n = f.func_name", &hardened),
        Err(SafeError::CheckStr { ref value, .. }) if value == "func_name"
    ));

    let strict = CheckPolicy::strict();
    assert!(check("_private = 1").is_ok());
    assert!(matches!(
        check_with("_private = 1", &strict),
        Err(SafeError::CheckStr { .. })
    ));
}

// --- Namespace round trip ---

#[test]
fn namespace_is_restored_on_every_exit_path() {
    let mut ctx = Context::new();
    let before = ctx.builtins().clone();
    assert!(Arc::ptr_eq(&before, &Namespace::ambient()));

    let scripts = [
        "x = 1",
        "x = 1 / 0",
        "open('f')",
        "raise ValueError('boom')",
        "def f():\n    return f()\nf()\n",
        "x = (",
    ];
    for script in scripts {
        let _ = run_restricted(script, &mut ctx);
        assert!(Arc::ptr_eq(ctx.builtins(), &before), "{script:?}");
    }
}

#[test]
fn denied_call_keeps_earlier_mutations() {
    let mut ctx = Context::new();
    ctx.set("hp", 10i64);
    let err = run_restricted("hp = hp - 3\nlog = 'hit'\nquit()\nhp = 0\n", &mut ctx).unwrap_err();
    assert_denied_builtin(err, "quit");
    assert_eq!(ctx.get("hp").and_then(|v| v.as_int()), Some(7));
    assert_eq!(text(&ctx, "log"), Some("hit".to_string()));
}

#[test]
fn denied_builtin_cannot_be_caught_by_script() {
    let source = "try:\n    open('f')\nexcept Exception:\n    caught = True\nexcept:\n    caught = True\n";
    check(source).unwrap();
    let mut ctx = Context::new();
    assert_denied_builtin(run_restricted(source, &mut ctx).unwrap_err(), "open");
    assert!(!ctx.contains("caught"));
}

#[test]
fn guards_cover_the_dangerous_builtins() {
    let names = [
        "open", "eval", "__import__", "globals", "locals", "dir", "getattr", "setattr",
        "delattr", "type", "exit", "quit",
    ];
    for name in names {
        let mut ctx = Context::new();
        let err = run_restricted(&format!("{name}('x')"), &mut ctx).unwrap_err();
        assert_denied_builtin(err, name);
    }
}

#[test]
fn from_import_fails_at_run_time() {
    let source = "from os import path";
    check(source).unwrap();
    let mut ctx = Context::new();
    assert_denied_builtin(run_restricted(source, &mut ctx).unwrap_err(), "__import__");
}

#[test]
fn informational_names_are_empty_strings() {
    let mut ctx = Context::new();
    run_restricted("c = copyright\nl = len(license)\n", &mut ctx).unwrap();
    assert_eq!(text(&ctx, "c"), Some(String::new()));
    assert_eq!(ctx.get("l").and_then(|v| v.as_int()), Some(0));
}

// --- Toggle ---

#[test]
fn toggle_off_bypasses_the_checker() {
    let source = "import os\nsep = os.sep\n";
    assert!(check(source).is_err());

    let mut ctx = Context::new();
    safe_exec(source, &mut ctx, false).unwrap();
    assert_eq!(text(&ctx, "sep"), Some("/".to_string()));
    assert!(!ctx.restricted_requested());

    let mut ctx = Context::new();
    assert!(matches!(
        safe_exec(source, &mut ctx, true),
        Err(SafeError::CheckNode { .. })
    ));
    assert!(ctx.restricted_requested());
    assert!(!ctx.contains("sep"));
}

#[test]
fn unrestricted_run_has_full_builtins() {
    let mut ctx = Context::new();
    run_unrestricted("names = dir()\nn = getattr('abc', 'upper')()\n", &mut ctx).unwrap();
    assert_eq!(text(&ctx, "n"), Some("ABC".to_string()));
}

// --- Budget ---

#[test]
fn runaway_recursion_is_catchable() {
    let source = "def f(n):\n    return f(n + 1)\ntry:\n    f(0)\nexcept RuntimeError, e:\n    msg = str(e)\n";
    check(source).unwrap();
    let mut ctx = Context::new();
    run_restricted(source, &mut ctx).unwrap();
    let msg = text(&ctx, "msg").unwrap_or_default();
    assert!(msg.contains("maximum recursion depth"), "{msg}");
}

fn script_error_kind(source: &str) -> String {
    check(source).unwrap();
    let mut ctx = Context::new();
    match run_restricted(source, &mut ctx).unwrap_err() {
        SafeError::Script { kind, .. } => kind,
        other => panic!("expected Script, got {other:?}"),
    }
}

#[test]
fn oversized_format_widths_raise_memory_error() {
    for source in [
        "s = '%*s' % (1 << 45, 'x')\n",
        "s = '%-*s' % (-(1 << 45), 'x')\n",
        "s = '%99999999s' % 'x'\n",
        "s = '%(name)99999999s' % {'name': 'x'}\n",
        "s = '{:>99999999}'.format('x')\n",
        "s = '{0:*^99999999}'.format('x')\n",
    ] {
        assert_eq!(script_error_kind(source), "MemoryError", "{source}");
    }
}

#[test]
fn oversized_format_width_is_catchable() {
    let source = "try:\n    s = '%*s' % (1 << 45, 'x')\nexcept MemoryError:\n    s = 'refused'\n";
    check(source).unwrap();
    let mut ctx = Context::new();
    run_restricted(source, &mut ctx).unwrap();
    assert_eq!(text(&ctx, "s").as_deref(), Some("refused"));
}

#[test]
fn oversized_float_precision_raises_overflow_error() {
    assert_eq!(script_error_kind("s = '%.2000000000000f' % 1.5\n"), "OverflowError");
    assert_eq!(script_error_kind("s = '{:.2000000000000f}'.format(1.5)\n"), "OverflowError");

    let mut ctx = Context::new();
    run_restricted("s = '%8.3f|%-6s|' % (1.5, 'ab')\n", &mut ctx).unwrap();
    assert_eq!(text(&ctx, "s").as_deref(), Some("   1.500|ab    |"));
}

// --- Dialect ---

#[test]
fn classic_statement_forms_check_and_run() {
    let source = "\
print 'hp', 7 / 2
print 017, 10L,
print
try:
    raise ValueError, 'bad'
except ValueError, e:
    msg = str(e)
differs = 1 <> 2
";
    check(source).unwrap();
    let mut ctx = Context::new();
    run_restricted(source, &mut ctx).unwrap();
    assert_eq!(ctx.output(), "hp 3\n15 10\n");
    assert_eq!(text(&ctx, "msg").as_deref(), Some("bad"));
    assert!(ctx.get("differs").is_some_and(|v| v.truthy()));

    let mut ctx = Context::new();
    run_unrestricted("g = {'a': 2}\nexec 'b = a * 21' in g\nv = g['b']\n", &mut ctx).unwrap();
    assert_eq!(ctx.get("v").and_then(|v| v.as_int()), Some(42));
}

#[test]
fn integers_are_bounded_to_64_bits() {
    assert_eq!(script_error_kind("x = 9223372036854775807 + 1\n"), "OverflowError");
}

#[test]
fn script_exceptions_surface_with_kind_and_line() {
    let mut ctx = Context::new();
    match run_restricted("x = 1\ny = {}\nz = y['missing']\n", &mut ctx).unwrap_err() {
        SafeError::Script { kind, line, .. } => {
            assert_eq!(kind, "KeyError");
            assert_eq!(line, 3);
        }
        other => panic!("expected Script, got {other:?}"),
    }
}
