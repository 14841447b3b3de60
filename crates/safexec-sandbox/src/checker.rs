//! Static checker: walks every node of a parsed script and rejects the first
//! construct or string the policy does not accept.

use std::sync::LazyLock;

use crate::ast::{Expr, Module};
use crate::error::SafeError;
use crate::parser::{parse_expression, parse_module};
use crate::policy::CheckPolicy;
use crate::syntax::{Field, NodeRef};

static DEFAULT_POLICY: LazyLock<CheckPolicy> = LazyLock::new(CheckPolicy::default);

/// The policy used by [`check`].
pub fn default_policy() -> &'static CheckPolicy {
    &DEFAULT_POLICY
}

/// Check `source` against the default policy.
///
/// Syntax errors come back as [`SafeError::Syntax`]; policy violations as
/// [`SafeError::CheckNode`] or [`SafeError::CheckStr`].
pub fn check(source: &str) -> Result<(), SafeError> {
    check_with(source, &DEFAULT_POLICY)
}

/// Check `source` against a caller-supplied policy.
pub fn check_with(source: &str, policy: &CheckPolicy) -> Result<(), SafeError> {
    let module = parse_module(source)?;
    check_module(&module, policy)
}

/// Check an already-parsed module.
pub fn check_module(module: &Module, policy: &CheckPolicy) -> Result<(), SafeError> {
    walk(NodeRef::Module(module), policy)
}

/// Parse and check a single expression; the root is an `Expression` node.
pub fn check_expression(source: &str, policy: &CheckPolicy) -> Result<Expr, SafeError> {
    let expr = parse_expression(source)?;
    walk(NodeRef::Expression(&expr), policy)?;
    Ok(expr)
}

/// Depth-first, pre-order walk with an explicit stack.
fn walk(root: NodeRef<'_>, policy: &CheckPolicy) -> Result<(), SafeError> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        check_node(&node, policy)?;
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
    }
    Ok(())
}

fn check_node(node: &NodeRef<'_>, policy: &CheckPolicy) -> Result<(), SafeError> {
    let kind = node.kind();
    if !policy.is_kind_allowed(kind) {
        tracing::debug!(line = node.line(), kind = %kind, "check: construct rejected");
        return Err(SafeError::CheckNode {
            line: node.line(),
            kind: kind.as_str().to_string(),
        });
    }

    for (field, value) in node.fields() {
        let Field::Str(text) = value else { continue };
        if policy.is_string_denied(field, text) {
            tracing::debug!(line = node.line(), field, value = text, "check: string rejected");
            return Err(SafeError::CheckStr {
                line: node.line(),
                field: field.to_string(),
                value: text.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Preset;
    use crate::syntax::NodeKind;

    fn node_err(src: &str) -> (u32, String) {
        match check(src) {
            Err(SafeError::CheckNode { line, kind }) => (line, kind),
            other => panic!("expected CheckNode, got {other:?}"),
        }
    }

    fn str_err(src: &str) -> (u32, String, String) {
        match check(src) {
            Err(SafeError::CheckStr { line, field, value }) => (line, field, value),
            other => panic!("expected CheckStr, got {other:?}"),
        }
    }

    #[test]
    fn accepts_plain_script() {
        check("x = 1\ny = x + 2\nprint y\n").unwrap();
    }

    #[test]
    fn accepts_empty_script() {
        check("").unwrap();
    }

    #[test]
    fn rejects_import_with_line() {
        assert_eq!(node_err("x = 1\nimport os\n"), (2, "Import".to_string()));
    }

    #[test]
    fn rejects_dunder_attribute() {
        let (line, field, value) = str_err("x = ().__class__");
        assert_eq!(line, 1);
        assert_eq!(field, "attrname");
        assert_eq!(value, "__class__");
    }

    #[test]
    fn exempt_names_pass() {
        check("class A(object):\n    def __init__(self):\n        self.x = 1\n").unwrap();
    }

    #[test]
    fn dunder_string_constant_is_rejected() {
        let (_, field, value) = str_err("s = 'foo__'");
        assert_eq!(field, "value");
        assert_eq!(value, "foo__");
    }

    #[test]
    fn augmented_assignment_operator_is_scanned() {
        let policy = CheckPolicy {
            deny_contains: vec!["=".into()],
            ..CheckPolicy::default()
        };
        let err = check_with("x = 1\nx += 1", &policy).unwrap_err();
        // `=` does not appear in any other string field of the script.
        assert!(matches!(
            err,
            SafeError::CheckStr { ref field, ref value, .. } if field == "op" && value == "+="
        ));
    }

    #[test]
    fn first_violation_in_preorder_wins() {
        // The Import on line 1 is reached before the dunder on line 2.
        let err = check("import os\nx.__dict__\n").unwrap_err();
        assert!(matches!(err, SafeError::CheckNode { line: 1, .. }));

        // Within one statement, the parent kind is checked before children.
        let err = check("exec 'x.__dict__'").unwrap_err();
        assert!(matches!(err, SafeError::CheckNode { ref kind, .. } if kind == "Exec"));
    }

    #[test]
    fn syntax_errors_propagate_unwrapped() {
        assert!(matches!(
            check("def f(:\n"),
            Err(SafeError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn invert_is_rejected() {
        assert_eq!(node_err("x = ~1").1, "Invert");
    }

    #[test]
    fn default_rejections() {
        assert_eq!(node_err("global x").1, "Global");
        assert_eq!(node_err("exec 'x = 1'").1, "Exec");
        assert_eq!(node_err("try:\n    x\nfinally:\n    y\n").1, "TryFinally");
        assert_eq!(node_err("@d\ndef f():\n    pass\n").1, "Decorators");
        assert_eq!(node_err("x = 1 if y else 2").1, "IfExp");
    }

    #[test]
    fn from_import_passes_check() {
        check("from os import path").unwrap();
    }

    #[test]
    fn delete_flags_visible_to_strict_rules() {
        let policy = CheckPolicy {
            deny_contains: vec!["DELETE".into()],
            ..CheckPolicy::default()
        };
        let err = check_with("del x", &policy).unwrap_err();
        assert!(matches!(err, SafeError::CheckStr { ref field, .. } if field == "flags"));
    }

    #[test]
    fn allowed_field_names_are_skipped() {
        let mut policy = CheckPolicy::default();
        policy.allowed_fields.insert("attrname".into());
        check_with("x = y.__dict__", &policy).unwrap();
    }

    #[test]
    fn presets_apply() {
        let hardened = CheckPolicy::preset(Preset::Hardened);
        assert!(check_with("f.func_name", &hardened).is_err());
        check("f.func_name").unwrap();

        let strict = CheckPolicy::preset(Preset::Strict);
        assert!(check_with("_private = 1", &strict).is_err());
        check_with("value = 1\ndel value", &strict).unwrap();
    }

    #[test]
    fn custom_kind_list() {
        let policy = CheckPolicy::default().allow(NodeKind::Import);
        check_with("import os", &policy).unwrap();
        let policy = CheckPolicy::default().deny(NodeKind::While);
        assert!(check_with("while 0:\n    pass\n", &policy).is_err());
    }

    #[test]
    fn expression_mode_root() {
        check_expression("1 + 2", default_policy()).unwrap();
        let policy = CheckPolicy::default().deny(NodeKind::Expression);
        assert!(matches!(
            check_expression("1", &policy),
            Err(SafeError::CheckNode { ref kind, .. }) if kind == "Expression"
        ));
    }

    #[test]
    fn docstrings_are_scanned() {
        let (_, field, _) = str_err("def f():\n    'ends with__'\n    pass\n");
        assert_eq!(field, "doc");
    }
}
