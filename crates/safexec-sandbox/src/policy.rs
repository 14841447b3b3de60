//! Check-time and run-time policy: which constructs a script may use and
//! which built-in names it may see.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::SafeError;
use crate::syntax::NodeKind;

/// Node kinds accepted by [`CheckPolicy::default`].
pub const DEFAULT_ALLOWED_KINDS: &[NodeKind] = &[
    NodeKind::Add,
    NodeKind::And,
    NodeKind::AssAttr,
    NodeKind::AssList,
    NodeKind::AssName,
    NodeKind::AssTuple,
    NodeKind::Assert,
    NodeKind::Assign,
    NodeKind::AugAssign,
    NodeKind::Bitand,
    NodeKind::Bitor,
    NodeKind::Bitxor,
    NodeKind::Break,
    NodeKind::CallFunc,
    NodeKind::Class,
    NodeKind::Compare,
    NodeKind::Const,
    NodeKind::Continue,
    NodeKind::Dict,
    NodeKind::Discard,
    NodeKind::Div,
    NodeKind::Expression,
    NodeKind::FloorDiv,
    NodeKind::For,
    NodeKind::From,
    NodeKind::Function,
    NodeKind::Getattr,
    NodeKind::If,
    NodeKind::Keyword,
    NodeKind::Lambda,
    NodeKind::LeftShift,
    NodeKind::List,
    NodeKind::ListComp,
    NodeKind::ListCompFor,
    NodeKind::ListCompIf,
    NodeKind::Mod,
    NodeKind::Module,
    NodeKind::Mul,
    NodeKind::Name,
    NodeKind::Not,
    NodeKind::Or,
    NodeKind::Pass,
    NodeKind::Power,
    NodeKind::Print,
    NodeKind::Printnl,
    NodeKind::Raise,
    NodeKind::Return,
    NodeKind::RightShift,
    NodeKind::Slice,
    NodeKind::Sliceobj,
    NodeKind::Stmt,
    NodeKind::Sub,
    NodeKind::Subscript,
    NodeKind::TryExcept,
    NodeKind::Tuple,
    NodeKind::UnaryAdd,
    NodeKind::UnarySub,
    NodeKind::While,
];

/// Strings that are always accepted, whatever the denial rules say.
pub const DEFAULT_EXEMPT_STRINGS: &[&str] = &[
    "__call__",
    "__copy__",
    "__deepcopy__",
    "__init__",
    "__name__",
    "__repr__",
    "__str__",
];

/// Default suffix denial list.
pub const DEFAULT_DENY_SUFFIXES: &[&str] = &["__"];

/// Prefixes of interpreter-internal attribute families, used by the
/// `hardened` preset.
pub const HARDENED_DENY_PREFIXES: &[&str] = &["im_", "func_", "tb_", "f_", "co_"];

/// Built-ins visible in restricted mode.
pub const DEFAULT_ALLOWED_BUILTINS: &[&str] = &[
    "__debug__",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BaseException",
    "Exception",
    "False",
    "IndexError",
    "KeyError",
    "NameError",
    "None",
    "RuntimeError",
    "RuntimeWarning",
    "StopIteration",
    "True",
    "ValueError",
    "Warning",
    "ZeroDivisionError",
    "abs",
    "bool",
    "callable",
    "chr",
    "cmp",
    "dict",
    "divmod",
    "filter",
    "float",
    "frozenset",
    "hash",
    "hex",
    "int",
    "isinstance",
    "issubclass",
    "len",
    "list",
    "long",
    "map",
    "max",
    "min",
    "object",
    "oct",
    "ord",
    "pow",
    "range",
    "repr",
    "round",
    "set",
    "str",
    "sum",
    "super",
    "tuple",
    "xrange",
    "zip",
];

/// Informational built-ins replaced by an empty string in restricted mode.
pub const DEFAULT_STUBBED_BUILTINS: &[&str] =
    &["__doc__", "__name__", "copyright", "credits", "license"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Named starting points for a [`CheckPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    /// Suffix `__` denied, everything else in the allow-list accepted.
    #[default]
    Default,
    /// Default plus the interpreter-internal attribute prefixes.
    Hardened,
    /// Any underscore anywhere is denied, and `flags` fields are not scanned.
    Strict,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Default => "default",
            Preset::Hardened => "hardened",
            Preset::Strict => "strict",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = SafeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Preset::Default),
            "hardened" => Ok(Preset::Hardened),
            "strict" => Ok(Preset::Strict),
            other => Err(SafeError::InvalidPolicy(format!(
                "unknown preset `{other}` (expected default, hardened or strict)"
            ))),
        }
    }
}

/// What the static checker accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPolicy {
    /// Node kinds a script may contain.
    pub allowed_kinds: BTreeSet<NodeKind>,
    /// Field names whose values are never scanned.
    pub allowed_fields: BTreeSet<String>,
    /// Values accepted regardless of the denial rules.
    pub exempt_strings: BTreeSet<String>,
    /// A string containing any of these is rejected.
    pub deny_contains: Vec<String>,
    /// A string starting with any of these is rejected.
    pub deny_prefixes: Vec<String>,
    /// A string ending with any of these is rejected.
    pub deny_suffixes: Vec<String>,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            allowed_kinds: DEFAULT_ALLOWED_KINDS.iter().copied().collect(),
            allowed_fields: BTreeSet::new(),
            exempt_strings: DEFAULT_EXEMPT_STRINGS.iter().map(|s| s.to_string()).collect(),
            deny_contains: Vec::new(),
            deny_prefixes: Vec::new(),
            deny_suffixes: strings(DEFAULT_DENY_SUFFIXES),
        }
    }
}

impl CheckPolicy {
    /// Build the policy for a preset.
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Default => Self::default(),
            Preset::Hardened => Self::hardened(),
            Preset::Strict => Self::strict(),
        }
    }

    /// Default policy plus the interpreter-internal prefix list.
    pub fn hardened() -> Self {
        Self {
            deny_prefixes: strings(HARDENED_DENY_PREFIXES),
            ..Self::default()
        }
    }

    /// Conservative policy: no underscores at all, `flags` fields skipped.
    pub fn strict() -> Self {
        Self {
            allowed_fields: ["flags".to_string()].into_iter().collect(),
            deny_contains: vec!["_".to_string()],
            ..Self::default()
        }
    }

    /// Replace the allowed kinds with the named ones.
    pub fn with_allowed_kinds<I, S>(mut self, names: I) -> Result<Self, SafeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_kinds = names
            .into_iter()
            .map(|n| n.as_ref().parse::<NodeKind>())
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Add one kind to the allow-list.
    pub fn allow(mut self, kind: NodeKind) -> Self {
        self.allowed_kinds.insert(kind);
        self
    }

    /// Remove one kind from the allow-list.
    pub fn deny(mut self, kind: NodeKind) -> Self {
        self.allowed_kinds.remove(&kind);
        self
    }

    pub fn is_kind_allowed(&self, kind: NodeKind) -> bool {
        self.allowed_kinds.contains(&kind)
    }

    /// Apply the string rules to one field value.
    ///
    /// Returns `true` when the value must be rejected.
    pub fn is_string_denied(&self, field: &str, value: &str) -> bool {
        if self.allowed_fields.contains(field) || self.exempt_strings.contains(value) {
            return false;
        }
        self.deny_contains.iter().any(|s| value.contains(s.as_str()))
            || self.deny_prefixes.iter().any(|p| value.starts_with(p.as_str()))
            || self.deny_suffixes.iter().any(|s| value.ends_with(s.as_str()))
    }

    /// Reject rules that would match every string.
    pub fn validate(&self) -> Result<(), SafeError> {
        let lists = [
            ("deny_contains", &self.deny_contains),
            ("deny_prefixes", &self.deny_prefixes),
            ("deny_suffixes", &self.deny_suffixes),
        ];
        for (name, list) in lists {
            if list.iter().any(String::is_empty) {
                return Err(SafeError::InvalidPolicy(format!(
                    "{name} contains an empty string, which would deny everything"
                )));
            }
        }
        if !self.allowed_kinds.contains(&NodeKind::Module) {
            return Err(SafeError::InvalidPolicy(
                "allowed kinds must include Module".into(),
            ));
        }
        Ok(())
    }
}

/// Which built-ins a restricted namespace exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinPolicy {
    /// Names bound to their real values.
    pub allowed: BTreeSet<String>,
    /// Names bound to an empty string.
    pub stubbed: BTreeSet<String>,
}

impl Default for BuiltinPolicy {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_ALLOWED_BUILTINS.iter().map(|s| s.to_string()).collect(),
            stubbed: DEFAULT_STUBBED_BUILTINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BuiltinPolicy {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kinds_exclude_risky_constructs() {
        let policy = CheckPolicy::default();
        for kind in [
            NodeKind::Import,
            NodeKind::Global,
            NodeKind::Exec,
            NodeKind::TryFinally,
            NodeKind::Decorators,
            NodeKind::IfExp,
            NodeKind::Invert,
        ] {
            assert!(!policy.is_kind_allowed(kind), "{kind} should be denied");
        }
        assert!(policy.is_kind_allowed(NodeKind::From));
        assert!(policy.is_kind_allowed(NodeKind::Class));
    }

    #[test]
    fn default_string_rules() {
        let policy = CheckPolicy::default();
        assert!(policy.is_string_denied("attrname", "__class__"));
        assert!(policy.is_string_denied("name", "x__"));
        assert!(!policy.is_string_denied("name", "__init__"));
        assert!(!policy.is_string_denied("name", "_private"));
        assert!(!policy.is_string_denied("attrname", "func_globals"));
    }

    #[test]
    fn hardened_denies_internal_prefixes() {
        let policy = CheckPolicy::hardened();
        assert!(policy.is_string_denied("attrname", "func_globals"));
        assert!(policy.is_string_denied("attrname", "f_locals"));
        assert!(!policy.is_string_denied("name", "foo"));
    }

    #[test]
    fn strict_denies_underscores_but_skips_flags() {
        let policy = CheckPolicy::strict();
        assert!(policy.is_string_denied("name", "_private"));
        assert!(!policy.is_string_denied("flags", "OP_ASSIGN"));
        assert!(!policy.is_string_denied("name", "__init__"));
    }

    #[test]
    fn preset_parsing() {
        assert_eq!("hardened".parse::<Preset>().unwrap(), Preset::Hardened);
        assert!(matches!(
            "lenient".parse::<Preset>(),
            Err(SafeError::InvalidPolicy(_))
        ));
        assert_eq!(CheckPolicy::preset(Preset::Strict), CheckPolicy::strict());
    }

    #[test]
    fn with_allowed_kinds_rejects_unknown_names() {
        let err = CheckPolicy::default()
            .with_allowed_kinds(["Module", "Stmt", "Bogus"])
            .unwrap_err();
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn validate_rejects_empty_rule() {
        let mut policy = CheckPolicy::default();
        policy.deny_prefixes.push(String::new());
        assert!(policy.validate().is_err());
        assert!(CheckPolicy::default().validate().is_ok());
    }

    #[test]
    fn builtin_defaults() {
        let policy = BuiltinPolicy::default();
        assert!(policy.allowed.contains("len"));
        assert!(!policy.allowed.contains("open"));
        assert!(!policy.allowed.contains("exit"));
        assert!(policy.stubbed.contains("copyright"));
        assert!(policy.is_default());
    }
}
