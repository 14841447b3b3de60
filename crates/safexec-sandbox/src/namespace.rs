//! Built-in namespaces and the caller-owned execution context.
//!
//! A [`Context`] carries its own built-in namespace binding. Restricted runs
//! swap that binding with [`install`], and the returned [`NamespaceGuard`]
//! puts the previous binding back when it goes out of scope, on every exit
//! path. Nothing process-wide is ever mutated.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use crate::builtins::BuiltinFn;
use crate::error::SafeError;
use crate::exception::ExcKind;
use crate::policy::BuiltinPolicy;
use crate::value::{Globals, TypeKind, Value};

/// Key in the context recording whether restricted mode was requested.
pub const RESTRICTED_KEY: &str = "restricted";

/// A built-in value, independent of any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    None,
    True,
    False,
    Text(&'static str),
    Func(BuiltinFn),
    Type(TypeKind),
    Exception(ExcKind),
}

impl Builtin {
    pub fn to_value(self) -> Value {
        match self {
            Builtin::None => Value::None,
            Builtin::True => Value::Bool(true),
            Builtin::False => Value::Bool(false),
            Builtin::Text(text) => Value::str(text),
            Builtin::Func(f) => Value::Builtin(f),
            Builtin::Type(t) => Value::Type(t),
            Builtin::Exception(e) => Value::ExcClass(e),
        }
    }
}

/// What a built-in name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The real value.
    Allowed(Builtin),
    /// An empty string.
    Stubbed,
    /// A guard that fails with [`SafeError::RunBuiltin`] when called.
    Denied,
}

const TYPE_NAMES: &[(&str, TypeKind)] = &[
    ("bool", TypeKind::Bool),
    ("dict", TypeKind::Dict),
    ("float", TypeKind::Float),
    ("frozenset", TypeKind::FrozenSet),
    ("int", TypeKind::Int),
    ("list", TypeKind::List),
    ("long", TypeKind::Int),
    ("object", TypeKind::Object),
    ("set", TypeKind::Set),
    ("str", TypeKind::Str),
    ("tuple", TypeKind::Tuple),
    ("type", TypeKind::Type),
];

const TEXT_NAMES: &[(&str, &str)] = &[
    ("__doc__", "Built-in functions, exceptions, and other objects."),
    ("__name__", "__builtin__"),
    ("copyright", "Copyright (c) the safexec authors."),
    ("credits", "Thanks to everyone who wrote scripts for it."),
    ("license", "See the LICENSE file distributed with safexec."),
];

/// A built-in namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    restricted: bool,
    bindings: BTreeMap<String, Binding>,
}

impl Namespace {
    /// The full built-in table. Built once, never mutated.
    pub fn ambient() -> Arc<Namespace> {
        static AMBIENT: OnceLock<Arc<Namespace>> = OnceLock::new();
        AMBIENT.get_or_init(|| Arc::new(Self::build_ambient())).clone()
    }

    /// The restricted namespace for the default built-in policy. Built once.
    pub fn restricted_default() -> Arc<Namespace> {
        static RESTRICTED: OnceLock<Arc<Namespace>> = OnceLock::new();
        RESTRICTED
            .get_or_init(|| {
                // The default lists only name entries of the ambient table.
                let ns = Self::restricted(&BuiltinPolicy::default())
                    .unwrap_or_else(|_| Self::deny_all());
                Arc::new(ns)
            })
            .clone()
    }

    /// Derive a restricted namespace from the ambient table.
    ///
    /// Allowed names keep their values, stubbed names become empty strings,
    /// every other ambient name becomes a guard. Allowed names missing from
    /// the ambient table are a policy error.
    pub fn restricted(policy: &BuiltinPolicy) -> Result<Namespace, SafeError> {
        let ambient = Self::ambient();
        if let Some(unknown) = policy
            .allowed
            .iter()
            .find(|name| !ambient.bindings.contains_key(name.as_str()))
        {
            return Err(SafeError::InvalidPolicy(format!(
                "unknown built-in `{unknown}` in allowed list"
            )));
        }
        if let Some(both) = policy.allowed.intersection(&policy.stubbed).next() {
            return Err(SafeError::InvalidPolicy(format!(
                "built-in `{both}` is both allowed and stubbed"
            )));
        }

        let mut bindings = BTreeMap::new();
        for (name, binding) in &ambient.bindings {
            let restricted = if policy.allowed.contains(name) {
                *binding
            } else if policy.stubbed.contains(name) {
                Binding::Stubbed
            } else {
                Binding::Denied
            };
            bindings.insert(name.clone(), restricted);
        }
        for name in &policy.stubbed {
            bindings.insert(name.clone(), Binding::Stubbed);
        }
        Ok(Namespace {
            restricted: true,
            bindings,
        })
    }

    fn build_ambient() -> Namespace {
        let mut bindings = BTreeMap::new();
        let mut add = |name: &str, builtin: Builtin| {
            bindings.insert(name.to_string(), Binding::Allowed(builtin));
        };
        add("None", Builtin::None);
        add("True", Builtin::True);
        add("False", Builtin::False);
        add("__debug__", Builtin::True);
        for (name, text) in TEXT_NAMES {
            add(name, Builtin::Text(*text));
        }
        for (name, kind) in TYPE_NAMES {
            add(name, Builtin::Type(*kind));
        }
        for f in BuiltinFn::ALL {
            add(f.name(), Builtin::Func(*f));
        }
        for e in ExcKind::ALL {
            add(e.name(), Builtin::Exception(*e));
        }
        Namespace {
            restricted: false,
            bindings,
        }
    }

    fn deny_all() -> Namespace {
        let bindings = Self::ambient()
            .bindings
            .keys()
            .map(|k| (k.clone(), Binding::Denied))
            .collect();
        Namespace {
            restricted: true,
            bindings,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.bindings.get(name).copied()
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Names bound to their real values.
    pub fn allowed_names(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|(_, b)| matches!(b, Binding::Allowed(_)))
            .map(|(k, _)| k.as_str())
    }

    /// Names bound to guards.
    pub fn denied_names(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|(_, b)| matches!(b, Binding::Denied))
            .map(|(k, _)| k.as_str())
    }
}

/// Caller-owned variables, built-in binding and captured output of a run.
pub struct Context {
    vars: Globals,
    builtins: Arc<Namespace>,
    output: String,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("vars", &self.vars.borrow())
            .field("restricted_builtins", &self.builtins.is_restricted())
            .field("output_len", &self.output.len())
            .finish()
    }
}

impl Context {
    /// An empty context bound to the ambient namespace.
    pub fn new() -> Self {
        Self {
            vars: Rc::new(RefCell::new(IndexMap::new())),
            builtins: Namespace::ambient(),
            output: String::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.borrow_mut().insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Variable names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }

    /// Snapshot of all variables.
    pub fn vars(&self) -> Vec<(String, Value)> {
        self.vars
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vars.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.borrow().is_empty()
    }

    /// The built-in namespace currently bound to this context.
    pub fn builtins(&self) -> &Arc<Namespace> {
        &self.builtins
    }

    /// Everything `print` wrote so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Whether the `restricted` key is set and true.
    pub fn restricted_requested(&self) -> bool {
        self.get(RESTRICTED_KEY).is_some_and(|v| v.truthy())
    }

    pub(crate) fn globals(&self) -> Globals {
        self.vars.clone()
    }

    pub(crate) fn push_output(&mut self, text: &str) {
        self.output.push_str(text);
    }
}

/// Bind `namespace` to `ctx` until the returned guard is dropped.
pub fn install(ctx: &mut Context, namespace: Arc<Namespace>) -> NamespaceGuard<'_> {
    let saved = std::mem::replace(&mut ctx.builtins, namespace);
    tracing::debug!(
        restricted = ctx.builtins.is_restricted(),
        denied = ctx.builtins.denied_names().count(),
        "built-in namespace installed"
    );
    NamespaceGuard {
        ctx,
        saved: Some(saved),
    }
}

/// Restores a context's previous built-in binding when dropped.
pub struct NamespaceGuard<'a> {
    ctx: &'a mut Context,
    saved: Option<Arc<Namespace>>,
}

impl NamespaceGuard<'_> {
    /// Restore now instead of at end of scope.
    pub fn restore(mut self) {
        self.put_back();
    }

    fn put_back(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.ctx.builtins = saved;
            tracing::debug!(
                restricted = self.ctx.builtins.is_restricted(),
                "built-in namespace restored"
            );
        }
    }
}

impl Deref for NamespaceGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for NamespaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        self.put_back();
    }
}

// Cached namespaces are shared between threads.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<Namespace>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_has_everything() {
        let ns = Namespace::ambient();
        assert!(!ns.is_restricted());
        for name in ["open", "len", "__import__", "ValueError", "None", "eval"] {
            assert!(
                matches!(ns.lookup(name), Some(Binding::Allowed(_))),
                "{name} missing"
            );
        }
    }

    #[test]
    fn restricted_default_bindings() {
        let ns = Namespace::restricted_default();
        assert!(ns.is_restricted());
        assert!(matches!(ns.lookup("len"), Some(Binding::Allowed(_))));
        assert_eq!(ns.lookup("copyright"), Some(Binding::Stubbed));
        assert_eq!(ns.lookup("__name__"), Some(Binding::Stubbed));
        assert_eq!(ns.lookup("open"), Some(Binding::Denied));
        assert_eq!(ns.lookup("__import__"), Some(Binding::Denied));
        assert_eq!(ns.lookup("exit"), Some(Binding::Denied));
        assert_eq!(ns.lookup("no_such_builtin"), None);
    }

    #[test]
    fn restricted_default_is_cached() {
        assert!(Arc::ptr_eq(
            &Namespace::restricted_default(),
            &Namespace::restricted_default()
        ));
    }

    #[test]
    fn unknown_allowed_name_is_an_error() {
        let mut policy = BuiltinPolicy::default();
        policy.allowed.insert("frobnicate".into());
        assert!(matches!(
            Namespace::restricted(&policy),
            Err(SafeError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn overlap_is_an_error() {
        let mut policy = BuiltinPolicy::default();
        policy.stubbed.insert("len".into());
        assert!(Namespace::restricted(&policy).is_err());
    }

    #[test]
    fn guard_restores_on_drop() {
        let mut ctx = Context::new();
        let before = ctx.builtins().clone();
        {
            let guard = install(&mut ctx, Namespace::restricted_default());
            assert!(guard.builtins().is_restricted());
        }
        assert!(Arc::ptr_eq(ctx.builtins(), &before));
    }

    #[test]
    fn guard_restores_explicitly() {
        let mut ctx = Context::new();
        let guard = install(&mut ctx, Namespace::restricted_default());
        guard.restore();
        assert!(!ctx.builtins().is_restricted());
    }

    #[test]
    fn nested_installs_unwind_in_order() {
        let mut ctx = Context::new();
        {
            let mut outer = install(&mut ctx, Namespace::restricted_default());
            {
                let inner = install(&mut outer, Namespace::ambient());
                assert!(!inner.builtins().is_restricted());
            }
            assert!(outer.builtins().is_restricted());
        }
        assert!(!ctx.builtins().is_restricted());
    }

    #[test]
    fn guard_restores_during_unwind() {
        let mut ctx = Context::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = install(&mut ctx, Namespace::restricted_default());
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!ctx.builtins().is_restricted());
    }

    #[test]
    fn context_variables() {
        let mut ctx = Context::new();
        ctx.set("x", 3i64);
        ctx.set("name", "bob");
        assert_eq!(ctx.get("x").and_then(|v| v.as_int()), Some(3));
        assert_eq!(ctx.names(), vec!["x", "name"]);
        assert!(!ctx.restricted_requested());
        ctx.set(RESTRICTED_KEY, true);
        assert!(ctx.restricted_requested());
        assert!(ctx.remove("x").is_some());
        assert!(!ctx.contains("x"));
    }
}
