//! Running scripts against a caller-owned [`Context`].
//!
//! The built-in namespace is bound to the context for the duration of a run
//! through a [`NamespaceGuard`](crate::namespace::NamespaceGuard), so the
//! previous binding comes back on every exit path. Nothing process-wide is
//! modified, which makes concurrent runs on different contexts safe.

use std::sync::Arc;

use crate::budget::Limits;
use crate::checker;
use crate::error::SafeError;
use crate::interp;
use crate::namespace::{install, Context, Namespace, RESTRICTED_KEY};
use crate::parser;
use crate::policy::CheckPolicy;

/// Run pre-checked source with the default restricted namespace.
///
/// The source is not checked here; call [`crate::check`] first, or use
/// [`safe_exec`]. Variables the script assigns land in `ctx`, including
/// those assigned before a failure.
pub fn run_restricted(source: &str, ctx: &mut Context) -> Result<(), SafeError> {
    run_restricted_with(
        source,
        ctx,
        Namespace::restricted_default(),
        Limits::default(),
        checker::default_policy(),
    )
}

/// Run pre-checked source against `namespace`.
///
/// `policy` is applied to any source the script hands to `eval` or `exec`
/// at run time.
pub fn run_restricted_with(
    source: &str,
    ctx: &mut Context,
    namespace: Arc<Namespace>,
    limits: Limits,
    policy: &CheckPolicy,
) -> Result<(), SafeError> {
    let module = parser::parse_module(source)?;
    let mut guard = install(ctx, namespace);
    let result = interp::run_module(&mut guard, &module, limits, Some(policy));
    guard.restore();
    if let Err(e) = &result {
        tracing::debug!(code = e.code(), error = %e, "restricted run failed");
    }
    result
}

/// Run source with the full ambient namespace and no check.
///
/// This is an explicit bypass of every sandbox guarantee. The script can
/// open files and import host modules.
pub fn run_unrestricted(source: &str, ctx: &mut Context) -> Result<(), SafeError> {
    run_unrestricted_with(source, ctx, Limits::default())
}

/// [`run_unrestricted`] with explicit limits.
pub fn run_unrestricted_with(
    source: &str,
    ctx: &mut Context,
    limits: Limits,
) -> Result<(), SafeError> {
    let module = parser::parse_module(source)?;
    let mut guard = install(ctx, Namespace::ambient());
    let result = interp::run_module(&mut guard, &module, limits, None);
    guard.restore();
    result
}

/// Check and run restricted when `run_safe`, otherwise run unrestricted.
///
/// Records the flag in `ctx` under [`RESTRICTED_KEY`]. With `run_safe`
/// false this is [`run_unrestricted`]: no check, full built-ins. It exists
/// so hosts can switch sandboxing by configuration, and the decision must
/// stay with the host.
pub fn safe_exec(source: &str, ctx: &mut Context, run_safe: bool) -> Result<(), SafeError> {
    ctx.set(RESTRICTED_KEY, run_safe);
    if run_safe {
        checker::check(source)?;
        run_restricted(source, ctx)
    } else {
        tracing::debug!("running without the sandbox");
        run_unrestricted(source, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BuiltinPolicy;
    use crate::value::Value;

    #[test]
    fn restricted_run_mutates_context() {
        let mut ctx = Context::new();
        run_restricted("x = 1 + 2", &mut ctx).unwrap();
        assert_eq!(ctx.get("x").and_then(|v| v.as_int()), Some(3));
    }

    #[test]
    fn namespace_is_restored_after_success_and_failure() {
        let mut ctx = Context::new();
        let before = ctx.builtins().clone();

        run_restricted("y = len([1, 2])", &mut ctx).unwrap();
        assert!(Arc::ptr_eq(ctx.builtins(), &before));

        let err = run_restricted("z = 1\nopen('f.txt', 'w')\n", &mut ctx).unwrap_err();
        assert!(matches!(err, SafeError::RunBuiltin { ref name } if name == "open"));
        assert!(Arc::ptr_eq(ctx.builtins(), &before));
        assert_eq!(ctx.get("z").and_then(|v| v.as_int()), Some(1));
    }

    #[test]
    fn unrestricted_run_sees_everything() {
        let mut ctx = Context::new();
        run_unrestricted("import math\nr = math.floor(2.5)\n", &mut ctx).unwrap();
        assert!(matches!(ctx.get("r"), Some(Value::Float(f)) if f == 2.0));
    }

    #[test]
    fn safe_exec_records_flag_and_checks() {
        let mut ctx = Context::new();
        let err = safe_exec("import os", &mut ctx, true).unwrap_err();
        assert!(matches!(err, SafeError::CheckNode { ref kind, .. } if kind == "Import"));
        assert!(ctx.restricted_requested());

        let mut ctx = Context::new();
        safe_exec("import os\nsep = os.sep\n", &mut ctx, false).unwrap();
        assert!(!ctx.restricted_requested());
        assert!(ctx.contains("sep"));
    }

    #[test]
    fn nested_eval_is_checked_in_restricted_runs() {
        let mut ctx = Context::new();
        let err = run_restricted("v = eval('1')", &mut ctx).unwrap_err();
        assert!(matches!(err, SafeError::RunBuiltin { ref name } if name == "eval"));

        let mut builtins = BuiltinPolicy::default();
        builtins.allowed.insert("eval".into());
        let namespace = Arc::new(Namespace::restricted(&builtins).unwrap());
        let policy = CheckPolicy::default();
        let mut ctx = Context::new();
        ctx.set("x", 1i64);
        run_restricted_with(
            "v = eval('x + 1')",
            &mut ctx,
            namespace.clone(),
            Limits::default(),
            &policy,
        )
        .unwrap();
        assert_eq!(ctx.get("v").and_then(|v| v.as_int()), Some(2));
        let err = run_restricted_with(
            "v = eval('x.__class__')",
            &mut ctx,
            namespace,
            Limits::default(),
            &policy,
        )
        .unwrap_err();
        assert!(matches!(err, SafeError::CheckStr { .. }), "{err:?}");

        let mut ctx = Context::new();
        ctx.set("x", 20i64);
        run_unrestricted("v = eval('x * 2 + 2')", &mut ctx).unwrap();
        assert_eq!(ctx.get("v").and_then(|v| v.as_int()), Some(42));
    }
}
