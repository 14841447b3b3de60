//! # safexec-sandbox
//!
//! Restricted execution for untrusted, author-supplied scripts.
//!
//! Two cooperating layers keep a script away from the host:
//!
//! - **Static checker**: the script is parsed and every syntax node is
//!   verified against an allow-list of node kinds, and every string-valued
//!   field against denial rules (`__class__`, `func_globals` and friends).
//!   The first violation rejects the script.
//! - **Execution sandbox**: an accepted script runs against a caller-owned
//!   [`Context`] with a restricted built-in namespace. Allowed names keep
//!   their values, informational names are empty strings, and everything
//!   else is a guard that aborts the run with [`SafeError::RunBuiltin`].
//!
//! The namespace is bound to the context, never to the process, and is
//! restored on every exit path. Runs are bounded by [`Limits`].
//!
//! ```
//! use safexec_sandbox::{check, run_restricted, Context};
//!
//! let source = "total = sum([x * 2 for x in values])";
//! check(source).unwrap();
//!
//! let mut ctx = Context::new();
//! ctx.set("values", safexec_sandbox::Value::list(vec![1i64.into(), 2i64.into()]));
//! run_restricted(source, &mut ctx).unwrap();
//! assert_eq!(ctx.get("total").and_then(|v| v.as_int()), Some(6));
//! ```
//!
//! These guarantees are pattern-based and best-effort. They are not a
//! capability system.

pub mod ast;
pub mod audit;
pub mod budget;
pub mod builtins;
pub mod checker;
pub mod convert;
pub mod error;
pub mod exception;
pub mod executor;
mod format;
mod interp;
pub mod lexer;
mod methods;
#[cfg(feature = "metrics")]
pub mod metrics;
mod modules;
pub mod namespace;
pub mod parser;
pub mod policy;
pub mod sandbox;
pub mod syntax;
pub mod validator;
pub mod value;

pub use audit::{
    AuditEntry, AuditLogger, AuditOutcome, ExecutionMode, JsonLinesAuditLogger, NoopAuditLogger,
    TracingAuditLogger,
};
pub use budget::Limits;
pub use checker::{check, check_with};
pub use error::SafeError;
pub use executor::{Outcome, SafeExecutor, SandboxConfig};
pub use namespace::{install, Context, Namespace, NamespaceGuard, RESTRICTED_KEY};
pub use policy::{BuiltinPolicy, CheckPolicy, Preset};
pub use sandbox::{run_restricted, run_unrestricted, safe_exec};
pub use syntax::NodeKind;
pub use validator::validate_code;
pub use value::Value;
