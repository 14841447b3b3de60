//! Reusable executor: one policy, one namespace, many runs.
//!
//! Script values are `Rc`-based and `!Send`, so [`SafeExecutor::execute`]
//! converts its JSON context on a dedicated thread with a large stack and
//! sends JSON back. The sync methods run on the caller's thread.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value as Json};
use tokio::sync::Semaphore;

use crate::audit::{AuditEntryBuilder, AuditLogger, ExecutionMode, NoopAuditLogger};
use crate::budget::Limits;
use crate::checker;
use crate::convert::{context_from_json, context_to_json};
use crate::error::SafeError;
use crate::namespace::{Context, Namespace, RESTRICTED_KEY};
use crate::policy::{BuiltinPolicy, CheckPolicy};
use crate::sandbox;
use crate::validator::{validate_code, DEFAULT_MAX_CODE_SIZE, DEFAULT_MAX_NESTING};

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget per run.
    pub timeout: Duration,
    /// Step budget per run.
    pub max_steps: u64,
    /// Deepest script call stack before `RuntimeError`.
    pub max_call_depth: usize,
    /// Longest sequence a script may build.
    pub max_sequence_len: usize,
    /// Maximum source size in bytes.
    pub max_code_size: usize,
    /// Maximum bracket nesting in the source.
    pub max_nesting: usize,
    /// Maximum concurrent async executions.
    pub max_concurrent: usize,
    /// Stack size of the thread each async execution runs on.
    pub stack_size: usize,
    pub check_policy: CheckPolicy,
    pub builtin_policy: BuiltinPolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            timeout: limits.timeout,
            max_steps: limits.max_steps,
            max_call_depth: limits.max_call_depth,
            max_sequence_len: limits.max_sequence_len,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_nesting: DEFAULT_MAX_NESTING,
            max_concurrent: 8,
            stack_size: 32 * 1024 * 1024, // 32 MB
            check_policy: CheckPolicy::default(),
            builtin_policy: BuiltinPolicy::default(),
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_steps: self.max_steps,
            timeout: self.timeout,
            max_call_depth: self.max_call_depth,
            max_sequence_len: self.max_sequence_len,
        }
    }
}

/// Result of an async execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    /// Everything the script printed.
    pub output: String,
    /// The context after the run. Values with no JSON form are dropped.
    pub context: Map<String, Json>,
}

/// Everything a run needs, shareable with the worker thread.
struct Engine {
    config: SandboxConfig,
    namespace: Arc<Namespace>,
}

impl Engine {
    fn check(&self, source: &str) -> Result<(), SafeError> {
        validate_code(source, Some(self.config.max_code_size), Some(self.config.max_nesting))?;
        checker::check_with(source, &self.config.check_policy)
    }

    fn run_restricted(&self, source: &str, ctx: &mut Context) -> Result<(), SafeError> {
        validate_code(source, Some(self.config.max_code_size), Some(self.config.max_nesting))?;
        sandbox::run_restricted_with(
            source,
            ctx,
            self.namespace.clone(),
            self.config.limits(),
            &self.config.check_policy,
        )
    }

    fn run_unrestricted(&self, source: &str, ctx: &mut Context) -> Result<(), SafeError> {
        validate_code(source, Some(self.config.max_code_size), Some(self.config.max_nesting))?;
        sandbox::run_unrestricted_with(source, ctx, self.config.limits())
    }

    fn safe_exec(&self, source: &str, ctx: &mut Context, run_safe: bool) -> Result<(), SafeError> {
        ctx.set(RESTRICTED_KEY, run_safe);
        if run_safe {
            self.check(source)?;
            self.run_restricted(source, ctx)
        } else {
            self.run_unrestricted(source, ctx)
        }
    }

    /// One full JSON-in, JSON-out run. Returns the output size for auditing.
    fn execute(
        &self,
        source: &str,
        vars: &Map<String, Json>,
        run_safe: bool,
    ) -> (usize, Result<Outcome, SafeError>) {
        let mut ctx = match context_from_json(vars) {
            Ok(ctx) => ctx,
            Err(e) => return (0, Err(e)),
        };
        let result = self.safe_exec(source, &mut ctx, run_safe);
        let output = ctx.take_output();
        let bytes = output.len();
        let outcome = result.map(|()| Outcome {
            output,
            context: context_to_json(&ctx),
        });
        (bytes, outcome)
    }
}

/// Checks and runs scripts under one configuration.
///
/// `Send + Sync`: the namespace is immutable and shared, and every async
/// execution gets its own thread. A semaphore caps concurrent executions.
pub struct SafeExecutor {
    engine: Arc<Engine>,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<crate::metrics::SafexecMetrics>>,
}

impl SafeExecutor {
    /// Build an executor, validating both policies.
    pub fn new(config: SandboxConfig) -> Result<Self, SafeError> {
        Self::with_audit_logger(config, Arc::new(NoopAuditLogger))
    }

    pub fn with_audit_logger(
        config: SandboxConfig,
        logger: Arc<dyn AuditLogger>,
    ) -> Result<Self, SafeError> {
        config.check_policy.validate()?;
        let namespace = if config.builtin_policy.is_default() {
            Namespace::restricted_default()
        } else {
            Arc::new(Namespace::restricted(&config.builtin_policy)?)
        };
        tracing::debug!(
            allowed_kinds = config.check_policy.allowed_kinds.len(),
            builtins = namespace.allowed_names().count(),
            max_concurrent = config.max_concurrent,
            "executor ready"
        );
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            engine: Arc::new(Engine { config, namespace }),
            audit_logger: logger,
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Record every async execution in `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<crate::metrics::SafexecMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.engine.config
    }

    /// The restricted namespace runs are bound to.
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.engine.namespace
    }

    /// Validate and statically check `source`.
    pub fn check(&self, source: &str) -> Result<(), SafeError> {
        self.engine.check(source)
    }

    /// Run pre-checked source against the restricted namespace.
    pub fn run_restricted(&self, source: &str, ctx: &mut Context) -> Result<(), SafeError> {
        self.engine.run_restricted(source, ctx)
    }

    /// Run source with every built-in and no check.
    pub fn run_unrestricted(&self, source: &str, ctx: &mut Context) -> Result<(), SafeError> {
        self.engine.run_unrestricted(source, ctx)
    }

    /// Check then run restricted, or run unrestricted when `run_safe` is false.
    pub fn safe_exec(
        &self,
        source: &str,
        ctx: &mut Context,
        run_safe: bool,
    ) -> Result<(), SafeError> {
        self.engine.safe_exec(source, ctx, run_safe)
    }

    /// Run `source` against a JSON context on a dedicated thread.
    ///
    /// Emits one audit entry per call, including calls refused for
    /// concurrency.
    pub async fn execute(
        &self,
        source: &str,
        context: Map<String, Json>,
        run_safe: bool,
    ) -> Result<Outcome, SafeError> {
        tracing::info!(code_len = source.len(), run_safe, "execute: starting");
        let audit = AuditEntryBuilder::new(source, ExecutionMode::from_flag(run_safe));

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let err = SafeError::ConcurrencyLimit {
                    max: self.engine.config.max_concurrent,
                };
                self.audit_logger.log(&audit.finish(0, Some(&err))).await;
                #[cfg(feature = "metrics")]
                if let Some(m) = &self.metrics {
                    m.record_error(err.code());
                }
                return Err(err);
            }
        };

        #[cfg(feature = "metrics")]
        if let Some(m) = &self.metrics {
            m.executions_in_flight.inc();
        }

        let engine = self.engine.clone();
        let source_owned = source.to_string();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("safexec-run".into())
            .stack_size(engine.config.stack_size)
            .spawn(move || {
                let result = engine.execute(&source_owned, &context, run_safe);
                drop(permit);
                if tx.send(result).is_err() {
                    tracing::warn!("execution result receiver dropped");
                }
            });

        let (output_bytes, result) = match spawned {
            Ok(_) => match self.await_result(rx).await {
                Ok(pair) => pair,
                Err(e) => (0, Err(e)),
            },
            Err(e) => (0, Err(SafeError::Execution(e.into()))),
        };

        let entry = audit.finish(output_bytes, result.as_ref().err());
        self.audit_logger.log(&entry).await;

        #[cfg(feature = "metrics")]
        if let Some(m) = &self.metrics {
            m.executions_in_flight.dec();
            m.record_execution(entry.mode, entry.duration_ms as f64 / 1000.0);
            if let Err(e) = &result {
                m.record_error(e.code());
            }
        }

        match &result {
            Ok(_) => tracing::info!(
                execution_id = %entry.execution_id,
                output_bytes,
                duration_ms = entry.duration_ms,
                "execute: complete"
            ),
            Err(e) => tracing::warn!(
                execution_id = %entry.execution_id,
                code = e.code(),
                error = %e,
                "execute: failed"
            ),
        }
        result
    }

    /// Wait for the worker, allowing twice the script timeout before giving
    /// up on a run that stopped ticking its budget.
    async fn await_result(
        &self,
        rx: tokio::sync::oneshot::Receiver<(usize, Result<Outcome, SafeError>)>,
    ) -> Result<(usize, Result<Outcome, SafeError>), SafeError> {
        let timeout = self.engine.config.timeout;
        match tokio::time::timeout(timeout * 2 + Duration::from_secs(1), rx).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(_)) => Err(SafeError::Execution(anyhow::anyhow!(
                "execution thread panicked"
            ))),
            Err(_) => Err(SafeError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

// The executor is shared across tasks.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<SafeExecutor>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> SafeExecutor {
        SafeExecutor::new(SandboxConfig::default()).unwrap()
    }

    #[test]
    fn default_config_matches_limits() {
        let config = SandboxConfig::default();
        assert_eq!(config.limits(), Limits::default());
        assert_eq!(config.max_code_size, 64 * 1024);
    }

    #[test]
    fn invalid_policies_are_refused() {
        let mut config = SandboxConfig::default();
        config.builtin_policy.allowed.insert("no_such_builtin".into());
        assert!(matches!(
            SafeExecutor::new(config),
            Err(SafeError::InvalidPolicy(_))
        ));

        let mut config = SandboxConfig::default();
        config.check_policy.deny_contains.push(String::new());
        assert!(SafeExecutor::new(config).is_err());
    }

    #[test]
    fn default_policy_shares_cached_namespace() {
        let exec = executor();
        assert!(Arc::ptr_eq(exec.namespace(), &Namespace::restricted_default()));
    }

    #[test]
    fn sync_operations() {
        let exec = executor();
        assert!(exec.check("x = 1 + 2").is_ok());
        assert!(matches!(exec.check("   "), Err(SafeError::EmptyCode)));

        let mut ctx = Context::new();
        exec.safe_exec("x = 1 + 2", &mut ctx, true).unwrap();
        assert_eq!(ctx.get("x").and_then(|v| v.as_int()), Some(3));

        let mut ctx = Context::new();
        let err = exec.run_restricted("open('f.txt', 'w')", &mut ctx).unwrap_err();
        assert!(matches!(err, SafeError::RunBuiltin { ref name } if name == "open"));
    }

    #[test]
    fn strict_preset_applies_to_checks() {
        let config = SandboxConfig {
            check_policy: CheckPolicy::strict(),
            ..SandboxConfig::default()
        };
        let exec = SafeExecutor::new(config).unwrap();
        assert!(matches!(exec.check("_x = 1"), Err(SafeError::CheckStr { .. })));
        assert!(executor().check("_x = 1").is_ok());
    }

    #[tokio::test]
    async fn execute_round_trips_json_context() {
        let exec = executor();
        let result = exec
            .execute(
                "total = sum(items)\nprint 'total', total\nnames = [n.upper() for n in names]\n",
                json!({"items": [1, 2, 3], "names": ["a", "b"]})
                    .as_object()
                    .cloned()
                    .unwrap(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.output, "total 6\n");
        assert_eq!(result.context["total"], json!(6));
        assert_eq!(result.context["names"], json!(["A", "B"]));
        assert_eq!(result.context["restricted"], json!(true));
    }

    #[tokio::test]
    async fn execute_reports_rejections() {
        let exec = executor();
        let err = exec.execute("import os", Map::new(), true).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(err.code(), "CHECK_NODE");
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn execute_records_metrics() {
        use crate::metrics::{ErrorLabels, ExecutionLabels, SafexecMetrics};

        let mut registry = prometheus_client::registry::Registry::default();
        let metrics = Arc::new(SafexecMetrics::new(&mut registry));
        let exec = executor().with_metrics(metrics.clone());

        exec.execute("x = 1", Map::new(), true).await.unwrap();
        let _ = exec.execute("import os", Map::new(), true).await;

        let restricted = ExecutionLabels {
            mode: "restricted".into(),
        };
        assert_eq!(metrics.executions_total.get_or_create(&restricted).get(), 2);
        let rejected = ErrorLabels {
            code: "CHECK_NODE".into(),
        };
        assert_eq!(metrics.errors_total.get_or_create(&rejected).get(), 1);
        assert_eq!(metrics.executions_in_flight.get(), 0);
    }

    #[tokio::test]
    async fn execute_enforces_step_limit() {
        let config = SandboxConfig {
            max_steps: 10_000,
            ..SandboxConfig::default()
        };
        let exec = SafeExecutor::new(config).unwrap();
        let err = exec
            .execute("while True:\n    pass\n", Map::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SafeError::StepLimit { max: 10_000 }));
    }
}
