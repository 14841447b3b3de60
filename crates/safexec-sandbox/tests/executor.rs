//! Async executor tests: JSON contexts, budgets, concurrency and audit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use safexec_sandbox::{
    AuditEntry, AuditLogger, AuditOutcome, ExecutionMode, SafeError, SafeExecutor, SandboxConfig,
};
use serde_json::{json, Map, Value};

/// Collects audit entries in memory.
#[derive(Default)]
struct RecordingLogger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingLogger {
    fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AuditLogger for RecordingLogger {
    async fn log(&self, entry: &AuditEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn executor_with(config: SandboxConfig) -> (SafeExecutor, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::default());
    let exec = SafeExecutor::with_audit_logger(config, logger.clone()).unwrap();
    (exec, logger)
}

#[tokio::test]
async fn context_flows_in_and_out() {
    let (exec, logger) = executor_with(SandboxConfig::default());
    let source = "\
def heal(unit, amount):
    unit['hp'] = min(unit['hp'] + amount, unit['max_hp'])
    return unit['hp']

for unit in units:
    heal(unit, 8)
    print unit['name'], unit['hp']
healed = len(units)
";
    let ctx = object(json!({
        "units": [
            {"name": "Konrad", "hp": 20, "max_hp": 32},
            {"name": "Delfador", "hp": 40, "max_hp": 42}
        ]
    }));

    let outcome = exec.execute(source, ctx, true).await.unwrap();
    assert_eq!(outcome.output, "Konrad 28\nDelfador 42\n");
    assert_eq!(outcome.context["healed"], json!(2));
    assert_eq!(outcome.context["units"][1]["hp"], json!(42));
    // Functions have no JSON form and are dropped from the exported context.
    assert!(!outcome.context.contains_key("heal"));

    let entries = logger.entries();
    assert_eq!(entries.len(), 1);
    assert!(matches!(entries[0].outcome, AuditOutcome::Success));
    assert_eq!(entries[0].mode, ExecutionMode::Restricted);
    assert_eq!(entries[0].output_bytes, outcome.output.len());
}

#[tokio::test]
async fn rejections_are_audited_as_rejected() {
    let (exec, logger) = executor_with(SandboxConfig::default());

    let err = exec.execute("x = y.__class__", Map::new(), true).await.unwrap_err();
    assert_eq!(err.code(), "CHECK_STR");

    let err = exec.execute("", Map::new(), true).await.unwrap_err();
    assert!(matches!(err, SafeError::EmptyCode));

    let entries = logger.entries();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert!(matches!(entry.outcome, AuditOutcome::Rejected { .. }), "{entry:?}");
    }
}

#[tokio::test]
async fn runtime_failures_are_audited_as_errors() {
    let (exec, logger) = executor_with(SandboxConfig::default());
    let err = exec
        .execute("print 'before'\nopen('/etc/passwd')\n", Map::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, SafeError::RunBuiltin { ref name } if name == "open"));

    let entries = logger.entries();
    match &entries[0].outcome {
        AuditOutcome::Error { code, .. } => assert_eq!(code, "RUN_BUILTIN"),
        other => panic!("expected error outcome, got {other:?}"),
    }
    assert_eq!(entries[0].output_bytes, "before\n".len());
}

#[tokio::test]
async fn unrestricted_mode_skips_the_checker() {
    let (exec, logger) = executor_with(SandboxConfig::default());
    let outcome = exec
        .execute("import math\nroot = int(math.sqrt(n))\n", object(json!({"n": 81})), false)
        .await
        .unwrap();
    assert_eq!(outcome.context["root"], json!(9));
    assert_eq!(outcome.context["restricted"], json!(false));
    assert_eq!(logger.entries()[0].mode, ExecutionMode::Unrestricted);
}

#[tokio::test]
async fn infinite_loop_times_out() {
    let config = SandboxConfig {
        timeout: Duration::from_millis(200),
        max_steps: u64::MAX,
        ..SandboxConfig::default()
    };
    let (exec, logger) = executor_with(config);
    let err = exec
        .execute("while True:\n    pass\n", Map::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, SafeError::Timeout { timeout_ms: 200 }), "{err:?}");
    assert!(matches!(logger.entries()[0].outcome, AuditOutcome::Timeout));
}

#[tokio::test]
async fn oversized_code_is_refused_before_parsing() {
    let config = SandboxConfig {
        max_code_size: 16,
        ..SandboxConfig::default()
    };
    let (exec, _) = executor_with(config);
    let err = exec
        .execute("x = 'a long enough string'", Map::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, SafeError::CodeTooLarge { max: 16, .. }));
}

#[tokio::test]
async fn unconvertible_context_is_refused() {
    let (exec, _) = executor_with(SandboxConfig::default());
    let err = exec
        .execute("x = 1", object(json!({"big": u64::MAX})), true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONVERSION");
}

#[tokio::test]
async fn concurrency_limit_is_enforced() {
    let config = SandboxConfig {
        max_concurrent: 1,
        timeout: Duration::from_millis(500),
        max_steps: u64::MAX,
        ..SandboxConfig::default()
    };
    let (exec, logger) = executor_with(config);
    let exec = Arc::new(exec);

    let busy = {
        let exec = exec.clone();
        tokio::spawn(async move {
            exec.execute("while True:\n    pass\n", Map::new(), true)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = exec.execute("x = 1", Map::new(), true).await.unwrap_err();
    assert!(matches!(err, SafeError::ConcurrencyLimit { max: 1 }));

    let first = busy.await.unwrap();
    assert!(matches!(first, Err(SafeError::Timeout { .. })));

    // The permit is released once the worker finishes.
    exec.execute("x = 1", Map::new(), true).await.unwrap();
    assert_eq!(logger.entries().len(), 3);
}

#[tokio::test]
async fn executions_do_not_share_state() {
    let (exec, _) = executor_with(SandboxConfig::default());
    exec.execute("leaked = 1", Map::new(), true).await.unwrap();
    let outcome = exec
        .execute("seen = 'leaked' in dict(globals_copy)", object(json!({"globals_copy": {}})), true)
        .await
        .unwrap();
    assert_eq!(outcome.context["seen"], json!(false));
    assert!(!outcome.context.contains_key("leaked"));
}
