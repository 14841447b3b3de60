//! Audit logging for script executions.
//!
//! Every call through [`crate::SafeExecutor::execute`] emits an [`AuditEntry`]
//! with a SHA-256 hash of the source, a short preview, the execution mode,
//! duration and outcome. The [`AuditLogger`] trait allows pluggable backends;
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any `AsyncWrite`.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::SafeError;

/// Maximum length of the code preview in audit entries.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single execution.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Unique execution identifier.
    pub execution_id: String,
    /// When execution started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of the submitted source.
    pub code_hash: String,
    /// First bytes of the source, for human review.
    pub code_preview: String,
    pub mode: ExecutionMode,
    /// Total execution duration in milliseconds.
    pub duration_ms: u64,
    /// Bytes the script printed.
    pub output_bytes: usize,
    pub outcome: AuditOutcome,
}

/// Which namespace the script ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Restricted,
    Unrestricted,
}

impl ExecutionMode {
    pub fn from_flag(run_safe: bool) -> Self {
        if run_safe {
            Self::Restricted
        } else {
            Self::Unrestricted
        }
    }
}

/// The outcome of an execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditOutcome {
    /// Script ran to completion.
    Success,
    /// Refused before running (validation, syntax or checker).
    Rejected { code: String, message: String },
    /// Failed while running.
    Error { code: String, message: String },
    /// Ran past its deadline.
    Timeout,
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &AuditEntry);
}

/// Writes audit entries as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &AuditEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write audit entry");
        }
        let _ = writer.flush().await;
    }
}

/// Audit logger that discards everything.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &AuditEntry) {}
}

/// Emits audit entries as `INFO` events with `audit = true`.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &AuditEntry) {
        let (outcome, code) = match &entry.outcome {
            AuditOutcome::Success => ("success", None),
            AuditOutcome::Rejected { code, .. } => ("rejected", Some(code.as_str())),
            AuditOutcome::Error { code, .. } => ("error", Some(code.as_str())),
            AuditOutcome::Timeout => ("timeout", None),
        };
        tracing::info!(
            audit = true,
            execution_id = %entry.execution_id,
            mode = ?entry.mode,
            code_hash = %entry.code_hash,
            duration_ms = entry.duration_ms,
            output_bytes = entry.output_bytes,
            outcome,
            code = code.unwrap_or(""),
            "audit"
        );
    }
}

/// SHA-256 of a string as lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// First [`CODE_PREVIEW_MAX`] bytes of the source, cut on a char boundary.
pub fn code_preview(code: &str) -> String {
    if code.len() <= CODE_PREVIEW_MAX {
        return code.to_string();
    }
    let mut end = CODE_PREVIEW_MAX;
    while !code.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &code[..end])
}

/// Collects the parts of an [`AuditEntry`] while an execution runs.
pub struct AuditEntryBuilder {
    execution_id: String,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    mode: ExecutionMode,
    start: Instant,
}

impl AuditEntryBuilder {
    pub fn new(code: &str, mode: ExecutionMode) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code),
            code_preview: code_preview(code),
            mode,
            start: Instant::now(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Finalize the entry. `error` is `None` on success.
    pub fn finish(self, output_bytes: usize, error: Option<&SafeError>) -> AuditEntry {
        let outcome = match error {
            None => AuditOutcome::Success,
            Some(SafeError::Timeout { .. }) => AuditOutcome::Timeout,
            Some(e) if e.is_rejection() => AuditOutcome::Rejected {
                code: e.code().to_string(),
                message: e.to_string(),
            },
            Some(e) => AuditOutcome::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        };
        AuditEntry {
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            mode: self.mode,
            duration_ms: self.start.elapsed().as_millis() as u64,
            output_bytes,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(outcome: AuditOutcome) -> AuditEntry {
        AuditEntry {
            execution_id: "test-id".into(),
            timestamp: Utc::now(),
            code_hash: "abc123".into(),
            code_preview: "print 1".into(),
            mode: ExecutionMode::Restricted,
            duration_ms: 42,
            output_bytes: 2,
            outcome,
        }
    }

    #[test]
    fn sha256_hex_produces_correct_hash() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn code_preview_short_code_unchanged() {
        assert_eq!(code_preview("x = 1"), "x = 1");
        let exact = "a".repeat(500);
        assert_eq!(code_preview(&exact), exact);
    }

    #[test]
    fn code_preview_long_code_truncated() {
        let preview = code_preview(&"x".repeat(1000));
        assert_eq!(preview.len(), 503);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn code_preview_multibyte_boundary() {
        let mut code = "a".repeat(499);
        code.push('\u{1F600}');
        code.push_str(&"b".repeat(100));
        let preview = code_preview(&code);
        assert_eq!(preview, format!("{}...", "a".repeat(499)));
    }

    #[test]
    fn builder_classifies_outcomes() {
        let ok = AuditEntryBuilder::new("x = 1", ExecutionMode::Restricted).finish(0, None);
        assert!(matches!(ok.outcome, AuditOutcome::Success));
        assert_eq!(ok.code_hash, sha256_hex("x = 1"));
        assert!(Uuid::parse_str(&ok.execution_id).is_ok());

        let rejected = SafeError::CheckNode {
            line: 1,
            kind: "Import".into(),
        };
        let e = AuditEntryBuilder::new("import os", ExecutionMode::Restricted)
            .finish(0, Some(&rejected));
        assert!(
            matches!(e.outcome, AuditOutcome::Rejected { ref code, .. } if code == "CHECK_NODE")
        );

        let failed = SafeError::RunBuiltin { name: "open".into() };
        let e = AuditEntryBuilder::new("open('x')", ExecutionMode::Restricted)
            .finish(0, Some(&failed));
        assert!(matches!(e.outcome, AuditOutcome::Error { ref code, .. } if code == "RUN_BUILTIN"));

        let timeout = SafeError::Timeout { timeout_ms: 5 };
        let e = AuditEntryBuilder::new("while 1: pass", ExecutionMode::Unrestricted)
            .finish(0, Some(&timeout));
        assert!(matches!(e.outcome, AuditOutcome::Timeout));
    }

    #[tokio::test]
    async fn json_lines_logger_writes_valid_json() {
        let logger = JsonLinesAuditLogger::new(Vec::<u8>::new());
        logger.log(&entry(AuditOutcome::Success)).await;
        logger
            .log(&entry(AuditOutcome::Rejected {
                code: "CHECK_STR".into(),
                message: "line 1: attr value \"__class__\" is not allowed".into(),
            }))
            .await;

        let writer = logger.writer.lock().await;
        let output = String::from_utf8(writer.clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["execution_id"], "test-id");
        assert_eq!(first["duration_ms"], 42);
        assert_eq!(first["mode"], "restricted");
        assert_eq!(first["outcome"], "success");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["outcome"]["rejected"]["code"], "CHECK_STR");
    }

    #[tokio::test]
    async fn tracing_and_noop_loggers_accept_any_entry() {
        TracingAuditLogger.log(&entry(AuditOutcome::Timeout)).await;
        NoopAuditLogger
            .log(&entry(AuditOutcome::Error {
                code: "SCRIPT".into(),
                message: "boom".into(),
            }))
            .await;
    }
}
