//! Error types for the safexec sandbox.

use thiserror::Error;

/// Errors produced while validating, checking or running a script.
///
/// The check-time variants ([`SafeError::CheckNode`], [`SafeError::CheckStr`])
/// and the run-time guard variant ([`SafeError::RunBuiltin`]) are the
/// sandbox's own diagnostics. Everything else is either a lower-level failure
/// (syntax errors, uncaught script exceptions) or a resource limit.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SafeError {
    /// The source could not be parsed.
    #[error("syntax error at line {line}: {message}")]
    Syntax {
        /// Line of the offending token.
        line: u32,
        /// Parser diagnostic.
        message: String,
    },

    /// A syntax node kind is not in the allow-list.
    #[error("line {line}: construct `{kind}` is not allowed")]
    CheckNode {
        /// Source line of the node.
        line: u32,
        /// Node kind name.
        kind: String,
    },

    /// A string field matched one of the denial rules.
    #[error("line {line}: {field} value {value:?} is not allowed")]
    CheckStr {
        /// Source line of the node.
        line: u32,
        /// Name of the field holding the string.
        field: String,
        /// The offending value.
        value: String,
    },

    /// Sandboxed code called a built-in that the namespace denies.
    #[error("built-in `{name}` is not available in restricted mode")]
    RunBuiltin {
        /// The denied built-in name.
        name: String,
    },

    /// The script raised an exception that nothing caught.
    #[error("line {line}: {kind}: {message}")]
    Script {
        /// Exception class name (e.g. `ZeroDivisionError`).
        kind: String,
        /// `str()` of the exception.
        message: String,
        /// Line the exception was raised on.
        line: u32,
    },

    /// Source is empty or whitespace only.
    #[error("code is empty")]
    EmptyCode,

    /// Source exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Bracket or block nesting exceeds the parser's limit.
    #[error("nesting depth {actual} exceeds maximum {max}")]
    NestingTooDeep {
        /// Maximum allowed depth.
        max: usize,
        /// Depth found.
        actual: usize,
    },

    /// The script used up its step budget.
    #[error("execution exceeded {max} steps")]
    StepLimit {
        /// Configured step budget.
        max: u64,
    },

    /// The script ran past its wall-clock deadline.
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Too many concurrent executions on one executor.
    #[error("concurrency limit reached (max {max} concurrent executions)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent executions.
        max: usize,
    },

    /// A policy refers to something that does not exist.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A context value could not be converted to or from JSON.
    #[error("context conversion failed: {0}")]
    Conversion(String),

    /// Generic failure outside the script itself.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}

impl SafeError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "SYNTAX_ERROR",
            Self::CheckNode { .. } => "CHECK_NODE",
            Self::CheckStr { .. } => "CHECK_STR",
            Self::RunBuiltin { .. } => "RUN_BUILTIN",
            Self::Script { .. } => "SCRIPT_EXCEPTION",
            Self::EmptyCode => "EMPTY_CODE",
            Self::CodeTooLarge { .. } => "CODE_TOO_LARGE",
            Self::NestingTooDeep { .. } => "NESTING_TOO_DEEP",
            Self::StepLimit { .. } => "STEP_LIMIT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ConcurrencyLimit { .. } => "CONCURRENCY_LIMIT",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::Conversion(_) => "CONVERSION",
            Self::Execution(_) => "INTERNAL",
        }
    }

    /// Whether the script was turned away before any of it ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Syntax { .. }
                | Self::CheckNode { .. }
                | Self::CheckStr { .. }
                | Self::EmptyCode
                | Self::CodeTooLarge { .. }
                | Self::NestingTooDeep { .. }
        )
    }

    /// Source line the diagnostic points at, if it has one.
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Syntax { line, .. }
            | Self::CheckNode { line, .. }
            | Self::CheckStr { line, .. }
            | Self::Script { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Render the error as a JSON object a host can show to the script's author.
    ///
    /// Always contains `error`, `code` and `message`; `line` is present for
    /// diagnostics tied to a source location.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(line) = self.line() {
            obj["line"] = serde_json::Value::from(line);
        }
        match self {
            Self::CheckNode { kind, .. } => {
                obj["construct"] = serde_json::Value::String(kind.clone());
            }
            Self::CheckStr { field, value, .. } => {
                obj["field"] = serde_json::Value::String(field.clone());
                obj["value"] = serde_json::Value::String(value.clone());
            }
            Self::RunBuiltin { name } => {
                obj["builtin"] = serde_json::Value::String(name.clone());
            }
            Self::Script { kind, .. } => {
                obj["exception"] = serde_json::Value::String(kind.clone());
            }
            _ => {}
        }
        obj
    }
}

// SafeError crosses thread boundaries in the async executor.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<SafeError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_check_node() {
        let err = SafeError::CheckNode {
            line: 3,
            kind: "Import".into(),
        };
        assert_eq!(err.to_string(), "line 3: construct `Import` is not allowed");
    }

    #[test]
    fn display_check_str() {
        let err = SafeError::CheckStr {
            line: 1,
            field: "name".into(),
            value: "__class__".into(),
        };
        assert_eq!(
            err.to_string(),
            "line 1: name value \"__class__\" is not allowed"
        );
    }

    #[test]
    fn display_run_builtin() {
        let err = SafeError::RunBuiltin {
            name: "open".into(),
        };
        assert!(err.to_string().contains("`open`"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(SafeError::EmptyCode.code(), "EMPTY_CODE");
        assert_eq!(
            SafeError::StepLimit { max: 10 }.code(),
            "STEP_LIMIT"
        );
        assert_eq!(
            SafeError::Execution(anyhow::anyhow!("boom")).code(),
            "INTERNAL"
        );
    }

    #[test]
    fn rejections_are_pre_run_only() {
        assert!(SafeError::EmptyCode.is_rejection());
        assert!(SafeError::CheckNode {
            line: 1,
            kind: "Import".into()
        }
        .is_rejection());
        assert!(!SafeError::RunBuiltin {
            name: "open".into()
        }
        .is_rejection());
        assert!(!SafeError::Timeout { timeout_ms: 5 }.is_rejection());
    }

    #[test]
    fn structured_error_carries_diagnostics() {
        let err = SafeError::CheckStr {
            line: 7,
            field: "attrname".into(),
            value: "__dict__".into(),
        };
        let json = err.to_structured_error();
        assert_eq!(json["error"], true);
        assert_eq!(json["code"], "CHECK_STR");
        assert_eq!(json["line"], 7);
        assert_eq!(json["field"], "attrname");
        assert_eq!(json["value"], "__dict__");
    }

    #[test]
    fn structured_error_omits_line_when_absent() {
        let json = SafeError::RunBuiltin {
            name: "open".into(),
        }
        .to_structured_error();
        assert!(json.get("line").is_none());
        assert_eq!(json["builtin"], "open");
    }
}
