//! # safexec-config
//!
//! Configuration loading for safexec.
//!
//! Supports TOML configuration files with environment variable expansion.
//!
//! ## Example
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 2000
//! max_steps = 1000000
//! max_concurrent = 4
//! restricted = true
//!
//! [policy]
//! preset = "hardened"
//! deny_prefixes = ["im_", "func_", "${EXTRA_PREFIX}"]
//! allowed_builtins = ["len", "range", "str", "None", "True", "False"]
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use safexec_sandbox::{BuiltinPolicy, CheckPolicy, Namespace, Preset, SandboxConfig};
use serde::Deserialize;
use thiserror::Error;

#[cfg(feature = "config-watch")]
pub mod watcher;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level safexec configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafexecConfig {
    /// Execution limits and defaults.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// Checker and built-in policy.
    #[serde(default)]
    pub policy: PolicyOverrides,
}

/// Sandbox limit overrides. Unset fields keep the library defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxOverrides {
    /// Wall-clock budget per run, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Step budget per run.
    #[serde(default)]
    pub max_steps: Option<u64>,

    /// Deepest script call stack.
    #[serde(default)]
    pub max_call_depth: Option<usize>,

    /// Longest string, list or range a script may build.
    #[serde(default)]
    pub max_sequence_len: Option<usize>,

    /// Maximum source size in bytes.
    #[serde(default)]
    pub max_code_size: Option<usize>,

    /// Maximum bracket nesting in the source.
    #[serde(default)]
    pub max_nesting: Option<usize>,

    /// Maximum concurrent executions.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Whether runs are restricted unless told otherwise.
    #[serde(default)]
    pub restricted: Option<bool>,
}

/// Policy overrides. A list that is present replaces the preset's list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    /// `default`, `hardened` or `strict`.
    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default)]
    pub allowed_kinds: Option<Vec<String>>,

    #[serde(default)]
    pub allowed_fields: Option<Vec<String>>,

    #[serde(default)]
    pub exempt_strings: Option<Vec<String>>,

    #[serde(default)]
    pub deny_contains: Option<Vec<String>>,

    #[serde(default)]
    pub deny_prefixes: Option<Vec<String>>,

    #[serde(default)]
    pub deny_suffixes: Option<Vec<String>>,

    /// Built-ins bound to their real values in restricted runs.
    #[serde(default)]
    pub allowed_builtins: Option<Vec<String>>,

    /// Built-ins bound to empty strings in restricted runs.
    #[serde(default)]
    pub stubbed_builtins: Option<Vec<String>>,
}

impl SafexecConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: SafexecConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// Whether runs should be restricted by default.
    pub fn restricted_by_default(&self) -> bool {
        self.sandbox.restricted.unwrap_or(true)
    }

    /// Build the executor configuration these overrides describe.
    pub fn sandbox_config(&self) -> Result<SandboxConfig, ConfigError> {
        let mut config = SandboxConfig::default();
        let s = &self.sandbox;
        if let Some(ms) = s.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = s.max_steps {
            config.max_steps = v;
        }
        if let Some(v) = s.max_call_depth {
            config.max_call_depth = v;
        }
        if let Some(v) = s.max_sequence_len {
            config.max_sequence_len = v;
        }
        if let Some(v) = s.max_code_size {
            config.max_code_size = v;
        }
        if let Some(v) = s.max_nesting {
            config.max_nesting = v;
        }
        if let Some(v) = s.max_concurrent {
            config.max_concurrent = v;
        }
        config.check_policy = self.check_policy()?;
        config.builtin_policy = self.builtin_policy();
        Ok(config)
    }

    /// The checker policy: the preset with any listed overrides applied.
    pub fn check_policy(&self) -> Result<CheckPolicy, ConfigError> {
        let p = &self.policy;
        let preset = match &p.preset {
            Some(name) => name
                .parse::<Preset>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            None => Preset::Default,
        };
        let mut policy = CheckPolicy::preset(preset);
        if let Some(kinds) = &p.allowed_kinds {
            policy = policy
                .with_allowed_kinds(kinds)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(fields) = &p.allowed_fields {
            policy.allowed_fields = set(fields);
        }
        if let Some(exempt) = &p.exempt_strings {
            policy.exempt_strings = set(exempt);
        }
        if let Some(list) = &p.deny_contains {
            policy.deny_contains = list.clone();
        }
        if let Some(list) = &p.deny_prefixes {
            policy.deny_prefixes = list.clone();
        }
        if let Some(list) = &p.deny_suffixes {
            policy.deny_suffixes = list.clone();
        }
        policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(policy)
    }

    /// The built-in policy for restricted runs.
    pub fn builtin_policy(&self) -> BuiltinPolicy {
        let mut policy = BuiltinPolicy::default();
        if let Some(allowed) = &self.policy.allowed_builtins {
            policy.allowed = set(allowed);
        }
        if let Some(stubbed) = &self.policy.stubbed_builtins {
            policy.stubbed = set(stubbed);
        }
        policy
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sandbox;
        let positive = [
            ("timeout_ms", s.timeout_ms),
            ("max_steps", s.max_steps),
            ("max_call_depth", s.max_call_depth.map(|v| v as u64)),
            ("max_sequence_len", s.max_sequence_len.map(|v| v as u64)),
            ("max_code_size", s.max_code_size.map(|v| v as u64)),
            ("max_nesting", s.max_nesting.map(|v| v as u64)),
            ("max_concurrent", s.max_concurrent.map(|v| v as u64)),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.{name} must be greater than zero"
                )));
            }
        }
        self.check_policy()?;
        Namespace::restricted(&self.builtin_policy())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

fn set(items: &[String]) -> BTreeSet<String> {
    items.iter().cloned().collect()
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // Unresolved placeholders stay as written.
                Err(_) => {
                    tracing::warn!(var = %var_name, "config references unset environment variable");
                    result.push_str(&format!("${{{var_name}}}"));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use safexec_sandbox::NodeKind;
    use serial_test::serial;

    #[test]
    fn config_empty_is_valid() {
        let config = SafexecConfig::from_toml("").unwrap();
        assert!(config.restricted_by_default());
        let sandbox = config.sandbox_config().unwrap();
        assert_eq!(sandbox.limits(), SandboxConfig::default().limits());
        assert_eq!(sandbox.check_policy, CheckPolicy::default());
        assert!(sandbox.builtin_policy.is_default());
    }

    #[test]
    fn config_parses_sandbox_overrides() {
        let toml = r#"
            [sandbox]
            timeout_ms = 250
            max_steps = 5000
            max_call_depth = 20
            max_sequence_len = 1024
            max_code_size = 4096
            max_nesting = 16
            max_concurrent = 2
            restricted = false
        "#;

        let config = SafexecConfig::from_toml(toml).unwrap();
        assert!(!config.restricted_by_default());
        let sandbox = config.sandbox_config().unwrap();
        assert_eq!(sandbox.timeout, Duration::from_millis(250));
        assert_eq!(sandbox.max_steps, 5000);
        assert_eq!(sandbox.max_call_depth, 20);
        assert_eq!(sandbox.max_sequence_len, 1024);
        assert_eq!(sandbox.max_code_size, 4096);
        assert_eq!(sandbox.max_nesting, 16);
        assert_eq!(sandbox.max_concurrent, 2);
    }

    #[test]
    fn config_applies_preset_then_lists() {
        let toml = r#"
            [policy]
            preset = "hardened"
            deny_suffixes = ["__", "_private"]
        "#;

        let policy = SafexecConfig::from_toml(toml).unwrap().check_policy().unwrap();
        assert_eq!(policy.deny_prefixes, CheckPolicy::hardened().deny_prefixes);
        assert_eq!(policy.deny_suffixes, vec!["__", "_private"]);
    }

    #[test]
    fn config_replaces_allowed_kinds() {
        let toml = r#"
            [policy]
            allowed_kinds = ["Module", "Stmt", "Assign", "AssName", "Const"]
        "#;

        let policy = SafexecConfig::from_toml(toml).unwrap().check_policy().unwrap();
        assert_eq!(policy.allowed_kinds.len(), 5);
        assert!(policy.is_kind_allowed(NodeKind::Assign));
        assert!(!policy.is_kind_allowed(NodeKind::CallFunc));
    }

    #[test]
    fn config_builtin_lists() {
        let toml = r#"
            [policy]
            allowed_builtins = ["len", "None"]
            stubbed_builtins = ["copyright"]
        "#;

        let builtins = SafexecConfig::from_toml(toml).unwrap().builtin_policy();
        assert_eq!(builtins.allowed.len(), 2);
        assert!(builtins.stubbed.contains("copyright"));
        assert!(!builtins.is_default());
    }

    #[test]
    fn config_rejects_unknown_preset() {
        let err = SafexecConfig::from_toml("[policy]\npreset = \"paranoid\"\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("paranoid"), "error should mention the preset: {msg}");
        assert!(msg.contains("hardened"), "error should list the presets: {msg}");
    }

    #[test]
    fn config_rejects_unknown_kind() {
        let err = SafexecConfig::from_toml("[policy]\nallowed_kinds = [\"Module\", \"Yield\"]\n")
            .unwrap_err();
        assert!(err.to_string().contains("Yield"));
    }

    #[test]
    fn config_rejects_empty_denial_string() {
        let err = SafexecConfig::from_toml("[policy]\ndeny_contains = [\"\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_rejects_zero_limits() {
        let err = SafexecConfig::from_toml("[sandbox]\nmax_concurrent = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn config_rejects_builtin_in_both_lists() {
        let toml = r#"
            [policy]
            allowed_builtins = ["len"]
            stubbed_builtins = ["len"]
        "#;
        let err = SafexecConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("len"));
    }

    #[test]
    fn config_rejects_unknown_builtin() {
        let err = SafexecConfig::from_toml("[policy]\nallowed_builtins = [\"spawn\"]\n")
            .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }

    #[test]
    fn config_rejects_unknown_keys() {
        let err = SafexecConfig::from_toml("[sandbox]\nmax_heap_mb = 64\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safexec.toml");
        std::fs::write(&path, "[sandbox]\nmax_steps = 42\n").unwrap();

        let config = SafexecConfig::from_file(&path).unwrap();
        assert_eq!(config.sandbox.max_steps, Some(42));

        let missing = SafexecConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }

    #[test]
    #[serial]
    fn config_expands_environment_variables() {
        std::env::set_var("SAFEXEC_TEST_PREFIX", "tmp_");
        let toml = r#"
            [policy]
            deny_prefixes = ["${SAFEXEC_TEST_PREFIX}"]
        "#;

        let policy = SafexecConfig::from_toml_with_env(toml)
            .unwrap()
            .check_policy()
            .unwrap();
        assert_eq!(policy.deny_prefixes, vec!["tmp_"]);
        std::env::remove_var("SAFEXEC_TEST_PREFIX");
    }

    #[test]
    #[serial]
    fn env_var_expansion_preserves_unresolved() {
        std::env::remove_var("SAFEXEC_DEFINITELY_NOT_SET");
        let result = expand_env_vars("prefix ${SAFEXEC_DEFINITELY_NOT_SET} suffix");
        assert_eq!(result, "prefix ${SAFEXEC_DEFINITELY_NOT_SET} suffix");
    }

    #[test]
    fn env_var_expansion_handles_no_vars() {
        assert_eq!(expand_env_vars("no variables here"), "no variables here");
    }
}
