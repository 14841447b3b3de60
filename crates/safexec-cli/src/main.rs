//! safexec: check and run untrusted scripts from the command line.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use safexec_config::SafexecConfig;
use safexec_sandbox::{SafeError, SafeExecutor, TracingAuditLogger};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "safexec")]
#[command(version)]
#[command(about = "Check and run untrusted scripts in a restricted sandbox", long_about = None)]
struct Cli {
    /// Config file (defaults to $SAFEXEC_CONFIG, then ./safexec.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically check a script without running it
    Check {
        /// Script file, or `-` for stdin
        file: PathBuf,
    },

    /// Check and run a script, then print its output and variables
    Run {
        /// Script file, or `-` for stdin
        file: PathBuf,

        /// Initial variables, as a JSON object file
        #[arg(long)]
        context: Option<PathBuf>,

        /// Skip the checker and run with every built-in
        #[arg(long)]
        unrestricted: bool,
    },
}

/// Locate the config file.
///
/// Search order:
/// 1. `--config`
/// 2. `SAFEXEC_CONFIG` environment variable
/// 3. `./safexec.toml` in the current directory
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("SAFEXEC_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("safexec.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_config(explicit: Option<&Path>) -> Result<SafexecConfig> {
    match find_config_file(explicit) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            SafexecConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(SafexecConfig::default())
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_context(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read context from {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("context file {} is not valid JSON", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!(
            "context file {} must hold a JSON object, found {}",
            path.display(),
            json_kind(&other)
        ),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Exit status for a sandbox error: 2 when the script was refused, 1 when it failed.
fn exit_status(err: &SafeError) -> u8 {
    if err.is_rejection() {
        2
    } else {
        1
    }
}

/// Print a sandbox error as structured JSON on stderr.
fn report(err: &SafeError) -> ExitCode {
    eprintln!("{}", err.to_structured_error());
    ExitCode::from(exit_status(err))
}

fn build_executor(config: &SafexecConfig) -> Result<SafeExecutor> {
    let sandbox_config = config.sandbox_config()?;
    SafeExecutor::with_audit_logger(sandbox_config, Arc::new(TracingAuditLogger))
        .context("invalid sandbox policy")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let executor = build_executor(&config)?;

    match cli.command {
        Commands::Check { file } => {
            let source = read_source(&file)?;
            match executor.check(&source) {
                Ok(()) => {
                    println!("ok");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report(&e)),
            }
        }
        Commands::Run {
            file,
            context,
            unrestricted,
        } => {
            let source = read_source(&file)?;
            let vars = read_context(context.as_deref())?;
            let run_safe = !unrestricted && config.restricted_by_default();
            if !run_safe {
                tracing::warn!("running without the sandbox");
            }
            match executor.execute(&source, vars, run_safe).await {
                Ok(outcome) => {
                    print!("{}", outcome.output);
                    println!("{}", serde_json::to_string_pretty(&outcome.context)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report(&e)),
            }
        }
    }
}
