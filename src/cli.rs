//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the Q CLI supervisor.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::types::{PermissionMode, SupervisorConfig};

/// Q Developer CLI supervisor - run `q chat` sessions and stream their output
#[derive(Parser, Debug, Clone)]
#[command(name = "qdev-supervisor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long, global = true)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE", global = true)]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// OpenTelemetry OTLP endpoint (e.g., http://localhost:4317)
    /// When otel feature is enabled, this configures the OTLP exporter.
    /// When otel feature is disabled, this argument is accepted but ignored.
    #[arg(long, value_name = "URL", env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otel_endpoint: Option<String>,

    /// OpenTelemetry service name
    #[arg(long, value_name = "NAME", default_value = "qdev-supervisor", global = true)]
    pub otel_service_name: String,

    /// Path or name of the Q Developer CLI binary
    #[arg(long, value_name = "PATH", env = "QDEV_CLI_PATH", global = true)]
    pub cli_path: Option<String>,

    /// Grace period between SIGTERM and SIGKILL when aborting a run
    #[arg(long, value_name = "MS", env = "QDEV_KILL_GRACE_MS", global = true)]
    pub kill_grace_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to do; `serve` when omitted
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the JSON-lines protocol on stdin/stdout
    Serve,
    /// Run one prompt and print its events as JSON lines
    Run(RunArgs),
}

/// Arguments of the `run` subcommand
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Prompt passed to `q chat`
    #[arg(default_value = "")]
    pub prompt: String,

    /// Working directory of the run (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Session identifier (generated when omitted)
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,

    /// Image file to attach; may be repeated
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// Resume the previous conversation in the working directory
    #[arg(long)]
    pub resume: bool,

    /// Tools to trust, comma separated
    #[arg(long, value_name = "TOOLS", value_delimiter = ',')]
    pub trust_tools: Vec<String>,

    /// Trust every tool
    #[arg(long)]
    pub trust_all_tools: bool,

    /// Permission mode (default, acceptEdits, plan, bypassPermissions)
    #[arg(long, value_name = "MODE", value_parser = parse_permission_mode, default_value = "default")]
    pub permission_mode: PermissionMode,
}

fn parse_permission_mode(s: &str) -> Result<PermissionMode, String> {
    PermissionMode::parse(s).ok_or_else(|| format!("unknown permission mode: {s}"))
}

#[allow(clippy::derivable_impls)]
impl Default for Cli {
    fn default() -> Self {
        Self {
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
            otel_endpoint: None,
            otel_service_name: "qdev-supervisor".to_string(),
            cli_path: None,
            kill_grace_ms: None,
            command: None,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Check if OpenTelemetry tracing is enabled
    #[cfg(feature = "otel")]
    pub fn is_otel_enabled(&self) -> bool {
        self.otel_endpoint.is_some()
    }

    /// Check if OpenTelemetry tracing is enabled (always false without otel feature)
    #[cfg(not(feature = "otel"))]
    pub fn is_otel_enabled(&self) -> bool {
        if self.otel_endpoint.is_some() {
            tracing::warn!("--otel-endpoint specified but otel feature is not enabled, ignoring");
        }
        false
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Defaults to `qdev-supervisor-{timestamp}.log` in the system temp directory.
    pub fn log_path(&self) -> PathBuf {
        let dir = self
            .log_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("qdev-supervisor-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// The selected subcommand
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Supervisor configuration: environment first, then flags
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::from_env();
        if let Some(path) = self.cli_path.as_deref().filter(|p| !p.trim().is_empty()) {
            config = config.with_cli_path(path);
        }
        if let Some(ms) = self.kill_grace_ms {
            config = config.with_kill_grace(Duration::from_millis(ms));
        }
        config
    }
}
