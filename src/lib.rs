//! Q Developer CLI supervisor
//!
//! Runs the `q` command-line assistant as a child process per session,
//! streams its output as structured events and lets callers abort a run by
//! session identifier.
//!
//! ## Features
//!
//! - One live process per session, tracked in a concurrent registry
//! - Streaming stdout/stderr as `output-chunk` / `error-chunk` events
//! - Abort with SIGTERM, escalating to SIGKILL after a grace period
//! - Inline `data:` image attachments staged to disk for the CLI
//! - JSON-lines stdio transport and a one-shot `run` mode
//!
//! ## Quick Start
//!
//! ```no_run
//! use qdev_supervisor::{MemorySink, RunRequest, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let supervisor = Supervisor::new(SupervisorConfig::from_env());
//!     let sink = MemorySink::new();
//!
//!     let output = supervisor
//!         .start(RunRequest::new("list files").with_cwd("/path/to/project"), &sink)
//!         .await?;
//!     println!("{}", output.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `QDEV_CLI_PATH`: CLI binary path or name (default: `q`)
//! - `QDEV_KILL_GRACE_MS`: grace period before SIGKILL on abort (default: 5000)
//! - `QDEV_STAGING_DIR`: attachment staging directory relative to the working
//!   directory (default: `.tmp/images`)

pub mod cli;
pub mod events;
pub mod server;
pub mod supervisor;
pub mod tracing;
pub mod types;

pub use cli::Cli;
pub use events::{ChannelSink, EventSink, MemorySink, StreamEvent};
pub use server::{run_with_cli, serve, shutdown_otel};
pub use supervisor::{ProcessInfo, SessionRegistry, Supervisor};
pub use types::{
    ImageAttachment, PermissionMode, Result, RunOptions, RunOutput, RunRequest, SupervisorConfig,
    SupervisorError,
};
