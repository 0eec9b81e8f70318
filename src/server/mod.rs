//! Stdio transport
//!
//! Speaks a JSON-lines protocol on stdin/stdout:
//! - `command` starts a run and streams its events
//! - `abort-session` aborts a run and answers with `session-aborted`
//! - `list-sessions` answers with `active-sessions`

mod handlers;
mod protocol;
mod runner;

pub use handlers::{StdioServer, serve, write_outbound};
pub use protocol::{ControlMessage, InboundMessage, OutboundMessage};
pub use runner::{build_request, exit_code_for, run_with_cli, shutdown_otel};
