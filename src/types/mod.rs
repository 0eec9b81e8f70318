//! Public types for the Q CLI supervisor
//!
//! This module contains all the shared types used across the crate.

mod config;
mod error;
mod request;

pub use config::{DEFAULT_CLI_PATH, DEFAULT_KILL_GRACE, DEFAULT_STAGING_DIR, SupervisorConfig};
pub use error::{ErrorCode, Result, SupervisorError};
pub use request::{
    ImageAttachment, PermissionMode, RunOptions, RunOutput, RunRequest, ToolsSettings,
};
