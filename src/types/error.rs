//! Error types for the Q CLI supervisor

use std::path::PathBuf;

use thiserror::Error;

/// Error classification codes
///
/// Stable numeric codes carried in logs and protocol error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Protocol errors (-32xxx, JSON-RPC compatible)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid request: Not a valid request object
    InvalidRequest = -32600,
    /// Internal error
    InternalError = -32603,

    // Supervisor errors (-32000 to -32099)
    /// Session already has a live process
    SessionBusy = -32002,
    /// The CLI process could not be launched
    LaunchFailed = -32003,
    /// The CLI process exited with a non-zero status
    ProcessFailed = -32004,
    /// Working directory is missing or not a directory
    InvalidWorkingDirectory = -32005,
    /// Event sink rejected an event
    SinkClosed = -32006,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Main error type for the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    // === Session errors ===
    /// A live process is already registered for this session
    #[error("Session already has an active process: {0}")]
    SessionAlreadyActive(String),

    // === Launch errors ===
    /// Working directory does not exist or is not a directory
    #[error("Working directory not found: {}", .0.display())]
    WorkingDirectoryNotFound(PathBuf),

    /// The CLI binary could not be spawned
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // === Run errors ===
    /// The CLI exited with a non-zero status
    #[error("Process for session {session_id} exited with code {exit_code}: {stderr}")]
    ProcessFailed {
        session_id: String,
        exit_code: i32,
        stderr: String,
    },

    // === Transport errors ===
    /// The event sink is closed or refused the event
    #[error("Event sink closed: {0}")]
    SinkClosed(String),

    /// Inbound protocol message could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the supervisor
pub type Result<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SupervisorError::SessionAlreadyActive(_) => ErrorCode::SessionBusy,
            SupervisorError::WorkingDirectoryNotFound(_) => ErrorCode::InvalidWorkingDirectory,
            SupervisorError::LaunchFailed { .. } => ErrorCode::LaunchFailed,
            SupervisorError::ProcessFailed { .. } => ErrorCode::ProcessFailed,
            SupervisorError::SinkClosed(_) => ErrorCode::SinkClosed,
            SupervisorError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            SupervisorError::Io(_) => ErrorCode::InternalError,
            SupervisorError::Json(_) => ErrorCode::ParseError,
            SupervisorError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error is retryable
    ///
    /// Runs are never retried by the supervisor itself; this only tells a
    /// caller whether resubmitting the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupervisorError::SessionAlreadyActive(_) | SupervisorError::ProcessFailed { .. }
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::SessionAlreadyActive(_)
                | SupervisorError::WorkingDirectoryNotFound(_)
                | SupervisorError::InvalidRequest(_)
                | SupervisorError::Json(_)
        )
    }

    /// Whether this error ended a run before any process existed
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::LaunchFailed { .. }
                | SupervisorError::WorkingDirectoryNotFound(_)
                | SupervisorError::SessionAlreadyActive(_)
        )
    }

    /// Exit code of the child, when the error came from a finished process
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SupervisorError::ProcessFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SupervisorError::Internal(msg.into())
    }

    /// Create a session already active error
    pub fn session_already_active(session_id: impl Into<String>) -> Self {
        SupervisorError::SessionAlreadyActive(session_id.into())
    }

    /// Create a launch failed error
    pub fn launch_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        SupervisorError::LaunchFailed {
            program: program.into(),
            source,
        }
    }

    /// Create a sink closed error
    pub fn sink_closed(msg: impl Into<String>) -> Self {
        SupervisorError::SinkClosed(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        SupervisorError::InvalidRequest(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SupervisorError::session_already_active("test-123");
        assert_eq!(err.to_string(), "Session already has an active process: test-123");

        let err = SupervisorError::WorkingDirectoryNotFound(PathBuf::from("/nope"));
        assert_eq!(err.to_string(), "Working directory not found: /nope");
    }

    #[test]
    fn test_launch_failed_keeps_source() {
        use std::error::Error as _;

        let err = SupervisorError::launch_failed(
            "q",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to launch q: No such file or directory"
        );
        assert!(err.source().is_some());
        assert!(err.is_launch_failure());
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_error_codes() {
        let err = SupervisorError::session_already_active("test");
        assert_eq!(err.error_code(), ErrorCode::SessionBusy);
        assert_eq!(err.error_code().code(), -32002);

        let err = SupervisorError::ProcessFailed {
            session_id: "s".to_string(),
            exit_code: 2,
            stderr: String::new(),
        };
        assert_eq!(err.error_code(), ErrorCode::ProcessFailed);
        assert_eq!(err.exit_code(), Some(2));
        assert!(!err.is_launch_failure());
    }

    #[test]
    fn test_is_retryable() {
        assert!(SupervisorError::session_already_active("x").is_retryable());
        assert!(!SupervisorError::invalid_request("x").is_retryable());
        assert!(!SupervisorError::internal("oops").is_retryable());
    }

    #[test]
    fn test_is_client_error() {
        assert!(SupervisorError::WorkingDirectoryNotFound(PathBuf::from("/x")).is_client_error());
        assert!(SupervisorError::invalid_request("bad").is_client_error());
        assert!(!SupervisorError::sink_closed("gone").is_client_error());
        assert!(!SupervisorError::internal("oops").is_client_error());
    }
}
