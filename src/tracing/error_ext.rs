//! Error tracing extensions
//!
//! Logs a [`SupervisorError`] together with its code, classification and
//! source chain.

use crate::types::SupervisorError;
use std::error::Error as StdError;

/// Extension trait for adding tracing context to errors
pub trait ErrorTraceExt {
    /// Log error with error code, classification and error chain
    fn trace_error(&self) -> &Self;
}

impl ErrorTraceExt for SupervisorError {
    fn trace_error(&self) -> &Self {
        let error_code = self.error_code();

        let mut error_chain = Vec::new();
        let mut current_source = self.source();
        while let Some(source) = current_source {
            error_chain.push(source.to_string());
            current_source = source.source();
        }

        if self.is_client_error() {
            tracing::warn!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                is_retryable = self.is_retryable(),
                error_chain = ?error_chain,
                "Request rejected"
            );
        } else {
            tracing::error!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                is_retryable = self.is_retryable(),
                is_launch_failure = self.is_launch_failure(),
                exit_code = ?self.exit_code(),
                error_chain_len = error_chain.len(),
                error_chain = ?error_chain,
                "Error occurred with full context"
            );
        }

        self
    }
}

/// Extension trait for Result types
pub trait ResultTraceExt<T, E>: Sized {
    /// Convert the error to a SupervisorError and log it
    fn trace_context(self) -> Result<T, SupervisorError>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultTraceExt<T, E> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
    SupervisorError: From<E>,
{
    fn trace_context(self) -> Result<T, SupervisorError> {
        self.map_err(|e| {
            let error = SupervisorError::from(e);
            error.trace_error();
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_trace_ext() {
        let error = SupervisorError::launch_failed(
            "q",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let traced = error.trace_error();
        assert!(traced.is_launch_failure());
    }

    #[test]
    fn test_result_trace_ext() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));

        let err = result.trace_context().unwrap_err();
        assert!(matches!(err, SupervisorError::Io(_)));
    }

    #[test]
    fn test_json_error_converts() {
        let result: Result<serde_json::Value, serde_json::Error> = serde_json::from_str("{");
        let err = result.trace_context().unwrap_err();
        assert!(err.is_client_error());
    }
}
