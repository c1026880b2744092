//! # Dispatch Error Taxonomy
//!
//! Every submission resolves to exactly one typed result or exactly one of
//! these errors. Errors are returned to the awaiting caller on the sync path
//! and handed to the callback on the async path.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Malformed request, or the local wait was interrupted. Never retried here.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A correlation id was registered twice.
    #[error("Duplicate correlation id: {correlation_id}")]
    DuplicateCorrelation { correlation_id: String },

    /// A sync call or a group wait ran past its deadline.
    #[error("Timed out waiting for {correlation_id} after {}ms", waited.as_millis())]
    Timeout {
        correlation_id: String,
        waited: Duration,
    },

    /// The delegate reported a failure, at transport or application level.
    #[error("Remote execution failed: {message}")]
    RemoteExecution { message: String },

    /// The payload did not match the response type the caller expected.
    #[error("Unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponseType { expected: String, actual: String },
}

impl DispatchError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn remote_execution(message: impl Into<String>) -> Self {
        Self::RemoteExecution {
            message: message.into(),
        }
    }

    pub fn timeout(correlation_id: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            correlation_id: correlation_id.into(),
            waited,
        }
    }

    /// Short, stable name of the error kind for structured logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::DuplicateCorrelation { .. } => "duplicate_correlation",
            Self::Timeout { .. } => "timeout",
            Self::RemoteExecution { .. } => "remote_execution",
            Self::UnexpectedResponseType { .. } => "unexpected_response_type",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
