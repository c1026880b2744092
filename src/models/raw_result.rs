//! # Raw Delegate Results
//!
//! Whatever a delegate hands back, as a tagged variant. The reconciler decides
//! once what a variant means; nothing downstream inspects runtime types.

use serde::{Deserialize, Serialize};

use crate::models::TaskExecutionStage;

/// Outcome reported by the remote side for a single correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RawResult {
    /// Well-formed domain response; may still embed a failed execution status
    Success(TaskResponse),
    /// Explicit remote failure with a message
    Error(ErrorResult),
    /// The delegate could not be reached or answered with something unusable
    TransportFailure(TransportFailure),
}

impl RawResult {
    pub fn success(response_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Success(TaskResponse::new(response_type, payload))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorResult::new(message))
    }

    /// Synthetic result delivered when a correlation outlives its timeout
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Error(ErrorResult {
            message: message.into(),
            expired: true,
            delegate_id: None,
        })
    }

    pub fn transport_failure(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self::TransportFailure(TransportFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Error(ErrorResult { expired: true, .. }))
    }

    /// Advisory stage this result moves a task into
    pub fn terminal_stage(&self) -> TaskExecutionStage {
        match self {
            Self::Success(response) if response.execution_status != ExecutionStatus::Failure => {
                TaskExecutionStage::Completed
            }
            _ => TaskExecutionStage::Failed,
        }
    }

    /// Variant name for structured logging
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Error(_) => "error",
            Self::TransportFailure(_) => "transport_failure",
        }
    }
}

/// Execution status some providers embed inside an otherwise successful envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Running,
    Queued,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Discriminator naming the concrete response shape
    pub response_type: String,
    pub execution_status: ExecutionStatus,
    pub error_message: Option<String>,
    pub payload: serde_json::Value,
    pub delegate_id: Option<String>,
}

impl TaskResponse {
    pub fn new(response_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            response_type: response_type.into(),
            execution_status: ExecutionStatus::Success,
            error_message: None,
            payload,
            delegate_id: None,
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.execution_status = status;
        self
    }

    /// Mark the envelope as failed with the provider's message
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.execution_status = ExecutionStatus::Failure;
        self.error_message = Some(message.into());
        self
    }

    pub fn with_delegate(mut self, delegate_id: impl Into<String>) -> Self {
        self.delegate_id = Some(delegate_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub message: String,
    /// Set only on synthetic results produced by expiry
    #[serde(default)]
    pub expired: bool,
    pub delegate_id: Option<String>,
}

impl ErrorResult {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expired: false,
            delegate_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailureKind {
    WorkerProcessError,
    Unreachable,
    MalformedResponse,
    NoEligibleDelegates,
    DelegateDisconnected,
}

impl std::fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportFailureKind::WorkerProcessError => write!(f, "Worker Process Error"),
            TransportFailureKind::Unreachable => write!(f, "Unreachable"),
            TransportFailureKind::MalformedResponse => write!(f, "Malformed Response"),
            TransportFailureKind::NoEligibleDelegates => write!(f, "No Eligible Delegates"),
            TransportFailureKind::DelegateDisconnected => write!(f, "Delegate Disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}
