//! # Dispatch Models
//!
//! Value types exchanged between callers, the dispatch channel, and the
//! remote delegate boundary.

pub mod correlation;
pub mod raw_result;
pub mod stage;
pub mod task_request;

pub use correlation::CorrelationHandle;
pub use raw_result::{
    ErrorResult, ExecutionStatus, RawResult, TaskResponse, TransportFailure, TransportFailureKind,
};
pub use stage::TaskExecutionStage;
pub use task_request::{ExecutionMode, TaskRequest, TaskRequestBuilder};
