//! # Execution
//!
//! Dispatch, correlation, routing, and reconciliation of delegate tasks.

pub mod correlation_registry;
pub mod delegate_pool;
pub mod dispatch_channel;
pub mod expiry_sweeper;
pub mod reconciler;
pub mod transport;

pub use correlation_registry::{CorrelationRegistry, RegistryStats};
pub use delegate_pool::{DelegateCapabilities, DelegatePool, DelegatePoolError, DelegatePoolStats};
pub use dispatch_channel::{
    CompletionNotifier, DispatchChannel, DispatchStats, PendingTask, Submission, SweepSummary,
};
pub use expiry_sweeper::ExpirySweeper;
pub use reconciler::{DelegateResponse, ResultReconciler};
pub use transport::{DelegateTransport, TaskEnvelope};
