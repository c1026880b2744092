//! # Delegate Transport
//!
//! The seam between the dispatch channel and whatever actually moves a task to
//! a delegate. A transport only has to accept or refuse a submission; results
//! arrive later and out of band through a [`CompletionNotifier`].
//!
//! [`CompletionNotifier`]: crate::execution::dispatch_channel::CompletionNotifier

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{TaskRequest, TransportFailure};

/// Everything a delegate needs to run one task and report back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub correlation_id: String,
    pub delegate_id: String,
    pub request: TaskRequest,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DelegateTransport: Send + Sync + std::fmt::Debug {
    /// Hand `envelope` to its delegate
    ///
    /// `Ok` means the delegate accepted the task. `Err` is delivered to the
    /// waiter as a transport failure result.
    async fn dispatch(&self, envelope: TaskEnvelope) -> Result<(), TransportFailure>;

    fn transport_name(&self) -> &'static str {
        "delegate_transport"
    }
}
