//! # System Constants
//!
//! Well-known identifiers and messages shared by the dispatch components.

/// Scope identifiers used when routing requests
pub mod scope {
    /// Sentinel scope for requests that are not bound to an application
    pub const GLOBAL_SCOPE_ID: &str = "__GLOBAL_APP_ID__";
}

/// Dispatch lifecycle events, used as the `operation` field in structured logs
pub mod events {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_EXPIRED: &str = "task.expired";
    pub const TASK_ABORTED: &str = "task.aborted";
    pub const DELEGATE_DISCONNECTED: &str = "delegate.disconnected";
}

/// Messages surfaced verbatim to callers
pub mod messages {
    pub const TASK_ABORTED: &str = "Delegate task was aborted";
    pub const NO_ELIGIBLE_DELEGATES: &str = "No eligible delegates could perform the required capabilities";
    pub const WAIT_INTERRUPTED: &str = "Interrupted while waiting for delegate task result";

    pub fn task_expired(timeout_ms: u128) -> String {
        format!("Task expired. No delegate completed the task within {timeout_ms}ms")
    }

    pub fn delegate_disconnected(delegate_id: &str) -> String {
        format!("Delegate [{delegate_id}] disconnected while executing the task")
    }
}

pub mod system {
    /// Name reported in logs for this component
    pub const COMPONENT_NAME: &str = "delegate_dispatch";

    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
