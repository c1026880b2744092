use serde::{Deserialize, Serialize};

/// Advisory lifecycle stage of a submitted task
///
/// Observability only; the reconciler's classification of the result is the
/// authoritative outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStage {
    #[default]
    Unspecified,
    Queueing,
    Executing,
    Completed,
    Failed,
}

impl TaskExecutionStage {
    /// Whether a watcher should stop after observing this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "UNSPECIFIED"),
            Self::Queueing => write!(f, "QUEUEING"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
