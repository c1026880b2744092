//! Task record storage backing status queries.
//!
//! Records are advisory: the correlation registry alone decides what a caller
//! receives. A record may lag a completion slightly, and a late duplicate
//! completion never rewrites a terminal stage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::TaskExecutionStage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub account_id: String,
    pub task_type: String,
    pub stage: TaskExecutionStage,
    pub delegate_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read side of task status persistence
#[async_trait]
pub trait TaskRecordStore: Send + Sync + std::fmt::Debug {
    /// Record for `task_id` scoped to `account_id`, if one exists
    async fn fetch_record(&self, account_id: &str, task_id: &str) -> Option<TaskRecord>;
}

/// Process-local record store written by the dispatch channel
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: DashMap<String, TaskRecord>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self, account_id: &str, task_id: &str, task_type: &str) {
        let now = Utc::now();
        self.records.insert(
            task_id.to_string(),
            TaskRecord {
                task_id: task_id.to_string(),
                account_id: account_id.to_string(),
                task_type: task_type.to_string(),
                stage: TaskExecutionStage::Queueing,
                delegate_id: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn record_assignment(&self, task_id: &str, delegate_id: &str) {
        if let Some(mut record) = self.records.get_mut(task_id) {
            record.delegate_id = Some(delegate_id.to_string());
            record.updated_at = Utc::now();
        }
    }

    /// Move a task to `stage` unless it already reached a terminal stage
    pub fn record_stage(&self, task_id: &str, stage: TaskExecutionStage) -> bool {
        match self.records.get_mut(task_id) {
            Some(mut record) if !record.stage.is_terminal() => {
                debug!(task_id = %task_id, from = %record.stage, to = %stage, "Task stage updated");
                record.stage = stage;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Drop terminal records last updated before `cutoff`
    pub fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| !(record.stage.is_terminal() && record.updated_at < cutoff));
        before.saturating_sub(self.records.len())
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.get(task_id).map(|record| record.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TaskRecordStore for InMemoryTaskStore {
    async fn fetch_record(&self, account_id: &str, task_id: &str) -> Option<TaskRecord> {
        self.get(task_id)
            .filter(|record| record.account_id == account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_scoped_to_account() {
        let store = InMemoryTaskStore::new();
        store.record_queued("acct_a", "task_1", "SCRIPT");

        let record = store.fetch_record("acct_a", "task_1").await.unwrap();
        assert_eq!(record.stage, TaskExecutionStage::Queueing);
        assert!(store.fetch_record("acct_b", "task_1").await.is_none());
        assert!(store.fetch_record("acct_a", "task_2").await.is_none());
    }

    #[test]
    fn test_terminal_stage_is_sticky() {
        let store = InMemoryTaskStore::new();
        store.record_queued("acct", "task_1", "SCRIPT");

        assert!(store.record_stage("task_1", TaskExecutionStage::Executing));
        assert!(store.record_stage("task_1", TaskExecutionStage::Completed));
        assert!(!store.record_stage("task_1", TaskExecutionStage::Failed));
        assert!(!store.record_stage("missing", TaskExecutionStage::Executing));

        assert_eq!(store.get("task_1").unwrap().stage, TaskExecutionStage::Completed);
    }

    #[test]
    fn test_prune_only_removes_old_terminal_records() {
        let store = InMemoryTaskStore::new();
        store.record_queued("acct", "done", "SCRIPT");
        store.record_queued("acct", "running", "SCRIPT");
        store.record_stage("done", TaskExecutionStage::Failed);

        assert_eq!(store.prune_terminal_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(store.prune_terminal_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(store.get("done").is_none());
        assert!(store.get("running").is_some());
    }
}
