//! # Task Status Tracker
//!
//! Point-in-time stage lookups and a polling watch stream over a
//! [`TaskRecordStore`]. Stages are advisory; they never change what a caller
//! of the dispatch channel receives.

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::TaskExecutionStage;
use crate::status::store::TaskRecordStore;

#[derive(Debug, Clone)]
pub struct TaskStatusTracker {
    store: Arc<dyn TaskRecordStore>,
    poll_interval: Duration,
}

struct WatchState {
    last: Option<TaskExecutionStage>,
    finished: bool,
}

impl TaskStatusTracker {
    pub fn new(store: Arc<dyn TaskRecordStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Current stage, or `Unspecified` when no record exists for the account
    pub async fn get_stage(&self, account_id: &str, task_id: &str) -> TaskExecutionStage {
        self.store
            .fetch_record(account_id, task_id)
            .await
            .map(|record| record.stage)
            .unwrap_or_default()
    }

    /// Stream of stage changes for one task
    ///
    /// Each distinct stage is emitted once, in order. The stream ends after a
    /// terminal stage. If the record is missing, or disappears while watched,
    /// it emits `Unspecified` and ends.
    pub fn watch_stage(&self, account_id: &str, task_id: &str) -> BoxStream<'static, TaskExecutionStage> {
        let store = self.store.clone();
        let poll_interval = self.poll_interval;
        let account_id = account_id.to_string();
        let task_id = task_id.to_string();

        let initial = WatchState {
            last: None,
            finished: false,
        };

        stream::unfold(initial, move |mut state| {
            let store = store.clone();
            let account_id = account_id.clone();
            let task_id = task_id.clone();

            async move {
                if state.finished {
                    return None;
                }

                loop {
                    if state.last.is_some() {
                        tokio::time::sleep(poll_interval).await;
                    }

                    let Some(record) = store.fetch_record(&account_id, &task_id).await else {
                        debug!(task_id = %task_id, "Watched task has no record");
                        state.finished = true;
                        return Some((TaskExecutionStage::Unspecified, state));
                    };

                    if state.last == Some(record.stage) {
                        continue;
                    }

                    state.last = Some(record.stage);
                    state.finished = record.stage.is_terminal();
                    return Some((record.stage, state));
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::store::InMemoryTaskStore;

    fn tracker(store: &Arc<InMemoryTaskStore>) -> TaskStatusTracker {
        TaskStatusTracker::new(store.clone(), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_unknown_task_is_unspecified() {
        let store = Arc::new(InMemoryTaskStore::new());
        let tracker = tracker(&store);

        assert_eq!(
            tracker.get_stage("acct", "missing").await,
            TaskExecutionStage::Unspecified
        );

        let stages: Vec<_> = tracker.watch_stage("acct", "missing").collect().await;
        assert_eq!(stages, vec![TaskExecutionStage::Unspecified]);
    }

    #[tokio::test]
    async fn test_watch_emits_changes_until_terminal() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.record_queued("acct", "task_1", "SCRIPT");
        let tracker = tracker(&store);

        let mut watch = tracker.watch_stage("acct", "task_1");
        assert_eq!(watch.next().await, Some(TaskExecutionStage::Queueing));

        store.record_stage("task_1", TaskExecutionStage::Executing);
        assert_eq!(watch.next().await, Some(TaskExecutionStage::Executing));

        store.record_stage("task_1", TaskExecutionStage::Completed);
        assert_eq!(watch.next().await, Some(TaskExecutionStage::Completed));
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn test_watch_ends_when_record_disappears() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.record_queued("acct", "task_1", "SCRIPT");
        let tracker = tracker(&store);

        let mut watch = tracker.watch_stage("acct", "task_1");
        assert_eq!(watch.next().await, Some(TaskExecutionStage::Queueing));

        store.record_stage("task_1", TaskExecutionStage::Failed);
        store.prune_terminal_before(chrono::Utc::now() + chrono::Duration::seconds(1));

        assert_eq!(watch.next().await, Some(TaskExecutionStage::Unspecified));
        assert_eq!(watch.next().await, None);
    }
}
