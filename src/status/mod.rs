//! # Task Status
//!
//! Advisory lifecycle tracking for submitted tasks: a record store written by
//! the dispatch channel and a tracker that answers stage queries and watches.

pub mod store;
pub mod tracker;

pub use store::{InMemoryTaskStore, TaskRecord, TaskRecordStore};
pub use tracker::TaskStatusTracker;
