//! # Correlation Registry
//!
//! Maps correlation ids to pending waiters and releases each waiter exactly
//! once: by a matching completion, or by expiry. Removal happens under the
//! registry lock, so whichever caller removes an entry is the only one that
//! ever runs its callback. Callbacks run after the lock is released and may
//! re-enter the registry.
//!
//! Group fan-in attaches a shared countdown latch to each member that is still
//! pending; every resolution counts the latch down after its callback ran.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::constants::messages;
use crate::error::{DispatchError, Result};
use crate::models::{CorrelationHandle, RawResult};

/// Callback invoked with the raw result, at most once
pub type Callback = Box<dyn FnOnce(RawResult) + Send + 'static>;

struct PendingWaiter {
    handle: CorrelationHandle,
    group_waiters: Vec<Arc<GroupLatch>>,
    callback: Callback,
}

impl PendingWaiter {
    fn fire(self, result: RawResult) {
        (self.callback)(result);
        for latch in self.group_waiters {
            latch.count_down();
        }
    }
}

/// Countdown shared by all members of one group wait
struct GroupLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl GroupLatch {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    fn count_down(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_one();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Registry counters for telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
    pub expired: u64,
    pub late_completions_ignored: u64,
}

/// Owner of every outstanding correlation
///
/// One instance is constructed per dispatch channel and shared by reference
/// with whatever delivers completions.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingWaiter>>,
    registered: AtomicU64,
    completed: AtomicU64,
    expired: AtomicU64,
    late_completions_ignored: AtomicU64,
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a waiter for `handle`; fails if the id is already pending
    pub fn register<F>(&self, handle: CorrelationHandle, callback: F) -> Result<()>
    where
        F: FnOnce(RawResult) + Send + 'static,
    {
        let mut pending = self.pending.lock();

        if pending.contains_key(&handle.id) {
            warn!(correlation_id = %handle.id, "Rejected duplicate correlation registration");
            return Err(DispatchError::DuplicateCorrelation {
                correlation_id: handle.id,
            });
        }

        debug!(
            correlation_id = %handle.id,
            account_id = %handle.account_id,
            expires_at = %handle.expires_at,
            "Registered pending waiter"
        );

        pending.insert(
            handle.id.clone(),
            PendingWaiter {
                handle,
                group_waiters: Vec::new(),
                callback: Box::new(callback),
            },
        );
        self.registered.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Deliver `result` to the waiter for `id`
    ///
    /// Returns `false` without side effects when the id already resolved,
    /// expired, or was never registered. A completion arriving after the
    /// handle's `expires_at` resolves the waiter as expired instead.
    pub fn complete(&self, id: &str, result: RawResult) -> bool {
        self.complete_with(id, result, |_, _| {})
    }

    /// Like [`Self::complete`], running `before_fire` with the handle and the
    /// final result after the entry was removed and before the callback runs
    pub fn complete_with<H>(&self, id: &str, result: RawResult, before_fire: H) -> bool
    where
        H: FnOnce(&CorrelationHandle, &RawResult),
    {
        let now = Utc::now();
        let waiter = self.pending.lock().remove(id);

        let Some(waiter) = waiter else {
            self.late_completions_ignored.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %id, "Ignoring completion for unknown or resolved correlation");
            return false;
        };

        let result = if waiter.handle.is_expired_at(now) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %id,
                expires_at = %waiter.handle.expires_at,
                "Completion arrived after expiry, resolving as expired"
            );
            Self::expired_result(&waiter.handle)
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %id,
                result = result.variant_name(),
                "Completing pending waiter"
            );
            result
        };

        before_fire(&waiter.handle, &result);
        waiter.fire(result);
        true
    }

    /// Resolve one waiter with a synthetic timeout result
    pub fn expire(&self, id: &str) -> bool {
        self.expire_with(id, |_, _| {})
    }

    /// Like [`Self::expire`], with a hook run before the callback
    pub fn expire_with<H>(&self, id: &str, before_fire: H) -> bool
    where
        H: FnOnce(&CorrelationHandle, &RawResult),
    {
        let waiter = self.pending.lock().remove(id);

        match waiter {
            Some(waiter) => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                let result = Self::expired_result(&waiter.handle);
                before_fire(&waiter.handle, &result);
                waiter.fire(result);
                true
            }
            None => false,
        }
    }

    /// Resolve every waiter whose `expires_at <= now`; returns the expired ids
    pub fn expire_older_than(&self, now: DateTime<Utc>) -> Vec<String> {
        self.expire_older_than_with(now, |_, _| {})
    }

    /// Like [`Self::expire_older_than`], running `before_fire` for each expired
    /// waiter before its callback
    pub fn expire_older_than_with<H>(&self, now: DateTime<Utc>, mut before_fire: H) -> Vec<String>
    where
        H: FnMut(&CorrelationHandle, &RawResult),
    {
        let overdue: Vec<PendingWaiter> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .values()
                .filter(|waiter| waiter.handle.is_expired_at(now))
                .map(|waiter| waiter.handle.id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        if overdue.is_empty() {
            return Vec::new();
        }

        self.expired.fetch_add(overdue.len() as u64, Ordering::Relaxed);

        let mut expired_ids = Vec::with_capacity(overdue.len());
        for waiter in overdue {
            let id = waiter.handle.id.clone();
            let result = Self::expired_result(&waiter.handle);
            before_fire(&waiter.handle, &result);
            waiter.fire(result);
            expired_ids.push(id);
        }

        info!(count = expired_ids.len(), "⏰ Expired overdue correlations");
        expired_ids
    }

    /// Wait until every handle in the group has resolved
    ///
    /// Members that already resolved count as done. Fails with
    /// [`DispatchError::Timeout`] when the latest member deadline passes first.
    pub async fn wait_for_group(&self, handles: &[CorrelationHandle]) -> Result<()> {
        let mut seen = HashSet::new();
        let members: Vec<&CorrelationHandle> = handles
            .iter()
            .filter(|handle| seen.insert(handle.id.as_str()))
            .collect();

        let Some(deadline) = members.iter().map(|handle| handle.expires_at).max() else {
            return Ok(());
        };

        let latch = {
            let mut pending = self.pending.lock();
            let outstanding: Vec<&str> = members
                .iter()
                .map(|handle| handle.id.as_str())
                .filter(|id| pending.contains_key(*id))
                .collect();

            if outstanding.is_empty() {
                return Ok(());
            }

            let latch = Arc::new(GroupLatch::new(outstanding.len()));
            for id in outstanding {
                if let Some(waiter) = pending.get_mut(id) {
                    waiter.group_waiters.push(latch.clone());
                }
            }
            latch
        };

        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(
            members = members.len(),
            outstanding = latch.remaining.load(Ordering::Acquire),
            remaining_ms = remaining.as_millis() as u64,
            "Waiting for correlation group"
        );

        match tokio::time::timeout(remaining, latch.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let unresolved: Vec<String> = {
                    let pending = self.pending.lock();
                    members
                        .iter()
                        .filter(|handle| pending.contains_key(&handle.id))
                        .map(|handle| handle.id.clone())
                        .collect()
                };

                // Every member may have resolved right at the deadline.
                if unresolved.is_empty() {
                    return Ok(());
                }

                warn!(unresolved = ?unresolved, "Correlation group timed out");
                Err(DispatchError::timeout(unresolved.join(","), remaining))
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn handle(&self, id: &str) -> Option<CorrelationHandle> {
        self.pending.lock().get(id).map(|waiter| waiter.handle.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            pending: self.pending_count(),
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            late_completions_ignored: self.late_completions_ignored.load(Ordering::Relaxed),
        }
    }

    fn expired_result(handle: &CorrelationHandle) -> RawResult {
        RawResult::expired(messages::task_expired(handle.timeout().as_millis()))
    }
}
