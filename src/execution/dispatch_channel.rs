//! # Dispatch Channel
//!
//! Caller-facing entry point for submitting work to delegates. Every
//! submission registers a waiter in the [`CorrelationRegistry`], is routed to
//! an eligible delegate, and resolves exactly once through one of:
//!
//! - a completion delivered by the transport via [`CompletionNotifier`]
//! - expiry, either the sync caller's own deadline or the background sweep
//! - a local failure (no eligible delegate, transport refusal, abort,
//!   delegate disconnect), delivered as a result like any other
//!
//! Sync callers await the reconciled result. Async callers get their
//! [`CorrelationHandle`] back immediately and the reconciled result later, in
//! their callback. Expiry results surface as [`DispatchError::Timeout`] on both
//! paths.
//!
//! ## Example
//!
//! ```rust,no_run
//! use delegate_dispatch::config::DispatchConfig;
//! use delegate_dispatch::execution::{DispatchChannel, DelegateTransport};
//! use delegate_dispatch::models::TaskResponse;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn DelegateTransport>) -> delegate_dispatch::Result<()> {
//! let channel = DispatchChannel::new(DispatchConfig::default(), transport);
//!
//! let request = channel
//!     .request_builder("account_1", "SHELL_SCRIPT")
//!     .json_parameters(&serde_json::json!({"script": "uptime"}))
//!     .build()?;
//!
//! let response: TaskResponse = channel.submit_sync_envelope(request).await?;
//! println!("{}", response.payload);
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::constants::{events, messages};
use crate::error::{DispatchError, Result};
use crate::execution::correlation_registry::{CorrelationRegistry, RegistryStats};
use crate::execution::delegate_pool::{DelegatePool, DelegatePoolStats};
use crate::execution::expiry_sweeper::ExpirySweeper;
use crate::execution::reconciler::{DelegateResponse, ResultReconciler};
use crate::execution::transport::{DelegateTransport, TaskEnvelope};
use crate::logging::log_dispatch_operation;
use crate::models::{
    CorrelationHandle, ExecutionMode, RawResult, TaskExecutionStage, TaskRequest,
    TaskRequestBuilder, TaskResponse, TransportFailureKind,
};
use crate::status::{InMemoryTaskStore, TaskStatusTracker};

#[derive(Debug, Clone)]
struct Assignment {
    delegate_id: String,
}

#[derive(Debug)]
pub(crate) struct ChannelInner {
    config: DispatchConfig,
    transport: Arc<dyn DelegateTransport>,
    registry: Arc<CorrelationRegistry>,
    pool: DelegatePool,
    store: Arc<InMemoryTaskStore>,
    /// Correlation id to the delegate holding one of its slots
    assignments: DashMap<String, Assignment>,
}

/// Outcome of [`DispatchChannel::submit`]
#[derive(Debug)]
pub enum Submission {
    /// Sync request, already reconciled
    Completed(TaskResponse),
    /// Async request, still running
    Pending(PendingTask),
}

/// Handle plus a receiver for an async submission made through
/// [`DispatchChannel::submit`]
#[derive(Debug)]
pub struct PendingTask {
    handle: CorrelationHandle,
    receiver: oneshot::Receiver<Result<TaskResponse>>,
}

impl PendingTask {
    pub fn handle(&self) -> &CorrelationHandle {
        &self.handle
    }

    pub async fn wait(self) -> Result<TaskResponse> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(DispatchError::invalid_request(messages::WAIT_INTERRUPTED)))
    }
}

/// Counters from every component the channel owns
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub registry: RegistryStats,
    pub in_flight_assignments: usize,
    pub status_records: usize,
    pub delegates: DelegatePoolStats,
}

/// What one sweep pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: Vec<String>,
    pub pruned_records: usize,
    pub removed_delegates: Vec<String>,
}

/// Entry point for task submission
#[derive(Debug, Clone)]
pub struct DispatchChannel {
    inner: Arc<ChannelInner>,
}

/// Inbound side for transports: delivers completions and progress
///
/// Holds a weak reference, so a transport that keeps a notifier does not keep
/// the channel alive.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    inner: Weak<ChannelInner>,
}

impl CompletionNotifier {
    /// Deliver the final result for `correlation_id`
    ///
    /// Returns `false` for unknown, already resolved, or expired correlations,
    /// and after the channel was dropped. A result arriving after the task's
    /// `expires_at` but before the sweep resolves the task as timed out.
    pub async fn complete(&self, correlation_id: &str, result: RawResult) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.complete(correlation_id, result).await,
            None => false,
        }
    }

    /// Record that the delegate moved the task to a non-terminal stage
    pub async fn report_progress(&self, correlation_id: &str, stage: TaskExecutionStage) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.report_progress(correlation_id, stage),
            None => false,
        }
    }
}

impl DispatchChannel {
    pub fn new(config: DispatchConfig, transport: Arc<dyn DelegateTransport>) -> Self {
        let pool = DelegatePool::from_dispatch_config(&config);
        Self::with_components(
            config,
            transport,
            Arc::new(CorrelationRegistry::new()),
            pool,
            Arc::new(InMemoryTaskStore::new()),
        )
    }

    pub fn with_components(
        config: DispatchConfig,
        transport: Arc<dyn DelegateTransport>,
        registry: Arc<CorrelationRegistry>,
        pool: DelegatePool,
        store: Arc<InMemoryTaskStore>,
    ) -> Self {
        info!(
            transport = transport.transport_name(),
            default_timeout_ms = config.default_timeout_ms,
            max_timeout_ms = config.max_timeout_ms,
            "🚀 DISPATCH: Channel created"
        );

        Self {
            inner: Arc::new(ChannelInner {
                config,
                transport,
                registry,
                pool,
                store,
                assignments: DashMap::new(),
            }),
        }
    }

    /// Builder pre-filled with the configured default timeout
    pub fn request_builder(
        &self,
        account_id: impl Into<String>,
        task_type: impl Into<String>,
    ) -> TaskRequestBuilder {
        TaskRequest::builder(account_id, task_type).default_timeout(self.inner.config.default_timeout())
    }

    /// Submit along the path selected by the request's mode
    pub async fn submit(&self, request: TaskRequest) -> Result<Submission> {
        match request.mode() {
            ExecutionMode::Sync => self
                .submit_sync_envelope(request)
                .await
                .map(Submission::Completed),
            ExecutionMode::Async => {
                let (tx, receiver) = oneshot::channel();
                let handle = self
                    .inner
                    .start(&request, move |outcome| {
                        let _ = tx.send(outcome.and_then(ResultReconciler::reconcile_envelope));
                    })?;
                Ok(Submission::Pending(PendingTask { handle, receiver }))
            }
        }
    }

    /// Submit a sync request and await the typed result
    pub async fn submit_sync<T: DelegateResponse>(&self, request: TaskRequest) -> Result<T> {
        let raw = self.dispatch_and_wait(request).await?;
        ResultReconciler::reconcile(raw)
    }

    /// Submit a sync request and await the reconciled envelope
    pub async fn submit_sync_envelope(&self, request: TaskRequest) -> Result<TaskResponse> {
        let raw = self.dispatch_and_wait(request).await?;
        ResultReconciler::reconcile_envelope(raw)
    }

    /// Submit an async request; `callback` receives the reconciled result
    /// exactly once
    ///
    /// Returns as soon as the task is registered; routing and the hand-off to
    /// the transport continue in the background. Routing and transport
    /// failures are delivered to the callback, not returned here.
    pub async fn submit_async<T, F>(&self, request: TaskRequest, callback: F) -> Result<CorrelationHandle>
    where
        T: DelegateResponse,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        if request.mode() != ExecutionMode::Async {
            return Err(DispatchError::invalid_request(
                "submit_async requires an ASYNC request",
            ));
        }

        self.inner
            .start(&request, move |outcome| {
                callback(outcome.and_then(ResultReconciler::reconcile::<T>))
            })
    }

    /// Wait until every handle resolved, bounded by the latest member deadline
    pub async fn wait_for_group(&self, handles: &[CorrelationHandle]) -> Result<()> {
        self.inner.registry.wait_for_group(handles).await
    }

    pub fn notifier(&self) -> CompletionNotifier {
        CompletionNotifier {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub async fn complete(&self, correlation_id: &str, result: RawResult) -> bool {
        self.inner.complete(correlation_id, result).await
    }

    pub fn report_progress(&self, correlation_id: &str, stage: TaskExecutionStage) -> bool {
        self.inner.report_progress(correlation_id, stage)
    }

    /// Abort a pending task; its waiter receives a remote execution error
    pub async fn abort_task(&self, account_id: &str, correlation_id: &str) -> bool {
        let Some(handle) = self.inner.registry.handle(correlation_id) else {
            debug!(correlation_id = %correlation_id, "Abort requested for unknown task");
            return false;
        };

        if handle.account_id != account_id {
            warn!(
                correlation_id = %correlation_id,
                account_id = %account_id,
                "Abort rejected: task belongs to another account"
            );
            return false;
        }

        let aborted = self
            .inner
            .complete(correlation_id, RawResult::error(messages::TASK_ABORTED))
            .await;

        if aborted {
            log_dispatch_operation(
                events::TASK_ABORTED,
                account_id,
                correlation_id,
                None,
                "aborted",
                None,
            );
        }

        aborted
    }

    /// Unregister a delegate and fail every task it was running
    pub async fn delegate_disconnected(&self, delegate_id: &str) -> usize {
        let display_name = self
            .inner
            .pool
            .get_delegate(delegate_id)
            .await
            .map(|state| state.capabilities.display_name().to_string())
            .unwrap_or_else(|| delegate_id.to_string());

        if self.inner.pool.unregister_delegate(delegate_id).await.is_err() {
            debug!(delegate_id = %delegate_id, "Disconnected delegate was not registered");
        }

        self.inner.fail_delegate_tasks(delegate_id, &display_name).await
    }

    /// Expire overdue correlations and clean up the state they held
    pub async fn expire_overdue(&self) -> Vec<String> {
        self.inner.expire_overdue().await
    }

    /// One maintenance pass: expiry, record retention, stale delegates
    pub async fn sweep(&self) -> SweepSummary {
        self.inner.sweep().await
    }

    /// Start the background sweep on the configured interval
    pub fn start_expiry_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::start(Arc::downgrade(&self.inner), self.inner.config.sweep_interval())
    }

    pub async fn get_stage(&self, account_id: &str, task_id: &str) -> TaskExecutionStage {
        self.status_tracker().get_stage(account_id, task_id).await
    }

    pub fn watch_stage(
        &self,
        account_id: &str,
        task_id: &str,
    ) -> futures::stream::BoxStream<'static, TaskExecutionStage> {
        self.status_tracker().watch_stage(account_id, task_id)
    }

    pub fn status_tracker(&self) -> TaskStatusTracker {
        TaskStatusTracker::new(self.inner.store.clone(), self.inner.config.status_poll_interval())
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.inner.registry
    }

    pub fn delegate_pool(&self) -> &DelegatePool {
        &self.inner.pool
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub async fn stats(&self) -> DispatchStats {
        DispatchStats {
            registry: self.inner.registry.stats(),
            in_flight_assignments: self.inner.assignments.len(),
            status_records: self.inner.store.len(),
            delegates: self.inner.pool.get_stats().await,
        }
    }

    async fn dispatch_and_wait(&self, request: TaskRequest) -> Result<RawResult> {
        if request.mode() != ExecutionMode::Sync {
            return Err(DispatchError::invalid_request(
                "submit_sync requires a SYNC request",
            ));
        }

        let inner = &self.inner;
        let handle = inner.new_handle(&request)?;
        let deadline = ChannelInner::deadline(&request)?;

        let (tx, mut rx) = oneshot::channel();
        inner.register(&handle, &request, move |raw| {
            let _ = tx.send(raw);
        })?;
        inner.route(&handle, &request, deadline).await;

        let delivered = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(delivered) => delivered,
            Err(_) => {
                // Either expiry wins and sends the synthetic result, or a
                // completion that raced the deadline is already on its way.
                inner.expire(&handle.id).await;
                rx.await
            }
        };

        match delivered {
            Ok(raw) => settle(raw, &handle.id, request.timeout()),
            Err(_) => Err(DispatchError::invalid_request(messages::WAIT_INTERRUPTED)),
        }
    }
}

/// Map a synthetic expiry result to the caller-facing timeout
fn settle(raw: RawResult, correlation_id: &str, timeout: Duration) -> Result<RawResult> {
    if raw.is_expired() {
        Err(DispatchError::timeout(correlation_id, timeout))
    } else {
        Ok(raw)
    }
}

impl ChannelInner {
    fn new_handle(&self, request: &TaskRequest) -> Result<CorrelationHandle> {
        let max_timeout = self.config.max_timeout();
        if request.timeout() > max_timeout {
            return Err(DispatchError::invalid_request(format!(
                "Timeout {}ms exceeds the maximum of {}ms",
                request.timeout().as_millis(),
                max_timeout.as_millis()
            )));
        }

        Ok(match request.correlation_id() {
            Some(id) => CorrelationHandle::with_id(id, request.account_id(), request.timeout()),
            None => CorrelationHandle::generate(request.account_id(), request.timeout()),
        })
    }

    fn deadline(request: &TaskRequest) -> Result<Instant> {
        Instant::now()
            .checked_add(request.timeout())
            .ok_or_else(|| DispatchError::invalid_request("Timeout is out of range"))
    }

    fn register<F>(&self, handle: &CorrelationHandle, request: &TaskRequest, callback: F) -> Result<()>
    where
        F: FnOnce(RawResult) + Send + 'static,
    {
        self.registry.register(handle.clone(), callback)?;
        self.store
            .record_queued(request.account_id(), &handle.id, request.task_type());

        log_dispatch_operation(
            events::TASK_SUBMITTED,
            request.account_id(),
            &handle.id,
            Some(request.task_type()),
            "queued",
            None,
        );

        Ok(())
    }

    /// Register an async submission and route it on a spawned task
    fn start<F>(self: &Arc<Self>, request: &TaskRequest, on_outcome: F) -> Result<CorrelationHandle>
    where
        F: FnOnce(Result<RawResult>) + Send + 'static,
    {
        let handle = self.new_handle(request)?;
        let deadline = Self::deadline(request)?;
        let correlation_id = handle.id.clone();
        let timeout = request.timeout();

        self.register(&handle, request, move |raw| {
            on_outcome(settle(raw, &correlation_id, timeout))
        })?;

        let inner = Arc::clone(self);
        let routed = handle.clone();
        let request = request.clone();
        tokio::spawn(async move {
            inner.route(&routed, &request, deadline).await;
        });

        Ok(handle)
    }

    /// Reserve a delegate and hand the task to the transport
    ///
    /// Never returns an error: every failure here resolves the waiter instead.
    async fn route(&self, handle: &CorrelationHandle, request: &TaskRequest, deadline: Instant) {
        if !self.registry.contains(&handle.id) {
            debug!(correlation_id = %handle.id, "Task resolved before routing");
            return;
        }

        let Some(delegate_id) = self.pool.try_assign(request.required_capabilities()).await else {
            warn!(
                correlation_id = %handle.id,
                required = ?request.required_capabilities(),
                "No eligible delegate for task"
            );
            self.complete(
                &handle.id,
                RawResult::transport_failure(
                    TransportFailureKind::NoEligibleDelegates,
                    messages::NO_ELIGIBLE_DELEGATES,
                ),
            )
            .await;
            return;
        };

        self.assignments.insert(
            handle.id.clone(),
            Assignment {
                delegate_id: delegate_id.clone(),
            },
        );
        // Aborted or expired while the slot was being reserved.
        if !self.registry.contains(&handle.id) {
            self.release_assignment(&handle.id).await;
            return;
        }
        self.store.record_assignment(&handle.id, &delegate_id);

        let envelope = TaskEnvelope {
            correlation_id: handle.id.clone(),
            delegate_id: delegate_id.clone(),
            request: request.clone(),
            expires_at: handle.expires_at,
        };

        match tokio::time::timeout_at(deadline, self.transport.dispatch(envelope)).await {
            Ok(Ok(())) => {
                debug!(
                    correlation_id = %handle.id,
                    delegate_id = %delegate_id,
                    "🚀 DISPATCH: Task handed to delegate"
                );
            }
            Ok(Err(failure)) => {
                warn!(
                    correlation_id = %handle.id,
                    delegate_id = %delegate_id,
                    kind = %failure.kind,
                    message = %failure.message,
                    "Transport refused task"
                );
                self.complete(&handle.id, RawResult::TransportFailure(failure))
                    .await;
            }
            Err(_) => {
                warn!(
                    correlation_id = %handle.id,
                    delegate_id = %delegate_id,
                    "Transport did not accept task before its deadline"
                );
                self.expire(&handle.id).await;
            }
        }
    }

    async fn complete(&self, correlation_id: &str, result: RawResult) -> bool {
        if !self.registry.contains(correlation_id) {
            // Counted as a late completion by the registry.
            return self.registry.complete(correlation_id, result);
        }

        self.release_assignment(correlation_id).await;

        let mut resolved = None;
        let fired = self
            .registry
            .complete_with(correlation_id, result, |handle, raw| {
                self.store.record_stage(correlation_id, raw.terminal_stage());
                resolved = Some((handle.account_id.clone(), raw.clone()));
            });

        if let Some((account_id, raw)) = resolved {
            let (event, outcome) = if raw.is_expired() {
                (events::TASK_EXPIRED, "expired")
            } else if raw.terminal_stage() == TaskExecutionStage::Completed {
                (events::TASK_COMPLETED, raw.variant_name())
            } else {
                (events::TASK_FAILED, raw.variant_name())
            };
            log_dispatch_operation(event, &account_id, correlation_id, None, outcome, None);
        }

        fired
    }

    async fn expire(&self, correlation_id: &str) -> bool {
        if !self.registry.contains(correlation_id) {
            return false;
        }

        self.release_assignment(correlation_id).await;

        let mut account_id = None;
        let expired = self.registry.expire_with(correlation_id, |handle, _| {
            self.store
                .record_stage(correlation_id, TaskExecutionStage::Failed);
            account_id = Some(handle.account_id.clone());
        });

        if let Some(account_id) = account_id {
            log_dispatch_operation(
                events::TASK_EXPIRED,
                &account_id,
                correlation_id,
                None,
                "expired",
                None,
            );
        }

        expired
    }

    fn report_progress(&self, correlation_id: &str, stage: TaskExecutionStage) -> bool {
        if stage.is_terminal() || stage == TaskExecutionStage::Unspecified {
            debug!(
                correlation_id = %correlation_id,
                stage = %stage,
                "Ignoring progress report with a non-progress stage"
            );
            return false;
        }

        if !self.registry.contains(correlation_id) {
            return false;
        }

        self.store.record_stage(correlation_id, stage)
    }

    async fn expire_overdue(&self) -> Vec<String> {
        let mut accounts = Vec::new();
        let expired = self
            .registry
            .expire_older_than_with(Utc::now(), |handle, _| {
                self.store
                    .record_stage(&handle.id, TaskExecutionStage::Failed);
                accounts.push((handle.id.clone(), handle.account_id.clone()));
            });

        for (correlation_id, account_id) in &accounts {
            self.release_assignment(correlation_id).await;

            log_dispatch_operation(
                events::TASK_EXPIRED,
                account_id,
                correlation_id,
                None,
                "expired",
                None,
            );
        }

        expired
    }

    pub(crate) async fn sweep(&self) -> SweepSummary {
        let expired = self.expire_overdue().await;

        let retention = chrono::Duration::from_std(self.config.record_retention())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let pruned_records = self.store.prune_terminal_before(cutoff);

        let removed = self.pool.cleanup_unhealthy().await;
        let mut removed_delegates = Vec::with_capacity(removed.len());
        for state in removed {
            let capabilities = state.capabilities;
            self.fail_delegate_tasks(&capabilities.delegate_id, capabilities.display_name())
                .await;
            removed_delegates.push(capabilities.delegate_id);
        }

        if !expired.is_empty() || pruned_records > 0 || !removed_delegates.is_empty() {
            debug!(
                expired = expired.len(),
                pruned_records,
                removed_delegates = removed_delegates.len(),
                "Sweep pass finished"
            );
        }

        SweepSummary {
            expired,
            pruned_records,
            removed_delegates,
        }
    }

    async fn fail_delegate_tasks(&self, delegate_id: &str, display_name: &str) -> usize {
        let affected: Vec<String> = self
            .assignments
            .iter()
            .filter(|entry| entry.value().delegate_id == delegate_id)
            .map(|entry| entry.key().clone())
            .collect();

        let message = messages::delegate_disconnected(display_name);
        let mut failed = 0;
        for correlation_id in &affected {
            let result =
                RawResult::transport_failure(TransportFailureKind::DelegateDisconnected, message.clone());
            if self.complete(correlation_id, result).await {
                failed += 1;
            }
        }

        if !affected.is_empty() {
            warn!(
                delegate_id = %delegate_id,
                failed_tasks = failed,
                "{} {}",
                events::DELEGATE_DISCONNECTED,
                message
            );
        }

        failed
    }

    async fn release_assignment(&self, correlation_id: &str) {
        if let Some((_, assignment)) = self.assignments.remove(correlation_id) {
            if let Err(e) = self.pool.release(&assignment.delegate_id).await {
                debug!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Delegate gone before its slot was released"
                );
            }
        }
    }
}
