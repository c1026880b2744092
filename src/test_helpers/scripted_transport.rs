//! In-process transport that answers from a script.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

use crate::execution::dispatch_channel::CompletionNotifier;
use crate::execution::transport::{DelegateTransport, TaskEnvelope};
use crate::models::{RawResult, TaskExecutionStage, TransportFailure};

/// What the scripted delegate does with a task of a given type
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Report EXECUTING, wait `delay`, then deliver `result`
    Respond { result: RawResult, delay: Duration },
    /// Deliver `result` the number of times given, each after `delay`
    Repeat {
        result: RawResult,
        delay: Duration,
        times: usize,
    },
    /// Accept the task and never answer
    Silent,
}

/// Transport double that records every envelope and answers per task type
///
/// Unscripted task types are accepted and never answered.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    notifier: OnceLock<CompletionNotifier>,
    replies: Mutex<HashMap<String, ScriptedReply>>,
    refusal: Mutex<Option<TransportFailure>>,
    stall: Mutex<Option<Duration>>,
    submissions: Mutex<Vec<TaskEnvelope>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect the transport to the channel it delivers into
    pub fn attach(&self, notifier: CompletionNotifier) {
        if self.notifier.set(notifier).is_err() {
            debug!("ScriptedTransport already attached");
        }
    }

    pub fn reply_to(&self, task_type: &str, reply: ScriptedReply) {
        self.replies.lock().insert(task_type.to_string(), reply);
    }

    pub fn respond_to(&self, task_type: &str, result: RawResult, delay: Duration) {
        self.reply_to(task_type, ScriptedReply::Respond { result, delay });
    }

    /// Refuse every following dispatch with `failure`
    pub fn refuse_dispatch(&self, failure: TransportFailure) {
        *self.refusal.lock() = Some(failure);
    }

    /// Hold every following dispatch for `stall` before accepting it
    pub fn stall_dispatch(&self, stall: Duration) {
        *self.stall.lock() = Some(stall);
    }

    pub fn submissions(&self) -> Vec<TaskEnvelope> {
        self.submissions.lock().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    fn deliver(&self, correlation_id: String, result: RawResult, delay: Duration, times: usize) {
        let Some(notifier) = self.notifier.get().cloned() else {
            debug!(correlation_id = %correlation_id, "ScriptedTransport not attached, dropping reply");
            return;
        };

        tokio::spawn(async move {
            notifier
                .report_progress(&correlation_id, TaskExecutionStage::Executing)
                .await;
            for _ in 0..times {
                tokio::time::sleep(delay).await;
                notifier.complete(&correlation_id, result.clone()).await;
            }
        });
    }
}

#[async_trait]
impl DelegateTransport for ScriptedTransport {
    async fn dispatch(&self, envelope: TaskEnvelope) -> Result<(), TransportFailure> {
        self.submissions.lock().push(envelope.clone());

        let stall = *self.stall.lock();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        if let Some(failure) = self.refusal.lock().clone() {
            return Err(failure);
        }

        let reply = self
            .replies
            .lock()
            .get(envelope.request.task_type())
            .cloned();

        match reply {
            Some(ScriptedReply::Respond { result, delay }) => {
                self.deliver(envelope.correlation_id, result, delay, 1)
            }
            Some(ScriptedReply::Repeat {
                result,
                delay,
                times,
            }) => self.deliver(envelope.correlation_id, result, delay, times),
            Some(ScriptedReply::Silent) | None => {}
        }

        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}
