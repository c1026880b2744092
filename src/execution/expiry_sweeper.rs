//! Background sweep that expires overdue correlations.
//!
//! Runs [`DispatchChannel::sweep`] on a fixed interval until stopped or until
//! the channel is dropped. Async waiters rely on this sweep for their timeout;
//! sync callers enforce their own deadline and only benefit from the cleanup.
//!
//! [`DispatchChannel::sweep`]: crate::execution::dispatch_channel::DispatchChannel::sweep

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::execution::dispatch_channel::ChannelInner;

#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl ExpirySweeper {
    pub(crate) fn start(channel: Weak<ChannelInner>, interval: Duration) -> Self {
        let shutdown_notify = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));

        let loop_notify = shutdown_notify.clone();
        let loop_running = running.clone();
        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "🧹 SWEEPER: Expiry sweep started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(inner) = channel.upgrade() else {
                            debug!("Dispatch channel dropped, sweep exiting");
                            break;
                        };
                        inner.sweep().await;
                    }
                    _ = loop_notify.notified() => {
                        info!("🧹 SWEEPER: Expiry sweep shutting down");
                        break;
                    }
                }
            }

            loop_running.store(false, Ordering::Release);
        });

        Self {
            shutdown_notify,
            running,
            task: Mutex::new(Some(task)),
            interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signal the sweep to stop and wait for its current pass to finish
    pub async fn stop(&self) {
        // notify_one leaves a permit if the loop is mid-pass.
        self.shutdown_notify.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
