// Test Helpers Module - In-Process Dispatch Harness
//
// Shared setup for unit and integration tests: a scripted transport and a
// channel wired to it with one registered delegate.

pub mod scripted_transport;

pub use scripted_transport::{ScriptedReply, ScriptedTransport};

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::execution::delegate_pool::DelegateCapabilities;
use crate::execution::dispatch_channel::DispatchChannel;

/// Delegate id registered by [`TestHarness::new`]
pub const TEST_DELEGATE_ID: &str = "delegate_test_1";

pub struct TestHarness {
    pub channel: DispatchChannel,
    pub transport: Arc<ScriptedTransport>,
}

impl TestHarness {
    /// Channel with default config and one delegate with spare capacity
    pub async fn new() -> Self {
        Self::with_config(DispatchConfig::default()).await
    }

    pub async fn with_config(config: DispatchConfig) -> Self {
        let harness = Self::without_delegates(config);
        harness
            .channel
            .delegate_pool()
            .register_delegate(DelegateCapabilities::new(TEST_DELEGATE_ID, 64))
            .await
            .expect("test delegate registration");
        harness
    }

    /// Channel with no delegates registered
    pub fn without_delegates(config: DispatchConfig) -> Self {
        let transport = ScriptedTransport::new();
        let channel = DispatchChannel::new(config, transport.clone());
        transport.attach(channel.notifier());
        Self { channel, transport }
    }
}
