#![allow(clippy::doc_markdown)] // Allow technical terms like DashMap, EXECUTING in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Delegate Dispatch
//!
//! Task dispatch and correlation core for remote delegates.
//!
//! ## Overview
//!
//! A caller builds a [`TaskRequest`], submits it through a [`DispatchChannel`],
//! and receives either a typed result or exactly one [`DispatchError`]. Work
//! is routed to a delegate whose capability tags cover the request, handed to
//! a [`DelegateTransport`], and correlated back to its waiter when the delegate
//! answers, fails, disconnects, or runs out of time.
//!
//! ## Module Organization
//!
//! - [`models`] - Requests, correlation handles, raw results, stages
//! - [`execution`] - Dispatch channel, correlation registry, delegate pool,
//!   reconciler, expiry sweep, transport seam
//! - [`status`] - Advisory task stage tracking
//! - [`config`] - Layered configuration loading
//! - [`error`] - Dispatch error taxonomy
//! - [`logging`] - Structured logging setup
//!
//! ## Guarantees
//!
//! - Each submission resolves exactly once, even when duplicate completions,
//!   expiry, and aborts race each other.
//! - Sync callers never wait past their request timeout.
//! - Async callbacks receive the same reconciled outcome a sync caller would.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use delegate_dispatch::config::ConfigManager;
//! use delegate_dispatch::execution::{DelegateCapabilities, DelegateTransport, DispatchChannel};
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn DelegateTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! delegate_dispatch::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let channel = DispatchChannel::new(manager.config().clone(), transport);
//! channel
//!     .delegate_pool()
//!     .register_delegate(DelegateCapabilities::new("delegate_1", 8).with_tags(["k8s"]))
//!     .await?;
//!
//! let sweeper = channel.start_expiry_sweeper();
//!
//! let request = channel
//!     .request_builder("account_1", "K8S_COMMAND_TASK")
//!     .json_parameters(&serde_json::json!({"command": "rollout status"}))
//!     .required_capability("k8s")
//!     .build()?;
//! let response = channel.submit_sync_envelope(request).await?;
//! println!("{}", response.payload);
//!
//! sweeper.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod status;
pub mod test_helpers;

pub use config::{ConfigManager, DispatchConfig, SelectionStrategy};
pub use error::{DispatchError, Result};
pub use execution::{
    CompletionNotifier, CorrelationRegistry, DelegateResponse, DelegateTransport, DispatchChannel,
    ResultReconciler, TaskEnvelope,
};
pub use models::{
    CorrelationHandle, ExecutionMode, RawResult, TaskExecutionStage, TaskRequest,
    TaskRequestBuilder, TaskResponse,
};
pub use status::TaskStatusTracker;
