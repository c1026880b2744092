//! # Task Request
//!
//! Immutable descriptor of one unit of work for a delegate. Requests are only
//! obtainable through [`TaskRequestBuilder::build`], which enforces that the
//! account, task type, parameters, and a positive timeout are present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::constants::scope::GLOBAL_SCOPE_ID;
use crate::error::{DispatchError, Result};

/// Selects the dispatch code path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// Validated task descriptor
///
/// # Examples
///
/// ```rust
/// use delegate_dispatch::models::{ExecutionMode, TaskRequest};
/// use std::time::Duration;
///
/// let request = TaskRequest::builder("account_1", "K8S_COMMAND_TASK")
///     .parameters(b"{\"release\":\"web\"}".to_vec())
///     .required_capability("k8s")
///     .timeout(Duration::from_secs(120))
///     .mode(ExecutionMode::Sync)
///     .build()
///     .unwrap();
///
/// assert_eq!(request.scope_id(), "__GLOBAL_APP_ID__");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    account_id: String,
    scope_id: String,
    task_type: String,
    parameters: Vec<u8>,
    required_capabilities: BTreeSet<String>,
    timeout: Duration,
    mode: ExecutionMode,
    correlation_id: Option<String>,
}

impl TaskRequest {
    pub fn builder(account_id: impl Into<String>, task_type: impl Into<String>) -> TaskRequestBuilder {
        TaskRequestBuilder::new(account_id, task_type)
    }

    /// Positional constructor mirroring the builder, for adapters that already
    /// hold every field.
    pub fn new(
        account_id: impl Into<String>,
        scope_id: Option<String>,
        task_type: impl Into<String>,
        parameters: Vec<u8>,
        required_capabilities: Option<BTreeSet<String>>,
        timeout: Duration,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let mut builder = TaskRequestBuilder::new(account_id, task_type)
            .parameters(parameters)
            .timeout(timeout)
            .mode(mode);
        if let Some(scope_id) = scope_id {
            builder = builder.scope_id(scope_id);
        }
        if let Some(capabilities) = required_capabilities {
            builder = builder.required_capabilities(capabilities);
        }
        builder.build()
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    pub fn required_capabilities(&self) -> &BTreeSet<String> {
        &self.required_capabilities
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Caller-chosen correlation id, if any. The dispatch channel generates
    /// one when absent.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn is_global_scope(&self) -> bool {
        self.scope_id == GLOBAL_SCOPE_ID
    }
}

/// Fluent builder for [`TaskRequest`]
#[derive(Debug, Clone)]
pub struct TaskRequestBuilder {
    account_id: String,
    scope_id: Option<String>,
    task_type: String,
    parameters: Option<Vec<u8>>,
    parameter_error: Option<String>,
    required_capabilities: BTreeSet<String>,
    timeout: Option<Duration>,
    mode: ExecutionMode,
    correlation_id: Option<String>,
}

impl TaskRequestBuilder {
    pub fn new(account_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            scope_id: None,
            task_type: task_type.into(),
            parameters: None,
            parameter_error: None,
            required_capabilities: BTreeSet::new(),
            timeout: None,
            mode: ExecutionMode::Sync,
            correlation_id: None,
        }
    }

    pub fn scope_id(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn parameters(mut self, parameters: Vec<u8>) -> Self {
        self.parameters = Some(parameters);
        self.parameter_error = None;
        self
    }

    /// Serialize `value` as JSON and use it as the parameter payload
    pub fn json_parameters<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.parameters = Some(bytes);
                self.parameter_error = None;
            }
            Err(e) => {
                self.parameters = None;
                self.parameter_error = Some(format!("Parameters could not be serialized: {e}"));
            }
        }
        self
    }

    pub fn required_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Timeout to use only when none was set explicitly
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.get_or_insert(timeout);
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn build(self) -> Result<TaskRequest> {
        if self.account_id.trim().is_empty() {
            return Err(DispatchError::invalid_request("Account id cannot be empty"));
        }

        if self.task_type.trim().is_empty() {
            return Err(DispatchError::invalid_request("Task type cannot be empty"));
        }

        if let Some(reason) = self.parameter_error {
            return Err(DispatchError::invalid_request(reason));
        }

        let parameters = match self.parameters {
            Some(parameters) if !parameters.is_empty() => parameters,
            _ => return Err(DispatchError::invalid_request("Task parameters cannot be empty")),
        };

        let timeout = match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => {
                return Err(DispatchError::invalid_request(
                    "Timeout must be greater than zero",
                ))
            }
        };

        if let Some(ref correlation_id) = self.correlation_id {
            if correlation_id.trim().is_empty() {
                return Err(DispatchError::invalid_request(
                    "Correlation id cannot be blank when provided",
                ));
            }
        }

        let scope_id = self
            .scope_id
            .filter(|scope| !scope.trim().is_empty())
            .unwrap_or_else(|| GLOBAL_SCOPE_ID.to_string());

        Ok(TaskRequest {
            account_id: self.account_id,
            scope_id,
            task_type: self.task_type,
            parameters,
            required_capabilities: self.required_capabilities,
            timeout,
            mode: self.mode,
            correlation_id: self.correlation_id,
        })
    }
}
