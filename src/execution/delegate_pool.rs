//! Delegate Pool Management for Capability Routing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{DispatchConfig, SelectionStrategy};

/// Pool of connected delegates and their in-flight load
///
/// Tracks registration, capability tags, heartbeats, and load so the dispatch
/// channel can route each request to a delegate that advertises every
/// capability the request requires.
///
/// # Examples
///
/// ```rust
/// use delegate_dispatch::execution::delegate_pool::*;
/// use std::collections::BTreeSet;
///
/// #[tokio::main]
/// async fn main() {
///     let pool = DelegatePool::new();
///
///     let capabilities = DelegateCapabilities::new("delegate_1", 10)
///         .with_tags(["k8s", "docker"]);
///     pool.register_delegate(capabilities).await.unwrap();
///
///     let required: BTreeSet<String> = ["k8s".to_string()].into();
///     let selected = pool.try_assign(&required).await;
///     assert_eq!(selected.as_deref(), Some("delegate_1"));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DelegatePool {
    /// Active delegates by delegate ID
    delegates: Arc<RwLock<HashMap<String, DelegateState>>>,

    pub config: DelegatePoolConfig,
}

impl Default for DelegatePool {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegatePool {
    pub fn new() -> Self {
        Self::with_config(DelegatePoolConfig::default())
    }

    pub fn with_config(config: DelegatePoolConfig) -> Self {
        Self {
            delegates: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn from_dispatch_config(config: &DispatchConfig) -> Self {
        Self::with_config(DelegatePoolConfig {
            heartbeat_timeout: config.delegate_heartbeat_timeout(),
            selection: config.delegate_selection,
        })
    }

    /// Register a delegate; re-registration replaces capabilities and keeps load
    pub async fn register_delegate(
        &self,
        capabilities: DelegateCapabilities,
    ) -> Result<(), DelegatePoolError> {
        Self::validate_capabilities(&capabilities)?;

        let delegate_id = capabilities.delegate_id.clone();
        let max_capacity = capabilities.max_concurrent_tasks;
        let mut delegates = self.delegates.write().await;

        match delegates.get_mut(&delegate_id) {
            Some(existing) => {
                warn!(
                    "Delegate {} already registered, updating capabilities",
                    delegate_id
                );
                existing.capabilities = capabilities;
                existing.last_heartbeat = Instant::now();
            }
            None => {
                delegates.insert(
                    delegate_id.clone(),
                    DelegateState {
                        capabilities,
                        current_load: 0,
                        last_heartbeat: Instant::now(),
                        registered_at: Utc::now(),
                        total_assigned: 0,
                    },
                );
            }
        }

        info!(
            "Delegate registered: {} with {} max concurrent tasks",
            delegate_id, max_capacity
        );

        Ok(())
    }

    pub async fn unregister_delegate(
        &self,
        delegate_id: &str,
    ) -> Result<DelegateState, DelegatePoolError> {
        let mut delegates = self.delegates.write().await;

        match delegates.remove(delegate_id) {
            Some(state) => {
                info!(
                    "Delegate unregistered: {} (was running {} tasks)",
                    delegate_id, state.current_load
                );
                Ok(state)
            }
            None => {
                warn!("Attempted to unregister non-existent delegate: {}", delegate_id);
                Err(DelegatePoolError::DelegateNotFound {
                    delegate_id: delegate_id.to_string(),
                })
            }
        }
    }

    pub async fn heartbeat(&self, delegate_id: &str) -> Result<(), DelegatePoolError> {
        let mut delegates = self.delegates.write().await;

        match delegates.get_mut(delegate_id) {
            Some(state) => {
                state.last_heartbeat = Instant::now();
                debug!(
                    "Heartbeat updated for delegate {}: load={}",
                    delegate_id, state.current_load
                );
                Ok(())
            }
            None => {
                warn!("Heartbeat for non-existent delegate: {}", delegate_id);
                Err(DelegatePoolError::DelegateNotFound {
                    delegate_id: delegate_id.to_string(),
                })
            }
        }
    }

    /// Pick the best eligible delegate without reserving capacity
    pub async fn select_delegate(&self, required: &BTreeSet<String>) -> Option<String> {
        let delegates = self.delegates.read().await;
        self.pick(&delegates, required)
    }

    /// Pick the best eligible delegate and reserve one slot on it
    ///
    /// Selection and the load increment happen under one write lock so two
    /// concurrent submissions never overcommit the same delegate.
    pub async fn try_assign(&self, required: &BTreeSet<String>) -> Option<String> {
        let mut delegates = self.delegates.write().await;
        let selected = self.pick(&delegates, required)?;

        if let Some(state) = delegates.get_mut(&selected) {
            state.current_load += 1;
            state.total_assigned += 1;
            debug!(
                "Assigned task to delegate {} ({}/{})",
                selected, state.current_load, state.capabilities.max_concurrent_tasks
            );
        }

        Some(selected)
    }

    /// Return one slot to the delegate after its task resolved
    pub async fn release(&self, delegate_id: &str) -> Result<(), DelegatePoolError> {
        let mut delegates = self.delegates.write().await;

        match delegates.get_mut(delegate_id) {
            Some(state) => {
                state.current_load = state.current_load.saturating_sub(1);
                debug!(
                    "Released slot on delegate {} ({}/{})",
                    delegate_id, state.current_load, state.capabilities.max_concurrent_tasks
                );
                Ok(())
            }
            None => Err(DelegatePoolError::DelegateNotFound {
                delegate_id: delegate_id.to_string(),
            }),
        }
    }

    pub async fn get_delegate(&self, delegate_id: &str) -> Option<DelegateState> {
        self.delegates.read().await.get(delegate_id).cloned()
    }

    /// Remove delegates whose heartbeat is older than the configured timeout,
    /// returning their last known state
    pub async fn cleanup_unhealthy(&self) -> Vec<DelegateState> {
        let mut delegates = self.delegates.write().await;
        let unhealthy: Vec<String> = delegates
            .iter()
            .filter(|(_, state)| !state.is_healthy(&self.config))
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = Vec::with_capacity(unhealthy.len());
        for delegate_id in &unhealthy {
            if let Some(state) = delegates.remove(delegate_id) {
                warn!("Removed unhealthy delegate: {}", delegate_id);
                removed.push(state);
            }
        }

        removed
    }

    pub async fn get_stats(&self) -> DelegatePoolStats {
        let delegates = self.delegates.read().await;
        let mut stats = DelegatePoolStats {
            total_delegates: delegates.len(),
            ..DelegatePoolStats::default()
        };

        for state in delegates.values() {
            if state.is_healthy(&self.config) {
                stats.healthy_delegates += 1;
            }
            stats.total_capacity += state.capabilities.max_concurrent_tasks;
            stats.current_load += state.current_load;
            stats.total_assigned += state.total_assigned;
        }
        stats.unhealthy_delegates = stats.total_delegates - stats.healthy_delegates;
        stats.available_capacity = stats.total_capacity.saturating_sub(stats.current_load);

        stats
    }

    fn pick(
        &self,
        delegates: &HashMap<String, DelegateState>,
        required: &BTreeSet<String>,
    ) -> Option<String> {
        let eligible = delegates.iter().filter(|(_, state)| {
            state.supports(required) && state.has_capacity() && state.is_healthy(&self.config)
        });

        // Ties break on delegate id so selection is stable across calls.
        let selected = match self.config.selection {
            SelectionStrategy::LeastLoad => eligible
                .min_by(|(a_id, a), (b_id, b)| {
                    a.current_load
                        .cmp(&b.current_load)
                        .then_with(|| a_id.cmp(b_id))
                })
                .map(|(id, _)| id.clone()),
            SelectionStrategy::CapacityBased => eligible
                .max_by(|(a_id, a), (b_id, b)| {
                    a.available_capacity()
                        .cmp(&b.available_capacity())
                        .then_with(|| b_id.cmp(a_id))
                })
                .map(|(id, _)| id.clone()),
        };

        if selected.is_none() {
            debug!(required = ?required, "No eligible delegates for capability set");
        }

        selected
    }

    fn validate_capabilities(capabilities: &DelegateCapabilities) -> Result<(), DelegatePoolError> {
        if capabilities.delegate_id.trim().is_empty() {
            return Err(DelegatePoolError::InvalidCapabilities {
                reason: "Delegate ID cannot be empty".to_string(),
            });
        }

        if capabilities.max_concurrent_tasks == 0 {
            return Err(DelegatePoolError::InvalidCapabilities {
                reason: "Max concurrent tasks must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// What a delegate advertises when it connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateCapabilities {
    pub delegate_id: String,
    /// Capability tags matched against a request's required capabilities
    pub tags: BTreeSet<String>,
    pub max_concurrent_tasks: usize,
    pub host_name: Option<String>,
}

impl DelegateCapabilities {
    pub fn new(delegate_id: impl Into<String>, max_concurrent_tasks: usize) -> Self {
        Self {
            delegate_id: delegate_id.into(),
            tags: BTreeSet::new(),
            max_concurrent_tasks,
            host_name: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Name used in operator-facing messages
    pub fn display_name(&self) -> &str {
        self.host_name.as_deref().unwrap_or(&self.delegate_id)
    }
}

#[derive(Debug, Clone)]
pub struct DelegateState {
    pub capabilities: DelegateCapabilities,
    pub current_load: usize,
    pub last_heartbeat: Instant,
    pub registered_at: DateTime<Utc>,
    pub total_assigned: u64,
}

impl DelegateState {
    pub fn is_healthy(&self, config: &DelegatePoolConfig) -> bool {
        self.last_heartbeat.elapsed() <= config.heartbeat_timeout
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capabilities.max_concurrent_tasks
    }

    pub fn available_capacity(&self) -> usize {
        self.capabilities
            .max_concurrent_tasks
            .saturating_sub(self.current_load)
    }

    pub fn supports(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities.tags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatePoolConfig {
    pub heartbeat_timeout: Duration,
    pub selection: SelectionStrategy,
}

impl Default for DelegatePoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            selection: SelectionStrategy::LeastLoad,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelegatePoolStats {
    pub total_delegates: usize,
    pub healthy_delegates: usize,
    pub unhealthy_delegates: usize,
    pub total_capacity: usize,
    pub current_load: usize,
    pub available_capacity: usize,
    pub total_assigned: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DelegatePoolError {
    #[error("Delegate not found: {delegate_id}")]
    DelegateNotFound { delegate_id: String },

    #[error("Invalid delegate capabilities: {reason}")]
    InvalidCapabilities { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|tag| tag.to_string()).collect()
    }

    #[tokio::test]
    async fn test_delegate_registration() {
        let pool = DelegatePool::new();
        let capabilities = DelegateCapabilities::new("delegate_1", 4).with_tags(["k8s"]);

        assert!(pool.register_delegate(capabilities).await.is_ok());

        let delegate = pool.get_delegate("delegate_1").await.unwrap();
        assert_eq!(delegate.capabilities.max_concurrent_tasks, 4);
        assert_eq!(delegate.current_load, 0);

        let stats = pool.get_stats().await;
        assert_eq!(stats.total_delegates, 1);
        assert_eq!(stats.healthy_delegates, 1);
        assert_eq!(stats.available_capacity, 4);
    }

    #[tokio::test]
    async fn test_invalid_capabilities_rejected() {
        let pool = DelegatePool::new();
        assert!(pool
            .register_delegate(DelegateCapabilities::new("", 4))
            .await
            .is_err());
        assert!(pool
            .register_delegate(DelegateCapabilities::new("delegate_1", 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unregister_missing_delegate_fails() {
        let pool = DelegatePool::new();
        pool.register_delegate(DelegateCapabilities::new("delegate_1", 1))
            .await
            .unwrap();

        assert!(pool.unregister_delegate("delegate_1").await.is_ok());
        assert!(matches!(
            pool.unregister_delegate("delegate_1").await,
            Err(DelegatePoolError::DelegateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_selection_requires_capability_superset() {
        let pool = DelegatePool::new();
        pool.register_delegate(DelegateCapabilities::new("plain", 10))
            .await
            .unwrap();
        pool.register_delegate(DelegateCapabilities::new("k8s", 10).with_tags(["k8s", "helm"]))
            .await
            .unwrap();

        assert_eq!(
            pool.select_delegate(&required(&["k8s", "helm"])).await,
            Some("k8s".to_string())
        );
        assert_eq!(pool.select_delegate(&required(&["terraform"])).await, None);
    }

    #[tokio::test]
    async fn test_try_assign_respects_capacity() {
        let pool = DelegatePool::new();
        pool.register_delegate(DelegateCapabilities::new("delegate_1", 2))
            .await
            .unwrap();

        assert!(pool.try_assign(&BTreeSet::new()).await.is_some());
        assert!(pool.try_assign(&BTreeSet::new()).await.is_some());
        assert!(pool.try_assign(&BTreeSet::new()).await.is_none());

        pool.release("delegate_1").await.unwrap();
        assert!(pool.try_assign(&BTreeSet::new()).await.is_some());
        assert_eq!(pool.get_stats().await.total_assigned, 3);
    }

    #[tokio::test]
    async fn test_least_load_and_capacity_strategies() {
        let least_load = DelegatePool::new();
        let capacity_based = DelegatePool::with_config(DelegatePoolConfig {
            selection: SelectionStrategy::CapacityBased,
            ..DelegatePoolConfig::default()
        });

        for pool in [&least_load, &capacity_based] {
            pool.register_delegate(DelegateCapabilities::new("small", 2))
                .await
                .unwrap();
            pool.register_delegate(DelegateCapabilities::new("large", 10))
                .await
                .unwrap();
            pool.try_assign(&required(&[])).await.unwrap();
            pool.try_assign(&required(&[])).await.unwrap();
        }

        // Equal load, ties break on id.
        assert_eq!(
            least_load.select_delegate(&required(&[])).await,
            Some("large".to_string())
        );
        assert_eq!(
            capacity_based.select_delegate(&required(&[])).await,
            Some("large".to_string())
        );

        least_load.release("large").await.unwrap();
        least_load.try_assign(&required(&[])).await.unwrap();
        least_load.try_assign(&required(&[])).await.unwrap();
        assert_eq!(
            least_load.select_delegate(&required(&[])).await,
            Some("small".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_heartbeat_excludes_and_cleans_up() {
        let pool = DelegatePool::with_config(DelegatePoolConfig {
            heartbeat_timeout: Duration::from_secs(10),
            ..DelegatePoolConfig::default()
        });
        pool.register_delegate(DelegateCapabilities::new("stale", 5))
            .await
            .unwrap();
        pool.register_delegate(DelegateCapabilities::new("fresh", 5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        pool.heartbeat("fresh").await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(
            pool.select_delegate(&required(&[])).await,
            Some("fresh".to_string())
        );
        assert_eq!(pool.get_stats().await.unhealthy_delegates, 1);
        let removed = pool.cleanup_unhealthy().await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].capabilities.delegate_id, "stale");
        assert!(pool.get_delegate("stale").await.is_none());
    }

    #[test]
    fn test_display_name_prefers_host() {
        let capabilities = DelegateCapabilities::new("d-1", 1);
        assert_eq!(capabilities.display_name(), "d-1");
        assert_eq!(
            capabilities.with_host_name("build-host-7").display_name(),
            "build-host-7"
        );
    }
}
