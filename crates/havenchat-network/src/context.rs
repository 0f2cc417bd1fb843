//! Process-wide shared networking state.
//!
//! The [`NetworkContext`] replaces the globals a client like this
//! tends to accrete: the random service-node pool, the failure table,
//! the current proof-of-work difficulty and the two bounded executors.
//! It is created once, wrapped in an `Arc` and threaded through every
//! constructor. Each structure is guarded by its own small lock; the
//! mutating operations are map-sized.

use std::collections::HashSet;
use std::sync::Mutex;

use havenchat_types::config::NetworkConfig;
use havenchat_types::{HavenchatError, Result, ServiceNode};
use rand::rngs::OsRng;
use rand::seq::IteratorRandom;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::failure::FailureTable;

// ---------------------------------------------------------------------------
// NetworkContext
// ---------------------------------------------------------------------------

/// Shared state for all networking components.
pub struct NetworkContext {
    config: NetworkConfig,
    random_pool: Mutex<HashSet<ServiceNode>>,
    failures: FailureTable,
    difficulty: Mutex<u64>,
    network_permits: Semaphore,
    work_permits: Semaphore,
}

impl NetworkContext {
    /// Validates the config and builds the context.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            failures: FailureTable::new(config.failure_threshold),
            difficulty: Mutex::new(config.default_difficulty),
            network_permits: Semaphore::new(config.network_concurrency),
            work_permits: Semaphore::new(config.work_concurrency),
            random_pool: Mutex::new(HashSet::new()),
            config,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Difficulty
    // ------------------------------------------------------------------

    /// Current proof-of-work difficulty.
    pub fn difficulty(&self) -> u64 {
        self.difficulty
            .lock()
            .map(|d| *d)
            .unwrap_or(self.config.default_difficulty)
    }

    /// Replaces the difficulty with a network-reported value.
    /// Not monotonic: the network may lower it.
    pub fn set_difficulty(&self, difficulty: u64) {
        if let Ok(mut current) = self.difficulty.lock() {
            if *current != difficulty {
                tracing::info!(from = *current, to = difficulty, "proof-of-work difficulty updated");
                *current = difficulty;
            }
        }
    }

    // ------------------------------------------------------------------
    // Random pool
    // ------------------------------------------------------------------

    /// Whether the random pool has been populated.
    pub fn pool_is_empty(&self) -> bool {
        self.random_pool
            .lock()
            .map(|pool| pool.is_empty())
            .unwrap_or(true)
    }

    /// Number of nodes currently in the pool.
    pub fn pool_len(&self) -> usize {
        self.random_pool.lock().map(|pool| pool.len()).unwrap_or(0)
    }

    /// Whether a node is in the pool.
    pub fn pool_contains(&self, node: &ServiceNode) -> bool {
        self.random_pool
            .lock()
            .map(|pool| pool.contains(node))
            .unwrap_or(false)
    }

    /// Replaces the pool contents after a seed bootstrap.
    pub fn replace_pool(&self, nodes: impl IntoIterator<Item = ServiceNode>) -> Result<()> {
        let mut pool = self.lock_pool()?;
        *pool = nodes.into_iter().collect();
        Ok(())
    }

    /// Removes an evicted node from the pool.
    pub fn remove_from_pool(&self, node: &ServiceNode) -> Result<bool> {
        Ok(self.lock_pool()?.remove(node))
    }

    /// Samples one pool member uniformly at random (cryptographic RNG).
    pub fn sample_from_pool(&self) -> Result<Option<ServiceNode>> {
        Ok(self.lock_pool()?.iter().choose(&mut OsRng).cloned())
    }

    fn lock_pool(&self) -> Result<std::sync::MutexGuard<'_, HashSet<ServiceNode>>> {
        self.random_pool
            .lock()
            .map_err(|_| HavenchatError::generic("random pool lock poisoned"))
    }

    // ------------------------------------------------------------------
    // Failure accounting
    // ------------------------------------------------------------------

    /// Records a failure for a node. Returns `true` when the node has
    /// just crossed the eviction threshold.
    pub fn record_failure(&self, node: &ServiceNode) -> bool {
        self.failures.record_failure(node)
    }

    /// Current failure count for a node.
    pub fn failure_count(&self, node: &ServiceNode) -> u32 {
        self.failures.count(node)
    }

    /// Clears the failure count for a node.
    pub fn clear_failures(&self, node: &ServiceNode) {
        self.failures.clear(node);
    }

    // ------------------------------------------------------------------
    // Executors
    // ------------------------------------------------------------------

    /// Acquires a slot on the bounded network executor. Held for the
    /// duration of one HTTP round trip.
    pub async fn network_permit(&self) -> Result<SemaphorePermit<'_>> {
        self.network_permits
            .acquire()
            .await
            .map_err(|_| HavenchatError::generic("network executor closed"))
    }

    /// Acquires a slot on the bounded work executor. Held while
    /// parsing or verifying a response batch.
    pub async fn work_permit(&self) -> Result<SemaphorePermit<'_>> {
        self.work_permits
            .acquire()
            .await
            .map_err(|_| HavenchatError::generic("work executor closed"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> NetworkContext {
        NetworkContext::new(NetworkConfig::default()).expect("context")
    }

    fn node(port: u16) -> ServiceNode {
        ServiceNode::from_ip("203.0.113.7", port)
    }

    #[test]
    fn difficulty_starts_at_default_and_replaces() {
        let ctx = context();
        assert_eq!(ctx.difficulty(), 40);
        ctx.set_difficulty(100);
        assert_eq!(ctx.difficulty(), 100);
        // Not monotonic: the network may lower it.
        ctx.set_difficulty(10);
        assert_eq!(ctx.difficulty(), 10);
    }

    #[test]
    fn pool_replace_sample_remove() {
        let ctx = context();
        assert!(ctx.pool_is_empty());

        ctx.replace_pool([node(1), node(2), node(3)]).expect("replace");
        assert_eq!(ctx.pool_len(), 3);

        let sampled = ctx.sample_from_pool().expect("sample").expect("non-empty");
        assert!(ctx.pool_contains(&sampled));

        assert!(ctx.remove_from_pool(&node(2)).expect("remove"));
        assert!(!ctx.pool_contains(&node(2)));
        assert!(!ctx.remove_from_pool(&node(2)).expect("second remove"));
    }

    #[test]
    fn sampling_empty_pool_returns_none() {
        let ctx = context();
        assert!(ctx.sample_from_pool().expect("sample").is_none());
    }

    #[test]
    fn failure_threshold_matches_config() {
        let ctx = context();
        let a = node(9);
        assert!(!ctx.record_failure(&a));
        assert!(ctx.record_failure(&a));
        assert_eq!(ctx.failure_count(&a), 0);
    }

    #[tokio::test]
    async fn permits_are_bounded() {
        let config = NetworkConfig {
            network_concurrency: 1,
            ..NetworkConfig::default()
        };
        let ctx = NetworkContext::new(config).expect("context");

        let first = ctx.network_permit().await.expect("first");
        // A second acquire would block; try_acquire via a zero-delay
        // race instead of hanging the test.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            ctx.network_permit(),
        )
        .await;
        assert!(second.is_err(), "second permit must wait");
        drop(first);
        assert!(ctx.network_permit().await.is_ok());
    }

    #[test]
    fn invalid_config_rejected() {
        let config = NetworkConfig {
            failure_threshold: 0,
            ..NetworkConfig::default()
        };
        assert!(NetworkContext::new(config).is_err());
    }
}
