//! Per-service-node failure accounting.
//!
//! Counts consecutive failures per node and reports when a node
//! crosses the eviction threshold. The table only counts; the RPC
//! layer performs the actual eviction from the swarm cache and the
//! random pool, then the counter resets so a re-discovered node gets
//! a clean slate.

use std::collections::HashMap;
use std::sync::Mutex;

use havenchat_types::ServiceNode;

/// Thread-safe failure counter keyed by service node.
pub struct FailureTable {
    counts: Mutex<HashMap<ServiceNode, u32>>,
    threshold: u32,
}

impl FailureTable {
    /// Creates a table that trips at `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Records one failure. Returns `true` when the node has just
    /// crossed the threshold — the counter is reset to zero in the
    /// same step, so the caller must evict exactly once.
    pub fn record_failure(&self, node: &ServiceNode) -> bool {
        let Ok(mut counts) = self.counts.lock() else {
            return false;
        };
        let count = counts.entry(node.clone()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            counts.remove(node);
            true
        } else {
            false
        }
    }

    /// Current failure count for a node (zero after eviction).
    pub fn count(&self, node: &ServiceNode) -> u32 {
        self.counts
            .lock()
            .map(|counts| counts.get(node).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Clears the counter for a node, e.g. after a successful call.
    pub fn clear(&self, node: &ServiceNode) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> ServiceNode {
        ServiceNode::from_ip("203.0.113.7", port)
    }

    #[test]
    fn threshold_trips_and_resets() {
        let table = FailureTable::new(2);
        let a = node(1);

        assert!(!table.record_failure(&a));
        assert_eq!(table.count(&a), 1);

        assert!(table.record_failure(&a));
        assert_eq!(table.count(&a), 0, "counter resets on eviction");
    }

    #[test]
    fn nodes_are_counted_independently() {
        let table = FailureTable::new(2);
        assert!(!table.record_failure(&node(1)));
        assert!(!table.record_failure(&node(2)));
        assert_eq!(table.count(&node(1)), 1);
        assert_eq!(table.count(&node(2)), 1);
    }

    #[test]
    fn clear_resets_count() {
        let table = FailureTable::new(3);
        table.record_failure(&node(1));
        table.record_failure(&node(1));
        table.clear(&node(1));
        assert_eq!(table.count(&node(1)), 0);
        assert!(!table.record_failure(&node(1)));
    }

    #[test]
    fn threshold_one_trips_immediately() {
        let table = FailureTable::new(1);
        assert!(table.record_failure(&node(1)));
    }
}
