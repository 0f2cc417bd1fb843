//! Network configuration with sensible defaults.
//!
//! All operational parameters of the networking core are centralized
//! here. Every value has a documented default; hosts override fields
//! as needed and call [`NetworkConfig::validate`] once at startup.

use serde::{Deserialize, Serialize};

use crate::{HavenchatError, Result};

/// Seed nodes used to bootstrap the random service-node pool.
///
/// Queried once (uniformly at random) when the pool is empty. These are
/// full JSON-RPC base URLs; the bootstrap call POSTs to `{seed}/json_rpc`.
pub const SEED_NODES: [&str; 3] = [
    "https://seed1.havenchat.net:38157",
    "https://seed2.havenchat.net:38157",
    "https://seed3.havenchat.net:38157",
];

/// Global network configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Seed node URLs for random-pool bootstrap.
    pub seed_nodes: Vec<String>,

    /// Maximum attempts for the bounded retry wrapper around every RPC.
    pub max_retry_count: u32,

    /// Minimum persisted swarm size before a refresh is triggered.
    pub minimum_swarm_count: usize,

    /// Number of swarm members a broadcast send targets.
    pub target_snode_count: usize,

    /// Consecutive failures after which a service node is evicted from
    /// the swarm cache and the random pool.
    pub failure_threshold: u32,

    /// Initial proof-of-work difficulty, replaced by whatever the
    /// network reports.
    pub default_difficulty: u64,

    /// Connect/read/write timeout for ordinary HTTP calls, in seconds.
    pub request_timeout_secs: u64,

    /// Read timeout for long-poll message retrieval, in seconds.
    pub long_poll_timeout_secs: u64,

    /// Bound on concurrent outbound HTTP calls.
    pub network_concurrency: usize,

    /// Bound on concurrent CPU-ish post-processing (parsing, signature
    /// verification).
    pub work_concurrency: usize,

    /// Upper bound on multipart upload size, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seed_nodes: SEED_NODES.iter().map(|s| s.to_string()).collect(),
            max_retry_count: 8,
            minimum_swarm_count: 2,
            target_snode_count: 3,
            failure_threshold: 2,
            default_difficulty: 40,
            request_timeout_secs: 20,
            long_poll_timeout_secs: 40,
            network_concurrency: 8,
            work_concurrency: 8,
            max_upload_bytes: 10 * 1000 * 1000,
        }
    }
}

impl NetworkConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_nodes.is_empty() {
            return Err(HavenchatError::ConfigError {
                reason: "seed_nodes must not be empty".into(),
            });
        }

        if self.max_retry_count == 0 {
            return Err(HavenchatError::ConfigError {
                reason: "max_retry_count must be greater than 0".into(),
            });
        }

        if self.minimum_swarm_count == 0 {
            return Err(HavenchatError::ConfigError {
                reason: "minimum_swarm_count must be greater than 0".into(),
            });
        }

        if self.target_snode_count == 0 {
            return Err(HavenchatError::ConfigError {
                reason: "target_snode_count must be greater than 0".into(),
            });
        }

        if self.failure_threshold == 0 {
            return Err(HavenchatError::ConfigError {
                reason: "failure_threshold must be greater than 0".into(),
            });
        }

        if self.network_concurrency == 0 || self.work_concurrency == 0 {
            return Err(HavenchatError::ConfigError {
                reason: "executor concurrency bounds must be greater than 0".into(),
            });
        }

        if self.long_poll_timeout_secs < self.request_timeout_secs {
            return Err(HavenchatError::ConfigError {
                reason: "long_poll_timeout_secs must not be below request_timeout_secs".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_values() {
        let config = NetworkConfig::default();
        assert_eq!(config.seed_nodes.len(), 3);
        assert_eq!(config.max_retry_count, 8);
        assert_eq!(config.minimum_swarm_count, 2);
        assert_eq!(config.target_snode_count, 3);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.default_difficulty, 40);
        assert_eq!(config.request_timeout_secs, 20);
        assert_eq!(config.long_poll_timeout_secs, 40);
    }

    #[test]
    fn empty_seed_nodes_rejected() {
        let config = NetworkConfig {
            seed_nodes: Vec::new(),
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_count_rejected() {
        let config = NetworkConfig {
            max_retry_count: 0,
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_failure_threshold_rejected() {
        let config = NetworkConfig {
            failure_threshold: 0,
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn long_poll_below_request_timeout_rejected() {
        let config = NetworkConfig {
            long_poll_timeout_secs: 10,
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
