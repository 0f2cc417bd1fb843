//! Swarm discovery.
//!
//! Maintains the process-wide random service-node pool (bootstrapped
//! from a seed node) and resolves the per-public-key swarm through the
//! `GetSwarm` RPC, persisting results in the host's swarm cache. Target
//! selection shuffles with a cryptographic RNG so no observer can bias
//! which swarm members a client talks to.

use std::sync::Arc;

use havenchat_protocol::json::{field_port, field_str};
use havenchat_storage::ClientStore;
use havenchat_types::{HavenchatError, Result, ServiceNode};
use rand::rngs::OsRng;
use rand::seq::{IteratorRandom, SliceRandom};
use serde_json::{json, Value};

use crate::context::NetworkContext;
use crate::http::{HttpRequest, Transport};
use crate::retry::with_retries;
use crate::rpc::{RpcMethod, SnodeRpc};

/// Placeholder address service nodes report before they know their
/// public IP. Always excluded.
const UNROUTABLE_IP: &str = "0.0.0.0";

/// How many service nodes one bootstrap call requests.
const BOOTSTRAP_LIMIT: u32 = 24;

// ---------------------------------------------------------------------------
// SwarmDiscovery
// ---------------------------------------------------------------------------

/// Random-pool bootstrap and per-key swarm resolution.
pub struct SwarmDiscovery {
    transport: Arc<dyn Transport>,
    context: Arc<NetworkContext>,
    store: Arc<dyn ClientStore>,
    rpc: SnodeRpc,
}

impl SwarmDiscovery {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
    ) -> Self {
        let rpc = SnodeRpc::new(transport.clone(), context.clone(), store.clone());
        Self {
            transport,
            context,
            store,
            rpc,
        }
    }

    // ------------------------------------------------------------------
    // Random pool
    // ------------------------------------------------------------------

    /// Returns a uniformly random service node, bootstrapping the pool
    /// from a seed when empty.
    pub async fn random_snode(&self) -> Result<ServiceNode> {
        self.ensure_random_pool().await?;
        self.context
            .sample_from_pool()?
            .ok_or_else(|| HavenchatError::generic("random service node pool is empty"))
    }

    /// Populates the random pool from a seed node if needed.
    async fn ensure_random_pool(&self) -> Result<()> {
        if !self.context.pool_is_empty() {
            return Ok(());
        }

        let config = self.context.config();
        let seed = config
            .seed_nodes
            .iter()
            .choose(&mut OsRng)
            .ok_or_else(|| HavenchatError::generic("no seed nodes configured"))?;

        tracing::info!(%seed, "bootstrapping random service node pool");

        let body = json!({
            "method": "get_n_service_nodes",
            "params": {
                "active_only": true,
                "limit": BOOTSTRAP_LIMIT,
                "fields": { "public_ip": true, "storage_port": true },
            },
        });
        let request = HttpRequest::post(format!("{seed}/json_rpc"), body);

        let response = {
            let _permit = self.context.network_permit().await?;
            self.transport.execute(request).await?
        };

        let states = response
            .get("result")
            .and_then(|r| r.get("service_node_states"))
            .and_then(Value::as_array)
            .ok_or_else(|| HavenchatError::ParsingFailed {
                reason: "seed response has no result.service_node_states".into(),
            })?;

        let mut nodes = Vec::new();
        for state in states {
            let ip = match field_str(state, "public_ip") {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::warn!(%e, "skipping malformed service node state");
                    continue;
                }
            };
            if ip == UNROUTABLE_IP {
                continue;
            }
            match field_port(state, "storage_port") {
                Ok(port) => nodes.push(ServiceNode::from_ip(ip, port)),
                Err(e) => tracing::warn!(ip, %e, "skipping service node with bad port"),
            }
        }

        if nodes.is_empty() {
            return Err(HavenchatError::generic(
                "seed node returned no usable service nodes",
            ));
        }

        tracing::info!(count = nodes.len(), "random pool populated");
        self.context.replace_pool(nodes)
    }

    // ------------------------------------------------------------------
    // Per-key swarm
    // ------------------------------------------------------------------

    /// Returns the swarm for a public key, refreshing through
    /// `GetSwarm` when the persisted swarm is below the minimum size.
    pub async fn swarm_for_key(&self, public_key: &str) -> Result<Vec<ServiceNode>> {
        let cached = self.store.swarm_cache(public_key)?;
        if cached.len() >= self.context.config().minimum_swarm_count {
            return Ok(cached);
        }

        let max_attempts = self.context.config().max_retry_count;
        let response = with_retries("GetSwarm", max_attempts, || async move {
            let node = self.random_snode().await?;
            self.rpc
                .invoke(
                    &node,
                    public_key,
                    RpcMethod::GetSwarm,
                    json!({ "pubKey": public_key }),
                    false,
                )
                .await
        })
        .await?;

        let swarm = parse_swarm(&response);
        self.store.set_swarm_cache(public_key, &swarm)?;
        tracing::debug!(public_key, count = swarm.len(), "swarm cache refreshed");
        Ok(swarm)
    }

    /// Picks one swarm member, cryptographically shuffled.
    pub async fn single_target(&self, public_key: &str) -> Result<ServiceNode> {
        let swarm = self.swarm_for_key(public_key).await?;
        swarm
            .into_iter()
            .choose(&mut OsRng)
            .ok_or_else(|| HavenchatError::generic(format!("swarm for {public_key} is empty")))
    }

    /// Picks the broadcast target set: a cryptographically shuffled
    /// prefix of the swarm.
    pub async fn target_snodes(&self, public_key: &str) -> Result<Vec<ServiceNode>> {
        let mut swarm = self.swarm_for_key(public_key).await?;
        if swarm.is_empty() {
            return Err(HavenchatError::generic(format!(
                "swarm for {public_key} is empty"
            )));
        }
        swarm.shuffle(&mut OsRng);
        swarm.truncate(self.context.config().target_snode_count);
        Ok(swarm)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a `GetSwarm` response body. Ports arrive as string or
/// integer; `0.0.0.0` entries are dropped; malformed entries are
/// skipped without failing the batch.
fn parse_swarm(response: &Value) -> Vec<ServiceNode> {
    let Some(entries) = response.get("snodes").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut swarm = Vec::new();
    for entry in entries {
        let ip = match field_str(entry, "ip") {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(%e, "skipping malformed swarm entry");
                continue;
            }
        };
        if ip == UNROUTABLE_IP {
            continue;
        }
        match field_port(entry, "port") {
            Ok(port) => swarm.push(ServiceNode::from_ip(ip, port)),
            Err(e) => tracing::warn!(ip, %e, "skipping swarm entry with bad port"),
        }
    }
    swarm
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_swarm_accepts_string_and_integer_ports() {
        let response = json!({
            "snodes": [
                { "ip": "203.0.113.1", "port": "22021" },
                { "ip": "203.0.113.2", "port": 22022 },
            ],
        });
        let swarm = parse_swarm(&response);
        assert_eq!(
            swarm,
            vec![
                ServiceNode::from_ip("203.0.113.1", 22021),
                ServiceNode::from_ip("203.0.113.2", 22022),
            ]
        );
    }

    #[test]
    fn parse_swarm_drops_unroutable_and_malformed() {
        let response = json!({
            "snodes": [
                { "ip": "0.0.0.0", "port": "22021" },
                { "ip": "203.0.113.3", "port": "not-a-port" },
                { "port": "22021" },
                { "ip": "203.0.113.4", "port": "22024" },
            ],
        });
        let swarm = parse_swarm(&response);
        assert_eq!(swarm, vec![ServiceNode::from_ip("203.0.113.4", 22024)]);
    }

    #[test]
    fn parse_swarm_empty_response() {
        assert!(parse_swarm(&json!({ "snodes": [] })).is_empty());
        assert!(parse_swarm(&json!({})).is_empty());
    }
}
