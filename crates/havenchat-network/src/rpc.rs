//! Storage-RPC client.
//!
//! Invokes a named method on a chosen service node by POSTing
//! `{"method": M, "params": P}` to `{target}/storage_rpc/v1`, then
//! applies the status-code policy:
//!
//! | Code | Action |
//! |---|---|
//! | 200 | resolve with the decoded JSON body |
//! | 400, 500, 503, transport | count the failure, reject with `HttpRequestFailed` |
//! | 421 | evict the target from the key's swarm cache, reject `SnodeMigrated` |
//! | 432 | adopt the reported difficulty, reject `InsufficientProofOfWork` |
//! | other | reject `Generic` |
//!
//! When a node crosses the failure threshold it is removed from both
//! the affected key's swarm cache and the random pool, and its counter
//! resets.

use std::sync::Arc;

use havenchat_protocol::json::lenient_i64;
use havenchat_storage::ClientStore;
use havenchat_types::{HavenchatError, Result, ServiceNode};
use serde_json::{json, Value};

use crate::context::NetworkContext;
use crate::http::{ConnectionPool, HttpRequest, Transport, Verb};

/// Header that asks a service node to hold the poll open.
pub const LONG_POLL_HEADER: &str = "X-Loki-Long-Poll";

// ---------------------------------------------------------------------------
// RpcMethod
// ---------------------------------------------------------------------------

/// Storage-RPC methods used by the core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpcMethod {
    /// Resolve a public key's swarm.
    GetSwarm,
    /// Poll a swarm member for stored envelopes.
    GetMessages,
    /// Deposit an envelope on a swarm member.
    SendMessage,
}

impl RpcMethod {
    /// The wire name of this method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetSwarm => "GetSwarm",
            Self::GetMessages => "GetMessages",
            Self::SendMessage => "SendMessage",
        }
    }
}

// ---------------------------------------------------------------------------
// SnodeRpc
// ---------------------------------------------------------------------------

/// Storage-RPC dispatcher with the status-code policy applied.
pub struct SnodeRpc {
    transport: Arc<dyn Transport>,
    context: Arc<NetworkContext>,
    store: Arc<dyn ClientStore>,
}

impl SnodeRpc {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
    ) -> Self {
        Self {
            transport,
            context,
            store,
        }
    }

    /// Invokes `method` on `target` for the key the call concerns.
    ///
    /// `public_key` scopes the eviction side effects: a 421 or a
    /// threshold-crossing failure removes `target` from that key's
    /// swarm cache.
    pub async fn invoke(
        &self,
        target: &ServiceNode,
        public_key: &str,
        method: RpcMethod,
        params: Value,
        long_poll: bool,
    ) -> Result<Value> {
        let url = format!("{}/storage_rpc/v1", target.url());
        let mut request = HttpRequest::new(Verb::Post, url)
            .with_params(json!({ "method": method.as_str(), "params": params }))
            .with_pool(if long_poll {
                ConnectionPool::SnodeLongPoll
            } else {
                ConnectionPool::Snode
            });
        if long_poll {
            request = request.with_header(LONG_POLL_HEADER, "true");
        }

        let outcome = {
            let _permit = self.context.network_permit().await?;
            self.transport.execute(request).await
        };

        match outcome {
            Ok(body) => {
                self.context.clear_failures(target);
                Ok(body)
            }
            Err(HavenchatError::HttpRequestFailed { status, body }) => {
                self.handle_http_failure(target, public_key, method, status, body)
            }
            Err(other) => Err(other),
        }
    }

    fn handle_http_failure(
        &self,
        target: &ServiceNode,
        public_key: &str,
        method: RpcMethod,
        status: u16,
        body: Option<String>,
    ) -> Result<Value> {
        match status {
            // Transport failures and plain server errors count toward
            // eviction, then reject so the outer retry can re-enter.
            0 | 400 | 500 | 503 => {
                self.register_failure(target, public_key, status)?;
                Err(HavenchatError::HttpRequestFailed { status, body })
            }
            // Wrong swarm: this node no longer hosts the key.
            421 => {
                tracing::warn!(%target, public_key, "snode migrated, evicting from swarm cache");
                self.store.remove_from_swarm_cache(public_key, target)?;
                Err(HavenchatError::SnodeMigrated)
            }
            // Low proof of work: adopt the reported difficulty first.
            432 => {
                if let Some(difficulty) = body.as_deref().and_then(parse_difficulty) {
                    self.context.set_difficulty(difficulty);
                } else {
                    tracing::warn!(%target, "432 response carried no parsable difficulty");
                }
                Err(HavenchatError::InsufficientProofOfWork)
            }
            other => Err(HavenchatError::Generic {
                reason: format!(
                    "unexpected status {other} from {target} for {}",
                    method.as_str()
                ),
            }),
        }
    }

    fn register_failure(&self, target: &ServiceNode, public_key: &str, status: u16) -> Result<()> {
        tracing::debug!(%target, status, "recording snode failure");
        if self.context.record_failure(target) {
            tracing::warn!(%target, public_key, "failure threshold reached, evicting snode");
            self.store.remove_from_swarm_cache(public_key, target)?;
            self.context.remove_from_pool(target)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pulls a numeric `difficulty` out of a 432 response body.
fn parse_difficulty(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    let difficulty = value.get("difficulty").and_then(lenient_i64)?;
    u64::try_from(difficulty).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_wire_names() {
        assert_eq!(RpcMethod::GetSwarm.as_str(), "GetSwarm");
        assert_eq!(RpcMethod::GetMessages.as_str(), "GetMessages");
        assert_eq!(RpcMethod::SendMessage.as_str(), "SendMessage");
    }

    #[test]
    fn difficulty_parses_integer_and_string() {
        assert_eq!(parse_difficulty(r#"{"difficulty": 100}"#), Some(100));
        assert_eq!(parse_difficulty(r#"{"difficulty": "100"}"#), Some(100));
        assert_eq!(parse_difficulty(r#"{"difficulty": -1}"#), None);
        assert_eq!(parse_difficulty(r#"{"other": 1}"#), None);
        assert_eq!(parse_difficulty("not json"), None);
    }
}
