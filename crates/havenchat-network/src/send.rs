//! Message send path.
//!
//! Converts the domain message to wire form, prefers a direct
//! peer-to-peer delivery when the recipient has a live peer entry,
//! and otherwise broadcasts to a shuffled set of swarm targets with
//! a fresh proof of work. Responses may carry an updated difficulty,
//! which immediately replaces the process-wide value.

use std::sync::Arc;

use futures::future::join_all;
use havenchat_protocol::json::lenient_i64;
use havenchat_protocol::message::{OutboundMessage, WireMessage};
use havenchat_protocol::pow;
use havenchat_storage::ClientStore;
use havenchat_types::{HavenchatError, Result, ServiceNode};
use serde_json::Value;

use crate::context::NetworkContext;
use crate::http::Transport;
use crate::peers::PeerRegistry;
use crate::retry::with_retries;
use crate::rpc::{RpcMethod, SnodeRpc};
use crate::swarm::SwarmDiscovery;

/// Difficulty for direct peer deliveries. A peer's own endpoint does
/// not meter admission, but the wire format still wants a nonce.
const P2P_DIFFICULTY: u64 = 1;

/// Invoked when a message was delivered over the direct path.
pub type P2pSuccessCallback = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// SendReport
// ---------------------------------------------------------------------------

/// Outcome of one send.
#[derive(Debug)]
pub struct SendReport {
    /// Whether the direct peer path delivered the message.
    pub via_p2p: bool,
    /// Swarm targets that accepted the message.
    pub accepted: usize,
    /// Swarm targets attempted.
    pub targeted: usize,
}

// ---------------------------------------------------------------------------
// MessageSender
// ---------------------------------------------------------------------------

/// The outbound delivery pipeline.
pub struct MessageSender {
    context: Arc<NetworkContext>,
    swarm: Arc<SwarmDiscovery>,
    peers: Arc<PeerRegistry>,
    rpc: SnodeRpc,
}

impl MessageSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
        swarm: Arc<SwarmDiscovery>,
        peers: Arc<PeerRegistry>,
    ) -> Self {
        let rpc = SnodeRpc::new(transport, context.clone(), store);
        Self {
            context,
            swarm,
            peers,
            rpc,
        }
    }

    /// Delivers a message, preferring the direct peer path.
    ///
    /// `on_p2p_success` fires only when the direct path delivered;
    /// swarm broadcasts report through the returned [`SendReport`].
    pub async fn send(
        &self,
        message: &OutboundMessage,
        on_p2p_success: Option<P2pSuccessCallback>,
    ) -> Result<SendReport> {
        let wire = message.to_wire()?;

        // Direct path: only when a peer entry exists and the peer is
        // believed online, or the message is a liveness ping.
        if let Some(peer) = self.peers.peer(&message.destination) {
            if message.is_ping || peer.is_online {
                let target = peer.as_service_node();
                match self.send_to_peer(&wire, &target).await {
                    Ok(()) => {
                        self.peers.mark_online(&message.destination)?;
                        if let Some(callback) = on_p2p_success {
                            callback();
                        }
                        return Ok(SendReport {
                            via_p2p: true,
                            accepted: 1,
                            targeted: 1,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%target, %e, "direct delivery failed, falling back to swarm");
                        self.peers.mark_offline(&message.destination)?;
                    }
                }
            }
        }

        self.broadcast_to_swarm(&wire).await
    }

    // ------------------------------------------------------------------
    // Direct path
    // ------------------------------------------------------------------

    async fn send_to_peer(&self, wire: &WireMessage, target: &ServiceNode) -> Result<()> {
        let nonce = compute_nonce(wire, P2P_DIFFICULTY).await?;
        let params = wire.to_params(&nonce);
        let max_attempts = self.context.config().max_retry_count;

        with_retries("SendMessage(p2p)", max_attempts, || {
            self.rpc.invoke(
                target,
                &wire.destination,
                RpcMethod::SendMessage,
                params.clone(),
                false,
            )
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Swarm path
    // ------------------------------------------------------------------

    async fn broadcast_to_swarm(&self, wire: &WireMessage) -> Result<SendReport> {
        let difficulty = self.context.difficulty();
        let nonce = compute_nonce(wire, difficulty).await?;
        let params = wire.to_params(&nonce);

        let targets = self.swarm.target_snodes(&wire.destination).await?;
        let max_attempts = self.context.config().max_retry_count;

        let attempts = targets.iter().map(|target| {
            let params = params.clone();
            async move {
                let outcome = with_retries("SendMessage", max_attempts, || {
                    self.rpc.invoke(
                        target,
                        &wire.destination,
                        RpcMethod::SendMessage,
                        params.clone(),
                        false,
                    )
                })
                .await;
                (target.clone(), outcome)
            }
        });

        let outcomes = join_all(attempts).await;

        let mut accepted = 0usize;
        let mut last_error = None;
        for (target, outcome) in outcomes {
            match outcome {
                Ok(response) => {
                    accepted += 1;
                    self.adopt_reported_difficulty(&response);
                }
                Err(e) => {
                    tracing::warn!(%target, %e, "swarm target rejected message");
                    last_error = Some(e);
                }
            }
        }

        if accepted == 0 {
            return Err(last_error
                .unwrap_or_else(|| HavenchatError::generic("no swarm targets available")));
        }

        Ok(SendReport {
            via_p2p: false,
            accepted,
            targeted: targets.len(),
        })
    }

    /// Adopts a `difficulty` echoed in a 200 response, if it differs
    /// from the current value.
    fn adopt_reported_difficulty(&self, response: &Value) {
        let Some(reported) = response
            .get("difficulty")
            .and_then(lenient_i64)
            .and_then(|d| u64::try_from(d).ok())
        else {
            return;
        };
        if reported != self.context.difficulty() {
            self.context.set_difficulty(reported);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Runs the proof-of-work off the async runtime.
async fn compute_nonce(wire: &WireMessage, difficulty: u64) -> Result<String> {
    let timestamp_ms = wire.timestamp_ms;
    let ttl_ms = wire.ttl_ms;
    let destination = wire.destination.clone();
    let data = wire.data.clone();

    tokio::task::spawn_blocking(move || {
        pow::calculate_nonce(timestamp_ms, ttl_ms, &destination, &data, difficulty)
    })
    .await
    .map_err(|e| HavenchatError::ProofOfWorkCalculationFailed {
        reason: format!("proof-of-work task failed: {e}"),
    })?
}
