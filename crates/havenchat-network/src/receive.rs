//! Message receive path.
//!
//! Polls one shuffled swarm member with the persisted last-message
//! hash, advances the cursor from the final entry of the response,
//! suppresses duplicates through the received-hash set and unwraps
//! each remaining entry through the envelope codec. Entries that fail
//! to decode are logged and skipped — one bad envelope never fails
//! the batch.

use std::sync::Arc;

use havenchat_protocol::envelope::{Envelope, EnvelopeCodec};
use havenchat_protocol::group::decode_base64_field;
use havenchat_storage::ClientStore;
use havenchat_types::Result;
use serde_json::{json, Value};

use crate::context::NetworkContext;
use crate::http::Transport;
use crate::retry::with_retries;
use crate::rpc::{RpcMethod, SnodeRpc};
use crate::swarm::SwarmDiscovery;

// ---------------------------------------------------------------------------
// MessagePoller
// ---------------------------------------------------------------------------

/// The inbound retrieval pipeline for one subscriber key.
pub struct MessagePoller {
    context: Arc<NetworkContext>,
    swarm: Arc<SwarmDiscovery>,
    store: Arc<dyn ClientStore>,
    codec: Arc<dyn EnvelopeCodec>,
    rpc: SnodeRpc,
    /// The subscriber's hex public key.
    user_public_key: String,
    /// Ask the snode to hold the poll open (40 s read timeout).
    long_poll: bool,
}

impl MessagePoller {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
        swarm: Arc<SwarmDiscovery>,
        codec: Arc<dyn EnvelopeCodec>,
        user_public_key: impl Into<String>,
    ) -> Self {
        let rpc = SnodeRpc::new(transport, context.clone(), store.clone());
        Self {
            context,
            swarm,
            store,
            codec,
            rpc,
            user_public_key: user_public_key.into(),
            long_poll: false,
        }
    }

    /// Enables long polling for subsequent [`get_messages`](Self::get_messages) calls.
    pub fn with_long_poll(mut self, long_poll: bool) -> Self {
        self.long_poll = long_poll;
        self
    }

    /// Retrieves new envelopes from one swarm member.
    ///
    /// Returns an empty list when the target has nothing new; the
    /// last-message-hash cursor is left untouched in that case.
    pub async fn get_messages(&self) -> Result<Vec<Envelope>> {
        let target = self.swarm.single_target(&self.user_public_key).await?;
        let last_hash = self
            .store
            .last_message_hash(&target)?
            .unwrap_or_default();

        let params = json!({
            "pubKey": self.user_public_key,
            "lastHash": last_hash,
        });

        let max_attempts = self.context.config().max_retry_count;
        let response = with_retries("GetMessages", max_attempts, || {
            self.rpc.invoke(
                &target,
                &self.user_public_key,
                RpcMethod::GetMessages,
                params.clone(),
                self.long_poll,
            )
        })
        .await?;

        let messages = response
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // The cursor follows the *last* entry of the response, and
        // only when that entry carries a non-empty hash.
        if let Some(hash) = messages
            .last()
            .and_then(|entry| entry.get("hash"))
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
        {
            self.store.set_last_message_hash(&target, hash)?;
        }

        // Post-processing runs on the bounded work executor.
        let _permit = self.context.work_permit().await?;
        let mut envelopes = Vec::new();

        for entry in &messages {
            let Some(hash) = entry.get("hash").and_then(Value::as_str).filter(|h| !h.is_empty())
            else {
                tracing::warn!("skipping message entry without a hash");
                continue;
            };

            // Dedup: the hash is recorded before the envelope is
            // yielded, so a crash cannot double-deliver.
            if !self.store.add_received_hash(hash)? {
                continue;
            }

            let Some(data) = entry.get("data").and_then(Value::as_str) else {
                tracing::warn!(hash, "skipping message entry without data");
                continue;
            };

            let content = match decode_base64_field(data, "data") {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(hash, %e, "skipping message with undecodable data");
                    continue;
                }
            };

            match self.codec.decode(hash, content) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    tracing::warn!(hash, %e, "skipping envelope that failed to unwrap");
                }
            }
        }

        Ok(envelopes)
    }
}
