//! Outbound message wire conversion.
//!
//! A [`OutboundMessage`] is the domain record handed to the send path:
//! recipient, envelope content, TTL and the ping flag for peer
//! liveness probes. [`WireMessage`] is its storage-RPC form, stamped
//! with the send timestamp; the proof-of-work nonce is attached by the
//! send path once computed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use havenchat_types::{HavenchatError, Result};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// OutboundMessage
// ---------------------------------------------------------------------------

/// A message the host wants delivered to a subscriber.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Recipient's hex public key (`05`-prefixed).
    pub destination: String,
    /// Envelope content, already end-to-end encrypted by the host.
    pub content: Vec<u8>,
    /// Time-to-live on the swarm, in milliseconds.
    pub ttl_ms: u64,
    /// Liveness probe: pings are always attempted peer-to-peer first.
    pub is_ping: bool,
}

impl OutboundMessage {
    /// Creates a regular (non-ping) message.
    pub fn new(destination: impl Into<String>, content: Vec<u8>, ttl_ms: u64) -> Self {
        Self {
            destination: destination.into(),
            content,
            ttl_ms,
            is_ping: false,
        }
    }

    /// Converts to wire form, stamping the current time.
    ///
    /// # Errors
    ///
    /// [`HavenchatError::MessageConversionFailed`] if the destination
    /// or content is empty, or the TTL is zero.
    pub fn to_wire(&self) -> Result<WireMessage> {
        if self.destination.is_empty() {
            return Err(HavenchatError::MessageConversionFailed {
                reason: "destination public key is empty".into(),
            });
        }
        if self.content.is_empty() {
            return Err(HavenchatError::MessageConversionFailed {
                reason: "message content is empty".into(),
            });
        }
        if self.ttl_ms == 0 {
            return Err(HavenchatError::MessageConversionFailed {
                reason: "ttl must be greater than 0".into(),
            });
        }

        Ok(WireMessage {
            destination: self.destination.clone(),
            data: BASE64.encode(&self.content),
            ttl_ms: self.ttl_ms,
            timestamp_ms: Utc::now().timestamp_millis() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// Storage-RPC form of an outbound message.
#[derive(Clone, Debug)]
pub struct WireMessage {
    /// Recipient's hex public key.
    pub destination: String,
    /// Base64-encoded envelope content.
    pub data: String,
    /// Time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Send timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl WireMessage {
    /// Builds the `SendMessage` params, attaching the computed
    /// proof-of-work nonce.
    pub fn to_params(&self, nonce_b64: &str) -> Value {
        json!({
            "pubKey": self.destination,
            "data": self.data,
            "ttl": self.ttl_ms.to_string(),
            "timestamp": self.timestamp_ms.to_string(),
            "nonce": nonce_b64,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboundMessage {
        OutboundMessage::new("05aabb", b"sealed envelope".to_vec(), 86_400_000)
    }

    #[test]
    fn conversion_base64_encodes_content() {
        let wire = sample().to_wire().expect("convert");
        assert_eq!(wire.data, BASE64.encode(b"sealed envelope"));
        assert_eq!(wire.destination, "05aabb");
        assert_eq!(wire.ttl_ms, 86_400_000);
        assert!(wire.timestamp_ms > 0);
    }

    #[test]
    fn empty_destination_rejected() {
        let msg = OutboundMessage::new("", b"x".to_vec(), 1000);
        assert!(matches!(
            msg.to_wire(),
            Err(HavenchatError::MessageConversionFailed { .. })
        ));
    }

    #[test]
    fn empty_content_rejected() {
        let msg = OutboundMessage::new("05aabb", Vec::new(), 1000);
        assert!(msg.to_wire().is_err());
    }

    #[test]
    fn zero_ttl_rejected() {
        let msg = OutboundMessage::new("05aabb", b"x".to_vec(), 0);
        assert!(msg.to_wire().is_err());
    }

    #[test]
    fn params_carry_all_fields() {
        let wire = sample().to_wire().expect("convert");
        let params = wire.to_params("bm9uY2U=");
        assert_eq!(params["pubKey"], "05aabb");
        assert_eq!(params["nonce"], "bm9uY2U=");
        assert_eq!(params["ttl"], wire.ttl_ms.to_string());
        assert_eq!(params["timestamp"], wire.timestamp_ms.to_string());
    }
}
