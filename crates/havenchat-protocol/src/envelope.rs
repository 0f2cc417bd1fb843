//! Opaque envelope codec seam.
//!
//! The receive path hands each base64-decoded `data` field to an
//! [`EnvelopeCodec`]. Envelope internals (protobuf decoding, session
//! ratchets) live with the host; the core treats them as bytes. The
//! [`PassthroughCodec`] is the identity implementation used by tests
//! and by hosts that defer decoding.

use havenchat_types::Result;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An end-to-end-encrypted message payload retrieved from a swarm.
///
/// `source_hash` is the service-node hash the envelope arrived under;
/// it is the key recorded in the received-hash set before the envelope
/// is yielded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    /// Raw envelope bytes, already base64-decoded.
    pub content: Vec<u8>,
    /// Service-node hash of the entry that carried this envelope.
    pub source_hash: String,
}

// ---------------------------------------------------------------------------
// EnvelopeCodec
// ---------------------------------------------------------------------------

/// Unwraps raw envelope bytes into whatever the host considers an
/// envelope. Implementations must be cheap to call concurrently.
pub trait EnvelopeCodec: Send + Sync {
    /// Decodes one envelope. Failures cause the receive path to log
    /// and skip the entry; they never fail the batch.
    fn decode(&self, hash: &str, content: Vec<u8>) -> Result<Envelope>;
}

/// Identity codec: passes the decoded bytes through untouched.
pub struct PassthroughCodec;

impl EnvelopeCodec for PassthroughCodec {
    fn decode(&self, hash: &str, content: Vec<u8>) -> Result<Envelope> {
        Ok(Envelope {
            content,
            source_hash: hash.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_keeps_bytes_and_hash() {
        let envelope = PassthroughCodec
            .decode("h1", vec![1, 2, 3])
            .expect("decode");
        assert_eq!(envelope.content, vec![1, 2, 3]);
        assert_eq!(envelope.source_hash, "h1");
    }
}
