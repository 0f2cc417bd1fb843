//! Ed25519 digital signature operations.
//!
//! Provides keypair generation, message signing and signature
//! verification for the open-group REST client. The private key is
//! automatically zeroized on drop via `ed25519-dalek`'s built-in
//! `ZeroizeOnDrop`.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use havenchat_types::{HavenchatError, Result};
use rand::rngs::OsRng;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Ed25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Fixed byte length of an Ed25519 public key.
    pub const LEN: usize = 32;

    /// Creates a [`PublicKey`] from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a public key from hex. A 33-byte key carrying the `05`
    /// network prefix is stripped to its 32-byte tail, matching how
    /// subscriber keys travel on the wire.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| HavenchatError::CryptoError {
            reason: format!("invalid hex public key: {e}"),
        })?;
        let tail: &[u8] = match bytes.len() {
            32 => &bytes,
            33 if bytes[0] == 0x05 => &bytes[1..],
            other => {
                return Err(HavenchatError::CryptoError {
                    reason: format!("expected 32 or prefixed 33 byte key, got {other}"),
                })
            }
        };
        let mut arr = [0u8; 32];
        arr.copy_from_slice(tail);
        Ok(Self(arr))
    }

    /// Returns the underlying 32-byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Fixed byte length of an Ed25519 signature.
    pub const LEN: usize = 64;

    /// Creates a [`Signature`] from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parses a signature from its 128-character hex form.
    pub fn from_hex(hex_sig: &str) -> Result<Self> {
        let bytes = hex::decode(hex_sig).map_err(|e| HavenchatError::CryptoError {
            reason: format!("invalid hex signature: {e}"),
        })?;
        if bytes.len() != Self::LEN {
            return Err(HavenchatError::CryptoError {
                reason: format!("expected {} byte signature, got {}", Self::LEN, bytes.len()),
            });
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns the underlying 64-byte array.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns the signature as lowercase hex, the wire form used by
    /// the open-group API.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// Ed25519 signing keypair.
///
/// Wraps an `ed25519-dalek` [`SigningKey`]. The private key is
/// automatically zeroized when this struct is dropped.
pub struct Keypair {
    /// Internal signing key. `pub(crate)` so [`crate::ecdh`] can
    /// convert to X25519 without exposing the seed to external callers.
    pub(crate) signing_key: SigningKey,
}

impl Keypair {
    /// Generates a new random keypair using OS-level entropy.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Reconstructs a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Returns the public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Returns the public key as network-prefixed hex (`05` + key),
    /// the subscriber identity format.
    pub fn hex_session_id(&self) -> String {
        format!("05{}", hex::encode(self.signing_key.verifying_key().to_bytes()))
    }

    /// Signs an arbitrary message and returns the Ed25519 signature.
    ///
    /// Deterministic: the same keypair + message always yields the
    /// same signature (RFC 8032).
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature(sig.to_bytes())
    }
}

// Keypair intentionally does not implement Clone or Debug to prevent
// accidental leakage of the private key in logs or copies.

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Verifies an Ed25519 signature against a public key and message.
///
/// Returns `Ok(())` if the signature is valid, or
/// [`HavenchatError::CryptoError`] if verification fails.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<()> {
    let vk = VerifyingKey::from_bytes(&public_key.0).map_err(|e| HavenchatError::CryptoError {
        reason: format!("invalid public key: {e}"),
    })?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    vk.verify_strict(message, &sig)
        .map_err(|e| HavenchatError::CryptoError {
            reason: format!("signature verification failed: {e}"),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = Keypair::generate();
        let msg = b"test message";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [0x42u8; 32];
        let kp1 = Keypair::from_seed(&seed);
        let kp2 = Keypair::from_seed(&seed);
        assert_eq!(kp1.public_key(), kp2.public_key());

        let msg = b"determinism";
        assert_eq!(kp1.sign(msg).as_bytes(), kp2.sign(msg).as_bytes());
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"correct message");
        assert!(verify(&kp.public_key(), b"wrong message", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = kp1.sign(b"test");
        assert!(verify(&kp2.public_key(), b"test", &sig).is_err());
    }

    #[test]
    fn hex_key_roundtrip() {
        let kp = Keypair::from_seed(&[0x07; 32]);
        let bare = hex::encode(kp.public_key().as_bytes());
        let parsed = PublicKey::from_hex(&bare).expect("bare key");
        assert_eq!(parsed, kp.public_key());
    }

    #[test]
    fn prefixed_hex_key_is_stripped() {
        let kp = Keypair::from_seed(&[0x07; 32]);
        let prefixed = kp.hex_session_id();
        assert!(prefixed.starts_with("05"));
        let parsed = PublicKey::from_hex(&prefixed).expect("prefixed key");
        assert_eq!(parsed, kp.public_key());
    }

    #[test]
    fn wrong_length_hex_key_rejected() {
        assert!(PublicKey::from_hex("abcd").is_err());
        // 33 bytes without the 05 prefix is also rejected.
        let bad = format!("07{}", hex::encode([0u8; 32]));
        assert!(PublicKey::from_hex(&bad).is_err());
    }

    #[test]
    fn signature_hex_roundtrip() {
        let kp = Keypair::from_seed(&[0x09; 32]);
        let sig = kp.sign(b"payload");
        let parsed = Signature::from_hex(&sig.to_hex()).expect("hex signature");
        assert_eq!(parsed, sig);
    }
}
