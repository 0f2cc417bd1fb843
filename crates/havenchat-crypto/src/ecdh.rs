//! X25519 Elliptic-Curve Diffie-Hellman key agreement.
//!
//! Used by the open-group challenge exchange: the server encrypts the
//! auth token against ECDH(user private key, server public key), and
//! the client derives the same shared secret to open it. Includes the
//! RFC 7748 compatible Ed25519-to-X25519 conversion so the wallet's
//! signing identity doubles as the agreement key.

use havenchat_types::{HavenchatError, Result};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::signing::Keypair;

// ---------------------------------------------------------------------------
// X25519PublicKey
// ---------------------------------------------------------------------------

/// X25519 public key (32 bytes) for Diffie-Hellman key agreement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct X25519PublicKey(x25519_dalek::PublicKey);

impl X25519PublicKey {
    /// Creates an [`X25519PublicKey`] from raw 32-byte Montgomery-form
    /// representation.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Parses a server public key from its decoded base64 bytes.
    ///
    /// Servers send either the bare 32-byte key or a 33-byte key with
    /// the `05` network prefix; the prefix is stripped.
    pub fn from_server_bytes(bytes: &[u8]) -> Result<Self> {
        let tail: &[u8] = match bytes.len() {
            32 => bytes,
            33 if bytes[0] == 0x05 => &bytes[1..],
            other => {
                return Err(HavenchatError::CryptoError {
                    reason: format!("expected 32 or prefixed 33 byte server key, got {other}"),
                })
            }
        };
        let mut arr = [0u8; 32];
        arr.copy_from_slice(tail);
        Ok(Self(x25519_dalek::PublicKey::from(arr)))
    }

    /// Returns the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

// ---------------------------------------------------------------------------
// X25519StaticSecret
// ---------------------------------------------------------------------------

/// Long-lived X25519 secret key.
///
/// The underlying `x25519-dalek` secret zeroizes its memory on drop.
pub struct X25519StaticSecret(x25519_dalek::StaticSecret);

impl X25519StaticSecret {
    /// Creates an [`X25519StaticSecret`] from raw 32-byte key material.
    ///
    /// Clamping is performed internally by `x25519-dalek` during scalar
    /// multiplication, so the raw bytes are stored as-is.
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }
}

// X25519StaticSecret does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// SharedSecret
// ---------------------------------------------------------------------------

/// Shared secret derived from an X25519 Diffie-Hellman exchange
/// (32 bytes). Zeroized on drop; used directly as AEAD key material by
/// the challenge decryption.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Returns the raw 32-byte shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// SharedSecret does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// ECDH
// ---------------------------------------------------------------------------

/// Performs X25519 ECDH between `our_secret` and `their_public`.
///
/// Both parties performing this operation with the other's public key
/// derive the identical shared secret.
pub fn ecdh_derive_shared(
    our_secret: &X25519StaticSecret,
    their_public: &X25519PublicKey,
) -> SharedSecret {
    let raw = our_secret.0.diffie_hellman(&their_public.0);
    SharedSecret(*raw.as_bytes())
}

// ---------------------------------------------------------------------------
// Ed25519 → X25519 conversion
// ---------------------------------------------------------------------------

/// Converts an Ed25519 signing keypair to an X25519 static secret and
/// public key pair.
///
/// Process (RFC 7748 / RFC 8032 compatible):
/// 1. `SHA-512(ed25519_seed)` → 64 bytes
/// 2. Take lower 32 bytes → X25519 secret (clamping done internally)
/// 3. Derive X25519 public key from the secret
///
/// Intermediate values are zeroized before returning.
pub fn ed25519_to_x25519(keypair: &Keypair) -> Result<(X25519StaticSecret, X25519PublicKey)> {
    let mut seed = keypair.signing_key.to_bytes();
    let hash_output = Sha512::digest(seed);
    seed.zeroize();

    let mut hash_bytes = [0u8; 64];
    hash_bytes.copy_from_slice(&hash_output);

    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(&hash_bytes[..32]);
    hash_bytes.zeroize();

    let static_secret = x25519_dalek::StaticSecret::from(secret_bytes);
    secret_bytes.zeroize();

    let public_key = x25519_dalek::PublicKey::from(&static_secret);

    Ok((X25519StaticSecret(static_secret), X25519PublicKey(public_key)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::RngCore;

    fn random_secret() -> X25519StaticSecret {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        X25519StaticSecret::from_raw(bytes)
    }

    #[test]
    fn static_ecdh_shared_secret_matches() {
        let a = random_secret();
        let b = random_secret();
        let pub_a = a.public_key();
        let pub_b = b.public_key();

        let shared_ab = ecdh_derive_shared(&a, &pub_b);
        let shared_ba = ecdh_derive_shared(&b, &pub_a);
        assert_eq!(shared_ab.as_bytes(), shared_ba.as_bytes());
    }

    #[test]
    fn ed25519_to_x25519_is_deterministic() {
        let kp = Keypair::from_seed(&[0x55u8; 32]);
        let (_, pub1) = ed25519_to_x25519(&kp).expect("convert");
        let (_, pub2) = ed25519_to_x25519(&kp).expect("convert");
        assert_eq!(pub1.as_bytes(), pub2.as_bytes());
    }

    #[test]
    fn ed25519_to_x25519_secret_matches_public() {
        let kp = Keypair::generate();
        let (secret, public) = ed25519_to_x25519(&kp).expect("convert");
        assert_eq!(public.as_bytes(), secret.public_key().as_bytes());
    }

    #[test]
    fn server_key_with_prefix_is_stripped() {
        let secret = random_secret();
        let raw = *secret.public_key().as_bytes();

        let bare = X25519PublicKey::from_server_bytes(&raw).expect("bare");
        let mut prefixed = vec![0x05u8];
        prefixed.extend_from_slice(&raw);
        let stripped = X25519PublicKey::from_server_bytes(&prefixed).expect("prefixed");

        assert_eq!(bare, stripped);
    }

    #[test]
    fn server_key_with_bad_length_rejected() {
        assert!(X25519PublicKey::from_server_bytes(&[0u8; 31]).is_err());
        assert!(X25519PublicKey::from_server_bytes(&[0u8; 34]).is_err());
        // 33 bytes without the 05 prefix is also rejected.
        let mut bad = vec![0x07u8];
        bad.extend_from_slice(&[0u8; 32]);
        assert!(X25519PublicKey::from_server_bytes(&bad).is_err());
    }
}
