//! Cryptographic primitives for the Havenchat client core.
//!
//! - [`signing`] — Ed25519 keypairs, signing, verification
//! - [`ecdh`] — X25519 key agreement and Ed25519-to-X25519 conversion
//! - [`aead`] — AES-256-GCM with nonce-prefixed blobs (challenge auth)
//! - [`hash`] — SHA-512 helpers used by the proof-of-work

pub mod aead;
pub mod ecdh;
pub mod hash;
pub mod signing;
