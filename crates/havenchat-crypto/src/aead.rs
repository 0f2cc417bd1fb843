//! AES-256-GCM with nonce-prefixed blobs.
//!
//! Wire format: `[12-byte nonce] || [ciphertext + 16-byte tag]`.
//! The open-group challenge exchange delivers the auth token in this
//! form, keyed by the X25519 shared secret. `seal` exists for tests
//! and symmetry; the client core itself only opens.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use havenchat_types::{HavenchatError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Byte length of the nonce prefix.
pub const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under `key`. Output: `nonce || ciphertext+tag`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| HavenchatError::CryptoError {
        reason: format!("AEAD key init failed: {e}"),
    })?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| HavenchatError::CryptoError {
            reason: format!("AEAD encryption failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`seal`] (or by a server following the
/// same convention).
///
/// # Errors
///
/// [`HavenchatError::CryptoError`] if the blob is shorter than the
/// nonce prefix or the tag does not authenticate.
pub fn open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(HavenchatError::CryptoError {
            reason: format!("AEAD blob too short: {} bytes", blob.len()),
        });
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| HavenchatError::CryptoError {
        reason: format!("AEAD key init failed: {e}"),
    })?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| HavenchatError::CryptoError {
            reason: format!("AEAD decryption failed: {e}"),
        })
}
