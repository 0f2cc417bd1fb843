//! Hashcash-style proof of work for message admission.
//!
//! Service nodes gate `SendMessage` behind a nonce computed over the
//! message `(timestamp, ttl, recipient, data)` at a difficulty chosen
//! by the network. The target scales inversely with both difficulty
//! and payload weight, so long-lived or large messages cost more.
//!
//! # Algorithm
//!
//! ```text
//! payload  = timestamp || ttl || recipient || data   (decimal strings)
//! weight   = len(payload) + 8 + (ttl_ms * (len(payload) + 8)) / 65536
//! target   = u64::MAX / (difficulty * weight)
//! trial(n) = first 8 bytes (BE) of SHA-512(n_be || SHA-512(payload))
//! valid    = trial(nonce) < target
//! ```
//!
//! The eight-byte nonce travels base64-encoded in the `SendMessage`
//! params.
//!
//! # Warning
//!
//! Generation is CPU-intensive. Callers in async contexts should use
//! `tokio::task::spawn_blocking` to avoid blocking the runtime.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use havenchat_types::{HavenchatError, Result};

use havenchat_crypto::hash::{sha512, sha512_with_prefix};

/// Byte length of the proof-of-work nonce.
const NONCE_LEN: usize = 8;

/// Maximum nonce iterations before giving up.
const MAX_ITERATIONS: u64 = 1 << 28; // ~268M

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Computes a proof-of-work nonce for the given message fields.
///
/// Returns the base64-encoded eight-byte nonce to attach to the
/// `SendMessage` params.
///
/// # Errors
///
/// [`HavenchatError::ProofOfWorkCalculationFailed`] if the difficulty
/// is zero, the target collapses to zero, or no valid nonce is found
/// within the iteration limit.
pub fn calculate_nonce(
    timestamp_ms: u64,
    ttl_ms: u64,
    recipient: &str,
    data: &str,
    difficulty: u64,
) -> Result<String> {
    let target = calc_target(timestamp_ms, ttl_ms, recipient, data, difficulty)?;
    let payload = build_payload(timestamp_ms, ttl_ms, recipient, data);
    let payload_hash = sha512(payload.as_bytes());

    for nonce in 0..MAX_ITERATIONS {
        if trial_value(nonce, &payload_hash) < target {
            return Ok(BASE64.encode(nonce.to_be_bytes()));
        }
    }

    Err(HavenchatError::ProofOfWorkCalculationFailed {
        reason: format!("no valid nonce found within {MAX_ITERATIONS} iterations"),
    })
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verifies a base64-encoded nonce against the message fields.
pub fn verify_nonce(
    nonce_b64: &str,
    timestamp_ms: u64,
    ttl_ms: u64,
    recipient: &str,
    data: &str,
    difficulty: u64,
) -> Result<()> {
    let bytes = BASE64
        .decode(nonce_b64)
        .map_err(|e| HavenchatError::ProofOfWorkCalculationFailed {
            reason: format!("nonce is not valid base64: {e}"),
        })?;
    if bytes.len() != NONCE_LEN {
        return Err(HavenchatError::ProofOfWorkCalculationFailed {
            reason: format!("expected {NONCE_LEN} byte nonce, got {}", bytes.len()),
        });
    }
    let mut arr = [0u8; NONCE_LEN];
    arr.copy_from_slice(&bytes);
    let nonce = u64::from_be_bytes(arr);

    let target = calc_target(timestamp_ms, ttl_ms, recipient, data, difficulty)?;
    let payload = build_payload(timestamp_ms, ttl_ms, recipient, data);
    let payload_hash = sha512(payload.as_bytes());

    if trial_value(nonce, &payload_hash) < target {
        Ok(())
    } else {
        Err(HavenchatError::ProofOfWorkCalculationFailed {
            reason: "nonce does not meet the difficulty target".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn build_payload(timestamp_ms: u64, ttl_ms: u64, recipient: &str, data: &str) -> String {
    format!("{timestamp_ms}{ttl_ms}{recipient}{data}")
}

/// Computes the acceptance target. All intermediate math runs in
/// `u128` so large TTLs cannot overflow the weight product.
fn calc_target(
    timestamp_ms: u64,
    ttl_ms: u64,
    recipient: &str,
    data: &str,
    difficulty: u64,
) -> Result<u64> {
    if difficulty == 0 {
        return Err(HavenchatError::ProofOfWorkCalculationFailed {
            reason: "difficulty must be greater than 0".into(),
        });
    }

    let payload_len = build_payload(timestamp_ms, ttl_ms, recipient, data).len() as u128;
    let total_len = payload_len + NONCE_LEN as u128;
    let ttl_weight = (ttl_ms as u128 * total_len) / 65536;
    let denominator = difficulty as u128 * (total_len + ttl_weight);

    let target = u64::MAX as u128 / denominator;
    if target == 0 {
        return Err(HavenchatError::ProofOfWorkCalculationFailed {
            reason: "difficulty target collapsed to zero".into(),
        });
    }
    Ok(target as u64)
}

/// The trial value for a nonce: the big-endian `u64` read from the
/// first eight bytes of `SHA-512(nonce || payload_hash)`.
fn trial_value(nonce: u64, payload_hash: &[u8; 64]) -> u64 {
    let digest = sha512_with_prefix(&nonce.to_be_bytes(), payload_hash);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "05a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2";
    const DATA: &str = "aGVsbG8gd29ybGQ=";

    #[test]
    fn generate_verify_roundtrip_low_difficulty() {
        let nonce = calculate_nonce(1_700_000_000_000, 86_400_000, RECIPIENT, DATA, 1)
            .expect("should find nonce");
        assert!(
            verify_nonce(&nonce, 1_700_000_000_000, 86_400_000, RECIPIENT, DATA, 1).is_ok()
        );
    }

    #[test]
    fn verify_rejects_wrong_timestamp() {
        let nonce = calculate_nonce(1_700_000_000_000, 86_400_000, RECIPIENT, DATA, 1)
            .expect("should find nonce");
        // A different timestamp changes the payload hash; the nonce is
        // overwhelmingly unlikely to remain valid at any real target.
        let shifted = verify_nonce(&nonce, 1_700_000_000_001, 86_400_000, RECIPIENT, DATA, 100);
        assert!(shifted.is_err());
    }

    #[test]
    fn zero_difficulty_rejected() {
        let result = calculate_nonce(1_700_000_000_000, 86_400_000, RECIPIENT, DATA, 0);
        assert!(result.is_err());
    }

    #[test]
    fn higher_difficulty_lowers_target() {
        let low = calc_target(0, 86_400_000, RECIPIENT, DATA, 10).expect("low");
        let high = calc_target(0, 86_400_000, RECIPIENT, DATA, 100).expect("high");
        assert!(high < low);
    }

    #[test]
    fn longer_ttl_lowers_target() {
        let short = calc_target(0, 3_600_000, RECIPIENT, DATA, 40).expect("short");
        let long = calc_target(0, 86_400_000, RECIPIENT, DATA, 40).expect("long");
        assert!(long < short);
    }

    #[test]
    fn malformed_nonce_rejected() {
        assert!(verify_nonce("!!!", 0, 0, RECIPIENT, DATA, 1).is_err());
        // Valid base64 but wrong length.
        let short = BASE64.encode([0u8; 4]);
        assert!(verify_nonce(&short, 0, 0, RECIPIENT, DATA, 1).is_err());
    }
}
