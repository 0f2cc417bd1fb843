//! SHA-512 helpers.
//!
//! The proof-of-work iterates nested SHA-512 digests; both helpers
//! return fixed-size arrays so callers never handle slices of unknown
//! length.

use sha2::{Digest, Sha512};

/// Computes the SHA-512 digest of `data`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// Computes `SHA-512(prefix || data)` without an intermediate
/// allocation of the concatenated input.
pub fn sha512_with_prefix(prefix: &[u8], data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(prefix);
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}
