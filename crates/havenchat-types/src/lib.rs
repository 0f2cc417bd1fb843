//! Core shared types for the Havenchat client networking core.
//!
//! This crate defines the types every other crate in the workspace
//! depends on. No other crate should define shared types — everything
//! lives here.

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ServiceNode
// ---------------------------------------------------------------------------

/// A storage service node: the `(address, port)` pair of a swarm member.
///
/// The address is an opaque scheme-prefixed URI (`https://203.0.113.7`).
/// Two `ServiceNode`s are equal iff both address and port match; the
/// random pool and all swarm caches key on this equality.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Scheme-prefixed host, e.g. `https://203.0.113.7`.
    pub address: String,
    /// Storage RPC port.
    pub port: u16,
}

impl ServiceNode {
    /// Creates a `ServiceNode` from an already scheme-prefixed address.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Creates a `ServiceNode` from a bare IP, prefixing `https://`.
    pub fn from_ip(ip: &str, port: u16) -> Self {
        Self {
            address: format!("https://{ip}"),
            port,
        }
    }

    /// Returns the base URL of this node, e.g. `https://203.0.113.7:22021`.
    pub fn url(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

// ---------------------------------------------------------------------------
// PeerInfo
// ---------------------------------------------------------------------------

/// A directly reachable peer for the peer-to-peer delivery path.
///
/// Peers are keyed by their hex public key in the peer registry. The
/// `is_online` flag is bookkeeping owned by the send path: set on a
/// successful direct send, cleared when one fails.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Scheme-prefixed host the peer listens on.
    pub address: String,
    /// Peer listen port.
    pub port: u16,
    /// Whether the last direct delivery attempt succeeded.
    pub is_online: bool,
}

impl PeerInfo {
    /// Creates a peer entry, initially marked offline.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            is_online: false,
        }
    }

    /// Returns the peer as a single-target [`ServiceNode`].
    pub fn as_service_node(&self) -> ServiceNode {
        ServiceNode::new(self.address.clone(), self.port)
    }
}

// ---------------------------------------------------------------------------
// HavenchatError
// ---------------------------------------------------------------------------

/// Central error type for the Havenchat client core.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum, ensuring a unified error handling surface.
/// The first group mirrors the network error taxonomy exactly; the
/// trailing variants cover crypto, storage and configuration seams.
#[derive(Debug, Error)]
pub enum HavenchatError {
    /// A non-2xx response or a transport failure, surfaced verbatim.
    /// Transport failures (connect, timeout) carry `status: 0` and no
    /// body.
    #[error("HTTP request failed with status {status}")]
    HttpRequestFailed {
        /// HTTP status code; `0` for transport-level failures.
        status: u16,
        /// Response body, if one was received.
        body: Option<String>,
    },

    /// A service node answered 421: the key's swarm no longer includes
    /// this node. The node has already been evicted from the swarm
    /// cache when this error surfaces.
    #[error("service node no longer hosts this key's swarm")]
    SnodeMigrated,

    /// A service node answered 432: the attached proof of work does not
    /// meet the current difficulty. The difficulty state has already
    /// been updated from the response when this error surfaces.
    #[error("proof of work did not meet the required difficulty")]
    InsufficientProofOfWork,

    /// An authenticated open-group call answered 401. The cached token
    /// for the server has already been cleared when this error
    /// surfaces; callers may re-enter to trigger a fresh challenge.
    #[error("open group auth token expired")]
    TokenExpired,

    /// Structurally invalid JSON or a missing required field.
    #[error("parsing failed: {reason}")]
    ParsingFailed {
        /// Human-readable description of what failed to parse.
        reason: String,
    },

    /// Signing an outbound open-group message failed.
    #[error("message signing failed: {reason}")]
    MessageSigningFailed {
        /// Human-readable description of the signing failure.
        reason: String,
    },

    /// Converting a domain message to its wire form failed.
    #[error("message conversion failed: {reason}")]
    MessageConversionFailed {
        /// Human-readable description of the conversion failure.
        reason: String,
    },

    /// Proof-of-work computation failed before any bytes hit the wire.
    #[error("proof of work calculation failed: {reason}")]
    ProofOfWorkCalculationFailed {
        /// Human-readable description of the PoW failure.
        reason: String,
    },

    /// An upload exceeds the configured size limit.
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    MaxSizeExceeded {
        /// Size of the rejected payload in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// A cryptographic operation failed (ECDH, AEAD, verification).
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// A host persistence operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// Unclassified failure.
    #[error("{reason}")]
    Generic {
        /// Human-readable description.
        reason: String,
    },
}

impl HavenchatError {
    /// Shorthand for [`HavenchatError::Generic`].
    pub fn generic(reason: impl Into<String>) -> Self {
        Self::Generic {
            reason: reason.into(),
        }
    }

    /// Whether this error is fatal to the current call.
    ///
    /// Fatal errors carry a side effect the caller must react to
    /// (re-fetch the swarm, recompute the proof of work, re-run the
    /// challenge) and are surfaced through the bounded retry wrapper
    /// instead of being retried blindly.
    pub fn is_fatal_for_call(&self) -> bool {
        matches!(
            self,
            Self::SnodeMigrated | Self::InsufficientProofOfWork | Self::TokenExpired
        )
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`HavenchatError`].
pub type Result<T> = std::result::Result<T, HavenchatError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn service_node_equality_by_address_and_port() {
        let a = ServiceNode::new("https://1.2.3.4", 22021);
        let b = ServiceNode::new("https://1.2.3.4", 22021);
        let c = ServiceNode::new("https://1.2.3.4", 22022);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn service_node_hashes_consistently() {
        let mut set = HashSet::new();
        set.insert(ServiceNode::new("https://1.2.3.4", 22021));
        set.insert(ServiceNode::new("https://1.2.3.4", 22021));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn service_node_url_joins_address_and_port() {
        let node = ServiceNode::from_ip("203.0.113.7", 22021);
        assert_eq!(node.url(), "https://203.0.113.7:22021");
    }

    #[test]
    fn service_node_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let node = ServiceNode::from_ip("203.0.113.7", 22021);
        let json = serde_json::to_string(&node)?;
        let parsed: ServiceNode = serde_json::from_str(&json)?;
        assert_eq!(node, parsed);
        Ok(())
    }

    #[test]
    fn peer_info_starts_offline() {
        let peer = PeerInfo::new("https://10.0.0.2", 8080);
        assert!(!peer.is_online);
        assert_eq!(peer.as_service_node().url(), "https://10.0.0.2:8080");
    }

    #[test]
    fn fatal_errors_are_classified() {
        assert!(HavenchatError::SnodeMigrated.is_fatal_for_call());
        assert!(HavenchatError::InsufficientProofOfWork.is_fatal_for_call());
        assert!(HavenchatError::TokenExpired.is_fatal_for_call());
        assert!(!HavenchatError::HttpRequestFailed {
            status: 500,
            body: None
        }
        .is_fatal_for_call());
        assert!(!HavenchatError::generic("boom").is_fatal_for_call());
    }

    #[test]
    fn error_display_contains_status() {
        let err = HavenchatError::HttpRequestFailed {
            status: 421,
            body: None,
        };
        assert!(err.to_string().contains("421"));
    }
}
