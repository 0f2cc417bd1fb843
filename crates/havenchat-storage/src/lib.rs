//! Abstract persistence contracts for the host database.
//!
//! The networking core never touches a database directly: the host
//! provides these traits, and everything the core persists — swarm
//! caches, auth tokens, message-hash cursors, the received-hash set,
//! open-group cursors — flows through them. All methods are blocking
//! and must be thread-safe; implementations are called from async
//! context only for map-sized operations.
//!
//! [`MemoryStore`](memory::MemoryStore) is the reference
//! implementation, used by every integration test.

pub mod memory;

use havenchat_types::{Result, ServiceNode};

// ---------------------------------------------------------------------------
// SwarmStore
// ---------------------------------------------------------------------------

/// Per-public-key swarm cache.
pub trait SwarmStore: Send + Sync {
    /// Returns the cached swarm for a public key; empty when unknown.
    fn swarm_cache(&self, public_key: &str) -> Result<Vec<ServiceNode>>;

    /// Replaces the cached swarm for a public key.
    fn set_swarm_cache(&self, public_key: &str, nodes: &[ServiceNode]) -> Result<()>;

    /// Removes one node from a key's cached swarm, if present.
    fn remove_from_swarm_cache(&self, public_key: &str, node: &ServiceNode) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Per-server open-group bearer tokens.
pub trait TokenStore: Send + Sync {
    /// Returns the cached token for a server URL.
    fn auth_token(&self, server: &str) -> Result<Option<String>>;

    /// Caches or clears (`None`) the token for a server URL.
    fn set_auth_token(&self, server: &str, token: Option<&str>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MessageHashStore
// ---------------------------------------------------------------------------

/// Polling cursors and the duplicate-suppression hash set.
pub trait MessageHashStore: Send + Sync {
    /// Returns the last-message-hash cursor for a service node.
    fn last_message_hash(&self, target: &ServiceNode) -> Result<Option<String>>;

    /// Advances the last-message-hash cursor for a service node.
    fn set_last_message_hash(&self, target: &ServiceNode, hash: &str) -> Result<()>;

    /// Records a received hash. Returns `false` if the hash was
    /// already present — the caller must then suppress the message.
    ///
    /// Insert-and-check is a single operation so two concurrent polls
    /// cannot both claim the same hash.
    fn add_received_hash(&self, hash: &str) -> Result<bool>;

    /// Whether a hash has been recorded.
    fn is_hash_received(&self, hash: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// GroupStateStore
// ---------------------------------------------------------------------------

/// Open-group polling cursors and channel metadata.
pub trait GroupStateStore: Send + Sync {
    /// Message-polling cursor for `(channel, server)`.
    fn last_message_server_id(&self, channel: u64, server: &str) -> Result<Option<i64>>;
    fn set_last_message_server_id(&self, channel: u64, server: &str, id: i64) -> Result<()>;

    /// Deletion-polling cursor for `(channel, server)`, tracked
    /// separately from the message cursor.
    fn last_deletion_server_id(&self, channel: u64, server: &str) -> Result<Option<i64>>;
    fn set_last_deletion_server_id(&self, channel: u64, server: &str, id: i64) -> Result<()>;

    /// Persists the channel's member count.
    fn set_user_count(&self, channel: u64, server: &str, count: u64) -> Result<()>;

    /// Channel avatar URL.
    fn group_avatar_url(&self, channel: u64, server: &str) -> Result<Option<String>>;
    fn set_group_avatar_url(&self, channel: u64, server: &str, url: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ClientStore
// ---------------------------------------------------------------------------

/// The full persistence surface the networking core requires.
pub trait ClientStore: SwarmStore + TokenStore + MessageHashStore + GroupStateStore {}

impl<T> ClientStore for T where T: SwarmStore + TokenStore + MessageHashStore + GroupStateStore {}
