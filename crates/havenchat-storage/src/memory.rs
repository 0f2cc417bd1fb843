//! In-memory reference implementation of the persistence contracts.
//!
//! Backs every integration test and serves hosts that keep client
//! state in their own database but want the core functional before
//! wiring persistence. All state lives behind a single
//! `std::sync::Mutex`; the mutated values are map-sized, so one lock
//! suffices.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use havenchat_types::{HavenchatError, Result, ServiceNode};

use crate::{GroupStateStore, MessageHashStore, SwarmStore, TokenStore};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    swarms: HashMap<String, Vec<ServiceNode>>,
    tokens: HashMap<String, String>,
    last_hashes: HashMap<ServiceNode, String>,
    received_hashes: HashSet<String>,
    message_cursors: HashMap<(u64, String), i64>,
    deletion_cursors: HashMap<(u64, String), i64>,
    user_counts: HashMap<(u64, String), u64>,
    avatar_urls: HashMap<(u64, String), String>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| HavenchatError::StorageError {
            reason: "memory store lock poisoned".into(),
        })
    }

    /// Number of recorded received hashes. Useful for tests.
    pub fn received_hash_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.received_hashes.len())
            .unwrap_or(0)
    }
}

impl SwarmStore for MemoryStore {
    fn swarm_cache(&self, public_key: &str) -> Result<Vec<ServiceNode>> {
        Ok(self
            .lock()?
            .swarms
            .get(public_key)
            .cloned()
            .unwrap_or_default())
    }

    fn set_swarm_cache(&self, public_key: &str, nodes: &[ServiceNode]) -> Result<()> {
        self.lock()?
            .swarms
            .insert(public_key.to_string(), nodes.to_vec());
        Ok(())
    }

    fn remove_from_swarm_cache(&self, public_key: &str, node: &ServiceNode) -> Result<()> {
        if let Some(swarm) = self.lock()?.swarms.get_mut(public_key) {
            swarm.retain(|n| n != node);
        }
        Ok(())
    }
}

impl TokenStore for MemoryStore {
    fn auth_token(&self, server: &str) -> Result<Option<String>> {
        Ok(self.lock()?.tokens.get(server).cloned())
    }

    fn set_auth_token(&self, server: &str, token: Option<&str>) -> Result<()> {
        let mut inner = self.lock()?;
        match token {
            Some(token) => {
                inner.tokens.insert(server.to_string(), token.to_string());
            }
            None => {
                inner.tokens.remove(server);
            }
        }
        Ok(())
    }
}

impl MessageHashStore for MemoryStore {
    fn last_message_hash(&self, target: &ServiceNode) -> Result<Option<String>> {
        Ok(self.lock()?.last_hashes.get(target).cloned())
    }

    fn set_last_message_hash(&self, target: &ServiceNode, hash: &str) -> Result<()> {
        self.lock()?
            .last_hashes
            .insert(target.clone(), hash.to_string());
        Ok(())
    }

    fn add_received_hash(&self, hash: &str) -> Result<bool> {
        Ok(self.lock()?.received_hashes.insert(hash.to_string()))
    }

    fn is_hash_received(&self, hash: &str) -> Result<bool> {
        Ok(self.lock()?.received_hashes.contains(hash))
    }
}

impl GroupStateStore for MemoryStore {
    fn last_message_server_id(&self, channel: u64, server: &str) -> Result<Option<i64>> {
        Ok(self
            .lock()?
            .message_cursors
            .get(&(channel, server.to_string()))
            .copied())
    }

    fn set_last_message_server_id(&self, channel: u64, server: &str, id: i64) -> Result<()> {
        self.lock()?
            .message_cursors
            .insert((channel, server.to_string()), id);
        Ok(())
    }

    fn last_deletion_server_id(&self, channel: u64, server: &str) -> Result<Option<i64>> {
        Ok(self
            .lock()?
            .deletion_cursors
            .get(&(channel, server.to_string()))
            .copied())
    }

    fn set_last_deletion_server_id(&self, channel: u64, server: &str, id: i64) -> Result<()> {
        self.lock()?
            .deletion_cursors
            .insert((channel, server.to_string()), id);
        Ok(())
    }

    fn set_user_count(&self, channel: u64, server: &str, count: u64) -> Result<()> {
        self.lock()?
            .user_counts
            .insert((channel, server.to_string()), count);
        Ok(())
    }

    fn group_avatar_url(&self, channel: u64, server: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .avatar_urls
            .get(&(channel, server.to_string()))
            .cloned())
    }

    fn set_group_avatar_url(&self, channel: u64, server: &str, url: &str) -> Result<()> {
        self.lock()?
            .avatar_urls
            .insert((channel, server.to_string()), url.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
