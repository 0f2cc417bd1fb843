//! Challenge-based open-group authentication.
//!
//! Tokens are obtained through a two-step exchange:
//!
//! 1. `GET loki/v1/get_challenge?pubKey=…` — the server returns the
//!    token encrypted against ECDH(user private key, server public
//!    key), nonce-prefixed and base64-encoded, plus its public key
//!    (32 bytes, or 33 with a leading `05` that is stripped).
//! 2. `POST loki/v1/submit_challenge` with the decrypted token to
//!    activate it.
//!
//! Tokens are cached per server through the host's token store. A
//! per-server async gate keeps at most one challenge exchange in
//! flight; concurrent callers wait and reuse the cached result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use havenchat_crypto::aead;
use havenchat_crypto::ecdh::{ecdh_derive_shared, ed25519_to_x25519, X25519PublicKey};
use havenchat_crypto::signing::Keypair;
use havenchat_protocol::group::decode_base64_field;
use havenchat_protocol::json::field_str;
use havenchat_network::context::NetworkContext;
use havenchat_network::http::{HttpRequest, Transport, Verb};
use havenchat_storage::ClientStore;
use havenchat_types::{HavenchatError, Result};
use serde_json::json;

// ---------------------------------------------------------------------------
// GroupAuth
// ---------------------------------------------------------------------------

/// Per-server token acquisition and caching.
pub struct GroupAuth {
    transport: Arc<dyn Transport>,
    context: Arc<NetworkContext>,
    store: Arc<dyn ClientStore>,
    keypair: Arc<Keypair>,
    /// Per-server gates ensuring a single in-flight challenge.
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GroupAuth {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
        keypair: Arc<Keypair>,
    ) -> Self {
        Self {
            transport,
            context,
            store,
            keypair,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The user's hex public key as sent to servers.
    pub fn user_key(&self) -> String {
        self.keypair.hex_session_id()
    }

    /// Returns a valid bearer token for `server`, running the
    /// challenge exchange if none is cached.
    pub async fn token_for(&self, server: &str) -> Result<String> {
        if let Some(token) = self.store.auth_token(server)? {
            return Ok(token);
        }

        let gate = self.gate_for(server)?;
        let _guard = gate.lock().await;

        // Another caller may have finished the exchange while this
        // one waited on the gate.
        if let Some(token) = self.store.auth_token(server)? {
            return Ok(token);
        }

        let token = self.request_token(server).await?;
        self.submit_token(server, &token).await?;
        self.store.set_auth_token(server, Some(&token))?;
        tracing::info!(server, "open group token acquired");
        Ok(token)
    }

    /// Forgets the cached token for a server (after a 401).
    pub fn clear_token(&self, server: &str) -> Result<()> {
        self.store.set_auth_token(server, None)
    }

    fn gate_for(&self, server: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| HavenchatError::generic("auth gate lock poisoned"))?;
        Ok(in_flight
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    // ------------------------------------------------------------------
    // Challenge exchange
    // ------------------------------------------------------------------

    async fn request_token(&self, server: &str) -> Result<String> {
        let request = HttpRequest::new(Verb::Get, format!("{server}/loki/v1/get_challenge"))
            .with_params(json!({ "pubKey": self.user_key() }));

        let response = {
            let _permit = self.context.network_permit().await?;
            self.transport.execute(request).await?
        };

        let cipher_text = decode_base64_field(field_str(&response, "cipherText64")?, "cipherText64")?;
        let server_key_bytes =
            decode_base64_field(field_str(&response, "serverPubKey64")?, "serverPubKey64")?;
        let server_key = X25519PublicKey::from_server_bytes(&server_key_bytes)?;

        let (user_secret, _) = ed25519_to_x25519(&self.keypair)?;
        let shared = ecdh_derive_shared(&user_secret, &server_key);

        let token_bytes = aead::open(shared.as_bytes(), &cipher_text)?;
        String::from_utf8(token_bytes).map_err(|e| HavenchatError::CryptoError {
            reason: format!("decrypted token is not UTF-8: {e}"),
        })
    }

    async fn submit_token(&self, server: &str, token: &str) -> Result<()> {
        let request = HttpRequest::post(
            format!("{server}/loki/v1/submit_challenge"),
            json!({ "pubKey": self.user_key(), "token": token }),
        );
        let _permit = self.context.network_permit().await?;
        self.transport.execute(request).await?;
        Ok(())
    }
}
