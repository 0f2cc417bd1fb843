//! The open-group REST client.
//!
//! One [`GroupClient`] serves any number of servers and channels.
//! Every call authenticates with a cached bearer token, retries
//! through the shared bounded wrapper and surfaces `TokenExpired`
//! after clearing the token on a 401 so callers can re-enter.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use havenchat_crypto::signing::Keypair;
use havenchat_network::context::NetworkContext;
use havenchat_network::http::{HttpRequest, Transport, Upload, Verb};
use havenchat_network::retry::with_retries;
use havenchat_protocol::group::OpenGroupMessage;
use havenchat_protocol::json::{field_str, lenient_i64};
use havenchat_storage::ClientStore;
use havenchat_types::{HavenchatError, Result};
use serde_json::{json, Value};

use crate::auth::GroupAuth;

/// Page size for initial message and deletion fetches.
const FETCH_COUNT: u32 = 64;

/// Channel-settings annotation carrying name and avatar.
const SETTINGS_ANNOTATION_TYPE: &str = "net.patter-app.settings";

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

/// Parsed channel metadata.
#[derive(Clone, Debug)]
pub struct ChannelInfo {
    pub display_name: Option<String>,
    pub user_count: u64,
    pub avatar_url: Option<String>,
}

/// One entry of a batch profile fetch.
#[derive(Clone, Debug)]
pub struct UserProfile {
    /// Hex public key.
    pub username: String,
    pub display_name: Option<String>,
}

/// Result of a file or avatar upload.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub id: Option<i64>,
    pub url: String,
}

// ---------------------------------------------------------------------------
// GroupClient
// ---------------------------------------------------------------------------

/// Authenticated ADN-style REST client for open groups.
pub struct GroupClient {
    transport: Arc<dyn Transport>,
    context: Arc<NetworkContext>,
    store: Arc<dyn ClientStore>,
    auth: GroupAuth,
    keypair: Arc<Keypair>,
    /// `(server, channel)` → moderator keys.
    moderators: Mutex<HashMap<(String, u64), HashSet<String>>>,
}

impl GroupClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<NetworkContext>,
        store: Arc<dyn ClientStore>,
        keypair: Arc<Keypair>,
    ) -> Self {
        let auth = GroupAuth::new(
            transport.clone(),
            context.clone(),
            store.clone(),
            keypair.clone(),
        );
        Self {
            transport,
            context,
            store,
            auth,
            keypair,
            moderators: Mutex::new(HashMap::new()),
        }
    }

    /// The token layer, exposed for hosts that pre-authenticate.
    pub fn auth(&self) -> &GroupAuth {
        &self.auth
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Fetches new messages for a channel, ascending by server
    /// timestamp. Messages with invalid signatures are discarded; the
    /// polling cursor advances to the highest id seen either way.
    pub async fn get_messages(&self, server: &str, channel: u64) -> Result<Vec<OpenGroupMessage>> {
        let mut params = json!({ "include_annotations": 1 });
        match self.store.last_message_server_id(channel, server)? {
            Some(since_id) => params["since_id"] = json!(since_id),
            None => {
                params["count"] = json!(FETCH_COUNT);
                params["include_deleted"] = json!(0);
            }
        }

        let url = format!("{server}/channels/{channel}/messages");
        let response = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Get, url.clone()).with_params(params.clone()), &token)
            })
            .await?;

        let entries = response
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let _permit = self.context.work_permit().await?;
        let mut messages = Vec::new();
        let mut max_id = None;

        for entry in &entries {
            if let Some(id) = entry.get("id").and_then(lenient_i64) {
                max_id = Some(max_id.map_or(id, |m: i64| m.max(id)));
            }
            match OpenGroupMessage::from_wire(entry) {
                Ok(Some(message)) => {
                    if message.has_valid_signature() {
                        messages.push(message);
                    } else {
                        tracing::warn!(
                            server,
                            channel,
                            server_id = ?message.server_id,
                            "discarding open group message with invalid signature"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(server, channel, %e, "skipping unparsable open group message");
                }
            }
        }

        if let Some(max_id) = max_id {
            self.store
                .set_last_message_server_id(channel, server, max_id)?;
        }

        messages.sort_by_key(|m| m.server_timestamp_ms);
        Ok(messages)
    }

    /// Signs and posts a message, returning the server's echo.
    pub async fn send_message(
        &self,
        server: &str,
        channel: u64,
        mut message: OpenGroupMessage,
    ) -> Result<OpenGroupMessage> {
        message.sign(&self.keypair)?;
        let payload = message.to_wire_payload()?;

        let url = format!("{server}/channels/{channel}/messages");
        let response = self
            .authed(server, move |token| {
                bearer(
                    HttpRequest::new(Verb::Post, url.clone()).with_params(payload.clone()),
                    &token,
                )
            })
            .await?;

        let echoed = response.get("data").ok_or_else(|| HavenchatError::ParsingFailed {
            reason: "send response has no data".into(),
        })?;
        OpenGroupMessage::from_wire(echoed)?.ok_or_else(|| HavenchatError::ParsingFailed {
            reason: "send response did not echo the message".into(),
        })
    }

    // ------------------------------------------------------------------
    // Deletions
    // ------------------------------------------------------------------

    /// Fetches server ids of messages deleted since the deletion
    /// cursor, advancing it to the highest deletion id seen.
    pub async fn get_deleted_message_ids(&self, server: &str, channel: u64) -> Result<Vec<i64>> {
        let mut params = json!({});
        match self.store.last_deletion_server_id(channel, server)? {
            Some(since_id) => params["since_id"] = json!(since_id),
            None => params["count"] = json!(FETCH_COUNT),
        }

        let url = format!("{server}/loki/v1/channel/{channel}/deletes");
        let response = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Get, url.clone()).with_params(params.clone()), &token)
            })
            .await?;

        let entries = response
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut message_ids = Vec::new();
        let mut max_deletion_id = None;
        for entry in &entries {
            match (
                entry.get("message_id").and_then(lenient_i64),
                entry.get("id").and_then(lenient_i64),
            ) {
                (Some(message_id), Some(deletion_id)) => {
                    message_ids.push(message_id);
                    max_deletion_id =
                        Some(max_deletion_id.map_or(deletion_id, |m: i64| m.max(deletion_id)));
                }
                _ => tracing::warn!(server, channel, "skipping malformed deletion entry"),
            }
        }

        if let Some(max_deletion_id) = max_deletion_id {
            self.store
                .set_last_deletion_server_id(channel, server, max_deletion_id)?;
        }

        Ok(message_ids)
    }

    /// Deletes one message. Moderators go through the moderation
    /// endpoint. A 404 counts as success: the message is gone.
    pub async fn delete_message(
        &self,
        server: &str,
        channel: u64,
        id: i64,
        is_moderator: bool,
    ) -> Result<()> {
        let url = if is_moderator {
            format!("{server}/loki/v1/moderation/message/{id}")
        } else {
            format!("{server}/channels/{channel}/messages/{id}")
        };

        let outcome = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Delete, url.clone()), &token)
            })
            .await;
        ignore_not_found(outcome)
    }

    /// Deletes a batch of messages.
    pub async fn delete_messages(
        &self,
        server: &str,
        ids: &[i64],
        is_moderator: bool,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = if is_moderator {
            format!("{server}/loki/v1/moderation/messages")
        } else {
            format!("{server}/loki/v1/messages")
        };
        let joined = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let params = json!({ "ids": joined });

        let outcome = self
            .authed(server, move |token| {
                bearer(
                    HttpRequest::new(Verb::Delete, url.clone()).with_params(params.clone()),
                    &token,
                )
            })
            .await;
        ignore_not_found(outcome)
    }

    // ------------------------------------------------------------------
    // Moderators
    // ------------------------------------------------------------------

    /// Fetches and caches the moderator set for a channel.
    pub async fn get_moderators(&self, server: &str, channel: u64) -> Result<HashSet<String>> {
        let url = format!("{server}/loki/v1/channel/{channel}/get_moderators");
        let response = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Get, url.clone()), &token)
            })
            .await?;

        let moderators: HashSet<String> = response
            .get("moderators")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        self.moderators
            .lock()
            .map_err(|_| HavenchatError::generic("moderator cache lock poisoned"))?
            .insert((server.to_string(), channel), moderators.clone());

        Ok(moderators)
    }

    /// Whether a key moderates a channel, per the cached set.
    pub fn is_moderator(&self, server: &str, channel: u64, public_key: &str) -> bool {
        self.moderators
            .lock()
            .map(|cache| {
                cache
                    .get(&(server.to_string(), channel))
                    .is_some_and(|mods| mods.contains(public_key))
            })
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Channel metadata and membership
    // ------------------------------------------------------------------

    /// Fetches channel info, persisting the member count and avatar.
    pub async fn get_channel_info(&self, server: &str, channel: u64) -> Result<ChannelInfo> {
        let url = format!("{server}/channels/{channel}");
        let params = json!({ "include_annotations": 1 });
        let response = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Get, url.clone()).with_params(params.clone()), &token)
            })
            .await?;

        let data = response.get("data").ok_or_else(|| HavenchatError::ParsingFailed {
            reason: "channel info response has no data".into(),
        })?;

        let user_count = data
            .get("counts")
            .and_then(|c| c.get("subscribers"))
            .and_then(lenient_i64)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);

        let settings = data
            .get("annotations")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter().find(|a| {
                    a.get("type").and_then(Value::as_str) == Some(SETTINGS_ANNOTATION_TYPE)
                })
            })
            .and_then(|a| a.get("value"));

        let display_name = settings
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let avatar_url = settings
            .and_then(|v| v.get("avatar"))
            .and_then(Value::as_str)
            .map(str::to_string);

        self.store.set_user_count(channel, server, user_count)?;
        if let Some(avatar_url) = &avatar_url {
            self.store.set_group_avatar_url(channel, server, avatar_url)?;
        }

        Ok(ChannelInfo {
            display_name,
            user_count,
            avatar_url,
        })
    }

    /// Joins a channel.
    pub async fn join(&self, server: &str, channel: u64) -> Result<()> {
        let url = format!("{server}/channels/{channel}/subscribe");
        self.authed(server, move |token| {
            bearer(HttpRequest::new(Verb::Post, url.clone()), &token)
        })
        .await?;
        Ok(())
    }

    /// Leaves a channel.
    pub async fn leave(&self, server: &str, channel: u64) -> Result<()> {
        let url = format!("{server}/channels/{channel}/subscribe");
        self.authed(server, move |token| {
            bearer(HttpRequest::new(Verb::Delete, url.clone()), &token)
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // User profiles
    // ------------------------------------------------------------------

    /// Batch-fetches display names for a set of public keys.
    /// `include_annotations` pulls the users' profile annotations too.
    pub async fn get_users(
        &self,
        server: &str,
        keys: &[String],
        include_annotations: bool,
    ) -> Result<Vec<UserProfile>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let ids = keys
            .iter()
            .map(|k| format!("@{k}"))
            .collect::<Vec<_>>()
            .join(",");
        let params = json!({
            "ids": ids,
            "include_user_annotations": if include_annotations { 1 } else { 0 },
        });

        let url = format!("{server}/users");
        let response = self
            .authed(server, move |token| {
                bearer(HttpRequest::new(Verb::Get, url.clone()).with_params(params.clone()), &token)
            })
            .await?;

        let entries = response
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut profiles = Vec::new();
        for entry in &entries {
            match field_str(entry, "username") {
                Ok(username) => profiles.push(UserProfile {
                    username: username.to_string(),
                    display_name: entry
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                Err(e) => tracing::warn!(server, %e, "skipping malformed user entry"),
            }
        }
        Ok(profiles)
    }

    /// Updates the user's display name on a server.
    pub async fn set_display_name(&self, server: &str, name: &str) -> Result<()> {
        let params = json!({ "name": name });
        let url = format!("{server}/users/me");
        self.authed(server, move |token| {
            bearer(
                HttpRequest::new(Verb::Patch, url.clone()).with_params(params.clone()),
                &token,
            )
        })
        .await?;
        Ok(())
    }

    /// Sets or removes (`value: None`) a self-annotation.
    pub async fn set_self_annotation(
        &self,
        server: &str,
        annotation_type: &str,
        value: Option<Value>,
    ) -> Result<()> {
        let annotation = match value {
            Some(value) => json!({ "type": annotation_type, "value": value }),
            // A null value removes the annotation server-side.
            None => json!({ "type": annotation_type, "value": Value::Null }),
        };
        let params = json!({ "annotations": [annotation] });

        let url = format!("{server}/users/me");
        self.authed(server, move |token| {
            bearer(
                HttpRequest::new(Verb::Patch, url.clone()).with_params(params.clone()),
                &token,
            )
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Uploads an attachment, returning its server id and URL.
    pub async fn upload_file(
        &self,
        server: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        self.check_upload_size(bytes.len())?;
        let response = self
            .upload(
                server,
                format!("{server}/files"),
                "content",
                file_name,
                content_type,
                bytes,
            )
            .await?;

        let data = response.get("data").ok_or_else(|| HavenchatError::ParsingFailed {
            reason: "upload response has no data".into(),
        })?;
        Ok(UploadedFile {
            id: data.get("id").and_then(lenient_i64),
            url: field_str(data, "url")?.to_string(),
        })
    }

    /// Uploads the user's avatar, returning its URL.
    pub async fn set_avatar(
        &self,
        server: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        self.check_upload_size(bytes.len())?;
        let response = self
            .upload(
                server,
                format!("{server}/users/me/avatar"),
                "avatar",
                "avatar",
                content_type,
                bytes,
            )
            .await?;

        response
            .get("data")
            .and_then(|d| d.get("avatar_image"))
            .and_then(|a| a.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HavenchatError::ParsingFailed {
                reason: "avatar response has no data.avatar_image.url".into(),
            })
    }

    fn check_upload_size(&self, size: usize) -> Result<()> {
        let limit = self.context.config().max_upload_bytes;
        if size as u64 > limit {
            return Err(HavenchatError::MaxSizeExceeded {
                size: size as u64,
                limit,
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        server: &str,
        url: String,
        field: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Value> {
        let max_attempts = self.context.config().max_retry_count;
        let field = field.to_string();
        let file_name = file_name.to_string();
        let content_type = content_type.to_string();

        with_retries("upload", max_attempts, || {
            let url = url.clone();
            let field = field.clone();
            let file_name = file_name.clone();
            let content_type = content_type.clone();
            let bytes = bytes.clone();
            async move {
                let token = self.auth.token_for(server).await?;
                let upload = Upload {
                    url,
                    field,
                    file_name,
                    content_type,
                    bytes,
                    headers: vec![("Authorization".into(), format!("Bearer {token}"))],
                };
                let outcome = {
                    let _permit = self.context.network_permit().await?;
                    self.transport.upload(upload).await
                };
                self.map_unauthorized(server, outcome)
            }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Shared call plumbing
    // ------------------------------------------------------------------

    /// Runs an authenticated request through the bounded retry
    /// wrapper. A 401 clears the cached token and surfaces
    /// `TokenExpired` without further retries.
    async fn authed<F>(&self, server: &str, build: F) -> Result<Value>
    where
        F: Fn(String) -> HttpRequest,
    {
        let max_attempts = self.context.config().max_retry_count;
        let build = &build;
        with_retries("open-group", max_attempts, || async move {
            let token = self.auth.token_for(server).await?;
            let request = build(token);
            let outcome = {
                let _permit = self.context.network_permit().await?;
                self.transport.execute(request).await
            };
            self.map_unauthorized(server, outcome)
        })
        .await
    }

    fn map_unauthorized(&self, server: &str, outcome: Result<Value>) -> Result<Value> {
        match outcome {
            Err(HavenchatError::HttpRequestFailed { status: 401, .. }) => {
                tracing::warn!(server, "auth token rejected, clearing cached token");
                self.auth.clear_token(server)?;
                Err(HavenchatError::TokenExpired)
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bearer(request: HttpRequest, token: &str) -> HttpRequest {
    request.with_header("Authorization", format!("Bearer {token}"))
}

/// Deletes are idempotent: a 404 means the message is already gone.
fn ignore_not_found(outcome: Result<Value>) -> Result<()> {
    match outcome {
        Ok(_) => Ok(()),
        Err(HavenchatError::HttpRequestFailed { status: 404, .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
