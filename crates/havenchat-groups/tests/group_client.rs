//! Open-group client scenarios against a scripted transport.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use havenchat_crypto::aead;
use havenchat_crypto::ecdh::{ecdh_derive_shared, ed25519_to_x25519, X25519StaticSecret};
use havenchat_crypto::signing::Keypair;
use havenchat_groups::client::GroupClient;
use havenchat_network::context::NetworkContext;
use havenchat_network::testing::MockTransport;
use havenchat_protocol::group::OpenGroupMessage;
use havenchat_storage::memory::MemoryStore;
use havenchat_storage::{GroupStateStore, TokenStore};
use havenchat_types::config::NetworkConfig;
use havenchat_types::HavenchatError;
use serde_json::{json, Value};

const SERVER: &str = "https://rooms.example.org";
const CHANNEL: u64 = 1;

struct Harness {
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
    keypair: Arc<Keypair>,
    client: GroupClient,
}

fn harness() -> Harness {
    harness_with(NetworkConfig::default())
}

fn harness_with(config: NetworkConfig) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let context = Arc::new(NetworkContext::new(config).expect("context"));
    let store = Arc::new(MemoryStore::new());
    let keypair = Arc::new(Keypair::from_seed(&[0x21; 32]));
    let client = GroupClient::new(
        transport.clone(),
        context,
        store.clone(),
        keypair.clone(),
    );
    Harness {
        transport,
        store,
        keypair,
        client,
    }
}

/// Builds a `get_challenge` response the client can decrypt with its
/// own keypair. `prefixed` emits the 33-byte `05`-prefixed server key.
fn challenge_response(keypair: &Keypair, token: &str, prefixed: bool) -> Value {
    let server_secret = X25519StaticSecret::from_raw([0x77; 32]);
    let server_public = server_secret.public_key();
    let (_, user_public) = ed25519_to_x25519(keypair).expect("convert");
    let shared = ecdh_derive_shared(&server_secret, &user_public);
    let cipher = aead::seal(shared.as_bytes(), token.as_bytes()).expect("seal");

    let mut key_bytes = server_public.as_bytes().to_vec();
    if prefixed {
        key_bytes.insert(0, 0x05);
    }

    json!({
        "cipherText64": BASE64.encode(cipher),
        "serverPubKey64": BASE64.encode(key_bytes),
    })
}

fn script_auth(h: &Harness) {
    h.transport.route(
        "get_challenge",
        vec![Ok(challenge_response(&h.keypair, "tok-1", true))],
    );
    h.transport.route("submit_challenge", vec![Ok(json!({}))]);
}

/// A signed message as the server would return it.
fn wire_message(keypair: &Keypair, id: i64, body: &str, created_at: &str) -> Value {
    let mut message = OpenGroupMessage::outgoing(keypair.hex_session_id(), "Tester", body);
    message.sign(keypair).expect("sign");
    let payload = message.to_wire_payload().expect("payload");
    json!({
        "id": id,
        "text": payload["text"],
        "annotations": payload["annotations"],
        "created_at": created_at,
        "user": { "username": message.author, "name": "Tester" },
    })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn challenge_exchange_yields_cached_token() {
    let h = harness();
    script_auth(&h);

    let token = h.client.auth().token_for(SERVER).await.expect("token");
    assert_eq!(token, "tok-1");
    assert_eq!(
        h.store.auth_token(SERVER).expect("cached").as_deref(),
        Some("tok-1")
    );

    // A second call reuses the cache without another challenge.
    let again = h.client.auth().token_for(SERVER).await.expect("token");
    assert_eq!(again, "tok-1");
    assert_eq!(h.transport.requests_to("get_challenge").len(), 1);
}

#[tokio::test]
async fn concurrent_token_requests_share_one_challenge() {
    let h = harness();
    script_auth(&h);

    let (a, b) = tokio::join!(
        h.client.auth().token_for(SERVER),
        h.client.auth().token_for(SERVER),
    );
    assert_eq!(a.expect("a"), "tok-1");
    assert_eq!(b.expect("b"), "tok-1");
    assert_eq!(
        h.transport.requests_to("get_challenge").len(),
        1,
        "the challenge must be in flight at most once per server"
    );
}

#[tokio::test]
async fn bare_32_byte_server_key_also_accepted() {
    let h = harness();
    h.transport.route(
        "get_challenge",
        vec![Ok(challenge_response(&h.keypair, "tok-bare", false))],
    );
    h.transport.route("submit_challenge", vec![Ok(json!({}))]);

    let token = h.client.auth().token_for(SERVER).await.expect("token");
    assert_eq!(token, "tok-bare");
}

// ---------------------------------------------------------------------------
// S6 — 401 recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_clears_token_and_next_call_reauthenticates() {
    let h = harness();
    h.transport.route(
        "get_challenge",
        vec![
            Ok(challenge_response(&h.keypair, "tok-1", true)),
            Ok(challenge_response(&h.keypair, "tok-2", true)),
        ],
    );
    h.transport.route("submit_challenge", vec![Ok(json!({}))]);
    h.transport.route(
        "users/me",
        vec![
            Err(HavenchatError::HttpRequestFailed {
                status: 401,
                body: None,
            }),
            Ok(json!({})),
        ],
    );

    let first = h.client.set_display_name(SERVER, "Maren").await;
    assert!(matches!(first, Err(HavenchatError::TokenExpired)));
    assert!(h.store.auth_token(SERVER).expect("read").is_none());

    // Re-entering runs a fresh challenge and succeeds.
    h.client
        .set_display_name(SERVER, "Maren")
        .await
        .expect("second attempt");
    assert_eq!(h.transport.requests_to("get_challenge").len(), 2);
    assert_eq!(
        h.store.auth_token(SERVER).expect("cached").as_deref(),
        Some("tok-2")
    );
}

// ---------------------------------------------------------------------------
// S5 — message polling cursor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn polling_cursor_advances_to_max_id() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "/channels/1/messages",
        vec![
            Ok(json!({ "data": [
                wire_message(&h.keypair, 999, "first", "2026-03-01T12:00:00Z"),
                wire_message(&h.keypair, 1000, "second", "2026-03-01T12:00:01Z"),
            ]})),
            Ok(json!({ "data": [
                wire_message(&h.keypair, 1050, "third", "2026-03-01T12:10:00Z"),
            ]})),
        ],
    );

    let first = h.client.get_messages(SERVER, CHANNEL).await.expect("first");
    assert_eq!(first.len(), 2);
    assert_eq!(
        h.store
            .last_message_server_id(CHANNEL, SERVER)
            .expect("cursor"),
        Some(1000)
    );

    let second = h.client.get_messages(SERVER, CHANNEL).await.expect("second");
    assert_eq!(second.len(), 1);
    assert_eq!(
        h.store
            .last_message_server_id(CHANNEL, SERVER)
            .expect("cursor"),
        Some(1050)
    );

    // First fetch pages with count/include_deleted, second with since_id.
    let fetches = h.transport.requests_to("/channels/1/messages");
    let params_of = |i: usize| fetches[i].params.clone().expect("params");
    assert_eq!(params_of(0)["count"], 64);
    assert_eq!(params_of(0)["include_deleted"], 0);
    assert_eq!(params_of(0)["include_annotations"], 1);
    assert!(params_of(0).get("since_id").is_none());
    assert_eq!(params_of(1)["since_id"], 1000);
}

// ---------------------------------------------------------------------------
// Signature discard and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_signatures_are_discarded_and_results_sorted() {
    let h = harness();
    script_auth(&h);

    // Tamper with the second message after signing.
    let mut forged = wire_message(&h.keypair, 11, "forged", "2026-03-01T11:00:00Z");
    forged["text"] = json!("forged but edited");

    h.transport.route(
        "/channels/1/messages",
        vec![Ok(json!({ "data": [
            wire_message(&h.keypair, 12, "later", "2026-03-01T12:00:00Z"),
            forged,
            wire_message(&h.keypair, 10, "earlier", "2026-03-01T10:00:00Z"),
        ]}))],
    );

    let messages = h.client.get_messages(SERVER, CHANNEL).await.expect("fetch");
    assert_eq!(messages.len(), 2, "forged message must be discarded");
    assert_eq!(messages[0].body, "earlier");
    assert_eq!(messages[1].body, "later");
    assert!(
        messages[0].server_timestamp_ms <= messages[1].server_timestamp_ms,
        "ascending by server timestamp"
    );

    // The cursor still covers the discarded id.
    assert_eq!(
        h.store
            .last_message_server_id(CHANNEL, SERVER)
            .expect("cursor"),
        Some(12)
    );
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_message_signs_and_parses_echo() {
    let h = harness();
    script_auth(&h);

    let outgoing = OpenGroupMessage::outgoing(
        h.keypair.hex_session_id(),
        "Tester",
        "hello room",
    );
    // The server echoes the message with an id and created_at stamp.
    let mut signed = outgoing.clone();
    signed.sign(&h.keypair).expect("sign");
    let payload = signed.to_wire_payload().expect("payload");
    h.transport.route(
        "/channels/1/messages",
        vec![Ok(json!({ "data": {
            "id": 501,
            "text": payload["text"],
            "annotations": payload["annotations"],
            "created_at": "2026-03-01T12:00:00Z",
            "user": { "username": signed.author, "name": "Tester" },
        }}))],
    );

    let echoed = h
        .client
        .send_message(SERVER, CHANNEL, outgoing)
        .await
        .expect("send");
    assert_eq!(echoed.server_id, Some(501));
    assert_eq!(echoed.body, "hello room");
    assert!(echoed.has_valid_signature());
}

// ---------------------------------------------------------------------------
// Deletions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deletion_cursor_is_tracked_separately() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "/loki/v1/channel/1/deletes",
        vec![
            Ok(json!({ "data": [
                { "id": 5, "message_id": 100 },
                { "id": 7, "message_id": 101 },
            ]})),
            Ok(json!({ "data": [] })),
        ],
    );

    let deleted = h
        .client
        .get_deleted_message_ids(SERVER, CHANNEL)
        .await
        .expect("first");
    assert_eq!(deleted, vec![100, 101]);
    assert_eq!(
        h.store
            .last_deletion_server_id(CHANNEL, SERVER)
            .expect("cursor"),
        Some(7)
    );
    // Message cursor untouched.
    assert!(h
        .store
        .last_message_server_id(CHANNEL, SERVER)
        .expect("cursor")
        .is_none());

    let none = h
        .client
        .get_deleted_message_ids(SERVER, CHANNEL)
        .await
        .expect("second");
    assert!(none.is_empty());

    let fetches = h.transport.requests_to("/deletes");
    assert_eq!(fetches[1].params.clone().expect("params")["since_id"], 7);
}

#[tokio::test]
async fn delete_after_404_is_success() {
    let config = NetworkConfig {
        max_retry_count: 2,
        ..NetworkConfig::default()
    };
    let h = harness_with(config);
    script_auth(&h);
    h.transport.route(
        "/loki/v1/messages",
        vec![Err(HavenchatError::HttpRequestFailed {
            status: 404,
            body: None,
        })],
    );

    h.client
        .delete_messages(SERVER, &[1, 2, 3], false)
        .await
        .expect("idempotent delete");
}

#[tokio::test]
async fn moderator_deletes_use_moderation_endpoint() {
    let h = harness();
    script_auth(&h);
    h.transport
        .route("/loki/v1/moderation/message/9", vec![Ok(json!({}))]);

    h.client
        .delete_message(SERVER, CHANNEL, 9, true)
        .await
        .expect("moderator delete");
    assert_eq!(h.transport.requests_to("/moderation/message/9").len(), 1);
}

// ---------------------------------------------------------------------------
// Moderators, channel info, users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn moderators_are_cached_per_channel() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "get_moderators",
        vec![Ok(json!({ "moderators": ["05aa", "05bb"] }))],
    );

    let moderators = h
        .client
        .get_moderators(SERVER, CHANNEL)
        .await
        .expect("fetch");
    assert_eq!(moderators.len(), 2);
    assert!(h.client.is_moderator(SERVER, CHANNEL, "05aa"));
    assert!(!h.client.is_moderator(SERVER, CHANNEL, "05cc"));
    assert!(!h.client.is_moderator(SERVER, 2, "05aa"));
}

#[tokio::test]
async fn channel_info_persists_user_count_and_avatar() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "/channels/1",
        vec![Ok(json!({ "data": {
            "counts": { "subscribers": 128 },
            "annotations": [{
                "type": "net.patter-app.settings",
                "value": { "name": "Haven Lounge", "avatar": "https://rooms.example.org/files/3" },
            }],
        }}))],
    );

    let info = h
        .client
        .get_channel_info(SERVER, CHANNEL)
        .await
        .expect("info");
    assert_eq!(info.user_count, 128);
    assert_eq!(info.display_name.as_deref(), Some("Haven Lounge"));
    assert_eq!(
        h.store.group_avatar_url(CHANNEL, SERVER).expect("avatar").as_deref(),
        Some("https://rooms.example.org/files/3")
    );
}

#[tokio::test]
async fn batch_user_fetch_prefixes_ids() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "/users",
        vec![Ok(json!({ "data": [
            { "username": "05aa", "name": "Alice" },
            { "username": "05bb" },
        ]}))],
    );

    let profiles = h
        .client
        .get_users(SERVER, &["05aa".into(), "05bb".into()], false)
        .await
        .expect("users");
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].display_name.as_deref(), Some("Alice"));
    assert!(profiles[1].display_name.is_none());

    let request = &h.transport.requests_to("/users")[0];
    assert_eq!(
        request.params.clone().expect("params")["ids"],
        "@05aa,@05bb"
    );
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_upload_rejected_before_transport() {
    let config = NetworkConfig {
        max_upload_bytes: 16,
        ..NetworkConfig::default()
    };
    let h = harness_with(config);

    let result = h
        .client
        .upload_file(SERVER, "big.bin", "application/octet-stream", vec![0u8; 64])
        .await;
    assert!(matches!(
        result,
        Err(HavenchatError::MaxSizeExceeded { size: 64, limit: 16 })
    ));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn avatar_upload_parses_nested_url() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "users/me/avatar",
        vec![Ok(json!({ "data": { "avatar_image": {
            "url": "https://rooms.example.org/files/12",
        }}}))],
    );

    let url = h
        .client
        .set_avatar(SERVER, "image/png", vec![1, 2, 3])
        .await
        .expect("avatar");
    assert_eq!(url, "https://rooms.example.org/files/12");
}

#[tokio::test]
async fn file_upload_returns_id_and_url() {
    let h = harness();
    script_auth(&h);
    h.transport.route(
        "/files",
        vec![Ok(json!({ "data": {
            "id": 88,
            "url": "https://rooms.example.org/files/88",
        }}))],
    );

    let uploaded = h
        .client
        .upload_file(SERVER, "cat.png", "image/png", vec![1, 2, 3])
        .await
        .expect("upload");
    assert_eq!(uploaded.id, Some(88));
    assert_eq!(uploaded.url, "https://rooms.example.org/files/88");
}
