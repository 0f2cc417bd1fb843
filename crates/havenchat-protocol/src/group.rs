//! Open-group message and attachment domain model.
//!
//! Open groups are server-hosted chat rooms over an ADN-style REST
//! API. Messages travel as plain text plus *annotations*: the
//! publicChat annotation carries the author timestamp, signature and
//! optional quote/avatar; each attachment is a separate oembed
//! annotation. This module owns the wire parsing (lenient, per-field)
//! and the Ed25519 signature over the message's validation bytes —
//! a message whose signature does not verify is discarded on receive.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use havenchat_crypto::signing::{verify, Keypair, PublicKey, Signature};
use havenchat_types::{HavenchatError, Result};
use serde_json::{json, Value};

use crate::json::{field_i64, field_str, field_u64, lenient_i64};

/// Annotation type of the publicChat message metadata.
pub const MESSAGE_ANNOTATION_TYPE: &str = "network.loki.messenger.publicChat";

/// Annotation type of attachment entries.
pub const ATTACHMENT_ANNOTATION_TYPE: &str = "net.app.core.oembed";

/// Signature scheme version attached to outbound messages.
pub const SIGNATURE_VERSION: u64 = 1;

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// A quoted message reference embedded in a reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Quote {
    /// Author-stamped timestamp of the quoted message (ms).
    pub quoted_timestamp_ms: u64,
    /// Hex public key of the quoted author.
    pub author: String,
    /// Quoted body text.
    pub text: String,
    /// Server id of the quoted message, when known.
    pub reply_to: Option<i64>,
}

// ---------------------------------------------------------------------------
// ProfilePicture
// ---------------------------------------------------------------------------

/// Author avatar reference carried in the publicChat annotation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfilePicture {
    /// Base64-encoded profile key.
    pub profile_key: String,
    /// Avatar download URL.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Attachment classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Audio,
    Generic,
    LinkPreview,
}

impl AttachmentKind {
    /// Returns the stable wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Generic => "other",
            Self::LinkPreview => "preview",
        }
    }

    /// Parses the wire tag. Unknown tags map to `Generic`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "preview" => Self::LinkPreview,
            _ => Self::Generic,
        }
    }
}

/// A file attached to an open-group message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Server that stores the file.
    pub server: String,
    /// Server-assigned file id.
    pub id: i64,
    pub content_type: String,
    /// File size in bytes.
    pub size: u64,
    pub file_name: String,
    pub flags: i64,
    pub width: u32,
    pub height: u32,
    pub caption: String,
    /// Download URL.
    pub url: String,
    /// Required for `LinkPreview` attachments.
    pub link_preview_url: Option<String>,
    /// Required for `LinkPreview` attachments.
    pub link_preview_title: Option<String>,
}

impl Attachment {
    /// Parses an attachment from an oembed annotation value.
    fn from_annotation_value(value: &Value) -> Result<Self> {
        let kind = AttachmentKind::from_tag(
            value
                .get("lokiType")
                .and_then(Value::as_str)
                .unwrap_or("other"),
        );

        let link_preview_url = value
            .get("linkPreviewUrl")
            .and_then(Value::as_str)
            .map(str::to_string);
        let link_preview_title = value
            .get("linkPreviewTitle")
            .and_then(Value::as_str)
            .map(str::to_string);

        if kind == AttachmentKind::LinkPreview
            && (link_preview_url.is_none() || link_preview_title.is_none())
        {
            return Err(HavenchatError::ParsingFailed {
                reason: "link preview attachment missing url or title".into(),
            });
        }

        Ok(Self {
            kind,
            server: field_str(value, "server")?.to_string(),
            id: field_i64(value, "id")?,
            content_type: field_str(value, "contentType")?.to_string(),
            size: field_u64(value, "size").unwrap_or(0),
            file_name: field_str(value, "fileName").unwrap_or("").to_string(),
            flags: field_i64(value, "flags").unwrap_or(0),
            width: field_u64(value, "width").unwrap_or(0) as u32,
            height: field_u64(value, "height").unwrap_or(0) as u32,
            caption: field_str(value, "caption").unwrap_or("").to_string(),
            url: field_str(value, "url")?.to_string(),
            link_preview_url,
            link_preview_title,
        })
    }

    /// Serializes to an oembed annotation.
    fn to_annotation(&self) -> Value {
        let mut value = json!({
            "lokiType": self.kind.as_str(),
            "server": self.server,
            "id": self.id,
            "contentType": self.content_type,
            "size": self.size,
            "fileName": self.file_name,
            "flags": self.flags,
            "width": self.width,
            "height": self.height,
            "caption": self.caption,
            "url": self.url,
        });
        if let Some(url) = &self.link_preview_url {
            value["linkPreviewUrl"] = json!(url);
        }
        if let Some(title) = &self.link_preview_title {
            value["linkPreviewTitle"] = json!(title);
        }
        json!({
            "type": ATTACHMENT_ANNOTATION_TYPE,
            "value": value,
        })
    }
}

// ---------------------------------------------------------------------------
// MessageSignature
// ---------------------------------------------------------------------------

/// Hex signature plus scheme version, as carried on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageSignature {
    /// 128-character hex Ed25519 signature.
    pub hex: String,
    /// Signature scheme version.
    pub version: u64,
}

// ---------------------------------------------------------------------------
// OpenGroupMessage
// ---------------------------------------------------------------------------

/// One open-group chat message.
#[derive(Clone, Debug)]
pub struct OpenGroupMessage {
    /// Server-assigned id; `None` until the server echoes it.
    pub server_id: Option<i64>,
    /// Author's hex public key (`05`-prefixed).
    pub author: String,
    /// Author's display name at send time.
    pub display_name: String,
    /// Message body.
    pub body: String,
    /// Author-stamped timestamp (ms since epoch).
    pub timestamp_ms: u64,
    pub quote: Option<Quote>,
    pub attachments: Vec<Attachment>,
    pub profile_picture: Option<ProfilePicture>,
    /// Signature over [`Self::validation_bytes`]; mandatory on receive.
    pub signature: Option<MessageSignature>,
    /// Server-stamped timestamp (ms since epoch).
    pub server_timestamp_ms: u64,
}

impl OpenGroupMessage {
    /// Creates an unsigned outbound message stamped with the current
    /// time.
    pub fn outgoing(author: impl Into<String>, display_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            server_id: None,
            author: author.into(),
            display_name: display_name.into(),
            body: body.into(),
            timestamp_ms: Utc::now().timestamp_millis() as u64,
            quote: None,
            attachments: Vec::new(),
            profile_picture: None,
            signature: None,
            server_timestamp_ms: 0,
        }
    }

    // ------------------------------------------------------------------
    // Signature
    // ------------------------------------------------------------------

    /// The byte sequence covered by the message signature: body,
    /// author timestamp, quote fields and attachment ids, in order.
    pub fn validation_bytes(&self) -> Vec<u8> {
        let mut data = String::new();
        data.push_str(self.body.trim());
        data.push_str(&self.timestamp_ms.to_string());
        if let Some(quote) = &self.quote {
            data.push_str(&quote.quoted_timestamp_ms.to_string());
            data.push_str(&quote.author);
            data.push_str(quote.text.trim());
        }
        for attachment in &self.attachments {
            data.push_str(&attachment.id.to_string());
        }
        data.into_bytes()
    }

    /// Signs the message with the sender's keypair, attaching a
    /// version-tagged hex signature.
    ///
    /// # Errors
    ///
    /// [`HavenchatError::MessageSigningFailed`] if the author key does
    /// not match the keypair.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        if self.author != keypair.hex_session_id() {
            return Err(HavenchatError::MessageSigningFailed {
                reason: "author key does not match the signing keypair".into(),
            });
        }
        let signature = keypair.sign(&self.validation_bytes());
        self.signature = Some(MessageSignature {
            hex: signature.to_hex(),
            version: SIGNATURE_VERSION,
        });
        Ok(())
    }

    /// Verifies the attached signature against the author key.
    pub fn verify_signature(&self) -> Result<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| HavenchatError::CryptoError {
                reason: "message carries no signature".into(),
            })?;
        let public_key = PublicKey::from_hex(&self.author)?;
        let sig = Signature::from_hex(&signature.hex)?;
        verify(&public_key, &self.validation_bytes(), &sig)
    }

    /// Whether the attached signature verifies. Messages failing this
    /// check are discarded by the group client.
    pub fn has_valid_signature(&self) -> bool {
        self.verify_signature().is_ok()
    }

    // ------------------------------------------------------------------
    // Wire parsing
    // ------------------------------------------------------------------

    /// Parses one entry of a `channels/{c}/messages` response.
    ///
    /// Returns `Ok(None)` for deleted entries and entries without a
    /// publicChat annotation (moderation actions, channel events).
    /// Signature verification is the caller's concern: the group
    /// client verifies after parsing so invalid signatures can be
    /// logged with the server id attached.
    pub fn from_wire(message: &Value) -> Result<Option<Self>> {
        if message
            .get("is_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let annotations = match message.get("annotations").and_then(Value::as_array) {
            Some(list) => list,
            None => return Ok(None),
        };

        let meta = match annotations.iter().find(|a| {
            a.get("type").and_then(Value::as_str) == Some(MESSAGE_ANNOTATION_TYPE)
        }) {
            Some(annotation) => annotation
                .get("value")
                .ok_or_else(|| HavenchatError::ParsingFailed {
                    reason: "publicChat annotation has no value".into(),
                })?,
            None => return Ok(None),
        };

        let server_id = field_i64(message, "id")?;
        let user = message.get("user").ok_or_else(|| HavenchatError::ParsingFailed {
            reason: "missing required field 'user'".into(),
        })?;
        let author = field_str(user, "username")?.to_string();
        let display_name = field_str(user, "name").unwrap_or("Anonymous").to_string();
        let body = field_str(message, "text")?.to_string();
        let timestamp_ms = field_u64(meta, "timestamp")?;

        let server_timestamp_ms = parse_server_timestamp(field_str(message, "created_at")?)?;

        let quote = meta.get("quote").filter(|q| !q.is_null()).map(|q| {
            Ok::<Quote, HavenchatError>(Quote {
                quoted_timestamp_ms: field_u64(q, "id")?,
                author: field_str(q, "author")?.to_string(),
                text: field_str(q, "text")?.to_string(),
                reply_to: q.get("reply_to").and_then(lenient_i64),
            })
        });
        let quote = match quote {
            Some(result) => Some(result?),
            None => None,
        };

        // Attachments: each oembed annotation is one attachment.
        // A malformed attachment skips just that attachment.
        let mut attachments = Vec::new();
        for annotation in annotations {
            if annotation.get("type").and_then(Value::as_str) != Some(ATTACHMENT_ANNOTATION_TYPE) {
                continue;
            }
            let Some(value) = annotation.get("value") else { continue };
            match Attachment::from_annotation_value(value) {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => {
                    tracing::warn!(server_id, %e, "skipping malformed attachment annotation");
                }
            }
        }

        let profile_picture = meta.get("avatar").filter(|a| !a.is_null()).and_then(|a| {
            match (
                a.get("profileKey").and_then(Value::as_str),
                a.get("url").and_then(Value::as_str),
            ) {
                (Some(key), Some(url)) => Some(ProfilePicture {
                    profile_key: key.to_string(),
                    url: url.to_string(),
                }),
                _ => None,
            }
        });

        let signature = match (
            meta.get("sig").and_then(Value::as_str),
            meta.get("sigver").and_then(lenient_i64),
        ) {
            (Some(hex_sig), Some(version)) => Some(MessageSignature {
                hex: hex_sig.to_string(),
                version: version as u64,
            }),
            _ => None,
        };

        Ok(Some(Self {
            server_id: Some(server_id),
            author,
            display_name,
            body,
            timestamp_ms,
            quote,
            attachments,
            profile_picture,
            signature,
            server_timestamp_ms,
        }))
    }

    /// Builds the POST body for `channels/{c}/messages`.
    ///
    /// The message must be signed first; the signature travels inside
    /// the publicChat annotation.
    pub fn to_wire_payload(&self) -> Result<Value> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| HavenchatError::MessageSigningFailed {
                reason: "message must be signed before sending".into(),
            })?;

        let mut value = json!({
            "timestamp": self.timestamp_ms,
            "from": self.display_name,
            "sig": signature.hex,
            "sigver": signature.version,
        });
        if let Some(quote) = &self.quote {
            value["quote"] = json!({
                "id": quote.quoted_timestamp_ms,
                "author": quote.author,
                "text": quote.text,
            });
            if let Some(reply_to) = quote.reply_to {
                value["quote"]["reply_to"] = json!(reply_to);
            }
        }
        if let Some(avatar) = &self.profile_picture {
            value["avatar"] = json!({
                "profileKey": avatar.profile_key,
                "url": avatar.url,
            });
        }

        let mut annotations = vec![json!({
            "type": MESSAGE_ANNOTATION_TYPE,
            "value": value,
        })];
        for attachment in &self.attachments {
            annotations.push(attachment.to_annotation());
        }

        Ok(json!({
            "text": self.body,
            "annotations": annotations,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parses the server's ISO-8601 UTC `created_at` into epoch millis.
pub fn parse_server_timestamp(created_at: &str) -> Result<u64> {
    let parsed = DateTime::parse_from_rfc3339(created_at).map_err(|e| {
        HavenchatError::ParsingFailed {
            reason: format!("invalid created_at timestamp '{created_at}': {e}"),
        }
    })?;
    Ok(parsed.with_timezone(&Utc).timestamp_millis() as u64)
}

/// Decodes a base64 wire field.
pub fn decode_base64_field(data: &str, field: &str) -> Result<Vec<u8>> {
    BASE64.decode(data).map_err(|e| HavenchatError::ParsingFailed {
        reason: format!("field '{field}' is not valid base64: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_message(keypair: &Keypair) -> OpenGroupMessage {
        let mut message = OpenGroupMessage::outgoing(
            keypair.hex_session_id(),
            "Tester",
            "hello room",
        );
        message.sign(keypair).expect("sign");
        message
    }

    fn wire_echo(message: &OpenGroupMessage, id: i64) -> Value {
        let payload = message.to_wire_payload().expect("payload");
        json!({
            "id": id,
            "text": payload["text"],
            "annotations": payload["annotations"],
            "created_at": "2026-03-01T12:00:00Z",
            "user": {
                "username": message.author,
                "name": message.display_name,
            },
        })
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let keypair = Keypair::from_seed(&[0x11; 32]);
        let message = signed_message(&keypair);
        assert!(message.has_valid_signature());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let keypair = Keypair::from_seed(&[0x11; 32]);
        let mut message = signed_message(&keypair);
        message.body.push_str(" tampered");
        assert!(!message.has_valid_signature());
    }

    #[test]
    fn sign_with_foreign_author_rejected() {
        let keypair = Keypair::from_seed(&[0x11; 32]);
        let mut message = OpenGroupMessage::outgoing("05ffff", "Tester", "hi");
        assert!(message.sign(&keypair).is_err());
    }

    #[test]
    fn wire_roundtrip_preserves_fields() {
        let keypair = Keypair::from_seed(&[0x22; 32]);
        let mut message = signed_message(&keypair);
        message.quote = Some(Quote {
            quoted_timestamp_ms: 1_700_000_000_000,
            author: "05dddd".into(),
            text: "earlier".into(),
            reply_to: Some(41),
        });
        message.attachments.push(Attachment {
            kind: AttachmentKind::Photo,
            server: "https://rooms.example.org".into(),
            id: 77,
            content_type: "image/png".into(),
            size: 1234,
            file_name: "cat.png".into(),
            flags: 0,
            width: 640,
            height: 480,
            caption: "a cat".into(),
            url: "https://rooms.example.org/files/77".into(),
            link_preview_url: None,
            link_preview_title: None,
        });
        // Re-sign: quote and attachments are covered by the signature.
        message.sign(&keypair).expect("re-sign");

        let parsed = OpenGroupMessage::from_wire(&wire_echo(&message, 99))
            .expect("parse")
            .expect("present");

        assert_eq!(parsed.server_id, Some(99));
        assert_eq!(parsed.author, message.author);
        assert_eq!(parsed.display_name, "Tester");
        assert_eq!(parsed.body, message.body);
        assert_eq!(parsed.timestamp_ms, message.timestamp_ms);
        assert_eq!(parsed.quote, message.quote);
        assert_eq!(parsed.attachments, message.attachments);
        assert!(parsed.has_valid_signature());
    }

    #[test]
    fn deleted_message_skipped() {
        let wire = json!({ "id": 1, "is_deleted": true });
        assert!(OpenGroupMessage::from_wire(&wire).expect("parse").is_none());
    }

    #[test]
    fn message_without_public_chat_annotation_skipped() {
        let wire = json!({
            "id": 2,
            "text": "system notice",
            "annotations": [],
            "created_at": "2026-03-01T12:00:00Z",
            "user": { "username": "05aa", "name": "server" },
        });
        assert!(OpenGroupMessage::from_wire(&wire).expect("parse").is_none());
    }

    #[test]
    fn string_ids_parse() {
        let keypair = Keypair::from_seed(&[0x33; 32]);
        let message = signed_message(&keypair);
        let mut wire = wire_echo(&message, 0);
        wire["id"] = json!("1050");
        let parsed = OpenGroupMessage::from_wire(&wire)
            .expect("parse")
            .expect("present");
        assert_eq!(parsed.server_id, Some(1050));
    }

    #[test]
    fn malformed_attachment_does_not_fail_message() {
        let keypair = Keypair::from_seed(&[0x44; 32]);
        let message = signed_message(&keypair);
        let mut wire = wire_echo(&message, 7);
        wire["annotations"]
            .as_array_mut()
            .expect("array")
            .push(json!({
                "type": ATTACHMENT_ANNOTATION_TYPE,
                "value": { "id": "not-a-number" },
            }));
        let parsed = OpenGroupMessage::from_wire(&wire)
            .expect("parse")
            .expect("present");
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn link_preview_requires_url_and_title() {
        let value = json!({
            "lokiType": "preview",
            "server": "https://rooms.example.org",
            "id": 5,
            "contentType": "text/html",
            "url": "https://rooms.example.org/files/5",
            "linkPreviewUrl": "https://example.org/article",
        });
        assert!(Attachment::from_annotation_value(&value).is_err());
    }

    #[test]
    fn server_timestamp_parses_iso8601() {
        let ms = parse_server_timestamp("2026-03-01T12:00:00Z").expect("parse");
        assert_eq!(ms, 1_772_366_400_000);
        assert!(parse_server_timestamp("yesterday").is_err());
    }

    #[test]
    fn unsigned_message_has_no_payload() {
        let message = OpenGroupMessage::outgoing("05aa", "Tester", "hi");
        assert!(message.to_wire_payload().is_err());
        assert!(!message.has_valid_signature());
    }
}
