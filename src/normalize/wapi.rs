//! Normalizer for WAPI-style gateways (unofficial WhatsApp HTTP bridges).
//!
//! WAPI delivers the device's own message shape: content lives under
//! `msgContent` keyed by sub-type (`conversation`, `imageMessage`,
//! `extendedTextMessage`, ...), media URLs point straight at the
//! encrypted CDN objects, and the crypto triple rides along with each
//! media node.

use super::{str_field, MessageNormalizer, UNSUPPORTED_QUOTED_PLACEHOLDER};
use crate::domain::{
    normalize_phone, now_millis, ChatInfo, ConnectionState, ConnectionStatus, Content, Dimensions,
    MediaContent, MessageStatus, NormalizedMessage, ProtocolEvent, ProtocolKey, ProviderName,
    ProviderRef, QuotedContent, Reply, SenderInfo, Tenant,
};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

#[derive(Debug)]
pub struct WapiNormalizer;

impl WapiNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WapiNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageNormalizer for WapiNormalizer {
    fn provider(&self) -> ProviderName {
        ProviderName::Wapi
    }

    fn can_handle(&self, payload: &Value) -> bool {
        let event = str_field(payload, "event");
        let has_instance = str_field(payload, "instanceId").is_some();
        match event {
            Some("webhookReceived") => has_instance && payload.get("msgContent").is_some(),
            Some("webhookStatus") => has_instance && payload.get("status").is_some(),
            Some("connectedInstance") | Some("disconnectedInstance") => has_instance,
            _ => false,
        }
    }

    async fn normalize(&self, payload: &Value, _tenant: &Tenant) -> Result<NormalizedMessage> {
        let msg_content = payload
            .get("msgContent")
            .ok_or_else(|| PipelineError::Validation("payload has no msgContent".into()))?;

        Ok(NormalizedMessage {
            message_id: str_field(payload, "messageId").unwrap_or_default().to_string(),
            message_ref_id: None,
            forwarded: false,
            instance_id: str_field(payload, "instanceId").unwrap_or_default().to_string(),
            connected_phone: normalize_phone(str_field(payload, "connectedPhone").unwrap_or_default()),
            from_me: payload.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
            is_group: payload.get("isGroup").and_then(Value::as_bool).unwrap_or(false),
            timestamp: seconds_field(payload, "moment") * 1000,
            chat: ChatInfo {
                id: nested_str(payload, "chat", "id").unwrap_or_default(),
                profile_picture: nested_str(payload, "chat", "profilePicture"),
            },
            sender: SenderInfo {
                id: nested_str(payload, "sender", "id").unwrap_or_default(),
                name: nested_str(payload, "sender", "pushName"),
                profile_picture: nested_str(payload, "sender", "profilePicture"),
                verified_biz_name: nested_str(payload, "sender", "verifiedBizName"),
            },
            content: normalize_content(msg_content)?,
            provider: ProviderRef {
                name: ProviderName::Wapi,
                original_payload: payload.clone(),
            },
        })
    }

    fn normalize_status(&self, payload: &Value) -> Result<MessageStatus> {
        let status = payload
            .get("status")
            .ok_or_else(|| PipelineError::Validation("status payload has no status".into()))?;
        let status = match status {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(MessageStatus {
            message_id: str_field(payload, "messageId").unwrap_or_default().to_string(),
            instance_id: str_field(payload, "instanceId").unwrap_or_default().to_string(),
            connected_phone: normalize_phone(str_field(payload, "connectedPhone").unwrap_or_default()),
            from_me: payload.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
            is_group: payload.get("isGroup").and_then(Value::as_bool).unwrap_or(false),
            timestamp: seconds_field(payload, "moment") * 1000,
            status: status.to_lowercase(),
        })
    }

    fn normalize_connection_status(&self, payload: &Value) -> Result<ConnectionStatus> {
        let state = match (str_field(payload, "event"), payload.get("connected").and_then(Value::as_bool)) {
            (_, Some(true)) | (Some("connectedInstance"), None) => ConnectionState::Connected,
            (_, Some(false)) | (Some("disconnectedInstance"), None) => ConnectionState::Disconnected,
            _ => {
                return Err(PipelineError::Validation(
                    "payload carries no connection state".into(),
                ))
            }
        };
        let moment = seconds_field(payload, "moment");
        Ok(ConnectionStatus {
            status: state,
            instance_id: str_field(payload, "instanceId").unwrap_or_default().to_string(),
            event_moment: if moment > 0 { moment * 1000 } else { now_millis() },
        })
    }
}

fn normalize_content(msg_content: &Value) -> Result<Content> {
    // Plain text
    if let Some(text) = str_field(msg_content, "conversation") {
        return Ok(Content::Text { text: text.to_string(), reply: None });
    }

    // Extended variants carry contextInfo and may quote another message.
    if let Some(ext) = msg_content.get("extendedTextMessage") {
        return Ok(Content::Text {
            text: str_field(ext, "text").unwrap_or_default().to_string(),
            reply: parse_reply(ext.get("contextInfo")),
        });
    }
    if let Some(ext) = msg_content.get("extendedImageMessage") {
        return Ok(Content::Image {
            media: parse_media(ext),
            reply: parse_reply(ext.get("contextInfo")),
        });
    }
    if let Some(ext) = msg_content.get("extendedVideoMessage") {
        return Ok(Content::Video {
            media: parse_video_media(ext),
            reply: parse_reply(ext.get("contextInfo")),
        });
    }
    if let Some(ext) = msg_content.get("extendedAudioMessage") {
        return Ok(Content::Audio {
            media: parse_media(ext),
            reply: parse_reply(ext.get("contextInfo")),
        });
    }
    if let Some(ext) = msg_content.get("extendedDocumentMessage") {
        return Ok(Content::Document {
            media: parse_media(ext),
            reply: parse_reply(ext.get("contextInfo")),
        });
    }

    // Plain media variants
    if let Some(img) = msg_content.get("imageMessage") {
        return Ok(Content::Image { media: parse_media(img), reply: None });
    }
    if let Some(doc) = document_node(msg_content) {
        return Ok(Content::Document { media: parse_media(doc), reply: None });
    }
    if let Some(video) = msg_content.get("videoMessage") {
        return Ok(Content::Video { media: parse_video_media(video), reply: None });
    }
    if let Some(audio) = msg_content.get("audioMessage") {
        return Ok(Content::Audio { media: parse_media(audio), reply: None });
    }

    // Location, live or static
    if let Some(location) = msg_content
        .get("locationMessage")
        .or_else(|| msg_content.get("liveLocationMessage"))
    {
        return Ok(Content::Location {
            location: crate::domain::LocationContent {
                latitude: location.get("degreesLatitude").and_then(Value::as_f64).unwrap_or(0.0),
                longitude: location.get("degreesLongitude").and_then(Value::as_f64).unwrap_or(0.0),
                address: str_field(location, "address").map(str::to_string),
                name: str_field(location, "name").map(str::to_string),
                thumbnail: str_field(location, "jpegThumbnail").map(str::to_string),
                is_live: Some(msg_content.get("liveLocationMessage").is_some()),
            },
        });
    }

    if let Some(contact) = msg_content.get("contactMessage") {
        return Ok(Content::Contact {
            contact: crate::domain::ContactCard {
                name: str_field(contact, "displayName").unwrap_or_default().to_string(),
                vcard: str_field(contact, "vcard").unwrap_or_default().to_string(),
            },
        });
    }

    if let Some(contacts) = msg_content.get("contactsArrayMessage") {
        let cards = contacts
            .get("contacts")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(|c| crate::domain::ContactCard {
                        name: str_field(c, "displayName").unwrap_or_default().to_string(),
                        vcard: str_field(c, "vcard").unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        return Ok(Content::Contacts { contacts: cards });
    }

    if let Some(protocol) = msg_content.get("protocolMessage") {
        let key = protocol.get("key").cloned().unwrap_or(Value::Null);
        return Ok(Content::Protocol {
            protocol: ProtocolEvent {
                key: ProtocolKey {
                    remote_jid: str_field(&key, "remoteJid").unwrap_or_default().to_string(),
                    from_me: key.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
                    id: str_field(&key, "id").unwrap_or_default().to_string(),
                },
                event_type: protocol.get("type").and_then(Value::as_i64).unwrap_or(0),
            },
        });
    }

    debug!(keys = ?msg_content.as_object().map(|o| o.keys().collect::<Vec<_>>()), "unsupported msgContent shape");
    Err(PipelineError::UnsupportedMessage)
}

/// `documentMessage`, or the nested shape `documentWithCaptionMessage`
/// wraps it in.
fn document_node(msg_content: &Value) -> Option<&Value> {
    msg_content.get("documentMessage").or_else(|| {
        msg_content
            .get("documentWithCaptionMessage")
            .and_then(|d| d.get("message"))
            .and_then(|m| m.get("documentMessage"))
    })
}

fn parse_media(node: &Value) -> MediaContent {
    MediaContent {
        original_url: str_field(node, "url").map(str::to_string),
        mimetype: str_field(node, "mimetype").unwrap_or_default().to_string(),
        file_size: file_length(node),
        duration: node.get("seconds").and_then(Value::as_u64).map(|s| s as u32),
        dimensions: parse_dimensions(node),
        caption: str_field(node, "caption").map(str::to_string),
        filename: str_field(node, "fileName").map(str::to_string),
        thumbnail: str_field(node, "jpegThumbnail").map(str::to_string),
        media_key: str_field(node, "mediaKey").map(str::to_string),
        file_sha256: str_field(node, "fileSha256").map(str::to_string),
        file_enc_sha256: str_field(node, "fileEncSha256").map(str::to_string),
        is_gif: None,
        processed: false,
        ..Default::default()
    }
}

fn parse_video_media(node: &Value) -> MediaContent {
    MediaContent {
        is_gif: Some(node.get("gifPlayback").and_then(Value::as_bool).unwrap_or(false)),
        ..parse_media(node)
    }
}

fn parse_dimensions(node: &Value) -> Option<Dimensions> {
    let width = node.get("width").and_then(Value::as_u64)?;
    let height = node.get("height").and_then(Value::as_u64)?;
    Some(Dimensions {
        width: width as u32,
        height: height as u32,
    })
}

/// `fileLength` arrives as a string on this wire; tolerate a bare number.
fn file_length(node: &Value) -> u64 {
    match node.get("fileLength") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn seconds_field(payload: &Value, key: &str) -> i64 {
    payload.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn nested_str(payload: &Value, outer: &str, inner: &str) -> Option<String> {
    payload
        .get(outer)
        .and_then(|o| str_field(o, inner))
        .map(str::to_string)
}

fn parse_reply(context_info: Option<&Value>) -> Option<Reply> {
    let ctx = context_info?;
    let quoted = ctx.get("quotedMessage")?;
    Some(Reply {
        message_id: str_field(ctx, "stanzaId").unwrap_or_default().to_string(),
        participant: str_field(ctx, "participant").unwrap_or_default().to_string(),
        quoted_message: normalize_quoted(quoted),
    })
}

/// One level only: a quote inside the quoted message is not followed.
fn normalize_quoted(quoted: &Value) -> QuotedContent {
    if let Some(text) = str_field(quoted, "conversation") {
        return QuotedContent::Text { text: text.to_string() };
    }
    if let Some(img) = quoted.get("imageMessage") {
        return QuotedContent::Image { media: parse_media(img) };
    }
    if let Some(video) = quoted.get("videoMessage") {
        return QuotedContent::Video { media: parse_video_media(video) };
    }
    if let Some(audio) = quoted.get("audioMessage") {
        return QuotedContent::Audio { media: parse_media(audio) };
    }
    if let Some(doc) = document_node(quoted) {
        return QuotedContent::Document { media: parse_media(doc) };
    }
    QuotedContent::Text {
        text: UNSUPPORTED_QUOTED_PLACEHOLDER.to_string(),
    }
}
