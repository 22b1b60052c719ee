//! Normalizer for the official WhatsApp Business API (Cloud) webhooks.
//!
//! WABA wraps everything in `entry[].changes[].value`; media arrives as an
//! opaque id that must be resolved through the Graph API with the owning
//! channel's credentials before the ingestion pipeline can download it.
//! Cloud-delivered media is already decrypted server-side, so these
//! messages carry no media key and take the direct-download path later.

use super::{str_field, vcard, MessageNormalizer, UNSUPPORTED_PLACEHOLDER};
use crate::domain::{
    normalize_phone, now_millis, ChatInfo, ConnectionState, ConnectionStatus, Content,
    MediaContent, MessageStatus, NormalizedMessage, ProviderName, ProviderRef, QuotedContent,
    Reply, SenderInfo, Tenant,
};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::providers;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const MEDIA_TYPES: &[&str] = &["image", "video", "document", "audio", "sticker"];

#[derive(Debug)]
pub struct WabaNormalizer {
    http: reqwest::Client,
}

impl WabaNormalizer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageNormalizer for WabaNormalizer {
    fn provider(&self) -> ProviderName {
        ProviderName::Waba
    }

    fn can_handle(&self, payload: &Value) -> bool {
        str_field(payload, "object") == Some("whatsapp_business_account")
    }

    async fn normalize(&self, payload: &Value, tenant: &Tenant) -> Result<NormalizedMessage> {
        let value = change_value(payload)
            .ok_or_else(|| PipelineError::Validation("payload has no entry/changes/value".into()))?;
        let message = value
            .get("messages")
            .and_then(|m| m.get(0))
            .ok_or_else(|| PipelineError::Validation("payload carries no message".into()))?;
        let metadata = value.get("metadata").cloned().unwrap_or(Value::Null);
        let contact = value.get("contacts").and_then(|c| c.get(0));

        let phone_number_id = str_field(&metadata, "phone_number_id").unwrap_or_default();
        let channel = tenant
            .channel_for_platform(phone_number_id)
            .ok_or_else(|| PipelineError::NoChannel(phone_number_id.to_string()))?;

        let content = self.normalize_content(message, channel).await?;

        Ok(NormalizedMessage {
            message_id: str_field(message, "id").unwrap_or_default().to_string(),
            message_ref_id: message
                .get("context")
                .and_then(|c| str_field(c, "id"))
                .map(str::to_string),
            forwarded: message
                .get("context")
                .and_then(|c| c.get("forwarded"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            instance_id: phone_number_id.to_string(),
            connected_phone: normalize_phone(
                str_field(&metadata, "display_phone_number").unwrap_or_default(),
            ),
            // Webhook-delivered messages are always from third parties, and
            // the Cloud API does not deliver group traffic this way.
            from_me: false,
            is_group: false,
            timestamp: seconds_str(message, "timestamp") * 1000,
            chat: ChatInfo {
                id: str_field(message, "from").unwrap_or_default().to_string(),
                profile_picture: None,
            },
            sender: SenderInfo {
                id: str_field(message, "from").unwrap_or_default().to_string(),
                name: contact
                    .and_then(|c| c.get("profile"))
                    .and_then(|p| str_field(p, "name"))
                    .map(str::to_string),
                profile_picture: None,
                verified_biz_name: None,
            },
            content,
            provider: ProviderRef {
                name: ProviderName::Waba,
                original_payload: payload.clone(),
            },
        })
    }

    fn normalize_status(&self, payload: &Value) -> Result<MessageStatus> {
        let value = change_value(payload)
            .ok_or_else(|| PipelineError::Validation("payload has no entry/changes/value".into()))?;
        let status = value
            .get("statuses")
            .and_then(|s| s.get(0))
            .ok_or_else(|| PipelineError::Validation("payload carries no status".into()))?;
        let metadata = value.get("metadata").cloned().unwrap_or(Value::Null);

        let raw_status = str_field(status, "status").unwrap_or_default();
        Ok(MessageStatus {
            message_id: str_field(status, "id").unwrap_or_default().to_string(),
            instance_id: str_field(&metadata, "phone_number_id").unwrap_or_default().to_string(),
            connected_phone: normalize_phone(
                str_field(&metadata, "display_phone_number").unwrap_or_default(),
            ),
            // Status updates report on messages we sent.
            from_me: true,
            is_group: false,
            timestamp: seconds_str(status, "timestamp") * 1000,
            status: map_status(raw_status),
        })
    }

    fn normalize_connection_status(&self, payload: &Value) -> Result<ConnectionStatus> {
        // WABA is stateless API-side; webhooks carry no connect/disconnect
        // lifecycle, so any connection event observed here means connected.
        let instance_id = change_value(payload)
            .and_then(|v| {
                v.get("metadata")
                    .and_then(|m| str_field(m, "phone_number_id"))
                    .map(str::to_string)
            })
            .unwrap_or_default();
        Ok(ConnectionStatus {
            status: ConnectionState::Connected,
            instance_id,
            event_moment: now_millis(),
        })
    }
}

impl WabaNormalizer {
    async fn normalize_content(
        &self,
        message: &Value,
        channel: &crate::domain::Channel,
    ) -> Result<Content> {
        let msg_type = str_field(message, "type").unwrap_or_default();

        if msg_type == "text" {
            return Ok(Content::Text {
                text: message
                    .get("text")
                    .and_then(|t| str_field(t, "body"))
                    .unwrap_or_default()
                    .to_string(),
                reply: None,
            });
        }

        if MEDIA_TYPES.contains(&msg_type) {
            if let Some(media) = self.resolve_media(message, msg_type, channel).await? {
                let animated = message
                    .get("animated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                return Ok(match msg_type {
                    "video" => Content::Video { media, reply: None },
                    "audio" => Content::Audio { media, reply: None },
                    "document" => Content::Document { media, reply: None },
                    // Animated stickers behave like short videos downstream.
                    "sticker" if animated => Content::Video { media, reply: None },
                    _ => Content::Image { media, reply: None },
                });
            }
        }

        match msg_type {
            "location" => {
                let location = message.get("location").cloned().unwrap_or(Value::Null);
                Ok(Content::Location {
                    location: crate::domain::LocationContent {
                        latitude: location.get("latitude").and_then(Value::as_f64).unwrap_or(0.0),
                        longitude: location.get("longitude").and_then(Value::as_f64).unwrap_or(0.0),
                        name: str_field(&location, "name").map(str::to_string),
                        address: str_field(&location, "address").map(str::to_string),
                        thumbnail: None,
                        is_live: None,
                    },
                })
            }
            "contacts" => {
                let contacts = message
                    .get("contacts")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let parsed: Vec<vcard::VcardContact> = contacts
                    .iter()
                    .map(|c| vcard::VcardContact {
                        name: c
                            .get("name")
                            .and_then(|n| str_field(n, "formatted_name"))
                            .unwrap_or_default()
                            .to_string(),
                        phones: c
                            .get("phones")
                            .and_then(Value::as_array)
                            .map(|phones| {
                                phones
                                    .iter()
                                    .map(|p| vcard::VcardPhone {
                                        phone: str_field(p, "phone").unwrap_or_default().to_string(),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect();
                let vcard_text = vcard::to_vcard(&parsed);
                Ok(Content::Contacts {
                    contacts: parsed
                        .iter()
                        .map(|c| crate::domain::ContactCard {
                            name: c.name.clone(),
                            vcard: vcard_text.clone(),
                        })
                        .collect(),
                })
            }
            "interactive" => Ok(self.normalize_interactive(message)),
            _ => {
                debug!(msg_type, "unrecognized WABA sub-type, degrading to placeholder");
                metrics::normalize::degraded();
                Ok(Content::Text {
                    text: UNSUPPORTED_PLACEHOLDER.to_string(),
                    reply: None,
                })
            }
        }
    }

    /// Button and list replies become text carrying the chosen title, with
    /// the choice id preserved as a quoted text reply.
    fn normalize_interactive(&self, message: &Value) -> Content {
        let interactive = message.get("interactive").cloned().unwrap_or(Value::Null);
        let reply_node = match str_field(&interactive, "type") {
            Some("button_reply") => interactive.get("button_reply"),
            Some("list_reply") => interactive.get("list_reply"),
            _ => None,
        };

        if let Some(node) = reply_node {
            return Content::Text {
                text: str_field(node, "title").unwrap_or_default().to_string(),
                reply: Some(Reply {
                    message_id: message
                        .get("context")
                        .and_then(|c| str_field(c, "id"))
                        .unwrap_or_default()
                        .to_string(),
                    participant: str_field(message, "from").unwrap_or_default().to_string(),
                    quoted_message: QuotedContent::Text {
                        text: str_field(node, "id").unwrap_or_default().to_string(),
                    },
                }),
            };
        }

        metrics::normalize::degraded();
        Content::Text {
            text: "[Interactive Message]".to_string(),
            reply: None,
        }
    }

    /// Resolve the webhook's media node into a downloadable reference.
    /// An `id` goes through the Graph media-info lookup; a `link` is
    /// already a URL.
    async fn resolve_media(
        &self,
        message: &Value,
        msg_type: &str,
        channel: &crate::domain::Channel,
    ) -> Result<Option<MediaContent>> {
        let node = match message.get(msg_type) {
            Some(node) => node,
            None => return Ok(None),
        };
        let caption = str_field(node, "caption").map(str::to_string);
        let filename = str_field(node, "filename").map(str::to_string);
        let sha256 = str_field(node, "sha256").map(str::to_string);

        if let Some(media_id) = str_field(node, "id") {
            let client = providers::waba_client_for(&self.http, channel)?;
            let info = client.get_media_info(media_id).await?;
            debug!(media_id, url = %info.url, "resolved WABA media reference");
            return Ok(Some(MediaContent {
                original_url: Some(info.url),
                mimetype: str_field(node, "mime_type")
                    .map(str::to_string)
                    .or(info.mime_type)
                    .unwrap_or_default(),
                file_size: info.file_size.unwrap_or(0),
                caption,
                filename,
                file_sha256: sha256,
                processed: false,
                ..Default::default()
            }));
        }

        if let Some(link) = str_field(node, "link") {
            return Ok(Some(MediaContent {
                original_url: Some(link.to_string()),
                mimetype: str_field(node, "mime_type").unwrap_or_default().to_string(),
                caption,
                filename,
                file_sha256: sha256,
                processed: false,
                ..Default::default()
            }));
        }

        warn!(msg_type, "media node carries neither id nor link");
        Ok(None)
    }
}

fn change_value(payload: &Value) -> Option<Value> {
    payload
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")
        .cloned()
}

/// WABA timestamps are decimal strings of epoch seconds.
fn seconds_str(node: &Value, key: &str) -> i64 {
    match node.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

fn map_status(status: &str) -> String {
    match status {
        "delivered" => "delivery".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Channel, ChannelCredentials};
    use serde_json::json;

    fn tenant_with_channel(phone_number_id: &str) -> Tenant {
        Tenant {
            id: 9,
            uuid: "t-9".into(),
            name: "acme".into(),
            active: true,
            channels: vec![Channel {
                platform_id: phone_number_id.into(),
                description: None,
                active: true,
                credentials: ChannelCredentials::Waba {
                    access_token: "tok".into(),
                    business_account_id: "b".into(),
                    phone_number_id: phone_number_id.into(),
                    version: None,
                },
            }],
        }
    }

    fn text_webhook() -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "8856996819413533",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {
                            "display_phone_number": "+1 650-555-1111",
                            "phone_number_id": "16505551111"
                        },
                        "contacts": [{
                            "profile": {"name": "Kerry Fisher"},
                            "wa_id": "16315551234"
                        }],
                        "messages": [{
                            "from": "16315551234",
                            "id": "wamid.ABGGFlCGg0cvAgo-sJQh43L5Pe4W",
                            "timestamp": "1603059201",
                            "text": {"body": "Hello this is an answer"},
                            "type": "text"
                        }]
                    }
                }]
            }]
        })
    }

    #[tokio::test]
    async fn waba_text_webhook_normalizes() {
        let normalizer = WabaNormalizer::new(reqwest::Client::new());
        let payload = text_webhook();
        assert!(normalizer.can_handle(&payload));

        let msg = normalizer
            .normalize(&payload, &tenant_with_channel("16505551111"))
            .await
            .unwrap();
        assert_eq!(msg.timestamp, 1_603_059_201_000);
        assert_eq!(msg.instance_id, "16505551111");
        assert_eq!(msg.connected_phone, "16505551111");
        assert_eq!(msg.sender.name.as_deref(), Some("Kerry Fisher"));
        assert!(!msg.from_me);
        match &msg.content {
            Content::Text { text, .. } => assert_eq!(text, "Hello this is an answer"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_channel_fails_closed() {
        let normalizer = WabaNormalizer::new(reqwest::Client::new());
        let err = normalizer
            .normalize(&text_webhook(), &tenant_with_channel("some-other-id"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoChannel(id) if id == "16505551111"));
    }

    #[tokio::test]
    async fn unknown_sub_type_degrades_to_placeholder() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"display_phone_number": "1", "phone_number_id": "P1"},
                "messages": [{
                    "from": "163",
                    "id": "wamid.X",
                    "timestamp": "1700000000",
                    "type": "reaction",
                    "reaction": {"emoji": "x"}
                }]
            }}]}]
        });
        let msg = WabaNormalizer::new(reqwest::Client::new())
            .normalize(&payload, &tenant_with_channel("P1"))
            .await
            .unwrap();
        match &msg.content {
            Content::Text { text, .. } => assert_eq!(text, UNSUPPORTED_PLACEHOLDER),
            other => panic!("expected placeholder text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn button_reply_becomes_text_with_quote() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"display_phone_number": "1", "phone_number_id": "P1"},
                "messages": [{
                    "from": "163",
                    "id": "wamid.X",
                    "timestamp": "1700000000",
                    "type": "interactive",
                    "context": {"id": "wamid.PREV"},
                    "interactive": {
                        "type": "button_reply",
                        "button_reply": {"id": "btn-1", "title": "Yes please"}
                    }
                }]
            }}]}]
        });
        let msg = WabaNormalizer::new(reqwest::Client::new())
            .normalize(&payload, &tenant_with_channel("P1"))
            .await
            .unwrap();
        match &msg.content {
            Content::Text { text, reply } => {
                assert_eq!(text, "Yes please");
                let reply = reply.as_ref().unwrap();
                assert_eq!(reply.message_id, "wamid.PREV");
                match &reply.quoted_message {
                    QuotedContent::Text { text } => assert_eq!(text, "btn-1"),
                    other => panic!("expected quoted id, got {other:?}"),
                }
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn linked_media_skips_the_graph_lookup() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"display_phone_number": "1", "phone_number_id": "P1"},
                "messages": [{
                    "from": "163",
                    "id": "wamid.IMG",
                    "timestamp": "1700000000",
                    "type": "image",
                    "image": {"link": "https://cdn.example.com/x.jpg", "mime_type": "image/jpeg", "caption": "pic"}
                }]
            }}]}]
        });
        let msg = WabaNormalizer::new(reqwest::Client::new())
            .normalize(&payload, &tenant_with_channel("P1"))
            .await
            .unwrap();
        let media = msg.content.media().unwrap();
        assert_eq!(media.original_url.as_deref(), Some("https://cdn.example.com/x.jpg"));
        assert_eq!(media.caption.as_deref(), Some("pic"));
        assert!(media.media_key.is_none());
    }

    #[tokio::test]
    async fn contacts_synthesize_vcards() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"display_phone_number": "1", "phone_number_id": "P1"},
                "messages": [{
                    "from": "163",
                    "id": "wamid.C",
                    "timestamp": "1700000000",
                    "type": "contacts",
                    "contacts": [{
                        "name": {"formatted_name": "Ana Silva"},
                        "phones": [{"phone": "+55 11 99999-0000"}]
                    }]
                }]
            }}]}]
        });
        let msg = WabaNormalizer::new(reqwest::Client::new())
            .normalize(&payload, &tenant_with_channel("P1"))
            .await
            .unwrap();
        match &msg.content {
            Content::Contacts { contacts } => {
                assert_eq!(contacts.len(), 1);
                assert_eq!(contacts[0].name, "Ana Silva");
                assert!(contacts[0].vcard.contains("BEGIN:VCARD"));
                assert!(contacts[0].vcard.contains("TEL;TYPE=CELL:+55 11 99999-0000"));
            }
            other => panic!("expected contacts, got {other:?}"),
        }
    }

    #[test]
    fn status_maps_delivered_to_delivery() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"display_phone_number": "+1 650-555-1111", "phone_number_id": "P1"},
                "statuses": [{
                    "id": "wamid.S",
                    "status": "delivered",
                    "timestamp": "1603059202",
                    "recipient_id": "163"
                }]
            }}]}]
        });
        let status = WabaNormalizer::new(reqwest::Client::new())
            .normalize_status(&payload)
            .unwrap();
        assert_eq!(status.status, "delivery");
        assert!(status.from_me);
        assert_eq!(status.timestamp, 1_603_059_202_000);
        assert_eq!(status.connected_phone, "16505551111");
    }

    #[test]
    fn read_status_passes_through() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "metadata": {"phone_number_id": "P1"},
                "statuses": [{"id": "wamid.S", "status": "read", "timestamp": "1"}]
            }}]}]
        });
        let status = WabaNormalizer::new(reqwest::Client::new())
            .normalize_status(&payload)
            .unwrap();
        assert_eq!(status.status, "read");
    }
}
