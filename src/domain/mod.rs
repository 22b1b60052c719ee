//! Canonical data shapes shared across the pipeline.
//!
//! Every inbound webhook, whatever its provider, is translated into a
//! [`NormalizedMessage`]. Downstream consumers parse the serialized form,
//! so field names stay camelCase on the wire.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Media categories subject to the encrypted-media protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    /// HKDF application info string for this category. These are fixed by
    /// the protocol and must match byte-for-byte.
    pub fn app_info(&self) -> &'static str {
        match self {
            MediaType::Image => "WhatsApp Image Keys",
            MediaType::Video => "WhatsApp Video Keys",
            MediaType::Audio => "WhatsApp Audio Keys",
            MediaType::Document => "WhatsApp Document Keys",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Providers this service understands. The set is closed on purpose: adding
/// a provider means adding a normalizer, so a new variant forces the
/// compiler to walk every dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Wapi,
    Waba,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Wapi => "wapi",
            ProviderName::Waba => "waba",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider credentials bound to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ChannelCredentials {
    Wapi {
        instance_id: String,
        token: String,
    },
    Waba {
        access_token: String,
        business_account_id: String,
        phone_number_id: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl ChannelCredentials {
    pub fn provider(&self) -> ProviderName {
        match self {
            ChannelCredentials::Wapi { .. } => ProviderName::Wapi,
            ChannelCredentials::Waba { .. } => ProviderName::Waba,
        }
    }
}

/// One tenant binding of a provider to a platform-side address
/// (e.g. a phone-number id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Platform identifier the provider reports in webhook metadata.
    pub platform_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub active: bool,
    pub credentials: ChannelCredentials,
}

/// Tenant identity as resolved by the upstream auth layer. Trusted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Tenant {
    /// Exact-match channel lookup by platform id. Inactive channels never
    /// match; callers treat `None` as fail-closed.
    pub fn channel_for_platform(&self, platform_id: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.active && c.platform_id == platform_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_biz_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Media attachment state. Starts out pointing at the provider-hosted
/// source (`original_url`) with `processed = false`; the ingestion
/// pipeline fills in the storage coordinates and flips the flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub mimetype: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_enc_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_gif: Option<bool>,
    #[serde(default)]
    pub processed: bool,
    // Storage coordinates, present once processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactCard {
    pub name: String,
    pub vcard: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    pub key: ProtocolKey,
    #[serde(rename = "type")]
    pub event_type: i64,
}

/// Content of a quoted (replied-to) message. Quotes are resolved one level
/// deep only; a quote inside a quote is not followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuotedContent {
    Text { text: String },
    Image { media: MediaContent },
    Video { media: MediaContent },
    Audio { media: MediaContent },
    Document { media: MediaContent },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub message_id: String,
    pub participant: String,
    pub quoted_message: QuotedContent,
}

/// The content union. Exactly one variant is active; the serialized shape
/// carries a `type` tag alongside the variant's own fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
    },
    Image {
        media: MediaContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
    },
    Video {
        media: MediaContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
    },
    Audio {
        media: MediaContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
    },
    Document {
        media: MediaContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
    },
    Location {
        location: LocationContent,
    },
    Contact {
        contact: ContactCard,
    },
    Contacts {
        contacts: Vec<ContactCard>,
    },
    Protocol {
        protocol: ProtocolEvent,
    },
}

impl Content {
    pub fn type_str(&self) -> &'static str {
        match self {
            Content::Text { .. } => "text",
            Content::Image { .. } => "image",
            Content::Video { .. } => "video",
            Content::Audio { .. } => "audio",
            Content::Document { .. } => "document",
            Content::Location { .. } => "location",
            Content::Contact { .. } => "contact",
            Content::Contacts { .. } => "contacts",
            Content::Protocol { .. } => "protocol",
        }
    }

    /// Media category for variants subject to the encrypted-media protocol.
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            Content::Image { .. } => Some(MediaType::Image),
            Content::Video { .. } => Some(MediaType::Video),
            Content::Audio { .. } => Some(MediaType::Audio),
            Content::Document { .. } => Some(MediaType::Document),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaContent> {
        match self {
            Content::Image { media, .. }
            | Content::Video { media, .. }
            | Content::Audio { media, .. }
            | Content::Document { media, .. } => Some(media),
            _ => None,
        }
    }

    pub fn media_mut(&mut self) -> Option<&mut MediaContent> {
        match self {
            Content::Image { media, .. }
            | Content::Video { media, .. }
            | Content::Audio { media, .. }
            | Content::Document { media, .. } => Some(media),
            _ => None,
        }
    }
}

/// Provenance: which provider produced the message and the untouched raw
/// payload, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRef {
    pub name: ProviderName,
    pub original_payload: Value,
}

/// The canonical message every provider payload normalizes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ref_id: Option<String>,
    #[serde(default)]
    pub forwarded: bool,
    pub instance_id: String,
    pub connected_phone: String,
    pub from_me: bool,
    pub is_group: bool,
    /// Millisecond epoch. Providers deliver seconds; normalizers convert.
    pub timestamp: i64,
    pub chat: ChatInfo,
    pub sender: SenderInfo,
    pub content: Content,
    pub provider: ProviderRef,
}

impl NormalizedMessage {
    /// True when the content carries a still-unprocessed media source.
    pub fn has_unprocessed_media(&self) -> bool {
        self.content
            .media()
            .map(|m| m.original_url.is_some() && !m.processed)
            .unwrap_or(false)
    }
}

/// Delivery-state change for a previously sent message. Produced
/// independently of [`NormalizedMessage`], never merged into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub message_id: String,
    pub instance_id: String,
    pub connected_phone: String,
    pub from_me: bool,
    pub is_group: bool,
    pub timestamp: i64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Stateless connection snapshot; no history is kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    pub instance_id: String,
    pub event_moment: i64,
}

/// Strip everything but digits from a displayed phone number.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Millisecond epoch for "now"; connection events without a provider
/// moment stamp use this.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_phone_strips_non_digits() {
        assert_eq!(normalize_phone("+55 (11) 99999-0000"), "5511999990000");
        assert_eq!(normalize_phone("16505551111"), "16505551111");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn content_serializes_with_type_tag() {
        let content = Content::Text {
            text: "hi".into(),
            reply: None,
        };
        let v = serde_json::to_value(&content).unwrap();
        assert_eq!(v, json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn media_variant_round_trips() {
        let content = Content::Image {
            media: MediaContent {
                original_url: Some("https://mmg.whatsapp.net/d/f/abc.enc".into()),
                mimetype: "image/jpeg".into(),
                file_size: 1024,
                ..Default::default()
            },
            reply: None,
        };
        let v = serde_json::to_value(&content).unwrap();
        assert_eq!(v["type"], "image");
        assert_eq!(v["media"]["mimetype"], "image/jpeg");
        assert!(v["media"].get("s3Key").is_none());
        let back: Content = serde_json::from_value(v).unwrap();
        assert_eq!(back.media_type(), Some(MediaType::Image));
    }

    #[test]
    fn channel_lookup_is_exact_and_skips_inactive() {
        let tenant = Tenant {
            id: 1,
            uuid: "T-1".into(),
            name: "acme".into(),
            active: true,
            channels: vec![
                Channel {
                    platform_id: "111".into(),
                    description: None,
                    active: false,
                    credentials: ChannelCredentials::Wapi {
                        instance_id: "I1".into(),
                        token: "t".into(),
                    },
                },
                Channel {
                    platform_id: "222".into(),
                    description: None,
                    active: true,
                    credentials: ChannelCredentials::Waba {
                        access_token: "a".into(),
                        business_account_id: "b".into(),
                        phone_number_id: "222".into(),
                        version: None,
                    },
                },
            ],
        };
        assert!(tenant.channel_for_platform("111").is_none());
        assert!(tenant.channel_for_platform("222").is_some());
        assert!(tenant.channel_for_platform("2220").is_none());
    }

    #[test]
    fn media_type_app_info_is_fixed() {
        assert_eq!(MediaType::Image.app_info(), "WhatsApp Image Keys");
        assert_eq!(MediaType::Video.app_info(), "WhatsApp Video Keys");
        assert_eq!(MediaType::Audio.app_info(), "WhatsApp Audio Keys");
        assert_eq!(MediaType::Document.app_info(), "WhatsApp Document Keys");
    }
}
