//! End-to-end pipeline test: a webhook payload with an encrypted image
//! flows through normalization, download, decryption, durable upload, and
//! publish, using a local HTTP fixture as the media CDN.

use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;

use chatsink::crypto;
use chatsink::domain::{Content, MediaType, Tenant};
use chatsink::events::LogPublisher;
use chatsink::pipeline::{build_pipeline, MessageOutcome, PipelineConfig};
use chatsink::storage::InMemoryObjectStore;

const MEDIA_KEY: [u8; 32] = [0x42; 32];

/// JPEG-looking plaintext so mimetype sniffing has something to find.
fn plaintext() -> Vec<u8> {
    let mut data = vec![0xff, 0xd8, 0xff, 0xe0];
    data.extend_from_slice(b"jpeg body bytes for the integration test");
    data
}

/// Protocol-shaped blob: AES-256-CBC ciphertext followed by the truncated
/// HMAC, built from the same primitives the engine verifies with.
fn encrypted_blob() -> Vec<u8> {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    let keys = crypto::derive_media_keys(&MEDIA_KEY, MediaType::Image.app_info()).unwrap();
    let mut blob = Aes256CbcEnc::new(&keys.cipher_key.into(), &keys.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext());
    let mac = crypto::compute_truncated_mac(&keys.mac_key, &keys.iv, &blob);
    blob.extend_from_slice(&mac);
    blob
}

async fn spawn_media_server(blob: Vec<u8>) -> String {
    let app = Router::new().route(
        "/d/f/abc.enc",
        get(move || {
            let blob = blob.clone();
            async move { blob }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/d/f/abc.enc", addr)
}

fn tenant() -> Tenant {
    Tenant {
        id: 77,
        uuid: "Integration-Tenant".into(),
        name: "integration".into(),
        active: true,
        channels: vec![],
    }
}

#[tokio::test]
async fn encrypted_image_webhook_flows_end_to_end() {
    let media_url = spawn_media_server(encrypted_blob()).await;
    let upload_dir = tempfile::tempdir().unwrap();

    let store = Arc::new(InMemoryObjectStore::new("local"));
    let publisher = Arc::new(LogPublisher::new());
    let pipeline = build_pipeline(
        reqwest::Client::new(),
        store.clone(),
        publisher.clone(),
        upload_dir.path().to_str().unwrap(),
        PipelineConfig::default(),
    );

    let payload = json!({
        "event": "webhookReceived",
        "instanceId": "I1",
        "messageId": "MSG-E2E",
        "connectedPhone": "+55 11 99999-0000",
        "fromMe": false,
        "isGroup": false,
        "msgContent": {
            "imageMessage": {
                "url": media_url,
                "mimetype": "image/jpeg",
                "fileLength": "64",
                "width": 640,
                "height": 480,
                "caption": "encrypted",
                "mediaKey": BASE64.encode(MEDIA_KEY),
                "fileSha256": BASE64.encode(crypto::sha256(&plaintext())),
                "fileEncSha256": BASE64.encode(crypto::sha256(&encrypted_blob()))
            }
        },
        "moment": 1700000000,
        "chat": {"id": "5511999990000"},
        "sender": {"id": "5511999990000", "pushName": "Ana"}
    });

    let outcome = pipeline.handle_message(payload, &tenant()).await.unwrap();
    let message = match outcome {
        MessageOutcome::Message(m) => m,
        MessageOutcome::Status(_) => panic!("expected message outcome"),
    };

    // The media sub-record was rewritten in place with storage coordinates.
    let media = match &message.content {
        Content::Image { media, .. } => media,
        other => panic!("expected image content, got {other:?}"),
    };
    assert!(media.processed);
    assert_eq!(media.s3_bucket.as_deref(), Some("integration-tenant"));
    assert_eq!(media.content_type.as_deref(), Some("image/jpeg"));
    let key = media.s3_key.as_deref().unwrap();
    assert!(key.starts_with("media/5511999990000/"));
    assert!(key.contains("/MSG-E2E/"));
    assert!(key.ends_with(".jpg"));
    assert!(media.url.as_deref().unwrap().contains(key));

    // The stored object is the recovered plaintext, not the ciphertext.
    let stored = store.object("integration-tenant", key).unwrap();
    assert_eq!(stored.body, plaintext());
    assert_eq!(stored.server_side_encryption, "AES256");
    assert_eq!(stored.storage_class, "STANDARD_IA");

    // Exactly one canonical event, keyed for duplicate detection.
    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, "wapi_message-received_MSG-E2E_77");
    let envelope = &published[0].2;
    assert_eq!(envelope["eventType"], "message-received");
    assert_eq!(envelope["normalizedMessage"]["content"]["media"]["processed"], true);
    assert_eq!(envelope["tenant"]["uuid"], "Integration-Tenant");
}

#[tokio::test]
async fn reprocessing_identical_media_hits_the_same_object_key() {
    let media_url = spawn_media_server(encrypted_blob()).await;
    let upload_dir = tempfile::tempdir().unwrap();

    let store = Arc::new(InMemoryObjectStore::new("local"));
    let publisher = Arc::new(LogPublisher::new());
    let pipeline = build_pipeline(
        reqwest::Client::new(),
        store.clone(),
        publisher,
        upload_dir.path().to_str().unwrap(),
        PipelineConfig::default(),
    );

    let payload = json!({
        "event": "webhookReceived",
        "instanceId": "I1",
        "messageId": "MSG-IDEM",
        "connectedPhone": "5511",
        "msgContent": {
            "imageMessage": {
                "url": media_url,
                "mimetype": "image/jpeg",
                "fileLength": "64",
                "mediaKey": BASE64.encode(MEDIA_KEY)
            }
        },
        "moment": 1700000000,
        "chat": {"id": "c"},
        "sender": {"id": "s"}
    });

    let first = pipeline.handle_message(payload.clone(), &tenant()).await.unwrap();
    let second = pipeline.handle_message(payload, &tenant()).await.unwrap();

    let key_of = |outcome: &MessageOutcome| match outcome {
        MessageOutcome::Message(m) => m.content.media().unwrap().s3_key.clone().unwrap(),
        MessageOutcome::Status(_) => panic!("expected message outcome"),
    };
    assert_eq!(key_of(&first), key_of(&second));
    assert_eq!(store.object_count("integration-tenant"), 1);
}

#[tokio::test]
async fn tampered_media_degrades_but_message_still_publishes() {
    let mut blob = encrypted_blob();
    let last = blob.len() - 1;
    blob[last] ^= 0xff; // corrupt the MAC
    let media_url = spawn_media_server(blob).await;
    let upload_dir = tempfile::tempdir().unwrap();

    let store = Arc::new(InMemoryObjectStore::new("local"));
    let publisher = Arc::new(LogPublisher::new());
    let pipeline = build_pipeline(
        reqwest::Client::new(),
        store.clone(),
        publisher.clone(),
        upload_dir.path().to_str().unwrap(),
        PipelineConfig::default(),
    );

    let payload = json!({
        "event": "webhookReceived",
        "instanceId": "I1",
        "messageId": "MSG-BAD",
        "connectedPhone": "5511",
        "msgContent": {
            "imageMessage": {
                "url": media_url,
                "mimetype": "image/jpeg",
                "fileLength": "64",
                "mediaKey": BASE64.encode(MEDIA_KEY)
            }
        },
        "moment": 1700000000,
        "chat": {"id": "c"},
        "sender": {"id": "s"}
    });

    let outcome = pipeline.handle_message(payload, &tenant()).await.unwrap();
    let message = match outcome {
        MessageOutcome::Message(m) => m,
        MessageOutcome::Status(_) => panic!("expected message outcome"),
    };

    // Integrity failure is not retried and nothing was stored, but the
    // normalized message still reached the stream.
    assert!(!message.content.media().unwrap().processed);
    assert_eq!(store.object_count("integration-tenant"), 0);
    assert_eq!(publisher.published().len(), 1);
}
