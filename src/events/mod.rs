//! Outbound event stream port.
//!
//! The pipeline's job ends at `publish`: one canonical JSON envelope per
//! webhook, under a key stable enough for downstream duplicate detection.
//! The broker client itself lives behind [`EventPublisher`].

use crate::domain::Tenant;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    MessageReceived,
    StatusMessage,
    ConnectionStatus,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageReceived => "message-received",
            EventType::StatusMessage => "status-message",
            EventType::ConnectionStatus => "connection-status",
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Fire-and-forget publish; failure here is a hard pipeline failure
    /// and retrying, if any, belongs to the implementation.
    async fn publish(&self, topic: &str, key: &str, value: &Value) -> Result<()>;
}

/// Event key embedding provider, event type, message id, and tenant id.
/// Duplicate deliveries produce the same key, which is what lets
/// consumers detect them.
pub fn event_key(provider: &str, event_type: EventType, message_id: &str, tenant_id: i64) -> String {
    format!("{}_{}_{}_{}", provider, event_type.as_str(), message_id, tenant_id)
}

/// Envelope for message-received events.
pub fn message_envelope(message: &Value, message_id: &str, tenant: &Tenant) -> Value {
    json!({
        "eventType": EventType::MessageReceived.as_str(),
        "id": Utc::now().timestamp_millis(),
        "messageId": message_id,
        "normalizedMessage": message,
        "tenant": tenant,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Envelope for status and connection events: the normalized record's own
/// fields at the top level plus event metadata.
pub fn record_envelope(event_type: EventType, record: &Value, tenant: &Tenant) -> Value {
    let mut envelope = json!({
        "eventType": event_type.as_str(),
        "id": Utc::now().timestamp_millis(),
        "tenant": tenant,
        "timestamp": Utc::now().to_rfc3339(),
    });
    if let (Some(env), Some(rec)) = (envelope.as_object_mut(), record.as_object()) {
        for (k, v) in rec {
            env.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    envelope
}

/// Wrap a publish call with metrics and the hard-failure policy.
pub async fn publish_event(
    publisher: &dyn EventPublisher,
    topic: &str,
    event_type: EventType,
    key: &str,
    value: &Value,
) -> Result<()> {
    match publisher.publish(topic, key, value).await {
        Ok(()) => {
            metrics::events::publish_success(event_type.as_str());
            debug!(topic, key, event_type = event_type.as_str(), "event published");
            Ok(())
        }
        Err(e) => {
            metrics::events::publish_error(event_type.as_str());
            Err(PipelineError::Publish(e.to_string()))
        }
    }
}

/// Publisher that records events in memory and logs them. Stands in for
/// the broker client in tests and one-shot runs.
#[derive(Default)]
pub struct LogPublisher {
    published: Mutex<Vec<(String, String, Value)>>,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, String, Value)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, value: &Value) -> Result<()> {
        info!(topic, key, "publishing event");
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), key.to_string(), value.clone()));
        }
        Ok(())
    }
}
