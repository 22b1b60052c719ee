//! Webhook orchestrator: dispatch → normalize → ingest media → publish.
//!
//! One inbound webhook call runs as a linear sequence; nothing about a
//! single message is processed concurrently. Media ingestion can degrade
//! (configurable skip-on-error) without failing the call, but a publish
//! failure is always a hard failure — the canonical message must reach
//! the stream.

use crate::domain::{
    ConnectionStatus, MessageStatus, NormalizedMessage, ProviderName, Tenant,
};
use crate::error::Result;
use crate::events::{self, EventPublisher, EventType};
use crate::media::{BatchOptions, BatchResult, MediaProcessor, ProcessOptions};
use crate::normalize::NormalizerRegistry;
use crate::observability::metrics;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub topic: String,
    pub url_expires_in: Duration,
    pub media_max_retries: u32,
    pub skip_media_on_error: bool,
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: "chatsink-events".into(),
            // Long enough for downstream consumers to pick the media up.
            url_expires_in: Duration::from_secs(86400),
            media_max_retries: 3,
            skip_media_on_error: true,
            batch_concurrency: 5,
        }
    }
}

/// What a message webhook turned into. WABA delivers status changes on
/// the message route, so both shapes come out of [`WebhookPipeline::handle_message`].
#[derive(Debug)]
pub enum MessageOutcome {
    Message(Box<NormalizedMessage>),
    Status(MessageStatus),
}

pub struct WebhookPipeline {
    registry: NormalizerRegistry,
    media: Arc<MediaProcessor>,
    publisher: Arc<dyn EventPublisher>,
    config: PipelineConfig,
}

impl WebhookPipeline {
    pub fn new(
        registry: NormalizerRegistry,
        media: Arc<MediaProcessor>,
        publisher: Arc<dyn EventPublisher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            media,
            publisher,
            config,
        }
    }

    /// Handle a message-received webhook end to end.
    #[instrument(skip(self, payload, tenant), fields(tenant = %tenant.name))]
    pub async fn handle_message(&self, payload: Value, tenant: &Tenant) -> Result<MessageOutcome> {
        // The official API posts delivery-state changes to the message
        // route; recognize and reroute them before normalizing.
        if is_waba_status(&payload) {
            let status = self.handle_status(payload, tenant).await?;
            return Ok(MessageOutcome::Status(status));
        }

        let mut message = self.registry.normalize(&payload, tenant).await?;
        metrics::webhook::received(message.provider.name.as_str());
        info!(
            message_id = %message.message_id,
            content_type = message.content.type_str(),
            provider = %message.provider.name,
            "message normalized"
        );

        if message.has_unprocessed_media() {
            let result = self
                .media
                .process_message_media(
                    message,
                    tenant,
                    &ProcessOptions {
                        url_expires_in: self.config.url_expires_in,
                        skip_on_error: self.config.skip_media_on_error,
                        max_retries: self.config.media_max_retries,
                    },
                )
                .await?;
            if let Some(error) = &result.error {
                warn!(error = %error, "continuing without processed media");
            }
            message = result.message;
        }

        if matches!(message.content, crate::domain::Content::Location { .. }) {
            let result = self.media.process_location_thumbnail(message, tenant).await;
            if let Some(error) = &result.error {
                warn!(error = %error, "continuing without location thumbnail");
            }
            message = result.message;
        }

        self.publish_message(&message, tenant).await?;
        Ok(MessageOutcome::Message(Box::new(message)))
    }

    /// Handle a status-changed webhook. Independent of media ingestion.
    #[instrument(skip(self, payload, tenant), fields(tenant = %tenant.name))]
    pub async fn handle_status(&self, payload: Value, tenant: &Tenant) -> Result<MessageStatus> {
        let status = self.registry.normalize_status(&payload)?;
        let provider = self.registry.dispatch(&payload)?.provider();
        info!(message_id = %status.message_id, status = %status.status, "status normalized");

        let key = events::event_key(
            provider.as_str(),
            EventType::StatusMessage,
            &status.message_id,
            tenant.id,
        );
        let envelope =
            events::record_envelope(EventType::StatusMessage, &serde_json::to_value(&status)?, tenant);
        events::publish_event(
            self.publisher.as_ref(),
            &self.config.topic,
            EventType::StatusMessage,
            &key,
            &envelope,
        )
        .await?;
        Ok(status)
    }

    /// Handle a connection-status webhook.
    #[instrument(skip(self, payload, tenant), fields(tenant = %tenant.name))]
    pub async fn handle_connection_status(
        &self,
        payload: Value,
        tenant: &Tenant,
    ) -> Result<ConnectionStatus> {
        let status = self.registry.normalize_connection_status(&payload)?;
        let provider = self.registry.dispatch(&payload)?.provider();

        let key = events::event_key(
            provider.as_str(),
            EventType::ConnectionStatus,
            &status.instance_id,
            tenant.id,
        );
        let envelope = events::record_envelope(
            EventType::ConnectionStatus,
            &serde_json::to_value(&status)?,
            tenant,
        );
        events::publish_event(
            self.publisher.as_ref(),
            &self.config.topic,
            EventType::ConnectionStatus,
            &key,
            &envelope,
        )
        .await?;
        Ok(status)
    }

    /// Ingest media for a batch of already-normalized messages.
    pub async fn process_media_batch(
        &self,
        messages: Vec<NormalizedMessage>,
        tenant: &Tenant,
    ) -> BatchResult {
        self.media
            .process_batch(
                messages,
                tenant,
                &BatchOptions {
                    url_expires_in: self.config.url_expires_in,
                    concurrency: self.config.batch_concurrency,
                    max_retries: self.config.media_max_retries,
                },
            )
            .await
    }

    async fn publish_message(&self, message: &NormalizedMessage, tenant: &Tenant) -> Result<()> {
        let key = events::event_key(
            message.provider.name.as_str(),
            EventType::MessageReceived,
            &message.message_id,
            tenant.id,
        );
        let envelope =
            events::message_envelope(&serde_json::to_value(message)?, &message.message_id, tenant);
        events::publish_event(
            self.publisher.as_ref(),
            &self.config.topic,
            EventType::MessageReceived,
            &key,
            &envelope,
        )
        .await
    }

    pub fn providers(&self) -> Vec<ProviderName> {
        self.registry.providers()
    }
}

/// WABA posts statuses under the same webhook shape as messages.
fn is_waba_status(payload: &Value) -> bool {
    payload.get("object").and_then(Value::as_str) == Some("whatsapp_business_account")
        && payload
            .pointer("/entry/0/changes/0/value/statuses/0/status")
            .is_some()
}

/// Wire the default pipeline from its parts.
pub fn build_pipeline(
    http: reqwest::Client,
    store: Arc<dyn crate::storage::ObjectStoreClient>,
    publisher: Arc<dyn EventPublisher>,
    upload_path: &str,
    config: PipelineConfig,
) -> WebhookPipeline {
    let uploader = Arc::new(crate::storage::MediaUploader::new(store));
    let media = Arc::new(MediaProcessor::new(http.clone(), uploader, upload_path));
    WebhookPipeline::new(NormalizerRegistry::new(http), media, publisher, config)
}
