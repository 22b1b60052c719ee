//! Provider normalizers and the dispatcher that selects between them.
//!
//! Each provider's wire format gets one [`MessageNormalizer`]. Dispatch is
//! a linear scan over a fixed registration order; `can_handle` predicates
//! are structural sniffs that must stay cheap, total, and mutually
//! exclusive in practice (covered by the corpus test below).

pub mod vcard;
pub mod waba;
pub mod wapi;

use crate::domain::{ConnectionStatus, MessageStatus, NormalizedMessage, ProviderName, Tenant};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use serde_json::Value;

pub use waba::WabaNormalizer;
pub use wapi::WapiNormalizer;

/// Placeholder text for sub-types nobody taught us to translate yet.
/// Degrading beats dropping the message.
pub const UNSUPPORTED_PLACEHOLDER: &str = "[Unsupported message]";
pub const UNSUPPORTED_QUOTED_PLACEHOLDER: &str = "[Unsupported quoted message]";

#[async_trait]
pub trait MessageNormalizer: Send + Sync + std::fmt::Debug {
    fn provider(&self) -> ProviderName;

    /// Structural sniff: can this normalizer translate the payload? Must
    /// never fail and must not touch the network.
    fn can_handle(&self, payload: &Value) -> bool;

    /// Translate a message-received payload into the canonical schema.
    /// May resolve media references through the provider's media API,
    /// which requires a channel lookup that fails closed.
    async fn normalize(&self, payload: &Value, tenant: &Tenant) -> Result<NormalizedMessage>;

    fn normalize_status(&self, payload: &Value) -> Result<MessageStatus>;

    fn normalize_connection_status(&self, payload: &Value) -> Result<ConnectionStatus>;
}

/// Fixed-order normalizer list; first matching `can_handle` wins.
pub struct NormalizerRegistry {
    normalizers: Vec<Box<dyn MessageNormalizer>>,
}

impl NormalizerRegistry {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            normalizers: vec![
                Box::new(WapiNormalizer::new()),
                Box::new(WabaNormalizer::new(http)),
            ],
        }
    }

    pub fn dispatch(&self, payload: &Value) -> Result<&dyn MessageNormalizer> {
        self.normalizers
            .iter()
            .map(|n| n.as_ref())
            .find(|n| n.can_handle(payload))
            .ok_or(PipelineError::NoNormalizer)
    }

    pub async fn normalize(&self, payload: &Value, tenant: &Tenant) -> Result<NormalizedMessage> {
        let normalizer = self.dispatch(payload)?;
        let provider = normalizer.provider();
        match normalizer.normalize(payload, tenant).await {
            Ok(message) => {
                metrics::normalize::success(provider.as_str());
                Ok(message)
            }
            Err(e) => {
                metrics::normalize::error(provider.as_str());
                Err(e)
            }
        }
    }

    pub fn normalize_status(&self, payload: &Value) -> Result<MessageStatus> {
        self.dispatch(payload)?.normalize_status(payload)
    }

    pub fn normalize_connection_status(&self, payload: &Value) -> Result<ConnectionStatus> {
        self.dispatch(payload)?.normalize_connection_status(payload)
    }

    pub fn providers(&self) -> Vec<ProviderName> {
        self.normalizers.iter().map(|n| n.provider()).collect()
    }
}

/// Shared helper: non-empty string field access on raw payloads.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> NormalizerRegistry {
        NormalizerRegistry::new(reqwest::Client::new())
    }

    fn sample_corpus() -> Vec<Value> {
        vec![
            // WAPI message
            json!({
                "event": "webhookReceived",
                "instanceId": "I1",
                "messageId": "M1",
                "msgContent": {"conversation": "hi"},
                "moment": 1700000000,
                "chat": {"id": "5511"},
                "sender": {"id": "5511", "pushName": "Ana"}
            }),
            // WAPI status
            json!({
                "event": "webhookStatus",
                "instanceId": "I1",
                "messageId": "M1",
                "status": "READ",
                "moment": 1700000000
            }),
            // WABA message
            json!({
                "object": "whatsapp_business_account",
                "entry": [{"changes": [{"value": {"messages": [{"id": "wamid.1"}]}}]}]
            }),
            // WABA status
            json!({
                "object": "whatsapp_business_account",
                "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1", "status": "sent"}]}}]}]
            }),
            // Unrelated noise
            json!({"hello": "world"}),
            json!(null),
            json!([1, 2, 3]),
            json!("just a string"),
        ]
    }

    #[test]
    fn can_handle_is_total_and_mutually_exclusive_over_corpus() {
        let registry = registry();
        for payload in sample_corpus() {
            let matches: Vec<_> = registry
                .normalizers
                .iter()
                .filter(|n| n.can_handle(&payload))
                .map(|n| n.provider())
                .collect();
            assert!(
                matches.len() <= 1,
                "payload matched more than one normalizer: {matches:?} for {payload}"
            );
        }
    }

    #[test]
    fn dispatch_fails_with_no_normalizer_for_unknown_shapes() {
        let registry = registry();
        let err = registry.dispatch(&json!({"hello": "world"})).unwrap_err();
        assert!(matches!(err, PipelineError::NoNormalizer));
    }

    #[test]
    fn dispatch_selects_the_matching_provider() {
        let registry = registry();
        let corpus = sample_corpus();
        assert_eq!(
            registry.dispatch(&corpus[0]).unwrap().provider(),
            ProviderName::Wapi
        );
        assert_eq!(
            registry.dispatch(&corpus[2]).unwrap().provider(),
            ProviderName::Waba
        );
    }

    #[test]
    fn registration_order_is_fixed() {
        assert_eq!(
            registry().providers(),
            vec![ProviderName::Wapi, ProviderName::Waba]
        );
    }
}
