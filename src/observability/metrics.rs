//! Metrics for the webhook pipeline, following Prometheus naming
//! conventions. Business code calls the per-phase helper functions; how
//! the numbers leave the process (exporter endpoint) is wired once at
//! startup.

use std::fmt;
use std::net::SocketAddr;

/// All metric names used in the system. One enum instead of magic strings
/// scattered through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Webhook surface
    WebhookReceived,
    WebhookRejected,

    // Normalization
    NormalizeSuccess,
    NormalizeError,
    NormalizeDegraded,

    // Media pipeline
    MediaProcessed,
    MediaSkipped,
    MediaErrors,
    DecryptSuccess,
    DecryptError,
    MacFailures,
    AdvisoryHashMismatches,
    DecryptedBytes,

    // Storage uploader
    UploadSuccess,
    UploadError,
    UploadRetries,
    UploadBytes,
    UploadDuration,
    BucketsCreated,

    // Event stream
    PublishSuccess,
    PublishError,

    // Batch mode
    BatchMessages,
    BatchErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::WebhookReceived => "chatsink_webhook_received_total",
            MetricName::WebhookRejected => "chatsink_webhook_rejected_total",

            MetricName::NormalizeSuccess => "chatsink_normalize_success_total",
            MetricName::NormalizeError => "chatsink_normalize_error_total",
            MetricName::NormalizeDegraded => "chatsink_normalize_degraded_total",

            MetricName::MediaProcessed => "chatsink_media_processed_total",
            MetricName::MediaSkipped => "chatsink_media_skipped_total",
            MetricName::MediaErrors => "chatsink_media_errors_total",
            MetricName::DecryptSuccess => "chatsink_decrypt_success_total",
            MetricName::DecryptError => "chatsink_decrypt_error_total",
            MetricName::MacFailures => "chatsink_mac_failures_total",
            MetricName::AdvisoryHashMismatches => "chatsink_advisory_hash_mismatches_total",
            MetricName::DecryptedBytes => "chatsink_decrypted_bytes",

            MetricName::UploadSuccess => "chatsink_upload_success_total",
            MetricName::UploadError => "chatsink_upload_error_total",
            MetricName::UploadRetries => "chatsink_upload_retries_total",
            MetricName::UploadBytes => "chatsink_upload_bytes",
            MetricName::UploadDuration => "chatsink_upload_duration_seconds",
            MetricName::BucketsCreated => "chatsink_buckets_created_total",

            MetricName::PublishSuccess => "chatsink_publish_success_total",
            MetricName::PublishError => "chatsink_publish_error_total",

            MetricName::BatchMessages => "chatsink_batch_messages_total",
            MetricName::BatchErrors => "chatsink_batch_errors_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Install the Prometheus exporter with its own HTTP listener. Safe to
/// call once per process; a second call logs and keeps the first recorder.
pub fn init() {
    let port: u16 = std::env::var("CHATSINK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            tracing::info!("Prometheus exporter listening on http://{}/metrics", addr);
        }
        Err(e) => {
            tracing::warn!("Prometheus exporter install failed (possibly already installed): {}", e);
        }
    }
}

pub mod webhook {
    use super::MetricName;

    pub fn received(provider: &str) {
        ::metrics::counter!(MetricName::WebhookReceived.as_str(), "provider" => provider.to_string())
            .increment(1);
    }

    pub fn rejected(reason: &'static str) {
        ::metrics::counter!(MetricName::WebhookRejected.as_str(), "reason" => reason).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn success(provider: &str) {
        ::metrics::counter!(MetricName::NormalizeSuccess.as_str(), "provider" => provider.to_string())
            .increment(1);
    }

    pub fn error(provider: &str) {
        ::metrics::counter!(MetricName::NormalizeError.as_str(), "provider" => provider.to_string())
            .increment(1);
    }

    /// An unrecognized sub-type degraded to a placeholder text variant.
    pub fn degraded() {
        ::metrics::counter!(MetricName::NormalizeDegraded.as_str()).increment(1);
    }
}

pub mod media {
    use super::MetricName;

    pub fn processed() {
        ::metrics::counter!(MetricName::MediaProcessed.as_str()).increment(1);
    }

    pub fn skipped() {
        ::metrics::counter!(MetricName::MediaSkipped.as_str()).increment(1);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::MediaErrors.as_str()).increment(1);
    }

    pub fn decrypt_success(bytes: usize) {
        ::metrics::counter!(MetricName::DecryptSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::DecryptedBytes.as_str()).record(bytes as f64);
    }

    pub fn decrypt_error() {
        ::metrics::counter!(MetricName::DecryptError.as_str()).increment(1);
    }

    pub fn mac_failure() {
        ::metrics::counter!(MetricName::MacFailures.as_str()).increment(1);
    }

    pub fn advisory_hash_mismatch() {
        ::metrics::counter!(MetricName::AdvisoryHashMismatches.as_str()).increment(1);
    }
}

pub mod storage {
    use super::MetricName;

    pub fn upload_success(bytes: usize, secs: f64) {
        ::metrics::counter!(MetricName::UploadSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::UploadBytes.as_str()).record(bytes as f64);
        ::metrics::histogram!(MetricName::UploadDuration.as_str()).record(secs);
    }

    pub fn upload_error() {
        ::metrics::counter!(MetricName::UploadError.as_str()).increment(1);
    }

    pub fn upload_retry() {
        ::metrics::counter!(MetricName::UploadRetries.as_str()).increment(1);
    }

    pub fn bucket_created() {
        ::metrics::counter!(MetricName::BucketsCreated.as_str()).increment(1);
    }
}

pub mod events {
    use super::MetricName;

    pub fn publish_success(event_type: &'static str) {
        ::metrics::counter!(MetricName::PublishSuccess.as_str(), "event_type" => event_type)
            .increment(1);
    }

    pub fn publish_error(event_type: &'static str) {
        ::metrics::counter!(MetricName::PublishError.as_str(), "event_type" => event_type)
            .increment(1);
    }
}

pub mod batch {
    use super::MetricName;

    pub fn completed(messages: usize, errors: usize) {
        ::metrics::counter!(MetricName::BatchMessages.as_str()).increment(messages as u64);
        ::metrics::counter!(MetricName::BatchErrors.as_str()).increment(errors as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        assert_eq!(
            MetricName::MacFailures.as_str(),
            "chatsink_mac_failures_total"
        );
        assert!(MetricName::UploadDuration.as_str().ends_with("_seconds"));
        assert_eq!(format!("{}", MetricName::MediaProcessed), "chatsink_media_processed_total");
    }
}
