//! Durable media storage: object-store port and the uploader built on it.
//!
//! The uploader owns everything above the transport: tenant-derived bucket
//! names, idempotent bucket provisioning behind an in-process cache,
//! content-addressed object keys, retried uploads, and signed-URL issuance.
//! The transport itself (S3 or anything shaped like it) sits behind
//! [`ObjectStoreClient`].

pub mod in_memory;

use crate::domain::Tenant;
use crate::error::{PipelineError, Result};
use crate::media::mimetype;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use in_memory::InMemoryObjectStore;

/// Server-side encryption requested on every put.
pub const SERVER_SIDE_ENCRYPTION: &str = "AES256";
/// Cost-optimized storage class requested on every put.
pub const STORAGE_CLASS: &str = "STANDARD_IA";

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Narrow object-storage interface; transport details live behind it.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Whether the bucket exists.
    async fn head_bucket(&self, bucket: &str) -> Result<bool>;
    async fn create_bucket(&self, bucket: &str) -> Result<()>;
    async fn put_object(&self, req: PutObjectRequest<'_>) -> Result<()>;
    /// Time-bounded read URL for one object. Implementations must compute
    /// this freshly; expiry is relative to request-time now.
    async fn signed_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String>;
    fn region(&self) -> &str;
}

pub struct PutObjectRequest<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub content_type: &'a str,
    pub metadata: Vec<(String, String)>,
    pub server_side_encryption: &'a str,
    pub storage_class: &'a str,
}

/// Context for deriving keys and object metadata.
pub struct UploadContext<'a> {
    pub tenant: &'a Tenant,
    pub message_id: &'a str,
    pub connected_phone: &'a str,
    pub original_url: &'a str,
    /// "decrypt" or "direct"; recorded in object metadata.
    pub processing_method: &'a str,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub key: String,
    pub bucket: String,
    pub region: String,
    pub original_url: String,
    pub signed_url: String,
    pub url_expires_at: DateTime<Utc>,
    pub file_size: usize,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

pub struct UploadOptions {
    pub url_expires_in: Duration,
    pub max_retries: u32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            url_expires_in: Duration::from_secs(3600),
            max_retries: 3,
        }
    }
}

/// Media uploader over an [`ObjectStoreClient`].
///
/// One instance per process; the bucket-existence cache is the only state
/// shared across tenants and messages, and is never invalidated during
/// normal operation.
pub struct MediaUploader {
    store: Arc<dyn ObjectStoreClient>,
    known_buckets: Mutex<HashSet<String>>,
}

impl MediaUploader {
    pub fn new(store: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            store,
            known_buckets: Mutex::new(HashSet::new()),
        }
    }

    /// One bucket per tenant, derived from the tenant uuid.
    pub fn bucket_for(tenant: &Tenant) -> String {
        tenant.uuid.to_lowercase()
    }

    /// Deterministic object key: identical bytes for the same message map
    /// to the same key, so re-processing overwrites instead of duplicating.
    pub fn object_key(
        body: &[u8],
        message_id: &str,
        connected_phone: &str,
        content_type: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        let hash = hex::encode(hasher.finalize());
        let upload_date = Utc::now().format("%Y-%m-%d");
        let extension = mimetype::extension_for(content_type);
        format!("media/{connected_phone}/{upload_date}/{message_id}/{hash}{extension}")
    }

    /// Upload one media payload and issue a signed URL for it.
    pub async fn upload(
        &self,
        body: &[u8],
        content_type: &str,
        ctx: &UploadContext<'_>,
        options: &UploadOptions,
    ) -> Result<UploadResult> {
        let bucket = Self::bucket_for(ctx.tenant);
        self.ensure_bucket(&bucket).await?;

        let key = Self::object_key(body, ctx.message_id, ctx.connected_phone, content_type);
        debug!(bucket = %bucket, key = %key, bytes = body.len(), "uploading media object");

        let started = std::time::Instant::now();
        self.put_with_retry(&bucket, &key, body, content_type, ctx, options.max_retries)
            .await?;
        metrics::storage::upload_success(body.len(), started.elapsed().as_secs_f64());

        let signed_url = self
            .store
            .signed_url(&bucket, &key, options.url_expires_in)
            .await?;
        let now = Utc::now();

        Ok(UploadResult {
            key,
            bucket,
            region: self.store.region().to_string(),
            original_url: ctx.original_url.to_string(),
            signed_url,
            url_expires_at: now
                + chrono::Duration::from_std(options.url_expires_in)
                    .unwrap_or_else(|_| chrono::Duration::seconds(3600)),
            file_size: body.len(),
            content_type: content_type.to_string(),
            uploaded_at: now,
        })
    }

    /// Fresh signed URL for an already-stored object. Never cached: expiry
    /// must reflect this call's now().
    pub async fn refresh_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>)> {
        let url = self.store.signed_url(bucket, key, expires_in).await?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).unwrap_or_else(|_| chrono::Duration::seconds(3600));
        Ok((url, expires_at))
    }

    /// Test hook: forget which buckets have been verified.
    pub fn reset_bucket_cache(&self) {
        if let Ok(mut cache) = self.known_buckets.lock() {
            cache.clear();
        }
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if let Ok(cache) = self.known_buckets.lock() {
            if cache.contains(bucket) {
                return Ok(());
            }
        }

        if self.store.head_bucket(bucket).await? {
            debug!(bucket, "bucket verified");
        } else {
            info!(bucket, "creating bucket");
            self.store.create_bucket(bucket).await?;
            metrics::storage::bucket_created();
        }

        if let Ok(mut cache) = self.known_buckets.lock() {
            cache.insert(bucket.to_string());
        }
        Ok(())
    }

    async fn put_with_retry(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        ctx: &UploadContext<'_>,
        max_retries: u32,
    ) -> Result<()> {
        let max_attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let request = PutObjectRequest {
                bucket,
                key,
                body,
                content_type,
                metadata: object_metadata(ctx, body.len(), content_type),
                server_side_encryption: SERVER_SIDE_ENCRYPTION,
                storage_class: STORAGE_CLASS,
            };

            match self.store.put_object(request).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(bucket, key, attempt, "upload succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(bucket, key, attempt, error = %e, "upload attempt failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        metrics::storage::upload_retry();
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        metrics::storage::upload_error();
        Err(PipelineError::Storage {
            attempts: max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| PipelineError::ObjectStore("upload failed".into())),
            ),
        })
    }
}

/// Exponential backoff: base delay doubling per attempt, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    delay.min(RETRY_MAX_DELAY)
}

fn object_metadata(
    ctx: &UploadContext<'_>,
    file_size: usize,
    content_type: &str,
) -> Vec<(String, String)> {
    let sanitized_name: String = ctx
        .tenant
        .name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    vec![
        ("original-url".into(), ctx.original_url.into()),
        ("message-id".into(), ctx.message_id.into()),
        ("tenant-id".into(), ctx.tenant.id.to_string()),
        ("tenant-uuid".into(), ctx.tenant.uuid.clone()),
        ("tenant-name".into(), sanitized_name),
        ("processing-method".into(), ctx.processing_method.into()),
        ("upload-date".into(), Utc::now().to_rfc3339()),
        ("file-size".into(), file_size.to_string()),
        ("content-type".into(), content_type.into()),
    ]
}
