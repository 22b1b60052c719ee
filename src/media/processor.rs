//! Media ingestion pipeline.
//!
//! Takes a normalized message, recovers the attached media (decrypting
//! when the source is an encrypted CDN object, downloading directly
//! otherwise), pushes the bytes into durable storage, and rewrites the
//! media sub-record with the storage coordinates. Batch mode runs a
//! bounded number of messages concurrently with per-message failure
//! isolation.

use crate::domain::{MediaContent, MediaType, NormalizedMessage, ProviderName, Tenant};
use crate::error::{PipelineError, Result};
use crate::media::decrypt::{decrypt_media, DecryptRequest};
use crate::media::mimetype;
use crate::media::profile_pic::ProfilePicStore;
use crate::media::thumbnail::ThumbnailStore;
use crate::observability::metrics;
use crate::providers;
use crate::storage::{MediaUploader, UploadContext, UploadOptions, UploadResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_MAX_ATTEMPTS: u32 = 3;
const DOWNLOAD_RETRY_BASE: Duration = Duration::from_secs(1);
const DOWNLOAD_RETRY_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub url_expires_in: Duration,
    pub skip_on_error: bool,
    pub max_retries: u32,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            url_expires_in: Duration::from_secs(3600),
            skip_on_error: false,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub url_expires_in: Duration,
    pub concurrency: usize,
    pub max_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            url_expires_in: Duration::from_secs(3600),
            concurrency: 5,
            max_retries: 3,
        }
    }
}

/// Outcome of processing one message's media.
#[derive(Debug)]
pub struct ProcessingResult {
    pub success: bool,
    pub message: NormalizedMessage,
    pub upload: Option<UploadResult>,
    pub error: Option<String>,
}

/// Aggregate outcome of a batch run; every input message has exactly one
/// entry in `results`.
pub struct BatchResult {
    pub total_messages: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<ProcessingResult>,
}

pub struct MediaProcessor {
    http: reqwest::Client,
    uploader: Arc<MediaUploader>,
    thumbnails: ThumbnailStore,
    profile_pics: ProfilePicStore,
}

impl MediaProcessor {
    pub fn new(http: reqwest::Client, uploader: Arc<MediaUploader>, upload_path: &str) -> Self {
        Self {
            thumbnails: ThumbnailStore::new(upload_path),
            profile_pics: ProfilePicStore::new(http.clone(), upload_path),
            http,
            uploader,
        }
    }

    /// Process one message. Messages without unprocessed media pass
    /// through untouched as a success.
    #[instrument(skip(self, message, tenant), fields(message_id = %message.message_id, tenant = %tenant.name))]
    pub async fn process_message_media(
        &self,
        message: NormalizedMessage,
        tenant: &Tenant,
        options: &ProcessOptions,
    ) -> Result<ProcessingResult> {
        if !message.has_unprocessed_media() {
            metrics::media::skipped();
            return Ok(ProcessingResult {
                success: true,
                message,
                upload: None,
                error: None,
            });
        }

        match self.ingest(&message, tenant, options).await {
            Ok((updated, upload)) => {
                metrics::media::processed();
                Ok(ProcessingResult {
                    success: true,
                    message: updated,
                    upload: Some(upload),
                    error: None,
                })
            }
            // Channel resolution fails closed regardless of skip-on-error:
            // no channel means the message itself is not ours to process.
            Err(e @ PipelineError::NoChannel(_)) => {
                metrics::media::error();
                Err(e)
            }
            Err(e) if options.skip_on_error => {
                metrics::media::error();
                warn!(error = %e, "media ingestion failed, continuing without media");
                Ok(ProcessingResult {
                    success: false,
                    message,
                    upload: None,
                    error: Some(e.to_string()),
                })
            }
            Err(e) => {
                metrics::media::error();
                Err(e)
            }
        }
    }

    async fn ingest(
        &self,
        message: &NormalizedMessage,
        tenant: &Tenant,
        options: &ProcessOptions,
    ) -> Result<(NormalizedMessage, UploadResult)> {
        let media = message
            .content
            .media()
            .ok_or_else(|| PipelineError::Validation("message has no media content".into()))?;
        let media_type = message
            .content
            .media_type()
            .ok_or_else(|| PipelineError::Validation("content type carries no media".into()))?;

        validate_media(media, &message.message_id)?;
        let original_url = media
            .original_url
            .clone()
            .ok_or_else(|| PipelineError::Validation("media has no source reference".into()))?;

        let (bytes, content_type, processing_method) = self
            .fetch_media_bytes(message, media, media_type, &original_url, tenant)
            .await?;

        let upload = self
            .uploader
            .upload(
                &bytes,
                &content_type,
                &UploadContext {
                    tenant,
                    message_id: &message.message_id,
                    connected_phone: &message.connected_phone,
                    original_url: &original_url,
                    processing_method,
                },
                &UploadOptions {
                    url_expires_in: options.url_expires_in,
                    max_retries: options.max_retries,
                },
            )
            .await?;

        let mut updated = message.clone();
        if let Some(media) = updated.content.media_mut() {
            apply_upload(media, &upload);
        }

        // Inline thumbnail and profile pictures are side effects: log and
        // carry on when they fail.
        self.persist_thumbnail(&mut updated, tenant).await;
        self.persist_profile_pictures(&mut updated, tenant).await;

        info!(
            bucket = %upload.bucket,
            key = %upload.key,
            bytes = upload.file_size,
            "media ingested"
        );
        Ok((updated, upload))
    }

    /// Decrypt-vs-direct decision plus the actual byte recovery.
    async fn fetch_media_bytes(
        &self,
        message: &NormalizedMessage,
        media: &MediaContent,
        media_type: MediaType,
        original_url: &str,
        tenant: &Tenant,
    ) -> Result<(Vec<u8>, String, &'static str)> {
        if needs_decryption(original_url, media.media_key.as_deref()) {
            let encrypted = self.download_with_retry(original_url).await?;
            let media_key = media.media_key.as_deref().unwrap_or_default();
            let decrypted = decrypt_media(
                &encrypted,
                &DecryptRequest {
                    media_key_b64: media_key,
                    media_type,
                    file_sha256: media.file_sha256.as_deref(),
                    file_enc_sha256: media.file_enc_sha256.as_deref(),
                },
            )?;
            return Ok((decrypted.data, decrypted.mimetype, "decrypt"));
        }

        // Direct download. WABA-resolved URLs require the owning channel's
        // bearer token; the lookup fails closed when no channel matches.
        if message.provider.name == ProviderName::Waba {
            let channel = tenant
                .channel_for_platform(&message.instance_id)
                .ok_or_else(|| PipelineError::NoChannel(message.instance_id.clone()))?;
            let client = providers::waba_client_for(&self.http, channel)?;
            let bytes = client.download(original_url).await?;
            let content_type = if media.mimetype.is_empty() {
                mimetype::infer_from_url(original_url).to_string()
            } else {
                media.mimetype.clone()
            };
            return Ok((bytes, content_type, "direct"));
        }

        let response = self
            .http
            .get(original_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| mimetype::infer_from_url(original_url).to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, content_type, "direct"))
    }

    /// Download an encrypted blob, retrying transient transport failures
    /// with capped exponential backoff.
    async fn download_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = None;
        for attempt in 1..=DOWNLOAD_MAX_ATTEMPTS {
            match self.try_download(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "encrypted media download failed");
                    last_error = Some(e);
                    if attempt < DOWNLOAD_MAX_ATTEMPTS {
                        let delay = DOWNLOAD_RETRY_BASE * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay.min(DOWNLOAD_RETRY_CAP)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| PipelineError::Validation("download failed".into())))
    }

    async fn try_download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            return Err(PipelineError::Validation("downloaded file is empty".into()));
        }
        Ok(bytes.to_vec())
    }

    /// Rewrite the message's location thumbnail to a persisted reference.
    /// Separate from media ingestion because location content is not
    /// media-bearing.
    pub async fn process_location_thumbnail(
        &self,
        mut message: NormalizedMessage,
        tenant: &Tenant,
    ) -> ProcessingResult {
        if let crate::domain::Content::Location { location } = &mut message.content {
            if let Some(inline) = location.thumbnail.clone() {
                match self.thumbnails.store(&inline, tenant).await {
                    Ok(path) => location.thumbnail = Some(path),
                    Err(e) => {
                        warn!(error = %e, "location thumbnail persistence failed");
                        return ProcessingResult {
                            success: false,
                            error: Some(e.to_string()),
                            message,
                            upload: None,
                        };
                    }
                }
            }
        }
        ProcessingResult {
            success: true,
            message,
            upload: None,
            error: None,
        }
    }

    async fn persist_thumbnail(&self, message: &mut NormalizedMessage, tenant: &Tenant) {
        let inline = message
            .content
            .media()
            .and_then(|m| m.thumbnail.clone());
        if let Some(inline) = inline {
            match self.thumbnails.store(&inline, tenant).await {
                Ok(path) => {
                    if let Some(media) = message.content.media_mut() {
                        media.thumbnail = Some(path);
                    }
                }
                Err(e) => warn!(error = %e, "media thumbnail persistence failed"),
            }
        }
    }

    async fn persist_profile_pictures(&self, message: &mut NormalizedMessage, tenant: &Tenant) {
        let Some(sender_pic) = message.sender.profile_picture.clone() else {
            return;
        };

        match self
            .profile_pics
            .store(&sender_pic, &message.sender.id, tenant)
            .await
        {
            Ok(path) => message.sender.profile_picture = Some(path),
            Err(e) => warn!(error = %e, "sender profile picture fetch failed"),
        }

        if message.chat.id != message.sender.id {
            if let Some(chat_pic) = message.chat.profile_picture.clone() {
                match self.profile_pics.store(&chat_pic, &message.chat.id, tenant).await {
                    Ok(path) => message.chat.profile_picture = Some(path),
                    Err(e) => warn!(error = %e, "chat profile picture fetch failed"),
                }
            }
        }
    }

    /// Process a set of messages with a fixed concurrency width. Failures
    /// are isolated per message; the aggregate always reports one outcome
    /// per input, in input order.
    pub async fn process_batch(
        self: &Arc<Self>,
        messages: Vec<NormalizedMessage>,
        tenant: &Tenant,
        options: &BatchOptions,
    ) -> BatchResult {
        let total = messages.len();
        let width = options.concurrency.max(1);
        debug!(total, width, "starting media batch");

        let process_options = ProcessOptions {
            url_expires_in: options.url_expires_in,
            // Batch mode always isolates failures so one message cannot
            // abort its siblings.
            skip_on_error: true,
            max_retries: options.max_retries,
        };

        let mut outcomes: Vec<Option<ProcessingResult>> = Vec::new();
        outcomes.resize_with(total, || None);

        let mut chunk_start = 0;
        for chunk in messages.chunks(width) {
            let mut join_set = JoinSet::new();
            for (offset, message) in chunk.iter().cloned().enumerate() {
                let processor = Arc::clone(self);
                let tenant = tenant.clone();
                let opts = process_options.clone();
                let fallback = message.clone();
                join_set.spawn(async move {
                    let result = processor.process_message_media(message, &tenant, &opts).await;
                    let outcome = match result {
                        Ok(outcome) => outcome,
                        // Only fail-closed errors reach here with
                        // skip_on_error forced on; the message is still
                        // reported in the aggregate.
                        Err(e) => ProcessingResult {
                            success: false,
                            message: fallback,
                            upload: None,
                            error: Some(e.to_string()),
                        },
                    };
                    (chunk_start + offset, outcome)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, outcome)) => outcomes[index] = Some(outcome),
                    Err(join_err) => {
                        warn!(error = %join_err, "batch task panicked");
                    }
                }
            }
            chunk_start += chunk.len();
        }

        let results: Vec<ProcessingResult> = outcomes.into_iter().flatten().collect();
        let success_count = results.iter().filter(|r| r.success).count();
        let error_count = results.len() - success_count;
        metrics::batch::completed(results.len(), error_count);

        info!(total, success_count, error_count, "media batch finished");
        BatchResult {
            total_messages: total,
            success_count,
            error_count,
            results,
        }
    }

    /// Fresh signed URL for previously ingested media.
    pub async fn refresh_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<(String, chrono::DateTime<chrono::Utc>)> {
        self.uploader.refresh_signed_url(bucket, key, expires_in).await
    }
}

/// Encrypted sources are recognizable by the media key riding along with a
/// WhatsApp-hosted or `.enc` URL.
pub fn needs_decryption(url: &str, media_key: Option<&str>) -> bool {
    media_key.is_some_and(|k| !k.is_empty())
        && (url.contains(".enc") || url.contains("whatsapp.net"))
}

fn validate_media(media: &MediaContent, message_id: &str) -> Result<()> {
    let url = media
        .original_url
        .as_deref()
        .ok_or_else(|| {
            PipelineError::Validation(format!("no source URL for message {message_id}"))
        })?;
    if media.mimetype.is_empty() {
        return Err(PipelineError::Validation(format!(
            "no mimetype for message {message_id}"
        )));
    }
    if !mimetype::is_supported(&media.mimetype) {
        return Err(PipelineError::Validation(format!(
            "unsupported media type: {}",
            media.mimetype
        )));
    }
    reqwest::Url::parse(url)
        .map_err(|_| PipelineError::Validation(format!("invalid source URL: {url}")))?;
    Ok(())
}

fn apply_upload(media: &mut MediaContent, upload: &UploadResult) {
    media.url = Some(upload.signed_url.clone());
    media.original_url = Some(upload.original_url.clone());
    media.s3_key = Some(upload.key.clone());
    media.s3_bucket = Some(upload.bucket.clone());
    media.s3_region = Some(upload.region.clone());
    media.url_expires_at = Some(upload.url_expires_at.to_rfc3339());
    media.file_size = upload.file_size as u64;
    media.content_type = Some(upload.content_type.clone());
    media.uploaded_at = Some(upload.uploaded_at.to_rfc3339());
    media.processed = true;
}
