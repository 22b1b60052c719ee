//! WhatsApp Business API (Graph) media client.
//!
//! Media arrives in WABA webhooks as an opaque media id; resolving it is a
//! two-step dance: `GET {graph}/{version}/{media_id}` (bearer-authorized)
//! returns a short-lived CDN URL plus metadata, and the CDN URL itself must
//! also be fetched with the same bearer token.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use tracing::debug;

const GRAPH_API_URL: &str = "https://graph.facebook.com";
const DEFAULT_VERSION: &str = "v22.0";

/// Media metadata returned by the Graph media-info lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

pub struct WabaMediaClient {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    version: String,
}

impl WabaMediaClient {
    pub fn new(
        http: reqwest::Client,
        access_token: String,
        phone_number_id: String,
        version: Option<String>,
    ) -> Self {
        Self {
            http,
            access_token,
            phone_number_id,
            version: version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        }
    }

    pub fn phone_number_id(&self) -> &str {
        &self.phone_number_id
    }

    pub fn media_info_url(&self, media_id: &str) -> String {
        format!("{}/{}/{}", GRAPH_API_URL, self.version, media_id)
    }

    /// Resolve a webhook media id into a download URL and metadata.
    pub async fn get_media_info(&self, media_id: &str) -> Result<MediaInfo> {
        let url = self.media_info_url(media_id);
        debug!(media_id, "fetching media info");
        let info = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .timeout(super::MEDIA_HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<MediaInfo>()
            .await?;
        Ok(info)
    }

    /// Authenticated download of a resolved media URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(super::MEDIA_HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(PipelineError::Validation(
                "downloaded media file is empty".into(),
            ));
        }
        Ok(bytes.to_vec())
    }
}
