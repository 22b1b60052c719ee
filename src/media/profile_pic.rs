//! Opportunistic profile-picture cache.
//!
//! Profile pictures are fetched as a side effect of processing a message
//! and cached on local disk keyed by the owner id plus the current date.
//! Everything here is best-effort; a failure never blocks the message.

use crate::domain::Tenant;
use crate::error::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub struct ProfilePicStore {
    http: reqwest::Client,
    upload_path: PathBuf,
}

impl ProfilePicStore {
    pub fn new(http: reqwest::Client, upload_path: impl Into<PathBuf>) -> Self {
        Self {
            http,
            upload_path: upload_path.into(),
        }
    }

    /// Cache key component: the current date, so pictures refresh daily.
    pub fn date_stamp() -> String {
        Utc::now().format("%d%m%Y").to_string()
    }

    /// Fetch and persist a profile picture URL; returns the relative path.
    /// Returns the existing path without refetching when today's copy is
    /// already on disk.
    pub async fn store(&self, picture_url: &str, owner_id: &str, tenant: &Tenant) -> Result<String> {
        let dir = self.upload_path.join(&tenant.uuid).join("profilepic");
        tokio::fs::create_dir_all(&dir).await?;

        let response = self
            .http
            .get(picture_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "image/webp,image/apng,image/*,*/*;q=0.8")
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let extension = extension_from(picture_url, response.headers());
        let file_name = format!("{}{}{}", owner_id, Self::date_stamp(), extension);
        let file_path = dir.join(&file_name);

        if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
            debug!(owner_id, "profile picture already cached for today");
            return Ok(super::thumbnail::relative_to(&file_path, &self.upload_path));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(&file_path, &bytes).await?;

        Ok(super::thumbnail::relative_to(&file_path, &self.upload_path))
    }
}

/// Extension from the URL path when recognizable, else from the
/// content-type header, else `.jpg`.
fn extension_from(url: &str, headers: &reqwest::header::HeaderMap) -> &'static str {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        let path = parsed.path().to_ascii_lowercase();
        for ext in [".jpg", ".jpeg", ".png", ".webp", ".gif"] {
            if path.ends_with(ext) {
                return if ext == ".jpeg" { ".jpg" } else { ext };
            }
        }
    }
    if let Some(content_type) = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if content_type.contains("png") {
            return ".png";
        }
        if content_type.contains("webp") {
            return ".webp";
        }
        if content_type.contains("gif") {
            return ".gif";
        }
    }
    ".jpg"
}
