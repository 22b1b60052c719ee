//! Low-durability store for inline JPEG thumbnails.
//!
//! Providers ship thumbnails as base64 inside the message payload; they
//! are previews, not the media itself, so they go to local disk rather
//! than the durable object store.

use crate::domain::Tenant;
use crate::error::{PipelineError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct ThumbnailStore {
    upload_path: PathBuf,
}

impl ThumbnailStore {
    pub fn new(upload_path: impl Into<PathBuf>) -> Self {
        Self {
            upload_path: upload_path.into(),
        }
    }

    /// Persist a base64 JPEG thumbnail; returns the path relative to the
    /// upload root, which replaces the inline payload in the message.
    pub async fn store(&self, jpeg_base64: &str, tenant: &Tenant) -> Result<String> {
        let bytes = BASE64
            .decode(jpeg_base64)
            .map_err(|e| PipelineError::Validation(format!("thumbnail is not valid base64: {e}")))?;

        let dir = self.upload_path.join(&tenant.uuid).join("thumbnail");
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.jpg", Uuid::new_v4());
        let file_path = dir.join(&file_name);
        tokio::fs::write(&file_path, bytes).await?;

        Ok(relative_to(&file_path, &self.upload_path))
    }
}

pub(crate) fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
