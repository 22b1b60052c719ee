use crate::domain::Tenant;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub media: MediaConfig,
    /// Static tenant registry for deployments without an upstream tenant
    /// service. Keyed by webhook token.
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsConfig {
    pub topic: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            topic: "chatsink-events".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PipelineSettings {
    pub url_expires_secs: u64,
    pub media_max_retries: u32,
    pub skip_media_on_error: bool,
    pub batch_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            url_expires_secs: 86400,
            media_max_retries: 3,
            skip_media_on_error: true,
            batch_concurrency: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MediaConfig {
    pub upload_path: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_path: "uploads".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TenantEntry {
    /// Token the webhook caller presents; tenant resolution upstream of
    /// the pipeline trusts this as-is.
    pub token: String,
    pub id: i64,
    pub uuid: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub channels: Vec<crate::domain::Channel>,
}

fn default_true() -> bool {
    true
}

impl TenantEntry {
    pub fn tenant(&self) -> Tenant {
        Tenant {
            id: self.id,
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            active: self.active,
            channels: self.channels.clone(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{}': {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("failed to parse '{}': {}", path, e)))?;
        Ok(config)
    }

    /// Load from the given path, or fall back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn pipeline_config(&self) -> crate::pipeline::PipelineConfig {
        crate::pipeline::PipelineConfig {
            topic: self.events.topic.clone(),
            url_expires_in: Duration::from_secs(self.pipeline.url_expires_secs),
            media_max_retries: self.pipeline.media_max_retries,
            skip_media_on_error: self.pipeline.skip_media_on_error,
            batch_concurrency: self.pipeline.batch_concurrency,
        }
    }
}
