//! In-memory object store for development and testing.

use super::{ObjectStoreClient, PutObjectRequest};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: Vec<(String, String)>,
    pub server_side_encryption: String,
    pub storage_class: String,
}

pub struct InMemoryObjectStore {
    region: String,
    buckets: Mutex<HashMap<String, HashMap<String, StoredObject>>>,
    head_calls: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            buckets: Mutex::new(HashMap::new()),
            head_calls: AtomicU64::new(0),
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .ok()?
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .map(|b| b.get(bucket).map(|o| o.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of head_bucket calls observed; used to assert the uploader's
    /// bucket cache actually short-circuits.
    pub fn head_calls(&self) -> u64 {
        self.head_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn head_bucket(&self, bucket: &str) -> Result<bool> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .buckets
            .lock()
            .map(|b| b.contains_key(bucket))
            .unwrap_or(false))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.entry(bucket.to_string()).or_default();
        }
        Ok(())
    }

    async fn put_object(&self, req: PutObjectRequest<'_>) -> Result<()> {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.entry(req.bucket.to_string()).or_default().insert(
                req.key.to_string(),
                StoredObject {
                    body: req.body.to_vec(),
                    content_type: req.content_type.to_string(),
                    metadata: req.metadata,
                    server_side_encryption: req.server_side_encryption.to_string(),
                    storage_class: req.storage_class.to_string(),
                },
            );
        }
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let expires_at = Utc::now().timestamp() + expires_in.as_secs() as i64;
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket, key, expires_at
        ))
    }

    fn region(&self) -> &str {
        &self.region
    }
}
