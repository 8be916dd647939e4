use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

/// Blob storage backend for uploaded source documents. The original stack
/// (spec §9, `original_source/server/app/schemas/documents.py`) issues a
/// pre-signed upload URL and later reads the object back for extraction;
/// no concrete S3/GCS credentials are available in this pack, so this talks
/// to a generic HTTP object-storage gateway over the configured base URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn presign_upload(&self, bucket: &str, storage_path: &str, expires_in_seconds: u64) -> String;
    async fn get_object(&self, bucket: &str, storage_path: &str) -> anyhow::Result<Vec<u8>>;
    async fn object_exists(&self, bucket: &str, storage_path: &str) -> anyhow::Result<bool>;
    /// Best-effort delete; callers should swallow errors (spec §4.6 delete contract).
    async fn delete_object(&self, bucket: &str, storage_path: &str) -> anyhow::Result<()>;
}

pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn object_url(&self, bucket: &str, storage_path: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), bucket, storage_path)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn presign_upload(&self, bucket: &str, storage_path: &str, expires_in_seconds: u64) -> String {
        let expires_at = Utc::now().timestamp() + expires_in_seconds as i64;
        format!("{}?expires={}", self.object_url(bucket, storage_path), expires_at)
    }

    async fn get_object(&self, bucket: &str, storage_path: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(self.object_url(bucket, storage_path)).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("object store returned {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn object_exists(&self, bucket: &str, storage_path: &str) -> anyhow::Result<bool> {
        let response = self.client.head(self.object_url(bucket, storage_path)).send().await?;
        Ok(response.status().is_success())
    }

    async fn delete_object(&self, bucket: &str, storage_path: &str) -> anyhow::Result<()> {
        self.client.delete(self.object_url(bucket, storage_path)).send().await?;
        Ok(())
    }
}
