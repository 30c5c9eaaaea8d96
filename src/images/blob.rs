use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Io(err.to_string())
    }
}

/// Object storage holding the sorted media tree.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Every object key under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, BlobError>;

    /// Up to `len` leading bytes of the object.
    async fn read_range(&self, key: &str, len: u64) -> Result<Vec<u8>, BlobError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, BlobError>;
}
