use crate::config::S3Config;
use crate::images::blob::{BlobError, BlobStore, ObjectMeta};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, GetOptions, ObjectStore};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Blob store over the S3 media bucket. Listing follows continuation
/// tokens, header reads are ranged GETs and URLs are SigV4 presigned.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn Signer>,
}

impl S3BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, signer: Arc<dyn Signer>) -> Self {
        Self { store, signer }
    }

    pub fn from_config(config: &S3Config) -> Result<Self, BlobError> {
        let bucket = config
            .bucket
            .as_deref()
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| BlobError::Io("S3 storage needs a bucket name".into()))?;
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&config.region);
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let s3 = Arc::new(builder.build()?);
        info!(target = "export.images", bucket = %bucket, region = %config.region, "s3_store_ready");
        Ok(Self::new(s3.clone(), s3))
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound(path),
            other => BlobError::Io(other.to_string()),
        }
    }
}

fn object_path(key: &str) -> ObjectPath {
    ObjectPath::from(key.trim_matches('/'))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let prefix = object_path(prefix);
        let objects: Vec<object_store::ObjectMeta> =
            self.store.list(Some(&prefix)).try_collect().await?;
        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|object| object.location.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, BlobError> {
        let head = self
            .store
            .get_opts(
                &object_path(key),
                GetOptions {
                    head: true,
                    ..GetOptions::default()
                },
            )
            .await?;
        let content_type = head
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| AsRef::<str>::as_ref(value).to_string())
            .or_else(|| {
                mime_guess::from_path(key)
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            });
        Ok(ObjectMeta {
            size: head.meta.size as u64,
            content_type,
        })
    }

    async fn read_range(&self, key: &str, len: u64) -> Result<Vec<u8>, BlobError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = usize::try_from(len).unwrap_or(usize::MAX);
        let bytes = self.store.get_range(&object_path(key), 0..end).await?;
        Ok(bytes.to_vec())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let bytes = self.store.get(&object_path(key)).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        let url = self
            .signer
            .signed_url(Method::GET, &object_path(key), expires_in)
            .await
            .map_err(|err| BlobError::Signing(err.to_string()))?;
        Ok(url.to_string())
    }
}
