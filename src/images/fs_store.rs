use crate::images::blob::{BlobError, BlobStore, ObjectMeta};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Blob store over a local mirror of the media bucket. Object keys are
/// `/`-separated paths relative to `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
    signing_secret: String,
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        if key.split('/').any(|segment| segment == "..") {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

pub fn url_signature(secret: &str, key: &str, expires: i64) -> String {
    format!("{:x}", Sha256::digest(format!("{secret}:{key}:{expires}").as_bytes()))
}

fn not_found(key: &str, err: std::io::Error) -> BlobError {
    if err.kind() == ErrorKind::NotFound {
        BlobError::NotFound(key.to_string())
    } else {
        BlobError::from(err)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.path_for(dir_part)?;
        let mut pending = vec![start];
        let mut keys = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file()
                    && let Some(key) = self.key_for(&path)
                    && key.starts_with(prefix)
                {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, BlobError> {
        let path = self.path_for(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|err| not_found(key, err))?;
        Ok(ObjectMeta {
            size: meta.len(),
            content_type: mime_guess::from_path(&path)
                .first()
                .map(|mime| mime.essence_str().to_string()),
        })
    }

    async fn read_range(&self, key: &str, len: u64) -> Result<Vec<u8>, BlobError> {
        let file = tokio::fs::File::open(self.path_for(key)?)
            .await
            .map_err(|err| not_found(key, err))?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        tokio::fs::read(self.path_for(key)?)
            .await
            .map_err(|err| not_found(key, err))
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        let ttl = i64::try_from(expires_in.as_secs())
            .map_err(|_| BlobError::Signing(format!("expiry too large: {expires_in:?}")))?;
        let expires = Utc::now().timestamp() + ttl;
        let signature = url_signature(&self.signing_secret, key, expires);
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        Ok(format!(
            "{}/{}?expires={expires}&signature={signature}",
            self.public_base,
            encoded.join("/")
        ))
    }
}
