pub mod binder;
pub mod blob;
pub mod cache;
pub mod coordinator;
pub mod discovery;
pub mod fs_store;
pub mod locator;
pub mod s3_store;
pub mod side_log;

use crate::config::{ConfigError, ImagesConfig, StorageBackend};
use blob::BlobStore;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use cache::ImageCache;
pub use discovery::ImageDiscovery;
pub use fs_store::FsBlobStore;
pub use s3_store::S3BlobStore;
pub use side_log::ImageSideLog;

/// Image records per image key, as fetched for one batch.
pub type ImageMap = BTreeMap<String, Vec<ImageRecord>>;

/// One accepted image under an image key. Records order by variation number.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub image_key: String,
    pub variation_number: u32,
    pub storage_key: String,
    pub filename: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub content_type: Option<String>,
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ImageRecord {}

impl PartialOrd for ImageRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.variation_number
            .cmp(&other.variation_number)
            .then_with(|| self.storage_key.cmp(&other.storage_key))
    }
}

/// Storage backend selected by `images.storage`.
pub fn blob_store_from_config(config: &ImagesConfig) -> Result<Arc<dyn BlobStore>, ConfigError> {
    match config.storage {
        StorageBackend::S3 => S3BlobStore::from_config(&config.s3)
            .map(|store| Arc::new(store) as Arc<dyn BlobStore>)
            .map_err(|err| ConfigError::Invalid(format!("images.s3: {err}"))),
        StorageBackend::Filesystem => {
            if config.signing_secret.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "images.signing_secret is required for filesystem storage".into(),
                ));
            }
            Ok(Arc::new(FsBlobStore::new(
                config.storage_root.clone(),
                config.public_base_url.clone(),
                config.signing_secret.clone(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_needs_its_settings() {
        let mut config = ImagesConfig::default();
        assert!(blob_store_from_config(&config).is_err());
        config.s3.bucket = Some("media".into());
        assert!(blob_store_from_config(&config).is_ok());

        config.storage = StorageBackend::Filesystem;
        assert!(blob_store_from_config(&config).is_err());
        config.signing_secret = "s3cret".into();
        assert!(blob_store_from_config(&config).is_ok());
    }
}
