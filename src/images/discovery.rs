use crate::config::ImagesConfig;
use crate::images::ImageRecord;
use crate::images::blob::{BlobError, BlobStore};
use crate::images::locator::locate;
use regex::Regex;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a listed object was not accepted as an image for the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Extension,
    KeyPrefix,
    NamePattern,
    Metadata,
    Dimensions,
    TooSmall,
    Url,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub prefix: String,
    pub raw_objects: usize,
    pub records: Vec<ImageRecord>,
    pub rejected: Vec<(String, Rejection)>,
}

/// Filename matcher for one image key, compiled once per listing.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    key_prefix: String,
    name: Option<Regex>,
}

#[derive(Clone)]
pub struct ImageDiscovery {
    store: Arc<dyn BlobStore>,
    config: ImagesConfig,
}

impl ImageDiscovery {
    pub fn new(store: Arc<dyn BlobStore>, config: ImagesConfig) -> Self {
        Self { store, config }
    }

    pub fn prefix_for(&self, image_key: &str) -> String {
        locate(image_key, &self.config.base_dir)
    }

    /// `{key}-{n}{suffix}-{digits}.{ext}`
    pub fn key_pattern(&self, image_key: &str) -> KeyPattern {
        let pattern = format!(
            r"^{}-(\d+){}-\d+\.\w+$",
            regex::escape(image_key),
            regex::escape(&self.config.variation_suffix)
        );
        KeyPattern {
            key_prefix: format!("{image_key}-"),
            name: Regex::new(&pattern).ok(),
        }
    }

    /// Lists the key's storage prefix and returns the accepted images ordered
    /// by variation number. Only the listing itself can fail; problems with
    /// individual objects reject that object.
    pub async fn discover(&self, image_key: &str) -> Result<DiscoveryOutcome, BlobError> {
        let prefix = self.prefix_for(image_key);
        let objects = self.store.list(&prefix).await?;
        let mut outcome = DiscoveryOutcome {
            prefix,
            raw_objects: objects.len(),
            ..Default::default()
        };
        let pattern = self.key_pattern(image_key);

        for storage_key in objects {
            let filename = storage_key
                .rsplit('/')
                .next()
                .unwrap_or(storage_key.as_str())
                .to_string();
            match self.accept(image_key, &pattern, &storage_key, &filename).await {
                Ok(record) => outcome.records.push(record),
                Err(reason) => {
                    debug!(
                        target = "export.images",
                        image_key = %image_key,
                        storage_key = %storage_key,
                        reason = ?reason,
                        "image_candidate_rejected"
                    );
                    outcome.rejected.push((storage_key, reason));
                }
            }
        }

        outcome.records.sort();
        Ok(outcome)
    }

    /// Variation number encoded in `filename` when it names an image of the
    /// pattern's key.
    pub fn match_candidate(&self, pattern: &KeyPattern, filename: &str) -> Result<u32, Rejection> {
        if !self.config.accepts_extension(filename) {
            return Err(Rejection::Extension);
        }
        if !filename.starts_with(&pattern.key_prefix) {
            return Err(Rejection::KeyPrefix);
        }
        pattern
            .name
            .as_ref()
            .and_then(|re| re.captures(filename))
            .and_then(|caps| caps.get(1))
            .and_then(|number| number.as_str().parse::<u32>().ok())
            .filter(|number| *number > 0)
            .ok_or(Rejection::NamePattern)
    }

    async fn accept(
        &self,
        image_key: &str,
        pattern: &KeyPattern,
        storage_key: &str,
        filename: &str,
    ) -> Result<ImageRecord, Rejection> {
        let variation_number = self.match_candidate(pattern, filename)?;

        let meta = self.store.metadata(storage_key).await.map_err(|err| {
            warn!(
                target = "export.images",
                storage_key = %storage_key,
                error = %err,
                "image_metadata_failed"
            );
            Rejection::Metadata
        })?;

        let (width, height) = self
            .read_dimensions(storage_key)
            .await
            .ok_or(Rejection::Dimensions)?;
        if width < self.config.min_width || height < self.config.min_height {
            return Err(Rejection::TooSmall);
        }

        let url = self
            .store
            .signed_url(storage_key, self.config.url_expiry())
            .await
            .map_err(|err| {
                warn!(
                    target = "export.images",
                    storage_key = %storage_key,
                    error = %err,
                    "image_url_failed"
                );
                Rejection::Url
            })?;

        Ok(ImageRecord {
            image_key: image_key.to_string(),
            variation_number,
            storage_key: storage_key.to_string(),
            filename: filename.to_string(),
            url,
            width,
            height,
            size: meta.size,
            content_type: meta.content_type,
        })
    }

    // Header bytes are usually enough; the full object is read only when the
    // header cannot be decoded.
    async fn read_dimensions(&self, storage_key: &str) -> Option<(u32, u32)> {
        if let Ok(head) = self
            .store
            .read_range(storage_key, self.config.header_read_bytes)
            .await
            && let Some(dimensions) = decode_dimensions(&head)
        {
            return Some(dimensions);
        }
        let full = self.store.read(storage_key).await.ok()?;
        decode_dimensions(&full)
    }
}

pub fn decode_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBlobStore, png_bytes};

    fn discovery(store: MemoryBlobStore) -> (Arc<MemoryBlobStore>, ImageDiscovery) {
        let store = Arc::new(store);
        let discovery = ImageDiscovery::new(store.clone(), ImagesConfig::default());
        (store, discovery)
    }

    #[test]
    fn filename_must_belong_to_the_exact_key() {
        let (_, discovery) = discovery(MemoryBlobStore::new());
        let pattern = discovery.key_pattern("1102192");
        assert_eq!(discovery.match_candidate(&pattern, "1102192-1a-12345.jpg"), Ok(1));
        assert_eq!(
            discovery.match_candidate(&pattern, "1102193-1a-12345.jpg"),
            Err(Rejection::KeyPrefix)
        );
        assert_eq!(
            discovery.match_candidate(&pattern, "11021920-1a-12345.jpg"),
            Err(Rejection::KeyPrefix)
        );
    }

    #[test]
    fn filename_pattern_and_extension_rules() {
        let (_, discovery) = discovery(MemoryBlobStore::new());
        let pattern = discovery.key_pattern("827749");
        assert_eq!(discovery.match_candidate(&pattern, "827749-12a-1.PNG"), Ok(12));
        assert_eq!(
            discovery.match_candidate(&pattern, "827749-1a-1.tif"),
            Err(Rejection::Extension)
        );
        assert_eq!(
            discovery.match_candidate(&pattern, "827749-1b-1.jpg"),
            Err(Rejection::NamePattern)
        );
        assert_eq!(
            discovery.match_candidate(&pattern, "827749-0a-1.jpg"),
            Err(Rejection::NamePattern)
        );
    }

    #[test]
    fn key_characters_are_matched_literally() {
        let (_, discovery) = discovery(MemoryBlobStore::new());
        let pattern = discovery.key_pattern("82.749");
        assert_eq!(discovery.match_candidate(&pattern, "82.749-3a-1.jpg"), Ok(3));
        assert_eq!(
            discovery.match_candidate(&pattern, "82x749-3a-1.jpg"),
            Err(Rejection::KeyPrefix)
        );
    }

    #[tokio::test]
    async fn returns_valid_records_sorted_by_variation() {
        let prefix = "sorted-media/82/77/49/";
        let store = MemoryBlobStore::new()
            .with_png(&format!("{prefix}827749-2a-100.png"), 400, 300)
            .with_png(&format!("{prefix}827749-1a-100.png"), 800, 800)
            .with_png(&format!("{prefix}827749-3a-100.png"), 100, 100)
            .with_object(&format!("{prefix}notes.txt"), b"hello".to_vec())
            .with_object(&format!("{prefix}827749-4a-100.jpg"), b"not an image".to_vec());
        let (_, discovery) = discovery(store);

        let outcome = discovery.discover("827749").await.unwrap();
        assert_eq!(outcome.prefix, prefix);
        assert_eq!(outcome.raw_objects, 5);
        let variations: Vec<u32> = outcome.records.iter().map(|r| r.variation_number).collect();
        assert_eq!(variations, vec![1, 2]);
        assert_eq!(outcome.records[0].width, 800);
        assert!(outcome.records[0].url.contains("827749-1a-100.png"));

        let reasons: Vec<Rejection> = outcome.rejected.iter().map(|(_, r)| *r).collect();
        assert!(reasons.contains(&Rejection::TooSmall));
        assert!(reasons.contains(&Rejection::Extension));
        assert!(reasons.contains(&Rejection::Dimensions));
    }

    #[tokio::test]
    async fn falls_back_to_full_read_when_header_is_undecodable() {
        let prefix = "sorted-media/82/77/49/";
        let store = MemoryBlobStore::new().with_png(&format!("{prefix}827749-1a-1.png"), 300, 300);
        let store = Arc::new(store);
        let config = ImagesConfig {
            header_read_bytes: 8,
            ..ImagesConfig::default()
        };
        let discovery = ImageDiscovery::new(store.clone(), config);
        let outcome = discovery.discover("827749").await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(store.full_reads(), 1);
    }

    #[tokio::test]
    async fn header_read_avoids_full_read() {
        let (store, discovery) = discovery(
            MemoryBlobStore::new().with_png("sorted-media/82/77/49/827749-1a-1.png", 300, 300),
        );
        discovery.discover("827749").await.unwrap();
        assert_eq!(store.full_reads(), 0);
        assert!(decode_dimensions(&png_bytes(10, 20)) == Some((10, 20)));
    }
}
