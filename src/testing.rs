//! In-memory stand-ins for the warehouse, media storage and catalog.

use crate::catalog::rows::{GroupData, ProductRow};
use crate::images::binder::MediaItem;
use crate::images::blob::{BlobError, BlobStore, ObjectMeta};
use crate::images::ImageRecord;
use crate::retry::{RateLimiter, RetryPolicy, Submitter};
use crate::shopify::{
    CatalogApi, CatalogError, CreatedProduct, ProductSubmission, RemoteMedia, RemoteVariant,
};
use crate::warehouse::{GroupLoader, LoaderError};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn row(id: &str) -> ProductRow {
    ProductRow {
        id: id.to_string(),
        group_id: Some("GRP-TEST".into()),
        ..ProductRow::default()
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

pub fn image_record(image_key: &str, variation_number: u32) -> ImageRecord {
    let filename = format!("{image_key}-{variation_number}a-1.png");
    ImageRecord {
        image_key: image_key.to_string(),
        variation_number,
        storage_key: format!("media/{filename}"),
        url: format!("https://cdn.test/{filename}"),
        filename,
        width: 400,
        height: 400,
        size: 1024,
        content_type: Some("image/png".into()),
    }
}

/// Retries quickly and never throttles.
pub fn fast_submitter() -> Submitter {
    Submitter::new(
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: 0.0,
        },
        RateLimiter::per_second(0.0),
    )
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: Vec<String>,
    list_delay: Option<Duration>,
    list_calls: AtomicUsize,
    lists_in_flight: AtomicUsize,
    peak_lists: AtomicUsize,
    full_reads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: Vec<u8>) -> Self {
        self.objects
            .lock()
            .expect("objects lock")
            .insert(key.to_string(), bytes);
        self
    }

    pub fn with_png(self, key: &str, width: u32, height: u32) -> Self {
        self.with_object(key, png_bytes(width, height))
    }

    /// Listing any prefix under `prefix` fails.
    pub fn fail_list(mut self, prefix: &str) -> Self {
        self.failing_prefixes.push(prefix.to_string());
        self
    }

    /// Every listing takes `delay`, so concurrent listings overlap.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Most listings ever in flight at once.
    pub fn peak_lists(&self) -> usize {
        self.peak_lists.load(Ordering::SeqCst)
    }

    pub fn full_reads(&self) -> usize {
        self.full_reads.load(Ordering::SeqCst)
    }

    fn list_now(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        if self
            .failing_prefixes
            .iter()
            .any(|failing| prefix.starts_with(failing.as_str()))
        {
            return Err(BlobError::Io(format!("listing {prefix} failed")));
        }
        Ok(self
            .objects
            .lock()
            .expect("objects lock")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn object(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .lock()
            .expect("objects lock")
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_lists.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        let listed = self.list_now(prefix);
        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        listed
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMeta, BlobError> {
        let bytes = self.object(key)?;
        Ok(ObjectMeta {
            size: bytes.len() as u64,
            content_type: mime_guess::from_path(key)
                .first()
                .map(|mime| mime.essence_str().to_string()),
        })
    }

    async fn read_range(&self, key: &str, len: u64) -> Result<Vec<u8>, BlobError> {
        let mut bytes = self.object(key)?;
        bytes.truncate(len as usize);
        Ok(bytes)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.full_reads.fetch_add(1, Ordering::SeqCst);
        self.object(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        Ok(format!("https://cdn.test/{key}?ttl={}", expires_in.as_secs()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryGroupLoader {
    groups: BTreeMap<String, Vec<ProductRow>>,
}

impl MemoryGroupLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group_id: &str, rows: Vec<ProductRow>) -> Self {
        self.groups.insert(group_id.to_string(), rows);
        self
    }
}

#[async_trait]
impl GroupLoader for MemoryGroupLoader {
    async fn load_group(&self, group_id: &str) -> Result<Option<GroupData>, LoaderError> {
        Ok(self
            .groups
            .get(group_id)
            .filter(|rows| !rows.is_empty())
            .map(|rows| GroupData::new(group_id, rows.clone(), Vec::new())))
    }

    async fn list_group_ids(&self) -> Result<Vec<String>, LoaderError> {
        Ok(self.groups.keys().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct CatalogCalls {
    created: Vec<ProductSubmission>,
    create_calls: usize,
    create_errors: VecDeque<CatalogError>,
    published: Vec<String>,
    media: Vec<MediaItem>,
    bindings: Vec<(String, String)>,
}

/// Records every call. Variant ids derive from SKUs and media ids from alt
/// text, so tests can predict them.
#[derive(Debug, Default)]
pub struct MockCatalog {
    calls: Mutex<CatalogCalls>,
    fail_media: bool,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors returned, in order, by the next product creations.
    pub fn create_errors(self, errors: Vec<CatalogError>) -> Self {
        self.calls.lock().expect("calls lock").create_errors = errors.into();
        self
    }

    pub fn failing_media(mut self) -> Self {
        self.fail_media = true;
        self
    }

    pub fn created_products(&self) -> Vec<ProductSubmission> {
        self.calls.lock().expect("calls lock").created.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").create_calls
    }

    pub fn published(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").published.clone()
    }

    pub fn media(&self) -> Vec<MediaItem> {
        self.calls.lock().expect("calls lock").media.clone()
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").bindings.clone()
    }
}

#[async_trait]
impl CatalogApi for MockCatalog {
    async fn create_product(&self, product: &ProductSubmission) -> Result<CreatedProduct, CatalogError> {
        let mut calls = self.calls.lock().expect("calls lock");
        calls.create_calls += 1;
        if let Some(err) = calls.create_errors.pop_front() {
            return Err(err);
        }
        calls.created.push(product.clone());
        Ok(CreatedProduct {
            id: format!("gid://p/{}", calls.created.len()),
            variants: product
                .skus()
                .into_iter()
                .map(|sku| RemoteVariant {
                    id: format!("gid://variant/{sku}"),
                    sku: sku.to_string(),
                })
                .collect(),
        })
    }

    async fn publish_product(&self, product_id: &str) -> Result<(), CatalogError> {
        self.calls
            .lock()
            .expect("calls lock")
            .published
            .push(product_id.to_string());
        Ok(())
    }

    async fn create_media(
        &self,
        _product_id: &str,
        media: &[MediaItem],
    ) -> Result<Vec<RemoteMedia>, CatalogError> {
        if self.fail_media {
            return Err(CatalogError::Permanent("media rejected".into()));
        }
        self.calls
            .lock()
            .expect("calls lock")
            .media
            .extend_from_slice(media);
        Ok(media
            .iter()
            .map(|item| RemoteMedia {
                id: format!("media-{}", item.alt),
                alt: Some(item.alt.clone()),
            })
            .collect())
    }

    async fn bind_variant_media(
        &self,
        _product_id: &str,
        variant_id: &str,
        media_id: &str,
    ) -> Result<(), CatalogError> {
        self.calls
            .lock()
            .expect("calls lock")
            .bindings
            .push((variant_id.to_string(), media_id.to_string()));
        Ok(())
    }
}
