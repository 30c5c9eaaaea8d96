use crate::catalog::assembler::VariantDescriptor;
use crate::images::{ImageMap, ImageRecord};
use crate::shopify::{RemoteMedia, RemoteVariant};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

static MEDIA_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+) - Image (\d+)$").expect("media label pattern"));

/// Product-level media item, one per distinct stored image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaItem {
    pub image_key: String,
    pub variation_number: u32,
    pub storage_key: String,
    pub url: String,
    pub alt: String,
}

/// A variant-to-media association to apply on the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub variant_id: String,
    pub sku: String,
    pub media_id: String,
    pub image_key: String,
    pub variation_number: u32,
}

pub fn media_label(image_key: &str, variation_number: u32) -> String {
    format!("{image_key} - Image {variation_number}")
}

pub fn parse_media_label(label: &str) -> Option<(String, u32)> {
    let caps = MEDIA_LABEL.captures(label.trim())?;
    let number = caps.get(2)?.as_str().parse().ok()?;
    Some((caps.get(1)?.as_str().to_string(), number))
}

/// Variation 1 when present, otherwise the first record.
pub fn primary_image(records: &[ImageRecord]) -> Option<&ImageRecord> {
    records
        .iter()
        .find(|record| record.variation_number == 1)
        .or_else(|| records.first())
}

/// Union of the images of every retained variant, one entry per storage
/// key, ordered by variation number.
pub fn product_media(variants: &[VariantDescriptor], images: &ImageMap) -> Vec<MediaItem> {
    let mut seen_keys: HashSet<&str> = HashSet::new();
    let mut seen_objects: HashSet<&str> = HashSet::new();
    let mut records: Vec<&ImageRecord> = Vec::new();
    for variant in variants {
        let Some(image_key) = variant.image_key.as_deref() else {
            continue;
        };
        if !seen_keys.insert(image_key) {
            continue;
        }
        for record in images.get(image_key).map(Vec::as_slice).unwrap_or_default() {
            if seen_objects.insert(record.storage_key.as_str()) {
                records.push(record);
            }
        }
    }
    records.sort();
    records
        .into_iter()
        .map(|record| MediaItem {
            image_key: record.image_key.clone(),
            variation_number: record.variation_number,
            storage_key: record.storage_key.clone(),
            url: record.url.clone(),
            alt: media_label(&record.image_key, record.variation_number),
        })
        .collect()
}

/// Pairs each created variant with the uploaded media of its primary image.
/// Variants that cannot be paired are skipped.
pub fn plan_bindings(
    variants: &[RemoteVariant],
    image_keys_by_sku: &BTreeMap<String, String>,
    images: &ImageMap,
    media: &[RemoteMedia],
) -> Vec<Binding> {
    let media_ids: HashMap<(String, u32), &str> = media
        .iter()
        .filter_map(|item| {
            let label = item.alt.as_deref()?;
            Some((parse_media_label(label)?, item.id.as_str()))
        })
        .collect();

    let mut bindings = Vec::new();
    for variant in variants {
        let Some(image_key) = image_keys_by_sku.get(&variant.sku) else {
            debug!(target = "export.images", sku = %variant.sku, "variant_image_skipped_no_key");
            continue;
        };
        let Some(primary) = images.get(image_key).and_then(|records| primary_image(records)) else {
            debug!(
                target = "export.images",
                sku = %variant.sku,
                image_key = %image_key,
                "variant_image_skipped_no_images"
            );
            continue;
        };
        let Some(media_id) = media_ids.get(&(primary.image_key.clone(), primary.variation_number))
        else {
            debug!(
                target = "export.images",
                sku = %variant.sku,
                image_key = %image_key,
                variation = primary.variation_number,
                "variant_image_skipped_no_media"
            );
            continue;
        };
        bindings.push(Binding {
            variant_id: variant.id.clone(),
            sku: variant.sku.clone(),
            media_id: media_id.to_string(),
            image_key: image_key.clone(),
            variation_number: primary.variation_number,
        });
    }
    bindings
}
