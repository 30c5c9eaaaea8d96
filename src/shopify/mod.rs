pub mod client;
pub mod product;

use crate::images::binder::MediaItem;
use crate::retry::{RetryClass, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use client::ShopifyClient;
pub use product::ProductSubmission;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(path) if !path.is_empty() => write!(f, "{}: {}", path.join("."), self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request failed: {0}")]
    Permanent(String),
    #[error("rejected: {}", join_user_errors(.0))]
    UserErrors(Vec<UserError>),
}

fn join_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Retryable for CatalogError {
    fn retry_class(&self) -> RetryClass {
        match self {
            CatalogError::RateLimited { retry_after } => RetryClass::RateLimited(*retry_after),
            CatalogError::Transient(_) => RetryClass::Transient,
            CatalogError::Permanent(_) | CatalogError::UserErrors(_) => RetryClass::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVariant {
    pub id: String,
    #[serde(default)]
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedProduct {
    pub id: String,
    pub variants: Vec<RemoteVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMedia {
    pub id: String,
    #[serde(default)]
    pub alt: Option<String>,
}

/// Remote catalog operations the exporter depends on.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Creates the product with its options and variants in one call.
    async fn create_product(&self, product: &ProductSubmission) -> Result<CreatedProduct, CatalogError>;

    async fn publish_product(&self, product_id: &str) -> Result<(), CatalogError>;

    async fn create_media(
        &self,
        product_id: &str,
        media: &[MediaItem],
    ) -> Result<Vec<RemoteMedia>, CatalogError>;

    async fn bind_variant_media(
        &self,
        product_id: &str,
        variant_id: &str,
        media_id: &str,
    ) -> Result<(), CatalogError>;
}
