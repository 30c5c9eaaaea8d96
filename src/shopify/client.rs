use crate::config::ShopifyConfig;
use crate::http::build_client;
use crate::images::binder::MediaItem;
use crate::shopify::product::ProductSubmission;
use crate::shopify::{CatalogApi, CatalogError, CreatedProduct, RemoteMedia, RemoteVariant, UserError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

const PRODUCT_SET: &str = r#"
mutation productSet($input: ProductSetInput!, $synchronous: Boolean!) {
  productSet(synchronous: $synchronous, input: $input) {
    product { id variants(first: 250) { nodes { id sku } } }
    userErrors { field message }
  }
}"#;

const PUBLISH: &str = r#"
mutation publishablePublishToCurrentChannel($id: ID!) {
  publishablePublishToCurrentChannel(id: $id) {
    userErrors { field message }
  }
}"#;

const CREATE_MEDIA: &str = r#"
mutation productCreateMedia($productId: ID!, $media: [CreateMediaInput!]!) {
  productCreateMedia(productId: $productId, media: $media) {
    media { id alt }
    mediaUserErrors { field message }
  }
}"#;

const BIND_VARIANT_MEDIA: &str = r#"
mutation productVariantsBulkUpdate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants) {
    productVariants { id }
    userErrors { field message }
  }
}"#;

/// Shopify Admin GraphQL client.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    endpoint: String,
    access_token: String,
    http: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMediaInput<'a> {
    original_source: &'a str,
    alt: &'a str,
    media_content_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductSetData {
    product_set: ProductSetPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductSetPayload {
    product: Option<ProductNode>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct ProductNode {
    id: String,
    variants: Nodes<VariantNode>,
}

#[derive(Debug, Deserialize)]
struct VariantNode {
    id: String,
    #[serde(default)]
    sku: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishData {
    publishable_publish_to_current_channel: UserErrorsPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserErrorsPayload {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMediaData {
    product_create_media: CreateMediaPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMediaPayload {
    #[serde(default)]
    media: Vec<RemoteMedia>,
    #[serde(default)]
    media_user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdateData {
    product_variants_bulk_update: UserErrorsPayload,
}

impl ShopifyClient {
    pub fn new(shop_domain: &str, access_token: impl Into<String>, api_version: &str, timeout: Duration) -> Self {
        let domain = shop_domain
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Self {
            endpoint: format!("https://{domain}/admin/api/{api_version}/graphql.json"),
            access_token: access_token.into(),
            http: build_client(timeout),
        }
    }

    /// `None` unless both the shop domain and access token are configured.
    pub fn from_config(config: &ShopifyConfig) -> Option<Self> {
        let domain = config.shop_domain.as_deref().filter(|v| !v.is_empty())?;
        let token = config.access_token.clone().filter(|v| !v.is_empty())?;
        Some(Self::new(
            domain,
            token,
            &config.api_version,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        variables: Value,
    ) -> Result<T, CatalogError> {
        debug!(target = "export.shopify", operation, "graphql_request");
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.access_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(err) = classify_status(status, retry_after.as_deref()) {
            let body = response.text().await.unwrap_or_default();
            return Err(match err {
                CatalogError::Permanent(message) => {
                    CatalogError::Permanent(format!("{message}: {}", truncate(&body, 300)))
                }
                other => other,
            });
        }

        let payload: GraphqlResponse<T> = response
            .json()
            .await
            .map_err(|err| CatalogError::Permanent(format!("invalid response: {err}")))?;
        if let Some(err) = classify_graphql_errors(&payload.errors) {
            return Err(err);
        }
        payload
            .data
            .ok_or_else(|| CatalogError::Permanent(format!("{operation}: response has no data")))
    }
}

#[async_trait]
impl CatalogApi for ShopifyClient {
    async fn create_product(&self, product: &ProductSubmission) -> Result<CreatedProduct, CatalogError> {
        let data: ProductSetData = self
            .graphql(
                "productSet",
                PRODUCT_SET,
                json!({ "input": product, "synchronous": true }),
            )
            .await?;
        let payload = data.product_set;
        if !payload.user_errors.is_empty() {
            return Err(CatalogError::UserErrors(payload.user_errors));
        }
        let product = payload
            .product
            .ok_or_else(|| CatalogError::Permanent("productSet returned no product".into()))?;
        info!(target = "export.shopify", product_id = %product.id, "product_created");
        Ok(CreatedProduct {
            id: product.id,
            variants: product
                .variants
                .nodes
                .into_iter()
                .map(|node| RemoteVariant {
                    id: node.id,
                    sku: node.sku.unwrap_or_default(),
                })
                .collect(),
        })
    }

    async fn publish_product(&self, product_id: &str) -> Result<(), CatalogError> {
        let data: PublishData = self
            .graphql("publishablePublishToCurrentChannel", PUBLISH, json!({ "id": product_id }))
            .await?;
        let errors = data.publishable_publish_to_current_channel.user_errors;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::UserErrors(errors))
        }
    }

    async fn create_media(
        &self,
        product_id: &str,
        media: &[MediaItem],
    ) -> Result<Vec<RemoteMedia>, CatalogError> {
        let inputs: Vec<CreateMediaInput<'_>> = media
            .iter()
            .map(|item| CreateMediaInput {
                original_source: &item.url,
                alt: &item.alt,
                media_content_type: "IMAGE",
            })
            .collect();
        let data: CreateMediaData = self
            .graphql(
                "productCreateMedia",
                CREATE_MEDIA,
                json!({ "productId": product_id, "media": inputs }),
            )
            .await?;
        let payload = data.product_create_media;
        if !payload.media_user_errors.is_empty() {
            return Err(CatalogError::UserErrors(payload.media_user_errors));
        }
        Ok(payload.media)
    }

    async fn bind_variant_media(
        &self,
        product_id: &str,
        variant_id: &str,
        media_id: &str,
    ) -> Result<(), CatalogError> {
        let data: BulkUpdateData = self
            .graphql(
                "productVariantsBulkUpdate",
                BIND_VARIANT_MEDIA,
                json!({
                    "productId": product_id,
                    "variants": [{ "id": variant_id, "mediaId": media_id }],
                }),
            )
            .await?;
        let errors = data.product_variants_bulk_update.user_errors;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::UserErrors(errors))
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> CatalogError {
    if err.is_timeout() || err.is_connect() {
        CatalogError::Transient(err.to_string())
    } else {
        CatalogError::Permanent(err.to_string())
    }
}

/// Maps an HTTP status to an error, `None` for success.
pub fn classify_status(status: StatusCode, retry_after: Option<&str>) -> Option<CatalogError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after.and_then(parse_retry_after);
        return Some(CatalogError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Some(CatalogError::Transient(format!("HTTP {status}")));
    }
    Some(CatalogError::Permanent(format!("HTTP {status}")))
}

// Whole or fractional seconds. Values that do not fit a `Duration` count as
// no hint.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Top-level GraphQL errors; a `THROTTLED` code means the cost budget ran out.
pub fn classify_graphql_errors(errors: &[GraphqlError]) -> Option<CatalogError> {
    if errors.is_empty() {
        return None;
    }
    let throttled = errors.iter().any(|err| {
        err.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
            == Some("THROTTLED")
    });
    if throttled {
        return Some(CatalogError::RateLimited { retry_after: None });
    }
    let messages: Vec<&str> = errors.iter().map(|err| err.message.as_str()).collect();
    Some(CatalogError::Permanent(messages.join("; ")))
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryClass, Retryable};

    #[test]
    fn endpoint_uses_domain_and_version() {
        let config = ShopifyConfig {
            shop_domain: Some("https://example.myshopify.com/".into()),
            access_token: Some("token".into()),
            ..ShopifyConfig::default()
        };
        let client = ShopifyClient::from_config(&config).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.myshopify.com/admin/api/2024-10/graphql.json"
        );
        assert!(ShopifyClient::from_config(&ShopifyConfig::default()).is_none());

        let plain = ShopifyClient::new(
            "http://example.myshopify.com",
            "token",
            "2024-10",
            Duration::from_secs(5),
        );
        assert_eq!(
            plain.endpoint(),
            "https://example.myshopify.com/admin/api/2024-10/graphql.json"
        );
    }

    #[test]
    fn oversized_or_negative_retry_after_is_no_hint() {
        for raw in ["1e20", "-3", "NaN", "inf"] {
            assert_eq!(
                classify_status(StatusCode::TOO_MANY_REQUESTS, Some(raw)),
                Some(CatalogError::RateLimited { retry_after: None }),
                "{raw}"
            );
        }
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(" 7 ")),
            Some(CatalogError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("0.5")),
            Some(CatalogError::RateLimited {
                retry_after: Some(Duration::from_millis(500))
            })
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK, None), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("2.0")),
            Some(CatalogError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            })
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("soon")),
            Some(CatalogError::RateLimited { retry_after: None })
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            Some(CatalogError::Transient(_))
        ));
        let unauthorized = classify_status(StatusCode::UNAUTHORIZED, None).unwrap();
        assert_eq!(unauthorized.retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn throttled_graphql_errors_are_rate_limits() {
        let errors: Vec<GraphqlError> = serde_json::from_value(json!([
            { "message": "Throttled", "extensions": { "code": "THROTTLED" } }
        ]))
        .unwrap();
        assert_eq!(
            classify_graphql_errors(&errors),
            Some(CatalogError::RateLimited { retry_after: None })
        );
        let errors: Vec<GraphqlError> =
            serde_json::from_value(json!([{ "message": "Field 'x' doesn't exist" }])).unwrap();
        assert_eq!(
            classify_graphql_errors(&errors),
            Some(CatalogError::Permanent("Field 'x' doesn't exist".into()))
        );
        assert_eq!(classify_graphql_errors(&[]), None);
    }

    #[test]
    fn product_set_payload_decodes() {
        let data: ProductSetData = serde_json::from_value(json!({
            "productSet": {
                "product": {
                    "id": "gid://shopify/Product/1",
                    "variants": { "nodes": [{ "id": "gid://shopify/ProductVariant/9", "sku": "A" }] }
                },
                "userErrors": []
            }
        }))
        .unwrap();
        let product = data.product_set.product.unwrap();
        assert_eq!(product.variants.nodes[0].sku.as_deref(), Some("A"));
    }

    #[test]
    fn user_errors_render_field_paths() {
        let err = CatalogError::UserErrors(vec![UserError {
            field: Some(vec!["variants".into(), "0".into(), "sku".into()]),
            message: "is too long".into(),
        }]);
        assert_eq!(err.to_string(), "rejected: variants.0.sku: is too long");
        assert_eq!(err.retry_class(), RetryClass::Permanent);
    }
}
