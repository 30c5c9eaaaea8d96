use crate::catalog::rows::{ComponentRow, GroupData, ProductRow};
use crate::config::LoaderConfig;
use crate::http::{build_client, default_timeout};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Source of grouped warehouse rows.
#[async_trait]
pub trait GroupLoader: Send + Sync {
    /// Rows and components for one group; `None` when the group has no rows.
    async fn load_group(&self, group_id: &str) -> Result<Option<GroupData>, LoaderError>;

    async fn list_group_ids(&self) -> Result<Vec<String>, LoaderError>;
}

/// Reads the warehouse tables through a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct PostgrestGroupLoader {
    base_url: String,
    service_key: String,
    items_table: String,
    components_table: String,
    page_size: usize,
    http: Client,
}

impl PostgrestGroupLoader {
    pub fn from_config(config: &LoaderConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref().filter(|v| !v.is_empty())?;
        let service_key = config.service_key.clone().filter(|v| !v.is_empty())?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            items_table: config.items_table.clone(),
            components_table: config.components_table.clone(),
            page_size: config.page_size.max(1),
            http: build_client(default_timeout()),
        })
    }

    fn items_url(&self, group_id: &str) -> String {
        format!(
            "{}/rest/v1/{}?Web_Product_Group_ID=eq.{}&select=*&order=No_",
            self.base_url,
            self.items_table,
            encode(group_id)
        )
    }

    fn components_url(&self, item_ids: &[String]) -> String {
        let quoted: Vec<String> = item_ids
            .iter()
            .map(|id| encode(&format!("\"{}\"", id.replace('"', "\\\""))).into_owned())
            .collect();
        format!(
            "{}/rest/v1/{}?Parent_Item_No_=in.({})&select=*&order=Parent_Item_No_,RANK",
            self.base_url,
            self.components_table,
            quoted.join(",")
        )
    }

    fn group_ids_url(&self) -> String {
        format!(
            "{}/rest/v1/{}?select=Web_Product_Group_ID&Web_Product_Group_ID=not.is.null&order=Web_Product_Group_ID",
            self.base_url, self.items_table
        )
    }

    fn page_url(&self, url: &str, offset: usize) -> String {
        format!("{url}&limit={}&offset={offset}", self.page_size)
    }

    /// Every row of an ordered query, one page at a time.
    async fn fetch<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, LoaderError> {
        paginate(self.page_size, |offset| self.fetch_page(self.page_url(&url, offset))).await
    }

    async fn fetch_page<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, LoaderError> {
        let response = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| LoaderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LoaderError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| LoaderError::Deserialize(err.to_string()))
    }
}

#[async_trait]
impl GroupLoader for PostgrestGroupLoader {
    async fn load_group(&self, group_id: &str) -> Result<Option<GroupData>, LoaderError> {
        let rows: Vec<ProductRow> = self.fetch(self.items_url(group_id)).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let components: Vec<ComponentRow> = self.fetch(self.components_url(&ids)).await?;
        debug!(
            target = "export.loader",
            group_id = %group_id,
            rows = rows.len(),
            components = components.len(),
            "group_loaded"
        );
        Ok(Some(GroupData::new(group_id, rows, components)))
    }

    async fn list_group_ids(&self) -> Result<Vec<String>, LoaderError> {
        let rows: Vec<Value> = self.fetch(self.group_ids_url()).await?;
        Ok(distinct_group_ids(&rows))
    }
}

/// Requests pages at increasing offsets until one comes back shorter than
/// `page_size`. The page size must not exceed the server's row cap, or a
/// capped page reads as the last one.
async fn paginate<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>, LoaderError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, LoaderError>>,
{
    let mut rows = Vec::new();
    loop {
        let page = fetch_page(rows.len()).await?;
        let last = page.len() < page_size;
        rows.extend(page);
        if last {
            debug!(target = "export.loader", rows = rows.len(), "pages_fetched");
            return Ok(rows);
        }
    }
}

fn distinct_group_ids(rows: &[Value]) -> Vec<String> {
    let ids: BTreeSet<String> = rows
        .iter()
        .filter_map(|row| match row.get("Web_Product_Group_ID")? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty())
        .collect();
    ids.into_iter().collect()
}
