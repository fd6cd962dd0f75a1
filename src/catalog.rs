use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::models::{CatalogItem, NewCatalogEntry};

/// Remote catalog of downloadable items. Read-mostly; add/remove mirror the
/// backend's list-management endpoints.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_items(&self) -> Result<Vec<CatalogItem>>;
    async fn add_entry(&self, entry: NewCatalogEntry) -> Result<CatalogItem>;
    async fn remove_entry(&self, id: &str) -> Result<()>;
}

pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn fetch_items(&self) -> Result<Vec<CatalogItem>> {
        let url = self.endpoint("downloads");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetch catalog: {url}"))?
            .error_for_status()?;
        let items = response.json::<Vec<CatalogItem>>().await?;
        Ok(items)
    }

    async fn add_entry(&self, entry: NewCatalogEntry) -> Result<CatalogItem> {
        let url = self.endpoint("downloads");
        let response = self
            .client
            .post(&url)
            .json(&entry)
            .send()
            .await
            .with_context(|| format!("add catalog entry: {url}"))?
            .error_for_status()?;
        let created = response.json::<CatalogItem>().await?;
        Ok(created)
    }

    async fn remove_entry(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("downloads/{id}"));
        self.client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("remove catalog entry: {url}"))?
            .error_for_status()?;
        Ok(())
    }
}
