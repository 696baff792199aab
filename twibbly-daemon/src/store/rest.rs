//! PostgREST client for the record store

use super::{NameEntry, RecordStore, StoreError, StoreResult};
use crate::core::StoreConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST access to the entries table
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    key: String,
    table: String,
    session_id: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            table: config.table.clone(),
            session_id: config.session_id.clone(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.key))
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> StoreResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RecordStore for RestStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn fetch_unprinted(&self) -> StoreResult<Vec<NameEntry>> {
        let session_filter = format!("eq.{}", self.session_id);
        let req = self.client.get(self.table_url()).query(&[
            ("select", "*"),
            ("session_id", session_filter.as_str()),
            ("printed", "eq.false"),
            ("order", "created_at.asc"),
        ]);

        let response = self.authorized(req).send().await?;
        let entries: Vec<NameEntry> = Self::handle_response(response).await?;
        debug!(count = entries.len(), "Fetched unprinted entries");
        Ok(entries)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn mark_printed(&self, id: &str) -> StoreResult<()> {
        let id_filter = format!("eq.{id}");
        let req = self
            .client
            .patch(self.table_url())
            .query(&[("id", id_filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "printed": true }));

        let response = self.authorized(req).send().await?;
        let updated: Vec<serde_json::Value> = Self::handle_response(response).await?;
        if updated.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
