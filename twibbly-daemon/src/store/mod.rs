//! Record store access
//!
//! The pipeline needs exactly two operations from the shared store: list the
//! session's unprinted entries in creation order, and flip `printed` for one
//! entry id.

mod rest;
#[cfg(test)]
pub mod memory;

pub use rest::RestStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// One submitted name, one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameEntry {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub first_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_name: String,
    /// Authoritative delivery flag
    #[serde(default)]
    pub printed: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NameEntry {
    /// Job title shown in spooler queues
    pub fn title(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Ids may be integer or uuid columns
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {other}"
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The update matched no row
    #[error("Entry not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Unprinted entries for this session, oldest first
    async fn fetch_unprinted(&self) -> StoreResult<Vec<NameEntry>>;

    /// Set `printed = true` on exactly this entry
    async fn mark_printed(&self, id: &str) -> StoreResult<()>;
}
