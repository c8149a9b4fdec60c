//! Resolves ad unit ids to display names kept on the project-management board.
//!
//! Used only to annotate forecast results; callers treat every failure here as
//! non-fatal.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::{create_directory_circuit_breaker, DirectoryBreaker};
use crate::config::BoardConfig;
use crate::errors::AppError;

/// Lookup of ad unit display names.
#[async_trait]
pub trait AdUnitDirectory: Send + Sync {
    /// Returns names for whichever of `ids` are known. Unknown ids are simply
    /// absent from the map.
    async fn resolve_names(&self, ids: &[i64]) -> Result<BTreeMap<i64, String>, AppError>;
}

const ITEMS_BY_COLUMN_QUERY: &str = r#"query ($boardId: ID!, $columnId: String!, $values: [String]!) {
  items_page_by_column_values(board_id: $boardId, columns: [{column_id: $columnId, column_values: $values}], limit: 100) {
    items { name column_values(ids: [$columnId]) { text } }
  }
}"#;

#[derive(Debug, Deserialize)]
struct BoardResponse {
    data: Option<BoardData>,
    #[serde(default)]
    errors: Vec<BoardApiError>,
}

#[derive(Debug, Deserialize)]
struct BoardData {
    items_page_by_column_values: ItemsPage,
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<BoardItem>,
}

#[derive(Debug, Deserialize)]
struct BoardItem {
    name: String,
    #[serde(default)]
    column_values: Vec<ColumnValue>,
}

#[derive(Debug, Deserialize)]
struct ColumnValue {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoardApiError {
    message: String,
}

/// Ad unit directory backed by a board whose items carry an ad unit id column.
#[derive(Clone)]
pub struct BoardAdUnitDirectory {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    board_id: String,
    id_column: String,
}

impl BoardAdUnitDirectory {
    /// Creates a new `BoardAdUnitDirectory`.
    ///
    /// # Arguments
    ///
    /// * `config` - Board API endpoint, token, board id and id column.
    pub fn new(config: &BoardConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create board client: {}", e))
            })?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
            board_id: config.board_id.clone(),
            id_column: config.ad_unit_id_column.clone(),
        })
    }
}

#[async_trait]
impl AdUnitDirectory for BoardAdUnitDirectory {
    async fn resolve_names(&self, ids: &[i64]) -> Result<BTreeMap<i64, String>, AppError> {
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        tracing::debug!(
            "Looking up {} ad unit names on board {}",
            values.len(),
            self.board_id
        );

        let body = json!({
            "query": ITEMS_BY_COLUMN_QUERY,
            "variables": {
                "boardId": self.board_id,
                "columnId": self.id_column,
                "values": values,
            }
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", &self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Board request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Board API returned {}: {}",
                status, error_text
            )));
        }

        let parsed: BoardResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse board response: {}", e))
        })?;

        if let Some(error) = parsed.errors.first() {
            return Err(AppError::ExternalApiError(format!(
                "Board API error: {}",
                error.message
            )));
        }

        let items = parsed
            .data
            .map(|data| data.items_page_by_column_values.items)
            .unwrap_or_default();

        let names = items
            .into_iter()
            .filter_map(|item| {
                let id = item
                    .column_values
                    .first()
                    .and_then(|column| column.text.as_deref())
                    .and_then(|text| text.trim().parse::<i64>().ok())?;
                Some((id, item.name))
            })
            .filter(|(id, _)| ids.contains(id))
            .collect();

        Ok(names)
    }
}

/// Caches names from another directory and stops calling it while it keeps
/// failing.
pub struct CachedAdUnitDirectory {
    inner: Arc<dyn AdUnitDirectory>,
    names: Cache<i64, String>,
    breaker: DirectoryBreaker,
}

impl CachedAdUnitDirectory {
    /// Wraps `inner` with a 1 hour name cache (10k entries).
    pub fn new(inner: Arc<dyn AdUnitDirectory>) -> Self {
        let names = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(10_000)
            .build();

        Self {
            inner,
            names,
            breaker: create_directory_circuit_breaker(),
        }
    }
}

#[async_trait]
impl AdUnitDirectory for CachedAdUnitDirectory {
    async fn resolve_names(&self, ids: &[i64]) -> Result<BTreeMap<i64, String>, AppError> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();

        for id in ids {
            match self.names.get(id).await {
                Some(name) => {
                    resolved.insert(*id, name);
                }
                None => missing.push(*id),
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        let fetched = self
            .breaker
            .call(self.inner.resolve_names(&missing))
            .await
            .map_err(|e| match e {
                failsafe::Error::Inner(inner) => inner,
                failsafe::Error::Rejected => AppError::ExternalApiError(
                    "Ad unit directory unavailable (circuit open)".to_string(),
                ),
            })?;

        for (id, name) in fetched {
            self.names.insert(id, name.clone()).await;
            resolved.insert(id, name);
        }

        Ok(resolved)
    }
}
