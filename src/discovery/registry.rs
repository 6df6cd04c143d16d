//! Live-service registry client.

use super::DISCOVERY_TIMEOUT;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, instrument, trace};

/// A service instance the registry currently reports as live.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveService {
    pub id: String,
    /// Service name the instance registered under.
    pub service: String,
    /// Catalog document this instance was registered from, if recorded.
    pub catalog_id: Option<String>,
}

impl LiveService {
    /// Whether a catalog entry with the given id refers to this instance.
    pub fn matches(&self, catalog_entry_id: &str) -> bool {
        self.id == catalog_entry_id || self.catalog_id.as_deref() == Some(catalog_entry_id)
    }
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Snapshot of the live service set. Never cached.
    async fn live_services(&self) -> Result<Vec<LiveService>>;
}

/// Registry speaking the Consul agent API.
pub struct ConsulRegistry {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AgentServiceEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service", default)]
    service: String,
    #[serde(rename = "Meta", default)]
    meta: Option<HashMap<String, Value>>,
}

impl ConsulRegistry {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    #[instrument(skip(self), fields(registry = %self.base_url))]
    async fn live_services(&self) -> Result<Vec<LiveService>> {
        let url = format!("{}/v1/agent/services", self.base_url);
        debug!(%url, "Querying service registry.");

        let response = self
            .client
            .get(&url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await
            .context("Failed to send request to service registry")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(%status, error_body = %error_text, "Service registry request failed.");
            return Err(anyhow!("Service registry error ({}): {}", status, error_text));
        }

        let entries: HashMap<String, AgentServiceEntry> = response
            .json()
            .await
            .context("Failed to parse service registry response")?;
        trace!(entry_count = entries.len(), "Parsed service registry response.");

        let mut services: Vec<LiveService> = entries
            .into_values()
            .map(|entry| LiveService {
                catalog_id: entry
                    .meta
                    .as_ref()
                    .and_then(|meta| meta.get("service_doc_id"))
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
                id: entry.id,
                service: entry.service,
            })
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(live_count = services.len(), "Registry snapshot taken.");
        Ok(services)
    }
}
