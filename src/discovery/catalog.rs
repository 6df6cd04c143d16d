//! Semantic catalog search client.

use super::DISCOVERY_TIMEOUT;
use crate::types::ServiceDescriptor;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, instrument, warn};

#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Catalog entries relevant to `query`, most relevant first.
    async fn search(&self, query: &str) -> Result<Vec<ServiceDescriptor>>;
}

pub struct HttpCatalog {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<Value>,
}

impl HttpCatalog {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl CatalogSearch for HttpCatalog {
    #[instrument(skip(self, query), fields(catalog = %self.base_url, query_len = query.len()))]
    async fn search(&self, query: &str) -> Result<Vec<ServiceDescriptor>> {
        let url = format!("{}/index/search", self.base_url);
        debug!(%url, "Searching service catalog.");

        let response = self
            .client
            .post(&url)
            .timeout(DISCOVERY_TIMEOUT)
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("Failed to send request to service catalog")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(%status, error_body = %error_text, "Catalog search failed.");
            return Err(anyhow!("Catalog search error ({}): {}", status, error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse catalog search response")?;

        // One broken document should not hide the rest of the ranking.
        let descriptors = body
            .results
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<ServiceDescriptor>(raw.clone()) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(error = %e, document = %raw, "Skipping malformed catalog document.");
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(candidate_count = descriptors.len(), "Catalog search complete.");
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn posts_query_and_keeps_ranking() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/index/search")
            .match_body(Matcher::Json(json!({"query": "weather in Rome"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"results": [
                    {"_id": "b", "name": "forecast", "description": "d", "capabilities": {}, "endpoints": {}},
                    {"name": "no id here"},
                    {"_id": "a", "name": "weather", "description": "d", "capabilities": {}, "endpoints": {}}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let catalog = HttpCatalog::new(&format!("{}/", server.url()), reqwest::Client::new());
        let results = catalog.search("weather in Rome").await.unwrap();

        let ids: Vec<_> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn missing_results_field_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/index/search")
            .with_status(200)
            .with_body("{\"hits\": []}")
            .create_async()
            .await;

        let catalog = HttpCatalog::new(&server.url(), reqwest::Client::new());
        assert!(catalog.search("anything").await.is_err());
    }
}
