use async_trait::async_trait;
use serde::Deserialize;

use super::{SearchBackend, SearchError, SearchHit};

/// Self-hosted SearxNG instance queried through its JSON API.
#[derive(Debug)]
pub struct SearxngBackend {
    client: reqwest::Client,
    base_url: String,
}

impl SearxngBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

#[async_trait]
impl SearchBackend for SearxngBackend {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json")])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let payload: SearxngResponse =
            serde_json::from_str(&body).map_err(|err| SearchError::Payload(err.to_string()))?;

        Ok(payload
            .results
            .into_iter()
            .take(max_results)
            .map(|result| SearchHit::linked(result.title, result.content, &result.url))
            .collect())
    }
}
