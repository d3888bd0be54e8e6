//! Search backends and the aggregator that fans a query out to all of them.

mod searxng;
mod serper;

pub use searxng::SearxngBackend;
pub use serper::SerperBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::domain::Snippet;

/// One raw result returned by a search backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
}

impl SearchHit {
    /// Hit whose body ends with the result URL, so source domains stay visible to scoring.
    pub(crate) fn linked(title: String, snippet: String, link: &str) -> Self {
        let link = link.trim();
        let body = match (snippet.trim().is_empty(), link.is_empty()) {
            (_, true) => snippet,
            (true, false) => link.to_string(),
            (false, false) => format!("{} ({link})", snippet.trim()),
        };
        Self { title, body }
    }

    fn into_text(self) -> String {
        let title = self.title.trim();
        let body = self.body.trim();
        match (title.is_empty(), body.is_empty()) {
            (true, _) => body.to_string(),
            (false, true) => title.to_string(),
            (false, false) => format!("{title} - {body}"),
        }
    }
}

/// Failure surfaced by a search backend; always absorbed by the aggregator.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(String),
    #[error("search backend returned status {0}")]
    Status(u16),
    #[error("malformed search payload: {0}")]
    Payload(String),
    #[error("search request timed out")]
    Timeout,
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Payload(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Open-web search provider.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable label recorded as the provenance of every snippet.
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Issues a query to every configured backend and pools the results.
#[derive(Clone)]
pub struct SearchAggregator {
    backends: Vec<Arc<dyn SearchBackend>>,
    max_results: usize,
    timeout: Duration,
}

impl SearchAggregator {
    pub fn new(backends: Vec<Arc<dyn SearchBackend>>, max_results: usize, timeout: Duration) -> Self {
        Self {
            backends,
            max_results,
            timeout,
        }
    }

    /// Snippets from every backend that answered in time, in backend order.
    ///
    /// A failing or slow backend contributes nothing; the fetch itself never fails.
    /// Duplicates across backends are kept.
    pub async fn fetch(&self, query: &str) -> Vec<Snippet> {
        let calls = self.backends.iter().map(|backend| async move {
            let outcome =
                tokio::time::timeout(self.timeout, backend.search(query, self.max_results)).await;
            match outcome {
                Ok(Ok(hits)) => {
                    debug!(backend = backend.name(), query, hits = hits.len(), "search answered");
                    hits.into_iter()
                        .map(SearchHit::into_text)
                        .filter(|text| !text.is_empty())
                        .map(|text| Snippet::new(backend.name(), text))
                        .collect()
                }
                Ok(Err(err)) => {
                    warn!(backend = backend.name(), query, error = %err, "search backend failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        backend = backend.name(),
                        query,
                        timeout_secs = self.timeout.as_secs_f64(),
                        "search backend timed out"
                    );
                    Vec::new()
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }
}
