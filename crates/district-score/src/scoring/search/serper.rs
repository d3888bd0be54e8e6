use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{SearchBackend, SearchError, SearchHit};

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Google results through the Serper API.
pub struct SerperBackend {
    client: reqwest::Client,
    api_key: String,
}

impl SerperBackend {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for SerperBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperBackend")
            .field("endpoint", &SERPER_ENDPOINT)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(rename = "answerBox", default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

#[async_trait]
impl SearchBackend for SerperBackend {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": max_results }))
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let payload: SerperResponse =
            serde_json::from_str(&body).map_err(|err| SearchError::Payload(err.to_string()))?;

        Ok(hits_from_response(payload, max_results))
    }
}

fn hits_from_response(payload: SerperResponse, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    if let Some(answer) = payload.answer_box {
        let body = answer.answer.or(answer.snippet).unwrap_or_default();
        if !body.trim().is_empty() {
            hits.push(SearchHit {
                title: answer.title.unwrap_or_default(),
                body,
            });
        }
    }

    hits.extend(
        payload
            .organic
            .into_iter()
            .take(max_results)
            .map(|result| SearchHit::linked(result.title, result.snippet, &result.link)),
    );

    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_box_precedes_organic_results() {
        let payload: SerperResponse = serde_json::from_str(
            r#"{
                "answerBox": {"answer": "Recycling rate 58%"},
                "organic": [
                    {"title": "Xinyi cleanup", "snippet": "Streets swept daily", "link": "https://x"},
                    {"title": "Second", "snippet": "More"},
                    {"title": "Third", "snippet": "Dropped"}
                ]
            }"#,
        )
        .expect("payload parses");

        let hits = hits_from_response(payload, 2);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].body, "Recycling rate 58%");
        assert_eq!(hits[1].title, "Xinyi cleanup");
        assert_eq!(hits[1].body, "Streets swept daily (https://x)");
        assert_eq!(hits[2].title, "Second");
        assert_eq!(hits[2].body, "More");
    }

    #[test]
    fn organic_link_reaches_the_relevance_scorer() {
        use crate::config::TopicCatalog;
        use crate::scoring::relevance::ResultScorer;
        use std::sync::Arc;

        let payload: SerperResponse = serde_json::from_str(
            r#"{"organic": [{"title": "Beitou notice", "snippet": "Air monitoring update",
                "link": "https://airtw.moenv.gov.tw/news"}]}"#,
        )
        .expect("payload parses");
        let hit = hits_from_response(payload, 8).remove(0);
        assert!(hit.body.ends_with("(https://airtw.moenv.gov.tw/news)"));

        let scorer = ResultScorer::new(Arc::new(TopicCatalog::standard()));
        let with_link = scorer.score(&hit.body, "unlisted", "Beitou");
        let without_link = scorer.score("Air monitoring update", "unlisted", "Beitou");
        assert!(with_link > without_link, "government domain adds weight");
    }

    #[test]
    fn empty_payload_yields_no_hits() {
        let payload: SerperResponse = serde_json::from_str("{}").expect("payload parses");
        assert!(hits_from_response(payload, 8).is_empty());
    }
}
