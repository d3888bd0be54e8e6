use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TopicCatalog;

use super::domain::{IterationRecord, ScoreRequest};
use super::llm::{parse_json_reply, LanguageModel};

const SEED_KEYWORDS: usize = 6;
const SEED_SITES: usize = 6;

#[derive(Debug, Deserialize)]
struct PlanReply {
    queries: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Produces the search queries for each retrieval iteration.
///
/// The first iteration uses a deterministic seed plan built from the topic catalog; later
/// iterations ask the language model to re-plan from the full history.
pub struct StrategyPlanner {
    model: Arc<dyn LanguageModel>,
    catalog: Arc<TopicCatalog>,
    max_queries: usize,
}

impl StrategyPlanner {
    pub fn new(model: Arc<dyn LanguageModel>, catalog: Arc<TopicCatalog>, max_queries: usize) -> Self {
        Self {
            model,
            catalog,
            max_queries: max_queries.max(1),
        }
    }

    /// Queries for the next iteration. An empty list means nothing usable was produced.
    pub async fn plan(&self, request: &ScoreRequest, history: &[IterationRecord]) -> Vec<String> {
        if history.is_empty() {
            return self.seed_queries(request);
        }

        let prompt = self.replan_prompt(request, history);
        let reply = match self.model.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    district = %request.district,
                    topic = %request.topic,
                    error = %err,
                    "planner model call failed"
                );
                return Vec::new();
            }
        };

        match parse_json_reply::<PlanReply>(&reply) {
            Some(plan) => {
                if let Some(reasoning) = plan.reasoning.as_deref() {
                    debug!(district = %request.district, reasoning, "planner reasoning");
                }
                clean_queries(plan.queries, self.max_queries)
            }
            None => {
                warn!(
                    district = %request.district,
                    topic = %request.topic,
                    "planner reply was not a valid query plan"
                );
                Vec::new()
            }
        }
    }

    fn seed_queries(&self, request: &ScoreRequest) -> Vec<String> {
        let topic = self.catalog.topic(&request.topic);
        let country = self.catalog.country(&request.country);
        let district = request.district.trim();
        let city = request.city.trim();

        let mut queries = vec![format!("{district} {city} {}", request.topic.trim())];

        let keywords = topic
            .keywords
            .iter()
            .take(SEED_KEYWORDS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut keyword_query = format!("{district} {keywords}");
        if !country.recency_terms.is_empty() {
            keyword_query.push(' ');
            keyword_query.push_str(&country.recency_terms.join(" OR "));
        }
        queries.push(keyword_query);

        if !topic.sites.is_empty() {
            let sites = topic
                .sites
                .iter()
                .take(SEED_SITES)
                .map(|site| format!("site:{site}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            queries.push(format!("{district} {} {sites}", request.topic.trim()));
        }

        clean_queries(queries, self.max_queries)
    }

    fn replan_prompt(&self, request: &ScoreRequest, history: &[IterationRecord]) -> String {
        let country = self.catalog.country(&request.country);
        let mut prompt = String::new();

        let _ = writeln!(
            prompt,
            "You are planning web searches to measure \"{}\" in the district {} of {}, {}.",
            request.topic, request.district, request.city, request.country
        );
        let _ = writeln!(prompt, "\nPrevious attempts:");
        for (index, record) in history.iter().enumerate() {
            let evaluation = &record.evaluation;
            let _ = writeln!(prompt, "Iteration {}:", index + 1);
            let _ = writeln!(prompt, "  queries: {}", record.queries.join(" | "));
            let _ = writeln!(
                prompt,
                "  relevance: {:.2}, needs refinement: {}",
                evaluation.relevance_score, evaluation.needs_refinement
            );
            let _ = writeln!(prompt, "  what worked: {}", join_patterns(&evaluation.what_worked));
            let _ = writeln!(
                prompt,
                "  what did not work: {}",
                join_patterns(&evaluation.what_didnt_work)
            );
        }

        let _ = writeln!(
            prompt,
            "\nWrite at most {} new search queries. Rules:\n\
             - Do not repeat query patterns that did not work.\n\
             - Target the district {} itself, not just the city.\n\
             - Consider searching in {} or in English if earlier queries used the other language.\n\
             - If official-source queries failed, favour statistical framing (rankings, annual reports, \
             audit results, monitoring data).",
            self.max_queries, request.district, country.search_language
        );
        let _ = writeln!(
            prompt,
            "\nReply with JSON only: {{\"queries\": [\"...\"], \"reasoning\": \"...\"}}"
        );

        prompt
    }
}

fn join_patterns(patterns: &std::collections::BTreeSet<String>) -> String {
    if patterns.is_empty() {
        "none recorded".to_string()
    } else {
        patterns.iter().cloned().collect::<Vec<_>>().join("; ")
    }
}

fn clean_queries(queries: Vec<String>, limit: usize) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for query in queries {
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if query.is_empty() || cleaned.contains(&query) {
            continue;
        }
        cleaned.push(query);
        if cleaned.len() == limit {
            break;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::domain::EvaluationResult;
    use crate::scoring::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedModel {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("prompt mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .expect("prompt mutex poisoned")
                .push(prompt.to_string());
            self.reply.clone().map_err(|_| LlmError::Timeout)
        }
    }

    fn request() -> ScoreRequest {
        ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "cleanliness")
    }

    fn history() -> Vec<IterationRecord> {
        let mut evaluation = EvaluationResult::inconclusive();
        evaluation
            .what_didnt_work
            .insert("city-wide news".to_string());
        vec![IterationRecord {
            queries: vec!["Xinyi Taipei cleanliness".to_string()],
            evaluation,
        }]
    }

    fn planner(model: Arc<CannedModel>, max_queries: usize) -> StrategyPlanner {
        StrategyPlanner::new(model, Arc::new(TopicCatalog::standard()), max_queries)
    }

    #[tokio::test]
    async fn seed_plan_needs_no_model_call() {
        let model = Arc::new(CannedModel::failing());
        let queries = planner(model.clone(), 4).plan(&request(), &[]).await;

        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "Xinyi Taipei cleanliness");
        assert!(queries[1].starts_with("Xinyi clean OR litter"));
        assert!(queries[1].ends_with("2024 OR 2025"));
        assert!(queries[2].contains("site:epa.gov.tw"));
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn seed_plan_respects_query_limit() {
        let model = Arc::new(CannedModel::failing());
        let queries = planner(model, 1).plan(&request(), &[]).await;
        assert_eq!(queries, vec!["Xinyi Taipei cleanliness"]);
    }

    #[tokio::test]
    async fn replans_from_history() {
        let model = Arc::new(CannedModel::replying(
            "```json\n{\"queries\": [\"信義區 垃圾 統計\", \"  \", \"信義區 垃圾 統計\", \"Xinyi recycling ranking\"], \"reasoning\": \"switch language\"}\n```",
        ));
        let queries = planner(model.clone(), 4).plan(&request(), &history()).await;

        assert_eq!(queries, vec!["信義區 垃圾 統計", "Xinyi recycling ranking"]);
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("city-wide news"));
        assert!(prompts[0].contains("Traditional Chinese"));
        assert!(prompts[0].contains("Iteration 1:"));
    }

    #[tokio::test]
    async fn malformed_reply_yields_no_queries() {
        let model = Arc::new(CannedModel::replying("I think you should search harder."));
        let queries = planner(model, 4).plan(&request(), &history()).await;
        assert!(queries.is_empty());
    }

    #[tokio::test]
    async fn model_failure_yields_no_queries() {
        let model = Arc::new(CannedModel::failing());
        let queries = planner(model, 4).plan(&request(), &history()).await;
        assert!(queries.is_empty());
    }
}
