use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use super::domain::{EvaluationResult, ScoreRequest};
use super::llm::{parse_json_reply, LanguageModel};

#[derive(Debug, Deserialize)]
struct EvaluationReply {
    relevance_score: f64,
    needs_refinement: bool,
    #[serde(default)]
    what_worked: Vec<String>,
    #[serde(default)]
    what_didnt_work: Vec<String>,
}

impl EvaluationReply {
    fn validate(self) -> Option<EvaluationResult> {
        if !self.relevance_score.is_finite() {
            return None;
        }

        Some(EvaluationResult {
            relevance_score: self.relevance_score.clamp(0.0, 1.0),
            needs_refinement: self.needs_refinement,
            what_worked: patterns(self.what_worked),
            what_didnt_work: patterns(self.what_didnt_work),
        })
    }
}

fn patterns(raw: Vec<String>) -> BTreeSet<String> {
    raw.into_iter()
        .map(|pattern| pattern.trim().to_string())
        .filter(|pattern| !pattern.is_empty())
        .collect()
}

/// Asks the language model whether an iteration's evidence is good enough.
pub struct RetrievalEvaluator {
    model: Arc<dyn LanguageModel>,
}

impl RetrievalEvaluator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Judges the evidence; any model failure yields [`EvaluationResult::inconclusive`].
    pub async fn evaluate(&self, request: &ScoreRequest, evidence_text: &str) -> EvaluationResult {
        let prompt = evaluation_prompt(request, evidence_text);

        let reply = match self.model.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    district = %request.district,
                    topic = %request.topic,
                    error = %err,
                    "evaluator model call failed"
                );
                return EvaluationResult::inconclusive();
            }
        };

        match parse_json_reply::<EvaluationReply>(&reply).and_then(EvaluationReply::validate) {
            Some(result) => result,
            None => {
                warn!(
                    district = %request.district,
                    topic = %request.topic,
                    "evaluator reply failed validation"
                );
                EvaluationResult::inconclusive()
            }
        }
    }
}

fn evaluation_prompt(request: &ScoreRequest, evidence_text: &str) -> String {
    let evidence = if evidence_text.trim().is_empty() {
        "(no evidence was found)"
    } else {
        evidence_text
    };

    format!(
        "You are auditing web evidence used to rate \"{topic}\" for the district {district} \
         of {city}, {country}.\n\n\
         EVIDENCE:\n{evidence}\n\n\
         Judge the evidence on three criteria:\n\
         1. Is it specific to {district}, not merely about {city} as a whole?\n\
         2. Is it relevant to {topic}?\n\
         3. Is it recent and backed by data (statistics, reports, measurements)?\n\n\
         Reply with JSON only:\n\
         {{\"relevance_score\": 0.0-1.0, \"needs_refinement\": true|false, \
         \"what_worked\": [\"query patterns or sources that produced useful evidence\"], \
         \"what_didnt_work\": [\"query patterns or sources that produced noise\"]}}",
        topic = request.topic,
        district = request.district,
        city = request.city,
        country = request.country,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::llm::LlmError;
    use async_trait::async_trait;

    struct CannedModel(Result<&'static str, ()>);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0
                .map(str::to_string)
                .map_err(|_| LlmError::Network("connection refused".to_string()))
        }
    }

    fn request() -> ScoreRequest {
        ScoreRequest::new("Taiwan", "Taipei", "Wanhua", "safety")
    }

    async fn evaluate(reply: Result<&'static str, ()>) -> EvaluationResult {
        RetrievalEvaluator::new(Arc::new(CannedModel(reply)))
            .evaluate(&request(), "[serper] Wanhua theft statistics")
            .await
    }

    #[tokio::test]
    async fn parses_a_well_formed_verdict() {
        let result = evaluate(Ok(
            r#"{"relevance_score": 0.72, "needs_refinement": false,
                "what_worked": ["police bureau statistics", " "],
                "what_didnt_work": ["city-wide rankings"]}"#,
        ))
        .await;

        assert_eq!(result.relevance_score, 0.72);
        assert!(!result.needs_refinement);
        assert_eq!(result.what_worked.len(), 1);
        assert!(result.what_didnt_work.contains("city-wide rankings"));
    }

    #[tokio::test]
    async fn clamps_out_of_range_relevance() {
        let result = evaluate(Ok(r#"{"relevance_score": 3, "needs_refinement": true}"#)).await;
        assert_eq!(result.relevance_score, 1.0);
        assert!(result.what_worked.is_empty());
    }

    #[tokio::test]
    async fn missing_fields_fall_back_to_inconclusive() {
        let result = evaluate(Ok(r#"{"relevance_score": 0.9}"#)).await;
        assert_eq!(result, EvaluationResult::inconclusive());
    }

    #[tokio::test]
    async fn prose_reply_falls_back_to_inconclusive() {
        let result = evaluate(Ok("The evidence looks fine to me.")).await;
        assert_eq!(result, EvaluationResult::inconclusive());
    }

    #[tokio::test]
    async fn model_error_falls_back_to_inconclusive() {
        let result = evaluate(Err(())).await;
        assert_eq!(result.relevance_score, 0.0);
        assert!(result.needs_refinement);
    }

    #[test]
    fn empty_evidence_is_called_out_in_prompt() {
        let prompt = evaluation_prompt(&request(), "  ");
        assert!(prompt.contains("(no evidence was found)"));
        assert!(prompt.contains("not merely about Taipei"));
    }
}
