use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{SignalField, SignalKind, TopicCatalog, TopicProfile};

use super::domain::{QualitativeLevel, ScoreRequest, SignalSet, SignalValue};
use super::llm::{parse_json_reply, LanguageModel};

/// Turns free-text evidence into the topic's fixed signal schema.
pub struct SignalExtractor {
    model: Arc<dyn LanguageModel>,
    catalog: Arc<TopicCatalog>,
}

impl SignalExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, catalog: Arc<TopicCatalog>) -> Self {
        Self { model, catalog }
    }

    /// Extracted signals, or an empty set when the model fails or replies with garbage.
    pub async fn extract(&self, request: &ScoreRequest, evidence_text: &str) -> SignalSet {
        let profile = self.catalog.topic(&request.topic);
        let prompt = extraction_prompt(request, &profile, evidence_text);

        let reply = match self.model.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    district = %request.district,
                    topic = %request.topic,
                    error = %err,
                    "extractor model call failed"
                );
                return SignalSet::new();
            }
        };

        let Some(object) = parse_json_reply::<Map<String, Value>>(&reply) else {
            warn!(
                district = %request.district,
                topic = %request.topic,
                "extractor reply was not a JSON object"
            );
            return SignalSet::new();
        };

        let signals = coerce_signals(&profile, object);
        debug!(
            district = %request.district,
            topic = %request.topic,
            extracted = signals.len(),
            expected = profile.fields.len(),
            "signals extracted"
        );
        signals
    }
}

/// Keeps schema fields only and coerces each value to the field's kind.
fn coerce_signals(profile: &TopicProfile, mut object: Map<String, Value>) -> SignalSet {
    // Some models wrap the answer as {"signals": {...}}.
    if let Some(Value::Object(inner)) = object.remove("signals") {
        object = inner;
    }

    profile
        .fields
        .iter()
        .filter_map(|field| {
            let value = object.get(field.name)?;
            coerce_value(field, value).map(|value| (field.name.to_string(), value))
        })
        .collect()
}

fn coerce_value(field: &SignalField, value: &Value) -> Option<SignalValue> {
    match (&field.kind, value) {
        (_, Value::Number(number)) => number
            .as_f64()
            .filter(|value| value.is_finite())
            .map(SignalValue::Numeric),
        (SignalKind::Numeric { .. }, Value::String(raw)) => parse_number(raw)
            .map(SignalValue::Numeric)
            .or_else(|| QualitativeLevel::parse(raw).map(SignalValue::label)),
        (SignalKind::Qualitative, Value::String(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            Some(
                QualitativeLevel::parse(raw)
                    .map(SignalValue::label)
                    .unwrap_or_else(|| SignalValue::Label(raw.to_lowercase())),
            )
        }
        _ => None,
    }
}

/// Accepts readings like `"1,250"` or `"35 µg/m³"`.
fn parse_number(raw: &str) -> Option<f64> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(*c, '.' | ',' | '-'))
        .filter(|c| *c != ',')
        .collect();
    digits.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn extraction_prompt(request: &ScoreRequest, profile: &TopicProfile, evidence_text: &str) -> String {
    let evidence = if evidence_text.trim().is_empty() {
        "(no evidence was found)"
    } else {
        evidence_text
    };
    let labels = QualitativeLevel::ordered()
        .iter()
        .map(|level| format!("\"{}\"", level.label()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Estimate \"{}\" for the district {} of {}, {} from the evidence below.\n\nEVIDENCE:\n{}\n",
        request.topic, request.district, request.city, request.country, evidence
    );
    let _ = writeln!(prompt, "Fill every field of this schema:");
    for field in &profile.fields {
        match &field.kind {
            SignalKind::Qualitative => {
                let _ = writeln!(prompt, "- {}: {} (one of {labels})", field.name, field.description);
            }
            SignalKind::Numeric { max, unit, .. } => {
                let _ = writeln!(
                    prompt,
                    "- {}: {} (number between 0 and {max}, {unit})",
                    field.name, field.description
                );
            }
        }
    }
    let _ = writeln!(
        prompt,
        "\nGive a best estimate for every field even when evidence is sparse. Never leave a \
         field empty or null. Reply with a single flat JSON object keyed by field name."
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::llm::LlmError;
    use async_trait::async_trait;

    struct CannedModel(Option<&'static str>);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| LlmError::Format("missing choices".to_string()))
        }
    }

    fn extractor(reply: Option<&'static str>) -> SignalExtractor {
        SignalExtractor::new(
            Arc::new(CannedModel(reply)),
            Arc::new(TopicCatalog::standard()),
        )
    }

    fn request(topic: &str) -> ScoreRequest {
        ScoreRequest::new("Taiwan", "Taipei", "Songshan", topic)
    }

    #[tokio::test]
    async fn coerces_reply_to_schema() {
        let reply = r#"Here you go: {"aqi": "85 AQI", "pm25": 21.5,
            "industrial_pollution": "Good", "traffic_emissions": "",
            "green_coverage": null, "mood": "excellent"}"#;
        let signals = extractor(Some(reply)).extract(&request("air quality"), "evidence").await;

        assert_eq!(signals.len(), 3);
        assert_eq!(signals["aqi"], SignalValue::Numeric(85.0));
        assert_eq!(signals["pm25"], SignalValue::Numeric(21.5));
        assert_eq!(
            signals["industrial_pollution"],
            SignalValue::label(QualitativeLevel::Good)
        );
        assert!(!signals.contains_key("mood"));
    }

    #[tokio::test]
    async fn unwraps_nested_signals_object() {
        let reply = r#"{"signals": {"street_cleanliness": "very_poor"}}"#;
        let signals = extractor(Some(reply)).extract(&request("cleanliness"), "evidence").await;
        assert_eq!(
            signals["street_cleanliness"],
            SignalValue::label(QualitativeLevel::VeryPoor)
        );
    }

    #[tokio::test]
    async fn malformed_reply_yields_empty_set() {
        let signals = extractor(Some("[1, 2, 3]")).extract(&request("safety"), "evidence").await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn model_failure_yields_empty_set() {
        let signals = extractor(None).extract(&request("safety"), "evidence").await;
        assert!(signals.is_empty());
    }

    #[test]
    fn parses_formatted_numbers() {
        assert_eq!(parse_number("1,250"), Some(1250.0));
        assert_eq!(parse_number(" 35 µg/m³"), Some(35.0));
        assert_eq!(parse_number("about 40"), None);
    }

    #[test]
    fn prompt_lists_every_field_with_its_range() {
        let catalog = TopicCatalog::standard();
        let profile = catalog.topic("cost of living");
        let prompt = extraction_prompt(&request("cost of living"), &profile, "");
        for field in &profile.fields {
            assert!(prompt.contains(field.name), "missing {}", field.name);
        }
        assert!(prompt.contains("number between 0 and 5000"));
        assert!(prompt.contains("(no evidence was found)"));
    }
}
