use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::normalizer::ScoreNormalizer;

/// Identifies one scoring unit: a district of a city, scored along a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub country: String,
    pub city: String,
    pub district: String,
    pub topic: String,
}

impl ScoreRequest {
    pub fn new(
        country: impl Into<String>,
        city: impl Into<String>,
        district: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
            district: district.into(),
            topic: topic.into(),
        }
    }

    /// Key of the cache generation this request belongs to.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.country, &self.city, &self.topic)
    }
}

/// Scope of one persisted score mapping: every district of a city for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub country: String,
    pub city: String,
    pub topic: String,
}

impl CacheKey {
    pub fn new(country: &str, city: &str, topic: &str) -> Self {
        Self {
            country: country.trim().to_string(),
            city: city.trim().to_string(),
            topic: topic.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.country, self.city, self.topic)
    }
}

/// Atomic unit of retrieved evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub source_backend: String,
    pub text: String,
}

impl Snippet {
    pub fn new(source_backend: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_backend: source_backend.into(),
            text: text.into(),
        }
    }
}

/// Snippet paired with its heuristic relevance. Only the result scorer builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSnippet {
    snippet: Snippet,
    relevance_score: f64,
}

impl ScoredSnippet {
    pub(crate) fn new(snippet: Snippet, relevance_score: f64) -> Self {
        Self {
            snippet,
            relevance_score,
        }
    }

    pub fn snippet(&self) -> &Snippet {
        &self.snippet
    }

    pub fn relevance_score(&self) -> f64 {
        self.relevance_score
    }

    pub fn into_snippet(self) -> Snippet {
        self.snippet
    }
}

/// Language-model judgement of one iteration's evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub relevance_score: f64,
    pub needs_refinement: bool,
    pub what_worked: BTreeSet<String>,
    pub what_didnt_work: BTreeSet<String>,
}

impl EvaluationResult {
    /// Conservative verdict used whenever the model reply is unusable.
    pub fn inconclusive() -> Self {
        Self {
            relevance_score: 0.0,
            needs_refinement: true,
            what_worked: BTreeSet::new(),
            what_didnt_work: BTreeSet::new(),
        }
    }
}

/// Queries issued in one iteration together with their evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub queries: Vec<String>,
    pub evaluation: EvaluationResult,
}

/// Five-level ordinal scale used for qualitative signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitativeLevel {
    VeryPoor,
    Poor,
    Average,
    Good,
    Excellent,
}

impl QualitativeLevel {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::VeryPoor,
            Self::Poor,
            Self::Average,
            Self::Good,
            Self::Excellent,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::VeryPoor => "very poor",
            Self::Poor => "poor",
            Self::Average => "average",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }

    pub const fn value(self) -> f64 {
        match self {
            Self::VeryPoor => 0.0,
            Self::Poor => 0.25,
            Self::Average => 0.5,
            Self::Good => 0.75,
            Self::Excellent => 1.0,
        }
    }

    /// Parses a label case-insensitively, tolerating `_`/`-` separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        Self::ordered()
            .into_iter()
            .find(|level| level.label() == cleaned)
    }
}

/// Value extracted for one signal field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Numeric(f64),
    Label(String),
}

impl SignalValue {
    pub fn label(level: QualitativeLevel) -> Self {
        Self::Label(level.label().to_string())
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Numeric(value) => write!(f, "{value}"),
            SignalValue::Label(label) => f.write_str(label),
        }
    }
}

/// Extracted signals keyed by metric name.
pub type SignalSet = BTreeMap<String, SignalValue>;

/// Final, persisted score of one district along one topic.
///
/// The score is always derived from `signals` through the [`ScoreNormalizer`]; there is no
/// way to set it independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictScore {
    district: String,
    topic: String,
    score: f64,
    signals: SignalSet,
    evidence_sources: Vec<Snippet>,
    evidence_relevance: f64,
    iterations: usize,
    scored_at: DateTime<Utc>,
}

impl DistrictScore {
    pub fn from_signals(
        normalizer: &ScoreNormalizer,
        request: &ScoreRequest,
        signals: SignalSet,
        evidence_sources: Vec<Snippet>,
        evidence_relevance: f64,
        iterations: usize,
    ) -> Self {
        let score = normalizer.normalize(&request.topic, &signals);
        Self {
            district: request.district.clone(),
            topic: request.topic.clone(),
            score,
            signals,
            evidence_sources,
            evidence_relevance,
            iterations,
            scored_at: Utc::now(),
        }
    }

    pub fn district(&self) -> &str {
        &self.district
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn signals(&self) -> &SignalSet {
        &self.signals
    }

    pub fn evidence_sources(&self) -> &[Snippet] {
        &self.evidence_sources
    }

    /// Evaluator relevance of the evidence the signals were extracted from.
    pub fn evidence_relevance(&self) -> f64 {
        self.evidence_relevance
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn scored_at(&self) -> DateTime<Utc> {
        self.scored_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualitative_labels_parse_loosely() {
        assert_eq!(
            QualitativeLevel::parse("Very Poor"),
            Some(QualitativeLevel::VeryPoor)
        );
        assert_eq!(
            QualitativeLevel::parse("very_poor"),
            Some(QualitativeLevel::VeryPoor)
        );
        assert_eq!(
            QualitativeLevel::parse(" EXCELLENT "),
            Some(QualitativeLevel::Excellent)
        );
        assert_eq!(QualitativeLevel::parse("mediocre"), None);
    }

    #[test]
    fn signal_values_deserialize_untagged() {
        let signals: SignalSet =
            serde_json::from_str(r#"{"aqi": 100, "green_coverage": "good"}"#).expect("parses");
        assert_eq!(signals["aqi"], SignalValue::Numeric(100.0));
        assert_eq!(
            signals["green_coverage"],
            SignalValue::label(QualitativeLevel::Good)
        );
    }

    #[test]
    fn cache_key_lowercases_topic_only() {
        let request = ScoreRequest::new("Taiwan", " Taipei ", "Da'an", "Air Quality");
        let key = request.cache_key();
        assert_eq!(key.city, "Taipei");
        assert_eq!(key.topic, "air quality");
        assert_eq!(key.to_string(), "Taiwan/Taipei/air quality");
    }
}
