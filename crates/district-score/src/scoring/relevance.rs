use std::sync::Arc;

use crate::config::TopicCatalog;

use super::domain::{ScoredSnippet, Snippet};

const DISTRICT_WEIGHT: f64 = 0.4;
const KEYWORD_WEIGHT: f64 = 0.2;
const INDICATOR_WEIGHT: f64 = 0.05;
const MAX_INDICATORS: usize = 3;
const GOVERNMENT_WEIGHT: f64 = 0.1;

const DATA_INDICATORS: &[&str] = &[
    "data",
    "report",
    "statistic",
    "survey",
    "ranking",
    "index",
    "統計",
    "報告",
    "數據",
    "排名",
];

const GOVERNMENT_MARKERS: &[&str] = &[".gov", "government", "政府"];

/// Heuristic relevance of a raw snippet to a topic and district.
///
/// Pure and deterministic. Used to rank and truncate the snippet pool of an iteration; the
/// stopping decision belongs to the evaluator.
#[derive(Debug, Clone)]
pub struct ResultScorer {
    catalog: Arc<TopicCatalog>,
}

impl ResultScorer {
    pub fn new(catalog: Arc<TopicCatalog>) -> Self {
        Self { catalog }
    }

    pub fn score(&self, snippet_text: &str, topic: &str, district: &str) -> f64 {
        let profile = self.catalog.topic(topic);
        score_text(snippet_text, &keyword_set(&profile.keywords), &district.trim().to_lowercase())
    }

    /// Scores the pool, drops zero-scored snippets, and keeps the `top_n` best.
    ///
    /// Ordering is stable, so equal scores keep their retrieval order.
    pub fn rank(
        &self,
        snippets: Vec<Snippet>,
        topic: &str,
        district: &str,
        top_n: usize,
    ) -> Vec<ScoredSnippet> {
        let keywords = keyword_set(&self.catalog.topic(topic).keywords);
        let district = district.trim().to_lowercase();
        let mut scored: Vec<ScoredSnippet> = snippets
            .into_iter()
            .filter_map(|snippet| {
                let relevance = score_text(&snippet.text, &keywords, &district);
                (relevance > 0.0).then(|| ScoredSnippet::new(snippet, relevance))
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score().total_cmp(&a.relevance_score()));
        scored.truncate(top_n);
        scored
    }
}

/// Lowercased, de-duplicated, non-empty topic keywords.
fn keyword_set(keywords: &[String]) -> Vec<String> {
    let mut set: Vec<String> = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        if !keyword.is_empty() && !set.contains(&keyword) {
            set.push(keyword);
        }
    }
    set
}

/// `district` and `keywords` are expected lowercased.
fn score_text(snippet_text: &str, keywords: &[String], district: &str) -> f64 {
    let text = snippet_text.to_lowercase();
    let mut score = 0.0;

    if !district.is_empty() && text.contains(district) {
        score += DISTRICT_WEIGHT;
    }

    score += keywords
        .iter()
        .filter(|keyword| text.contains(keyword.as_str()))
        .count() as f64
        * KEYWORD_WEIGHT;

    let indicators = DATA_INDICATORS
        .iter()
        .filter(|token| text.contains(*token))
        .take(MAX_INDICATORS)
        .count();
    score += indicators as f64 * INDICATOR_WEIGHT;

    if GOVERNMENT_MARKERS.iter().any(|marker| text.contains(marker)) {
        score += GOVERNMENT_WEIGHT;
    }

    score.clamp(0.0, 1.0)
}

/// Joins ranked snippets into the evidence text handed to the model.
pub fn evidence_text(snippets: &[ScoredSnippet]) -> String {
    snippets
        .iter()
        .map(|scored| {
            let snippet = scored.snippet();
            format!("[{}] {}", snippet.source_backend, snippet.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
