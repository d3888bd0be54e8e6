use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CacheError, ScoreMap};

/// One row of a city ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub district: String,
    pub score: f64,
    pub evidence_relevance: f64,
    pub iterations: usize,
    pub scored_at: DateTime<Utc>,
}

/// Orders cached scores best first; equal scores fall back to district name.
pub fn rank_scores(scores: &ScoreMap) -> Vec<RankingEntry> {
    let mut ordered: Vec<_> = scores.iter().collect();
    ordered.sort_by(|(left_name, left), (right_name, right)| {
        right
            .score()
            .total_cmp(&left.score())
            .then_with(|| left_name.cmp(right_name))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, (district, score))| RankingEntry {
            rank: index + 1,
            district: district.clone(),
            score: score.score(),
            evidence_relevance: score.evidence_relevance(),
            iterations: score.iterations(),
            scored_at: score.scored_at(),
        })
        .collect()
}

pub fn write_rankings_csv<W: Write>(entries: &[RankingEntry], writer: W) -> Result<(), CacheError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for entry in entries {
        csv_writer.serialize(entry)?;
    }
    csv_writer
        .flush()
        .map_err(|err| CacheError::Csv(csv::Error::from(err)))
}
