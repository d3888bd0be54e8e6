use crate::infra::scoring_service;
use chrono::SecondsFormat;
use clap::Args;
use district_score::config::{AppConfig, SignalKind, TopicCatalog};
use district_score::error::AppError;
use district_score::scoring::cache::{rank_scores, write_rankings_csv, RankingEntry};
use district_score::scoring::domain::CacheKey;
use district_score::scoring::{
    CancelFlag, FileCacheStore, ScoreCache, ScoreOptions, ScoreRequest, ScoringOutcome,
};
use district_score::telemetry;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// Country the city belongs to (selects search language and boundary levels)
    #[arg(long)]
    pub(crate) country: String,
    /// City containing the district
    #[arg(long)]
    pub(crate) city: String,
    /// District to score
    #[arg(long)]
    pub(crate) district: String,
    /// Topic to score along, e.g. "air quality"
    #[arg(long)]
    pub(crate) topic: String,
    /// Ignore any cached score and run retrieval again
    #[arg(long)]
    pub(crate) force: bool,
}

#[derive(Args, Debug)]
pub(crate) struct RankArgs {
    #[arg(long)]
    pub(crate) country: String,
    #[arg(long)]
    pub(crate) city: String,
    #[arg(long)]
    pub(crate) topic: String,
    /// Also write the ranking to this CSV file
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
}

pub(crate) async fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let service = scoring_service(&config)?;

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling at the next iteration boundary");
            on_interrupt.cancel();
        }
    });

    let request = ScoreRequest::new(args.country, args.city, args.district, args.topic);
    let options = ScoreOptions {
        force_refresh: args.force,
        cancel,
    };
    let outcome = service.score(request, options).await?;
    print_outcome(&outcome);
    Ok(())
}

/// Reads the score cache directly, so ranking works without provider credentials.
pub(crate) fn run_rank(args: RankArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let cache = ScoreCache::new(Arc::new(FileCacheStore::new(&config.storage.cache_dir)));
    let rankings = rank_scores(&cache.scores(&CacheKey::new(&args.country, &args.city, &args.topic)));

    if rankings.is_empty() {
        println!(
            "No cached scores for {} in {}, {}.",
            args.topic, args.city, args.country
        );
    } else {
        println!("{}", render_rankings(&args.topic, &rankings));
    }

    if let Some(path) = args.csv {
        let file = File::create(&path)?;
        write_rankings_csv(&rankings, file)?;
        println!("Ranking written to {}", path.display());
    }
    Ok(())
}

pub(crate) fn run_topics() -> Result<(), AppError> {
    println!("{}", render_topics(&TopicCatalog::standard()));
    Ok(())
}

fn print_outcome(outcome: &ScoringOutcome) {
    let result = &outcome.result;
    let source = if outcome.cached { "cached" } else { "fresh" };
    println!(
        "{} / {}: {:.2} ({source}, {} iteration(s), evidence relevance {:.2})",
        result.district(),
        result.topic(),
        result.score(),
        result.iterations(),
        result.evidence_relevance()
    );
    for (name, value) in result.signals() {
        println!("  {name}: {value}");
    }
    if result.signals().is_empty() {
        println!("  no signals extracted; score is neutral");
    }
}

fn render_rankings(topic: &str, rankings: &[RankingEntry]) -> String {
    let mut lines = vec![format!("{:>4}  {:<28} {:>5}  scored at", "rank", "district", topic)];
    for entry in rankings {
        lines.push(format!(
            "{:>4}  {:<28} {:>5.2}  {}",
            entry.rank,
            entry.district,
            entry.score,
            entry.scored_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    lines.join("\n")
}

fn render_topics(catalog: &TopicCatalog) -> String {
    let mut lines = Vec::new();
    for topic in catalog.topics() {
        lines.push(format!("{} ({} signals)", topic.name, topic.fields.len()));
        for field in &topic.fields {
            let shape = match &field.kind {
                SignalKind::Qualitative => "very poor .. excellent".to_string(),
                SignalKind::Numeric { max, unit, .. } => format!("0 - {max} {unit}"),
            };
            lines.push(format!("  - {}: {}", field.name, shape));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_listing_shows_numeric_ranges() {
        let listing = render_topics(&TopicCatalog::standard());
        assert!(listing.contains("air quality (5 signals)"));
        assert!(listing.contains("  - aqi: 0 - 500"));
        assert!(listing.contains("very poor .. excellent"));
    }

    #[test]
    fn ranking_table_has_one_line_per_entry() {
        let scored_at = chrono::Utc::now();
        let rankings = vec![
            RankingEntry {
                rank: 1,
                district: "Xinyi".to_string(),
                score: 0.71,
                evidence_relevance: 0.8,
                iterations: 2,
                scored_at,
            },
            RankingEntry {
                rank: 2,
                district: "Wanhua".to_string(),
                score: 0.4,
                evidence_relevance: 0.5,
                iterations: 3,
                scored_at,
            },
        ];

        let table = render_rankings("safety", &rankings);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("Xinyi") && lines[1].contains("0.71"));
        assert!(lines[2].contains("0.40"));
    }
}
