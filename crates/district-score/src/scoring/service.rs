use std::sync::Arc;

use serde::Serialize;
use tokio::task;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError, RetrievalConfig, TopicCatalog};

use super::boundary::{BoundaryResolver, GeoJsonBoundaryResolver};
use super::cache::{rank_scores, CacheStore, FileCacheStore, RankingEntry, ScoreCache};
use super::controller::{CancelFlag, EvidenceRetrievalController, RetrievalError};
use super::domain::{CacheKey, DistrictScore, ScoreRequest, SignalSet};
use super::evaluator::RetrievalEvaluator;
use super::extractor::SignalExtractor;
use super::llm::{LanguageModel, OpenAiCompatibleModel};
use super::normalizer::ScoreNormalizer;
use super::planner::StrategyPlanner;
use super::relevance::ResultScorer;
use super::search::{SearchAggregator, SearchBackend, SearxngBackend, SerperBackend};

/// The only failures a scoring request can surface. Everything else degrades to a score.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring request was cancelled")]
    Cancelled,
    #[error("'{district}' is not a known district of {city}")]
    UnknownDistrict { district: String, city: String },
    #[error("invalid scoring request: {0}")]
    InvalidRequest(String),
}

impl From<RetrievalError> for ScoringError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreOptions {
    pub force_refresh: bool,
    pub cancel: CancelFlag,
}

impl ScoreOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringOutcome {
    pub result: DistrictScore,
    pub cached: bool,
}

/// Cache-first scoring pipeline: retrieval loop, extraction, normalisation, persistence.
pub struct DistrictScoringService<S> {
    catalog: Arc<TopicCatalog>,
    controller: EvidenceRetrievalController,
    extractor: SignalExtractor,
    normalizer: ScoreNormalizer,
    cache: ScoreCache<S>,
    boundaries: Option<Arc<dyn BoundaryResolver>>,
}

impl<S> DistrictScoringService<S>
where
    S: CacheStore + 'static,
{
    pub fn new(
        catalog: Arc<TopicCatalog>,
        model: Arc<dyn LanguageModel>,
        aggregator: SearchAggregator,
        store: Arc<S>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        let controller = EvidenceRetrievalController::new(
            StrategyPlanner::new(model.clone(), catalog.clone(), retrieval.max_queries),
            aggregator,
            ResultScorer::new(catalog.clone()),
            RetrievalEvaluator::new(model.clone()),
            retrieval.max_iterations,
            retrieval.top_snippets,
        );

        Self {
            extractor: SignalExtractor::new(model, catalog.clone()),
            normalizer: ScoreNormalizer::new(catalog.clone()),
            cache: ScoreCache::new(store),
            controller,
            catalog,
            boundaries: None,
        }
    }

    /// Enables district-name validation against known boundaries.
    pub fn with_boundaries(mut self, resolver: Arc<dyn BoundaryResolver>) -> Self {
        self.boundaries = Some(resolver);
        self
    }

    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<S> {
        self.cache.store()
    }

    /// Returns the cached score unless `force_refresh` is set; otherwise runs the full pipeline
    /// and persists the result. Concurrent calls for the same unit are serialised.
    pub async fn score(
        &self,
        request: ScoreRequest,
        options: ScoreOptions,
    ) -> Result<ScoringOutcome, ScoringError> {
        let request = validated(request)?;
        self.check_district(&request).await?;

        let _unit = self.cache.lock_unit(&request).await;

        if !options.force_refresh {
            if let Some(result) = self.cache.get(&request).await {
                info!(
                    district = %request.district,
                    topic = %request.topic,
                    score = result.score(),
                    "score served from cache"
                );
                return Ok(ScoringOutcome {
                    result,
                    cached: true,
                });
            }
        }

        let retrieval = self.controller.run(&request, &options.cancel).await?;
        if options.cancel.is_cancelled() {
            return Err(ScoringError::Cancelled);
        }

        let signals = if retrieval.best.is_empty() {
            info!(
                district = %request.district,
                topic = %request.topic,
                iterations = retrieval.iterations(),
                "no usable evidence, scoring neutral"
            );
            SignalSet::new()
        } else {
            self.extractor.extract(&request, &retrieval.best.text).await
        };

        let result = DistrictScore::from_signals(
            &self.normalizer,
            &request,
            signals,
            retrieval.best.sources.clone(),
            retrieval.best.relevance,
            retrieval.iterations(),
        );

        if let Err(err) = self.cache.put(&request, result.clone()).await {
            warn!(
                district = %request.district,
                topic = %request.topic,
                error = %err,
                "failed to persist score"
            );
        }

        info!(
            district = %request.district,
            topic = %request.topic,
            score = result.score(),
            evidence_relevance = result.evidence_relevance(),
            iterations = result.iterations(),
            stop_reason = ?retrieval.stop_reason,
            "district scored"
        );

        Ok(ScoringOutcome {
            result,
            cached: false,
        })
    }

    /// Cached scores for a city and topic, best first.
    pub fn rankings(
        &self,
        country: &str,
        city: &str,
        topic: &str,
    ) -> Result<Vec<RankingEntry>, ScoringError> {
        for (field, value) in [("country", country), ("city", city), ("topic", topic)] {
            if value.trim().is_empty() {
                return Err(ScoringError::InvalidRequest(format!("{field} must not be empty")));
            }
        }
        let scores = self.cache.scores(&CacheKey::new(country, city, topic));
        Ok(rank_scores(&scores))
    }

    async fn check_district(&self, request: &ScoreRequest) -> Result<(), ScoringError> {
        let Some(resolver) = self.boundaries.clone() else {
            return Ok(());
        };

        let (city, country) = (request.city.clone(), request.country.clone());
        let resolved = task::spawn_blocking(move || resolver.resolve(&city, &country)).await;

        match resolved {
            Ok(Ok(Some(boundaries))) if !boundaries.contains(&request.district) => {
                Err(ScoringError::UnknownDistrict {
                    district: request.district.clone(),
                    city: request.city.clone(),
                })
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                warn!(city = %request.city, error = %err, "boundary lookup failed, skipping validation");
                Ok(())
            }
            Err(err) => {
                warn!(city = %request.city, error = %err, "boundary lookup task failed, skipping validation");
                Ok(())
            }
        }
    }
}

impl DistrictScoringService<FileCacheStore> {
    /// Wires the HTTP-backed collaborators. Missing credentials fail here, before any request.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let providers = &config.providers;
        let llm_key = providers.require_llm_key()?;
        if !providers.has_search_backend() {
            return Err(ConfigError::NoSearchBackend);
        }

        let client = reqwest::Client::new();
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        if let Some(api_key) = &providers.serper_api_key {
            backends.push(Arc::new(SerperBackend::new(client.clone(), api_key)));
        }
        if let Some(url) = &providers.searxng_url {
            backends.push(Arc::new(SearxngBackend::new(client.clone(), url)));
        }
        let aggregator = SearchAggregator::new(
            backends,
            config.retrieval.results_per_query,
            providers.search_timeout,
        );

        let model = Arc::new(OpenAiCompatibleModel::new(
            client,
            &providers.llm_base_url,
            llm_key,
            &providers.llm_model,
            providers.llm_timeout,
        ));
        let catalog = Arc::new(TopicCatalog::standard());
        let store = Arc::new(FileCacheStore::new(&config.storage.cache_dir));
        let service = Self::new(catalog.clone(), model, aggregator, store, &config.retrieval);

        Ok(match &config.storage.boundary_dir {
            Some(dir) => service.with_boundaries(Arc::new(GeoJsonBoundaryResolver::new(dir, catalog))),
            None => service,
        })
    }
}

fn validated(request: ScoreRequest) -> Result<ScoreRequest, ScoringError> {
    let trimmed = ScoreRequest::new(
        request.country.trim(),
        request.city.trim(),
        request.district.trim(),
        request.topic.trim(),
    );

    for (field, value) in [
        ("country", &trimmed.country),
        ("city", &trimmed.city),
        ("district", &trimmed.district),
        ("topic", &trimmed.topic),
    ] {
        if value.is_empty() {
            return Err(ScoringError::InvalidRequest(format!("{field} must not be empty")));
        }
    }

    Ok(trimmed)
}
