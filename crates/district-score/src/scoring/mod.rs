//! District scoring: adaptive evidence retrieval, signal extraction, normalisation, and the
//! score cache that fronts them.

pub mod boundary;
pub mod cache;
pub mod controller;
pub mod domain;
pub mod evaluator;
pub mod extractor;
pub mod llm;
pub mod normalizer;
pub mod planner;
pub mod relevance;
pub mod router;
pub mod search;
pub mod service;

pub use boundary::{BoundaryResolver, DistrictBoundaries, GeoJsonBoundaryResolver};
pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore, RankingEntry, ScoreCache};
pub use controller::{CancelFlag, EvidenceRetrievalController, RetrievalOutcome};
pub use domain::{
    DistrictScore, EvaluationResult, IterationRecord, QualitativeLevel, ScoreRequest, SignalSet,
    SignalValue, Snippet,
};
pub use llm::{LanguageModel, OpenAiCompatibleModel};
pub use router::scoring_router;
pub use search::{SearchAggregator, SearchBackend, SearxngBackend, SerperBackend};
pub use service::{DistrictScoringService, ScoreOptions, ScoringError, ScoringOutcome};
