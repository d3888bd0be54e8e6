use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::TopicProfile;
use crate::error::AppError;

use super::cache::{CacheStore, RankingEntry};
use super::domain::ScoreRequest;
use super::service::{DistrictScoringService, ScoreOptions, ScoringOutcome};

#[derive(Debug, Deserialize)]
pub struct ScoreBody {
    pub country: String,
    pub city: String,
    pub district: String,
    pub topic: String,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    pub country: String,
    pub city: String,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct RankingView {
    pub country: String,
    pub city: String,
    pub topic: String,
    pub rankings: Vec<RankingEntry>,
}

/// Router exposing scoring, rankings, and the topic catalog.
pub fn scoring_router<S>(service: Arc<DistrictScoringService<S>>) -> Router
where
    S: CacheStore + 'static,
{
    Router::new()
        .route("/api/v1/districts/score", post(score_handler::<S>))
        .route("/api/v1/districts/rankings", get(rankings_handler::<S>))
        .route("/api/v1/topics", get(topics_handler::<S>))
        .with_state(service)
}

pub(crate) async fn score_handler<S>(
    State(service): State<Arc<DistrictScoringService<S>>>,
    Json(body): Json<ScoreBody>,
) -> Result<Json<ScoringOutcome>, AppError>
where
    S: CacheStore + 'static,
{
    let request = ScoreRequest::new(body.country, body.city, body.district, body.topic);
    let options = ScoreOptions {
        force_refresh: body.force_refresh,
        ..ScoreOptions::default()
    };
    let outcome = service.score(request, options).await?;
    Ok(Json(outcome))
}

pub(crate) async fn rankings_handler<S>(
    State(service): State<Arc<DistrictScoringService<S>>>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<RankingView>, AppError>
where
    S: CacheStore + 'static,
{
    let rankings = service.rankings(&query.country, &query.city, &query.topic)?;
    Ok(Json(RankingView {
        country: query.country,
        city: query.city,
        topic: query.topic,
        rankings,
    }))
}

pub(crate) async fn topics_handler<S>(
    State(service): State<Arc<DistrictScoringService<S>>>,
) -> Json<Vec<TopicProfile>>
where
    S: CacheStore + 'static,
{
    Json(service.catalog().topics().cloned().collect())
}
