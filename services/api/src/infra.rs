use district_score::config::AppConfig;
use district_score::error::AppError;
use district_score::scoring::{DistrictScoringService, FileCacheStore};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type ScoringService = DistrictScoringService<FileCacheStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Builds the file-backed scoring service, failing fast on missing credentials.
pub(crate) fn scoring_service(config: &AppConfig) -> Result<Arc<ScoringService>, AppError> {
    let service = ScoringService::from_config(config)?;
    info!(
        cache_dir = %config.storage.cache_dir.display(),
        boundaries = config.storage.boundary_dir.is_some(),
        model = %config.providers.llm_model,
        max_iterations = config.retrieval.max_iterations,
        "scoring service configured"
    );
    Ok(Arc::new(service))
}
