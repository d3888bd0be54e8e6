use crate::cli::ServeArgs;
use crate::infra::{scoring_service, AppState};
use crate::routes::with_scoring_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use district_score::config::AppConfig;
use district_score::error::AppError;
use district_score::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    config.server.host = args.host.unwrap_or(config.server.host);
    config.server.port = args.port.unwrap_or(config.server.port);

    telemetry::init(&config.telemetry)?;

    // Credentials are checked before binding so a misconfigured process never reports ready.
    let scoring = scoring_service(&config)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let app = with_scoring_routes(scoring)
        .layer(Extension(state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        serper = config.providers.serper_api_key.is_some(),
        searxng = config.providers.searxng_url.is_some(),
        "district scoring service ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(drain_on_interrupt(readiness))
        .await?;
    info!("district scoring service stopped");
    Ok(())
}

/// Resolves on Ctrl-C after flipping readiness off, letting in-flight requests finish.
async fn drain_on_interrupt(readiness: Arc<AtomicBool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "interrupt handler unavailable, serving until killed");
        std::future::pending::<()>().await;
    }
    readiness.store(false, Ordering::Release);
    info!("interrupt received, draining connections");
}
