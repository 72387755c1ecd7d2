//! Core of the fedbank federated learning coordinator.
//!
//! Holds the fraud classifier, federated averaging, the training round state
//! machine, the global model registry and the coordinator that drives rounds,
//! plus the shared process helpers (tracing, configuration, health and
//! metrics routes) used by the services.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod error;
pub mod federated_learning;
mod metrics_ext;
pub mod model;
pub mod model_registry;
pub mod participants;
pub mod settings;
pub mod synthetic;

pub use error::{FederationError, FederationResult};
pub use federated_learning::{
    build_trainer, FederatedLearningCoordinator, GradientUpdate, LocalTrainer, RoundId, RoundOrigin, RoundStatus,
    TrainingRound, UpdateSubmission,
};
pub use metrics_ext::{FederatedLearningMetrics, FL_METRICS};
pub use model::{FeatureVector, LocalModel, Sample, WeightVector};
pub use model_registry::{GlobalModelVersion, ModelRegistry};
pub use participants::{Participant, ParticipantRegistry};
pub use settings::{load_config, CoordinatorConfig};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }

fn json_logs() -> bool {
    std::env::var("FED_JSON_LOG").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Installs the global subscriber once; later calls only log.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json_logs() {
            registry
                .with(tracing_subscriber::fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false))
                .try_init()?;
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true))
                .try_init()?;
        }
        Ok(())
    })?;
    info!(target: "fedbank", service, "tracing initialized");
    Ok(())
}

/// `/live`, `/ready` and `/metrics`, ready to be merged into a service router.
pub fn health_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    Lazy::force(&FL_METRICS);
    let metric_families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain")], format!("encode error: {e}").into_bytes());
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf)
}
