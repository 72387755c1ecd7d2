//! HTTP surface over the federation module.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fedbank_core::federated_learning::{RoundId, UpdateSubmission};
use fedbank_core::model::{FeatureVector, WeightVector};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::federation::FederationModule;

const DEFAULT_PAGE: usize = 10;
const DEFAULT_SAMPLES: usize = 100;

pub type AppState = Arc<FederationModule>;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> { Json(Envelope { success: true, data }) }

pub fn router(state: AppState) -> Router {
    let participants = Router::new()
        .route("/", get(list_participants).post(create_participant))
        .route("/init-demo", post(init_demo))
        .route("/:id", get(get_participant).delete(delete_participant));

    let training = Router::new()
        .route("/start", post(start_training))
        .route("/open", post(open_round))
        .route("/submit-update", post(submit_update))
        .route("/aggregate/:round_id", post(aggregate_round))
        .route("/history", get(history))
        .route("/status/current", get(current_status))
        .route("/:round_id", get(get_round));

    let models = Router::new()
        .route("/current", get(current_model))
        .route("/versions", get(list_versions))
        .route("/version/:version", get(get_version))
        .route("/activate/:version", post(activate_version))
        .route("/predict", post(predict))
        .route("/evaluate", post(evaluate))
        .route("/compare", post(compare));

    Router::new()
        .route("/health", get(health))
        .nest("/api/participants", participants)
        .nest("/api/training", training)
        .nest("/api/models", models)
        .merge(fedbank_core::health_router())
        .with_state(state)
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing field {field}")))
}

async fn health(State(module): State<AppState>) -> Json<serde_json::Value> {
    let status = module.coordinator().current_status();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
        "participants": status.participant_count,
        "active_model_version": status.global_model.map(|m| m.version),
    }))
}

// --- participants ---

#[derive(Debug, Deserialize)]
pub struct CreateParticipantRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    #[serde(alias = "transactionCount")]
    pub samples: Option<usize>,
}

async fn list_participants(State(module): State<AppState>) -> impl IntoResponse {
    ok(module.coordinator().participants().list())
}

async fn create_participant(
    State(module): State<AppState>,
    Json(req): Json<CreateParticipantRequest>,
) -> ApiResult<(StatusCode, impl IntoResponse)> {
    let name = required(req.name, "name")?;
    let created = module.register_participant(&name, req.color.as_deref(), req.samples.unwrap_or(DEFAULT_SAMPLES))?;
    Ok((StatusCode::CREATED, ok(created)))
}

async fn init_demo(State(module): State<AppState>) -> ApiResult<(StatusCode, impl IntoResponse)> {
    Ok((StatusCode::CREATED, ok(module.seed_demo_roster()?)))
}

async fn get_participant(State(module): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().participants().get(id)?.summary()))
}

async fn delete_participant(State(module): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    module.coordinator().participants().remove(id)?;
    Ok(ok(serde_json::json!({ "removed": id })))
}

// --- training ---

/// Field names of the original JSON API (`roundId`, `bankId`, `gradients`,
/// `dataSize`) are accepted as well.
#[derive(Debug, Deserialize)]
pub struct SubmitUpdateRequest {
    #[serde(alias = "roundId")]
    pub round_id: Option<RoundId>,
    #[serde(alias = "participantId", alias = "bankId")]
    pub participant_id: Option<Uuid>,
    #[serde(alias = "gradients")]
    pub gradient: Option<WeightVector>,
    #[serde(alias = "sampleCount", alias = "dataSize")]
    pub sample_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub limit: Option<usize>,
}

async fn start_training(State(module): State<AppState>) -> ApiResult<(StatusCode, impl IntoResponse)> {
    let round = module.coordinator().start_round()?;
    Ok((StatusCode::ACCEPTED, ok(round)))
}

async fn open_round(State(module): State<AppState>) -> ApiResult<(StatusCode, impl IntoResponse)> {
    Ok((StatusCode::CREATED, ok(module.coordinator().open_round()?)))
}

async fn submit_update(
    State(module): State<AppState>,
    Json(req): Json<SubmitUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let submission = UpdateSubmission {
        round_id: required(req.round_id, "round_id")?,
        participant_id: required(req.participant_id, "participant_id")?,
        gradient: required(req.gradient, "gradient")?,
        sample_count: required(req.sample_count, "sample_count")?,
    };
    Ok(ok(module.coordinator().submit_update(submission)?))
}

async fn aggregate_round(State(module): State<AppState>, Path(round_id): Path<RoundId>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().aggregate_round(round_id)?))
}

async fn history(State(module): State<AppState>, Query(page): Query<Page>) -> impl IntoResponse {
    ok(module.coordinator().history(page.limit.unwrap_or(DEFAULT_PAGE)))
}

async fn current_status(State(module): State<AppState>) -> impl IntoResponse {
    ok(module.coordinator().current_status())
}

async fn get_round(State(module): State<AppState>, Path(round_id): Path<RoundId>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().round(round_id)?))
}

// --- models ---

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub amount: Option<f64>,
    pub time: Option<f64>,
    pub location: Option<f64>,
    #[serde(alias = "modelVersion")]
    pub model_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    #[serde(alias = "participantId", alias = "bankId")]
    pub participant_id: Option<Uuid>,
    #[serde(alias = "modelVersion")]
    pub model_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub version1: Option<u64>,
    pub version2: Option<u64>,
    #[serde(alias = "participantId", alias = "bankId")]
    pub participant_id: Option<Uuid>,
}

async fn current_model(State(module): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().active_model()?))
}

async fn list_versions(State(module): State<AppState>, Query(page): Query<Page>) -> impl IntoResponse {
    ok(module.coordinator().model_versions(page.limit.unwrap_or(DEFAULT_PAGE)))
}

async fn get_version(State(module): State<AppState>, Path(version): Path<u64>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().model_version(version)?))
}

async fn activate_version(State(module): State<AppState>, Path(version): Path<u64>) -> ApiResult<impl IntoResponse> {
    Ok(ok(module.coordinator().activate_version(version)?))
}

async fn predict(State(module): State<AppState>, Json(req): Json<PredictRequest>) -> ApiResult<impl IntoResponse> {
    let (Some(amount), Some(time), Some(location)) = (req.amount, req.time, req.location) else {
        return Err(ApiError::BadRequest("missing transaction features (amount, time, location)".into()));
    };
    let transaction = FeatureVector { amount, time, location };
    Ok(ok(module.coordinator().predict(transaction, req.model_version)?))
}

async fn evaluate(State(module): State<AppState>, Json(req): Json<EvaluateRequest>) -> ApiResult<impl IntoResponse> {
    let participant_id = required(req.participant_id, "participant_id")?;
    Ok(ok(module.coordinator().evaluate(participant_id, req.model_version)?))
}

async fn compare(State(module): State<AppState>, Json(req): Json<CompareRequest>) -> ApiResult<impl IntoResponse> {
    let first = required(req.version1, "version1")?;
    let second = required(req.version2, "version2")?;
    Ok(ok(module.coordinator().compare(first, second, req.participant_id)?))
}
