use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{
    engine::{SubmissionOutcome, SubmissionRequest, TrustEngine},
    error::TrustError,
    evidence::SubmissionMetadata,
    stake::UserStats,
};

// ==========================================
// 1. Shared state
// ==========================================
pub struct AppState {
    pub engine: Arc<TrustEngine>,
}

// ==========================================
// 2. DTOs
// ==========================================

#[derive(Deserialize)]
pub struct SubmitProofRequest {
    pub user_id: String,
    pub commitment_id: String,
    pub goal_description: String,
    pub proof_type: String,
    /// Raw evidence bytes, standard base64.
    pub evidence_base64: String,
    #[serde(default)]
    pub metadata: SubmissionMetadata,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Serialize, Deserialize)]
pub struct StakeRecommendation {
    pub user_id: String,
    pub recommended_stake: f64,
}

#[derive(Serialize, Deserialize)]
pub struct EscalationResponse {
    pub user_id: String,
    pub commitment_id: String,
    pub escalate: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub reason: String,
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn reject(status: StatusCode, reason: &str, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            reason: reason.to_string(),
            detail: detail.into(),
        }),
    )
}

impl From<TrustError> for (StatusCode, Json<ErrorBody>) {
    fn from(e: TrustError) -> Self {
        error!(reason = e.reason_code(), error = %e, "request failed");
        let status = match e {
            TrustError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            TrustError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        reject(status, e.reason_code(), e.to_string())
    }
}

// ==========================================
// 3. Routes
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/submissions", post(submit_proof))
        .route("/users/{user_id}/stats", get(user_stats))
        .route("/users/{user_id}/recommended-stake", get(recommended_stake))
        .route(
            "/users/{user_id}/commitments/{commitment_id}/escalation",
            get(escalation),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ==========================================
// 4. Handlers
// ==========================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
    })
}

async fn submit_proof(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitProofRequest>,
) -> Result<Json<SubmissionOutcome>, ApiError> {
    let evidence = STANDARD
        .decode(req.evidence_base64.as_bytes())
        .map_err(|e| reject(StatusCode::BAD_REQUEST, "invalid_evidence", e.to_string()))?;
    if evidence.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "invalid_evidence", "evidence is empty"));
    }

    info!(user_id = %req.user_id, commitment_id = %req.commitment_id, "submission received");

    let outcome = state
        .engine
        .process_submission(SubmissionRequest {
            user_id: req.user_id,
            commitment_id: req.commitment_id,
            goal_description: req.goal_description,
            proof_type: req.proof_type,
            evidence: evidence.into(),
            metadata: req.metadata,
        })
        .await?;

    Ok(Json(outcome))
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, ApiError> {
    Ok(Json(state.engine.user_stats(&user_id).await?))
}

async fn recommended_stake(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StakeRecommendation>, ApiError> {
    let recommended_stake = state.engine.recommended_stake(&user_id).await?;
    Ok(Json(StakeRecommendation {
        user_id,
        recommended_stake,
    }))
}

async fn escalation(
    State(state): State<Arc<AppState>>,
    Path((user_id, commitment_id)): Path<(String, String)>,
) -> Result<Json<EscalationResponse>, ApiError> {
    let escalate = state.engine.should_escalate(&user_id, &commitment_id).await?;
    Ok(Json(EscalationResponse {
        user_id,
        commitment_id,
        escalate,
    }))
}
