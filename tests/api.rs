mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::*;
use pledge_trust::api::{self, AppState, EscalationResponse, ErrorBody, HealthResponse, StakeRecommendation};
use pledge_trust::clock::FixedClock;
use pledge_trust::collaborators::StaticGoalRegistry;
use pledge_trust::config::{FraudTuning, StakeTuning, Timeouts};
use pledge_trust::engine::{EngineDeps, SubmissionOutcome, TrustEngine};
use pledge_trust::mem_store::MemoryStore;
use pledge_trust::stake::UserStats;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn router() -> axum::Router {
    let store = Arc::new(MemoryStore::new());
    let engine = TrustEngine::new(
        EngineDeps {
            signals: store.clone(),
            profiles: store,
            classifier: Arc::new(FixedClassifier::approve(92.0)),
            ledger: Arc::new(RecordingLedger::default()),
            sink: Arc::new(RecordingSink::default()),
            registry: Arc::new(StaticGoalRegistry::default()),
            clock: Arc::new(FixedClock::new(noon())),
        },
        FraudTuning::default(),
        StakeTuning::default(),
        Timeouts::default(),
    );
    api::app(Arc::new(AppState {
        engine: Arc::new(engine),
    }))
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_submission(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/submissions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = router().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: HealthResponse = read_json(response).await;
    assert_eq!(body.status, "ok");
    assert_eq!(body.service, "pledge-trust");
}

#[tokio::test]
async fn test_submission_round_trip_updates_stats() {
    let app = router();

    let response = app
        .clone()
        .oneshot(post_submission(json!({
            "user_id": "alice",
            "commitment_id": "gym-jan",
            "goal_description": "Go to the gym",
            "proof_type": "photo",
            "evidence_base64": STANDARD.encode(sample_png(0)),
            "metadata": { "timestamp": noon().to_rfc3339() }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: SubmissionOutcome = read_json(response).await;
    assert_eq!(outcome.verdict.as_str(), "approved");
    assert!(outcome.fraud_signals.is_empty());
    assert_eq!(outcome.recommendation, "Great job! Keep up the momentum and maintain your streak.");

    let response = app.oneshot(get("/users/alice/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: UserStats = read_json(response).await;
    assert_eq!(stats.total_successes, 1);
    assert_eq!(stats.current_streak, 1);
    assert_eq!(stats.success_rate, 1.0);
    assert_eq!(stats.message, "Show me what you've got.");
}

#[tokio::test]
async fn test_invalid_base64_is_bad_request() {
    let response = router()
        .oneshot(post_submission(json!({
            "user_id": "alice",
            "commitment_id": "c1",
            "goal_description": "Go to the gym",
            "proof_type": "photo",
            "evidence_base64": "%%% not base64 %%%"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.reason, "invalid_evidence");
}

#[tokio::test]
async fn test_new_user_recommendation_and_escalation() {
    let app = router();

    let response = app
        .clone()
        .oneshot(get("/users/newbie/recommended-stake"))
        .await
        .unwrap();
    let body: StakeRecommendation = read_json(response).await;
    assert_eq!(body.user_id, "newbie");
    assert_eq!(body.recommended_stake, 20.0);

    let response = app
        .oneshot(get("/users/newbie/commitments/c1/escalation"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: EscalationResponse = read_json(response).await;
    assert_eq!(body.commitment_id, "c1");
    assert!(!body.escalate);
}
