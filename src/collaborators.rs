//! Narrow capability interfaces to everything outside the trust engine.
//!
//! Each collaborator is injected into the engine as `Arc<dyn ...>`; none of
//! them is allowed to fail the pipeline. Callers turn every
//! [`ExternalError`] into an explicit fallback.

use crate::decision::{ConfidenceTier, Tone, Verdict};
use crate::error::ExternalError;
use crate::fraud::FraudDetails;
use crate::signals::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Visual classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierVerdict {
    Approve,
    Reject,
    #[serde(other)]
    Unclear,
}

#[derive(Debug, Clone)]
pub struct ClassifierRequest<'a> {
    pub image: &'a [u8],
    pub goal_description: &'a str,
    pub proof_type: &'a str,
}

/// Structured judgment returned by the visual classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierJudgment {
    pub verdict: ClassifierVerdict,
    /// 0-100.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

impl ClassifierJudgment {
    fn degraded(reasoning: &str, flag: &str) -> Self {
        Self {
            verdict: ClassifierVerdict::Unclear,
            confidence: 0.0,
            reasoning: reasoning.to_string(),
            red_flags: vec![flag.to_string()],
        }
    }

    /// Response could not be understood.
    pub fn parse_error() -> Self {
        Self::degraded("parse_error", "parse_error")
    }

    /// Classifier could not be reached or did not answer in time.
    pub fn api_error(cause: &ExternalError) -> Self {
        Self::degraded(&format!("Verification failed: {cause}"), "api_error")
    }

    /// Parse a classifier answer that should be JSON but may be wrapped in
    /// a markdown code fence. Anything unreadable becomes [`Self::parse_error`].
    pub fn from_response_text(text: &str) -> Self {
        let parsed = serde_json::from_str::<ClassifierJudgment>(text.trim())
            .ok()
            .or_else(|| Self::fenced(text, "```json"))
            .or_else(|| Self::fenced(text, "```"));

        match parsed {
            Some(mut judgment) => {
                judgment.confidence = if judgment.confidence.is_finite() {
                    judgment.confidence.clamp(0.0, 100.0)
                } else {
                    0.0
                };
                judgment
            }
            None => Self::parse_error(),
        }
    }

    fn fenced(text: &str, opener: &str) -> Option<Self> {
        let start = text.find(opener)? + opener.len();
        let end = text[start..].find("```")? + start;
        serde_json::from_str(text[start..end].trim()).ok()
    }
}

#[async_trait]
pub trait VisualClassifier: Send + Sync {
    async fn classify(&self, request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError>;
}

/// Classifier used when no classification service is configured; every
/// submission degrades to unclear.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledClassifier;

#[async_trait]
impl VisualClassifier for DisabledClassifier {
    async fn classify(&self, _request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError> {
        Err(ExternalError::Unavailable("no classifier configured".into()))
    }
}

// ---------------------------------------------------------------------------
// Ledger / escrow
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record an approve/reject outcome; returns a transaction handle.
    async fn record_outcome(&self, on_chain_goal_id: u64, approved: bool) -> Result<String, ExternalError>;
}

/// Ledger used when no escrow service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLedger;

#[async_trait]
impl Ledger for DisabledLedger {
    async fn record_outcome(&self, _on_chain_goal_id: u64, _approved: bool) -> Result<String, ExternalError> {
        Err(ExternalError::Unavailable("no ledger configured".into()))
    }
}

// ---------------------------------------------------------------------------
// Observability sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeReason {
    StreakBonus,
    CompassionReduction,
}

impl StakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeReason::StreakBonus => "streak_bonus",
            StakeReason::CompassionReduction => "compassion_reduction",
        }
    }
}

/// Structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Verification {
        user_id: String,
        commitment_id: String,
        verdict: Verdict,
        confidence: f64,
        confidence_tier: ConfidenceTier,
        tone: Tone,
        reasoning: String,
        fraud_score: f64,
        fraud_signal_count: usize,
        processing_time_ms: f64,
    },
    FraudCheck {
        user_id: String,
        commitment_id: String,
        score: f64,
        signals: Vec<Signal>,
        details: FraudDetails,
    },
    StakeAdjustment {
        user_id: String,
        old_stake: f64,
        new_stake: f64,
        reason: StakeReason,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Verification { .. } => "verification",
            AuditEvent::FraudCheck { .. } => "fraud_check",
            AuditEvent::StakeAdjustment { .. } => "stake_adjustment",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError>;
}

/// Emit an audit event without letting the sink affect the caller.
///
/// Failures and timeouts are logged and swallowed.
pub async fn emit_best_effort(sink: &dyn EventSink, event: &AuditEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.emit(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(kind = event.kind(), error = %e, "audit sink rejected event"),
        Err(_) => warn!(kind = event.kind(), "audit sink timed out"),
    }
}

/// Writes every audit event to the `audit` tracing target as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        let payload =
            serde_json::to_string(event).map_err(|e| ExternalError::Malformed(e.to_string()))?;
        info!(target: "audit", kind = event.kind(), %payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Goal registry
// ---------------------------------------------------------------------------

/// Read-only goal metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalInfo {
    pub commitment_id: String,
    pub description: String,
    pub proof_type: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub required_submissions: u32,
}

#[async_trait]
pub trait GoalRegistry: Send + Sync {
    /// `Ok(None)` when the commitment is unknown.
    async fn lookup(&self, commitment_id: &str) -> Result<Option<GoalInfo>, ExternalError>;
}

/// Registry over a fixed set of goals, optionally loaded from a JSON array file.
#[derive(Debug, Default, Clone)]
pub struct StaticGoalRegistry {
    goals: HashMap<String, GoalInfo>,
}

impl StaticGoalRegistry {
    pub fn new(goals: impl IntoIterator<Item = GoalInfo>) -> Self {
        Self {
            goals: goals
                .into_iter()
                .map(|g| (g.commitment_id.clone(), g))
                .collect(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let goals: Vec<GoalInfo> = serde_json::from_slice(&bytes)?;
        Ok(Self::new(goals))
    }
}

#[async_trait]
impl GoalRegistry for StaticGoalRegistry {
    async fn lookup(&self, commitment_id: &str) -> Result<Option<GoalInfo>, ExternalError> {
        Ok(self.goals.get(commitment_id).cloned())
    }
}
