//! Submission pipeline: fraud scoring and classification, decision,
//! ledger, stake adjustment, audit.

use crate::clock::Clock;
use crate::collaborators::{
    emit_best_effort, AuditEvent, ClassifierJudgment, ClassifierRequest, EventSink, GoalRegistry,
    Ledger, VisualClassifier,
};
use crate::config::{FraudTuning, StakeTuning, Timeouts};
use crate::decision::{self, ConfidenceTier, Tone, Verdict};
use crate::error::{ExternalError, Result};
use crate::evidence::SubmissionMetadata;
use crate::fraud::{FraudResult, FraudScorer};
use crate::stake::{ProfileChange, StakeController, UserStats};
use crate::store::{ProfileStore, SignalStore};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything the engine talks to, constructed by the caller.
pub struct EngineDeps {
    pub signals: Arc<dyn SignalStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub classifier: Arc<dyn VisualClassifier>,
    pub ledger: Arc<dyn Ledger>,
    pub sink: Arc<dyn EventSink>,
    pub registry: Arc<dyn GoalRegistry>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub user_id: String,
    pub commitment_id: String,
    pub goal_description: String,
    pub proof_type: String,
    pub evidence: Arc<[u8]>,
    pub metadata: SubmissionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub submission_id: u64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub confidence_tier: ConfidenceTier,
    pub fraud_score: f64,
    pub fraud_signals: Vec<String>,
    pub reasoning: String,
    pub red_flags: Vec<String>,
    pub message: String,
    pub tone: Tone,
    pub recommendation: String,
    /// Present only when the ledger recorded the outcome.
    pub ledger_tx: Option<String>,
    pub escalate: bool,
    pub stake: ProfileChange,
    pub processing_time_ms: f64,
}

pub struct TrustEngine {
    fraud: FraudScorer,
    stake: StakeController,
    signals: Arc<dyn SignalStore>,
    classifier: Arc<dyn VisualClassifier>,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
}

impl TrustEngine {
    pub fn new(deps: EngineDeps, fraud_tuning: FraudTuning, stake_tuning: StakeTuning, timeouts: Timeouts) -> Self {
        let fraud = FraudScorer::new(deps.signals.clone(), deps.clock.clone(), fraud_tuning);
        let stake = StakeController::new(
            deps.profiles,
            deps.signals.clone(),
            deps.registry,
            deps.sink.clone(),
            deps.clock.clone(),
            stake_tuning,
            timeouts,
        );
        Self {
            fraud,
            stake,
            signals: deps.signals,
            classifier: deps.classifier,
            ledger: deps.ledger,
            sink: deps.sink,
            clock: deps.clock,
            timeouts,
        }
    }

    /// Run one submission through the whole pipeline.
    ///
    /// Only persistence failures (history append, verdict back-fill, profile
    /// write) and aborted tasks are returned as errors, and all of them happen
    /// before the ledger is called. Classifier, ledger, registry and sink
    /// outages each fall back and are logged, as does a failed escalation check.
    pub async fn process_submission(&self, req: SubmissionRequest) -> Result<SubmissionOutcome> {
        let started = Instant::now();
        info!(user_id = %req.user_id, commitment_id = %req.commitment_id, bytes = req.evidence.len(), "processing submission");

        let classify = self.classify(&req);
        let analyze = self
            .fraud
            .analyze(req.evidence.clone(), &req.user_id, &req.commitment_id, &req.metadata);
        let (judgment, fraud) = tokio::join!(classify, analyze);
        let fraud = fraud?;

        let decision = decision::synthesize(judgment.verdict, judgment.confidence, fraud.score);
        let tone = decision::select_tone(decision.verdict, self.clock.now().hour());
        let message = decision::compose_message(&decision, tone, &judgment.reasoning, &fraud.signals);
        debug!(
            verdict = decision.verdict.as_str(),
            reason = decision.reason.as_str(),
            tone = tone.as_str(),
            "decision synthesized"
        );

        self.signals
            .set_verdict(&req.user_id, fraud.submission_id, decision.verdict)
            .await?;

        // every local write lands before the ledger sees the outcome
        let stake = if decision.verdict.is_success() {
            self.stake.record_success(&req.user_id).await?
        } else {
            self.stake.record_failure(&req.user_id).await?
        };

        let ledger_tx = self.record_on_ledger(&req.commitment_id, decision.verdict).await;

        // advisory only; the submission is fully applied at this point
        let escalate = match self.stake.should_escalate(&req.user_id, &req.commitment_id).await {
            Ok(escalate) => escalate,
            Err(e) => {
                warn!(user_id = %req.user_id, error = %e, "escalation check failed; reporting no escalation");
                false
            }
        };

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.audit(&req, &fraud, &judgment, &decision, tone, processing_time_ms)
            .await;

        info!(
            user_id = %req.user_id,
            commitment_id = %req.commitment_id,
            verdict = decision.verdict.as_str(),
            fraud_score = fraud.score,
            escalate,
            processing_time_ms,
            "submission processed"
        );

        Ok(SubmissionOutcome {
            submission_id: fraud.submission_id,
            verdict: decision.verdict,
            confidence: decision.confidence,
            confidence_tier: decision.tier,
            fraud_score: fraud.score,
            fraud_signals: fraud.signal_names(),
            reasoning: judgment.reasoning,
            red_flags: judgment.red_flags,
            message,
            tone,
            recommendation: decision.verdict.recommendation().to_string(),
            ledger_tx,
            escalate,
            stake,
            processing_time_ms,
        })
    }

    async fn classify(&self, req: &SubmissionRequest) -> ClassifierJudgment {
        let request = ClassifierRequest {
            image: &req.evidence,
            goal_description: &req.goal_description,
            proof_type: &req.proof_type,
        };
        match tokio::time::timeout(self.timeouts.classifier, self.classifier.classify(request)).await {
            Ok(Ok(judgment)) => judgment,
            Ok(Err(e)) => {
                warn!(user_id = %req.user_id, error = %e, "classifier failed; treating as unclear");
                ClassifierJudgment::api_error(&e)
            }
            Err(_) => {
                warn!(user_id = %req.user_id, "classifier timed out; treating as unclear");
                ClassifierJudgment::api_error(&ExternalError::Timeout)
            }
        }
    }

    /// Ledger handle, or `None` when the commitment has no numeric on-chain id
    /// or the ledger call fails.
    async fn record_on_ledger(&self, commitment_id: &str, verdict: Verdict) -> Option<String> {
        let Ok(goal_id) = commitment_id.parse::<u64>() else {
            debug!(commitment_id, "commitment has no on-chain id; ledger skipped");
            return None;
        };

        let call = self.ledger.record_outcome(goal_id, verdict.is_success());
        match tokio::time::timeout(self.timeouts.ledger, call).await {
            Ok(Ok(tx)) => {
                info!(goal_id, tx = %tx, "outcome recorded on ledger");
                Some(tx)
            }
            Ok(Err(e)) => {
                warn!(goal_id, error = %e, "ledger recording failed; continuing");
                None
            }
            Err(_) => {
                warn!(goal_id, "ledger recording timed out; continuing");
                None
            }
        }
    }

    /// One `fraud_check` then one `verification` event per submission.
    async fn audit(
        &self,
        req: &SubmissionRequest,
        fraud: &FraudResult,
        judgment: &ClassifierJudgment,
        decision: &decision::Decision,
        tone: Tone,
        processing_time_ms: f64,
    ) {
        let fraud_check = AuditEvent::FraudCheck {
            user_id: req.user_id.clone(),
            commitment_id: req.commitment_id.clone(),
            score: fraud.score,
            signals: fraud.signals.clone(),
            details: fraud.details.clone(),
        };
        let verification = AuditEvent::Verification {
            user_id: req.user_id.clone(),
            commitment_id: req.commitment_id.clone(),
            verdict: decision.verdict,
            confidence: decision.confidence,
            confidence_tier: decision.tier,
            tone,
            reasoning: judgment.reasoning.clone(),
            fraud_score: fraud.score,
            fraud_signal_count: fraud.signals.len(),
            processing_time_ms,
        };
        emit_best_effort(self.sink.as_ref(), &fraud_check, self.timeouts.sink).await;
        emit_best_effort(self.sink.as_ref(), &verification, self.timeouts.sink).await;
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        self.stake.user_stats(user_id).await
    }

    pub async fn recommended_stake(&self, user_id: &str) -> Result<f64> {
        self.stake.recommended_stake(user_id).await
    }

    pub async fn should_escalate(&self, user_id: &str, commitment_id: &str) -> Result<bool> {
        self.stake.should_escalate(user_id, commitment_id).await
    }
}
