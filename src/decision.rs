//! Decision synthesis: classifier judgment + fraud score -> final verdict.

use crate::collaborators::ClassifierVerdict;
use crate::signals::Signal;
use serde::{Deserialize, Serialize};

const FRAUD_OVERRIDE: f64 = 0.70;
const HIGH_CONFIDENCE: f64 = 0.85;
const HIGH_CONFIDENCE_MAX_FRAUD: f64 = 0.30;
const MEDIUM_CONFIDENCE: f64 = 0.60;
const MEDIUM_CONFIDENCE_MAX_FRAUD: f64 = 0.50;
const UNCLEAR_CONFIDENCE: f64 = 0.5;

/// Hour (server clock) before which approvals are met with encouragement.
const EARLY_HOUR: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    Unclear,
    FraudDetected,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::Rejected => "rejected",
            Verdict::Unclear => "unclear",
            Verdict::FraudDetected => "fraud_detected",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Approved)
    }

    /// Next-step hint shown alongside the verdict.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Verdict::Approved => "Great job! Keep up the momentum and maintain your streak.",
            Verdict::Rejected => {
                "Try submitting clearer evidence that better matches your goal description."
            }
            Verdict::FraudDetected => {
                "Fraud detected. Please submit authentic proof to avoid penalties."
            }
            Verdict::Unclear => "The evidence is unclear. Please resubmit with better quality proof.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    FraudPatterns,
    ClassifierApproved,
    ClassifierRejected,
    InsufficientConfidence,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::FraudPatterns => "fraud_patterns",
            DecisionReason::ClassifierApproved => "classifier_approved",
            DecisionReason::ClassifierRejected => "classifier_rejected",
            DecisionReason::InsufficientConfidence => "insufficient_confidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub reason: DecisionReason,
}

/// Combine the classifier's judgment with the fraud score.
///
/// Rules are evaluated in order and the first match wins:
/// 1. fraud score above 0.70 is fraud, whatever the classifier said
/// 2. approve, confidence above 0.85, fraud below 0.30: approved (high)
/// 3. approve, confidence above 0.60, fraud below 0.50: approved (medium)
/// 4. reject: rejected, confidence is the complement of the classifier's
/// 5. anything else is unclear
pub fn synthesize(classifier: ClassifierVerdict, confidence_pct: f64, fraud_score: f64) -> Decision {
    let confidence = confidence_pct.clamp(0.0, 100.0) / 100.0;

    if fraud_score > FRAUD_OVERRIDE {
        return Decision {
            verdict: Verdict::FraudDetected,
            confidence: fraud_score.min(1.0),
            tier: ConfidenceTier::High,
            reason: DecisionReason::FraudPatterns,
        };
    }

    match classifier {
        ClassifierVerdict::Approve
            if confidence > HIGH_CONFIDENCE && fraud_score < HIGH_CONFIDENCE_MAX_FRAUD =>
        {
            Decision {
                verdict: Verdict::Approved,
                confidence,
                tier: ConfidenceTier::High,
                reason: DecisionReason::ClassifierApproved,
            }
        }
        ClassifierVerdict::Approve
            if confidence > MEDIUM_CONFIDENCE && fraud_score < MEDIUM_CONFIDENCE_MAX_FRAUD =>
        {
            Decision {
                verdict: Verdict::Approved,
                confidence,
                tier: ConfidenceTier::Medium,
                reason: DecisionReason::ClassifierApproved,
            }
        }
        ClassifierVerdict::Reject => Decision {
            verdict: Verdict::Rejected,
            confidence: 1.0 - confidence,
            tier: ConfidenceTier::High,
            reason: DecisionReason::ClassifierRejected,
        },
        _ => Decision {
            verdict: Verdict::Unclear,
            confidence: UNCLEAR_CONFIDENCE,
            tier: ConfidenceTier::Low,
            reason: DecisionReason::InsufficientConfidence,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Strict,
    Encouraging,
    Neutral,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Strict => "strict",
            Tone::Encouraging => "encouraging",
            Tone::Neutral => "neutral",
        }
    }
}

/// Response tone from the verdict and the submission hour (0-23) alone.
pub fn select_tone(verdict: Verdict, hour: u32) -> Tone {
    match verdict {
        Verdict::Approved if hour < EARLY_HOUR => Tone::Encouraging,
        Verdict::FraudDetected => Tone::Strict,
        Verdict::Rejected => Tone::Neutral,
        Verdict::Approved => Tone::Encouraging,
        Verdict::Unclear => Tone::Neutral,
    }
}

/// User-facing message for a decision.
pub fn compose_message(decision: &Decision, tone: Tone, reasoning: &str, signals: &[Signal]) -> String {
    let pct = (decision.confidence * 100.0).round();
    match decision.verdict {
        Verdict::Approved => match tone {
            Tone::Encouraging => format!("Verified. Confidence: {pct}%. You showed up."),
            _ => format!("Proof accepted. {pct}% confidence."),
        },
        Verdict::Rejected => format!("Rejected. {reasoning}. Try again with better proof."),
        Verdict::FraudDetected => {
            let listed = signals
                .iter()
                .take(3)
                .map(Signal::name)
                .collect::<Vec<_>>()
                .join(", ");
            format!("Fraud detected: {listed}. Submission rejected.")
        }
        Verdict::Unclear => format!("Unclear evidence. {reasoning}. Resubmit with clearer proof."),
    }
}
