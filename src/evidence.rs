use crate::decision::Verdict;
use crate::fingerprint::{ContentFingerprint, PerceptualFingerprint};
use crate::geo::GeoPoint;
use crate::signals::{PatternKey, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata the client sends alongside the evidence bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    /// Claimed capture time, ISO-8601 / RFC 3339.
    pub timestamp: Option<String>,

    /// Where the device says the photo was taken.
    pub gps_location: Option<GeoPoint>,

    /// Where the user is expected to be for this commitment.
    #[serde(alias = "user_location")]
    pub expected_location: Option<GeoPoint>,
}

/// One evidence submission, as kept in the learning corpus.
///
/// Immutable once written except for `verdict`, which is `None` ("pending")
/// until the decision for this submission has been synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: u64,
    pub user_id: String,
    pub commitment_id: String,
    pub content_fingerprint: ContentFingerprint,
    /// Empty when the evidence could not be decoded as an image.
    pub perceptual_fingerprint: PerceptualFingerprint,
    pub signals: Vec<Signal>,
    pub verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn verdict_label(&self) -> &'static str {
        self.verdict.as_ref().map(Verdict::as_str).unwrap_or("pending")
    }
}

/// A submission about to be appended; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub user_id: String,
    pub commitment_id: String,
    pub content_fingerprint: ContentFingerprint,
    pub perceptual_fingerprint: PerceptualFingerprint,
    pub signals: Vec<Signal>,
    pub created_at: DateTime<Utc>,
}

impl NewSubmission {
    pub fn into_record(self, id: u64) -> SubmissionRecord {
        SubmissionRecord {
            id,
            user_id: self.user_id,
            commitment_id: self.commitment_id,
            content_fingerprint: self.content_fingerprint,
            perceptual_fingerprint: self.perceptual_fingerprint,
            signals: self.signals,
            verdict: None,
            created_at: self.created_at,
        }
    }
}

/// A signal combination seen on more than one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub key: PatternKey,
    pub confidence_threshold: f64,
    pub times_detected: u64,
    pub last_updated: DateTime<Utc>,
}

impl LearnedPattern {
    pub fn first_seen(key: PatternKey, confidence_threshold: f64, now: DateTime<Utc>) -> Self {
        Self {
            key,
            confidence_threshold,
            times_detected: 1,
            last_updated: now,
        }
    }

    pub fn observed_again(&mut self, now: DateTime<Utc>) {
        self.times_detected += 1;
        self.last_updated = now;
    }
}

/// Per-user behavioral state driving stake adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehaviorProfile {
    pub user_id: String,
    pub current_stake: f64,
    pub current_streak: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    /// Reset to zero on any success.
    pub recent_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub compassion_mode: bool,
}

impl UserBehaviorProfile {
    pub fn new(user_id: impl Into<String>, default_stake: f64) -> Self {
        Self {
            user_id: user_id.into(),
            current_stake: default_stake,
            current_streak: 0,
            total_successes: 0,
            total_failures: 0,
            recent_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            compassion_mode: false,
        }
    }

    pub fn total_outcomes(&self) -> u32 {
        self.total_successes + self.total_failures
    }

    /// `None` for a user with no recorded outcomes.
    pub fn success_rate(&self) -> Option<f64> {
        match self.total_outcomes() {
            0 => None,
            n => Some(self.total_successes as f64 / n as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::content_fingerprint;

    #[test]
    fn test_new_record_is_pending() {
        let record = NewSubmission {
            user_id: "u1".into(),
            commitment_id: "7".into(),
            content_fingerprint: content_fingerprint(b"x"),
            perceptual_fingerprint: PerceptualFingerprint::empty(),
            signals: vec![Signal::MissingTimestamp],
            created_at: Utc::now(),
        }
        .into_record(3);

        assert_eq!(record.id, 3);
        assert_eq!(record.verdict_label(), "pending");
        assert!(record.perceptual_fingerprint.is_empty());
    }

    #[test]
    fn test_record_json_uses_signal_names() {
        let record = NewSubmission {
            user_id: "u1".into(),
            commitment_id: "c".into(),
            content_fingerprint: content_fingerprint(b"x"),
            perceptual_fingerprint: PerceptualFingerprint::from_bytes(vec![1, 2]),
            signals: vec![Signal::OldPhoto, Signal::ImageAge(30)],
            created_at: Utc::now(),
        }
        .into_record(1);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["signals"][1], "image_age_30h");
        assert_eq!(json["perceptual_fingerprint"], "0102");

        let back: SubmissionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_metadata_accepts_user_location_alias() {
        let meta: SubmissionMetadata = serde_json::from_str(
            r#"{"timestamp":"2026-01-01T00:00:00Z","user_location":{"latitude":1.0,"longitude":2.0}}"#,
        )
        .unwrap();
        assert_eq!(meta.expected_location, Some(GeoPoint::new(1.0, 2.0)));
        assert!(meta.gps_location.is_none());
    }

    #[test]
    fn test_success_rate() {
        let mut p = UserBehaviorProfile::new("u", 10.0);
        assert_eq!(p.success_rate(), None);
        p.total_successes = 9;
        p.total_failures = 1;
        assert_eq!(p.success_rate(), Some(0.9));
    }
}
