//! Fraud scoring engine.
//!
//! Five independent check families feed one additive score:
//!
//! | family | signals |
//! |---|---|
//! | exact duplication | `duplicate_image` |
//! | perceptual similarity | `similar_image_detected` |
//! | metadata forensics | `missing_timestamp`, `invalid_timestamp`, `old_photo` + `image_age_<N>h`, `location_mismatch` |
//! | temporal anomaly | `rapid_submissions`, `unusual_hour` |
//! | learned patterns | `known_fraud_pattern` |
//!
//! Every analysis is appended to the signal store, and signal pairs are fed
//! back into the learned-pattern table.

use crate::clock::Clock;
use crate::config::FraudTuning;
use crate::error::{Result, TrustError};
use crate::evidence::{LearnedPattern, NewSubmission, SubmissionMetadata, SubmissionRecord};
use crate::fingerprint::{self, ContentFingerprint, PerceptualFingerprint};
use crate::geo::haversine_km;
use crate::locks::KeyedLocks;
use crate::signals::{self, PatternKey, Signal};
use crate::store::SignalStore;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Evidence of what each family found, for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudDetails {
    pub duplicate_hash: Option<String>,
    pub perceptual_fingerprint_available: bool,
    pub similar_count: usize,
    pub metadata_issues: Vec<Signal>,
    pub location_distance_km: Option<f64>,
    pub temporal_flags: Vec<Signal>,
    pub recent_submissions: usize,
    pub matched_patterns: Vec<String>,
    pub learned_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudResult {
    /// Id of the history record written for this submission.
    pub submission_id: u64,
    /// In `[0, 1]`.
    pub score: f64,
    pub signals: Vec<Signal>,
    pub details: FraudDetails,
}

impl FraudResult {
    pub fn signal_names(&self) -> Vec<String> {
        self.signals.iter().map(Signal::name).collect()
    }
}

#[derive(Clone)]
pub struct FraudScorer {
    store: Arc<dyn SignalStore>,
    clock: Arc<dyn Clock>,
    tuning: FraudTuning,
    locks: KeyedLocks,
}

impl FraudScorer {
    pub fn new(store: Arc<dyn SignalStore>, clock: Arc<dyn Clock>, tuning: FraudTuning) -> Self {
        Self {
            store,
            clock,
            tuning,
            locks: KeyedLocks::new(),
        }
    }

    /// Score a submission and record it in the history.
    ///
    /// Runs as its own task: dropping the returned future does not stop a
    /// started analysis from reaching the append, so later duplicate checks
    /// always see it. A failed append is returned as
    /// [`TrustError::Persistence`], never as a clean score.
    pub async fn analyze(
        &self,
        evidence: Arc<[u8]>,
        user_id: &str,
        commitment_id: &str,
        metadata: &SubmissionMetadata,
    ) -> Result<FraudResult> {
        let scorer = self.clone();
        let user_id = user_id.to_string();
        let commitment_id = commitment_id.to_string();
        let metadata = metadata.clone();

        tokio::spawn(async move {
            scorer
                .analyze_serialized(evidence, user_id, commitment_id, metadata)
                .await
        })
        .await
        .map_err(|e| TrustError::Aborted(format!("fraud analysis task: {e}")))?
    }

    async fn analyze_serialized(
        &self,
        evidence: Arc<[u8]>,
        user_id: String,
        commitment_id: String,
        metadata: SubmissionMetadata,
    ) -> Result<FraudResult> {
        // history check and append must not interleave for one user
        let _guard = self.locks.acquire(&user_id).await;
        let now = self.clock.now();
        let content = fingerprint::content_fingerprint(&evidence);

        // fan out: history, pixel decode, trailing-window count and patterns are independent
        let perceptual = async {
            let bytes = evidence.clone();
            Ok::<_, TrustError>(
                perceptual_or_empty(move || fingerprint::perceptual_fingerprint(&bytes)).await,
            )
        };
        let history = async { Ok::<_, TrustError>(self.store.submissions_for_user(&user_id).await?) };
        let recent = async {
            let since = now - self.tuning.rapid_window;
            Ok::<_, TrustError>(self.store.count_submissions_since(&user_id, since).await?)
        };
        let patterns = async { Ok::<_, TrustError>(self.store.patterns().await?) };

        let (perceptual, history, recent, patterns) =
            tokio::try_join!(perceptual, history, recent, patterns)?;

        let mut signals = Vec::new();
        let mut details = FraudDetails {
            perceptual_fingerprint_available: !perceptual.is_empty(),
            recent_submissions: recent,
            ..FraudDetails::default()
        };

        if is_duplicate(&content, &history) {
            signals.push(Signal::DuplicateImage);
            details.duplicate_hash = Some(content.to_string());
        }

        let similar = similar_count(&perceptual, &history, self.tuning.similarity_threshold_bits);
        if similar > 0 {
            signals.push(Signal::SimilarImageDetected);
            details.similar_count = similar;
        }

        let forensics = check_metadata(&metadata, now, &self.tuning);
        details.location_distance_km = forensics.distance_km;
        if !forensics.issues.is_empty() {
            signals.extend(forensics.issues.iter().cloned());
            details.metadata_issues = forensics.issues;
        }

        let temporal = check_temporal(recent, now, &self.tuning);
        if !temporal.is_empty() {
            signals.extend(temporal.iter().cloned());
            details.temporal_flags = temporal;
        }

        let matched = match_patterns(&signals, &patterns);
        if !matched.is_empty() {
            signals.push(Signal::KnownFraudPattern);
            details.matched_patterns = matched;
        }

        let score = signals::score(&signals);

        let record = self
            .store
            .append_submission(NewSubmission {
                user_id: user_id.clone(),
                commitment_id: commitment_id.clone(),
                content_fingerprint: content,
                perceptual_fingerprint: perceptual,
                signals: signals.clone(),
                created_at: now,
            })
            .await?;

        if let Some(key) = PatternKey::learn_from(&signals) {
            // the submission is already recorded; a missed increment only under-weights the pattern
            match self
                .store
                .observe_pattern(&key, self.tuning.pattern_confidence_threshold, now)
                .await
            {
                Ok(pattern) => {
                    debug!(pattern = %key, hits = pattern.times_detected, "fraud pattern observed");
                    details.learned_pattern = Some(key.id());
                }
                Err(e) => warn!(pattern = %key, error = %e, "failed to update learned fraud pattern"),
            }
        }

        info!(
            user_id = %user_id,
            commitment_id = %commitment_id,
            submission_id = record.id,
            score,
            signals = signals.len(),
            "fraud analysis complete"
        );

        Ok(FraudResult {
            submission_id: record.id,
            score,
            signals,
            details,
        })
    }
}

/// Run the pixel decode off the async threads. A decoder that panics on
/// hostile bytes counts as a decode failure, not as a failed analysis.
async fn perceptual_or_empty<F>(decode: F) -> PerceptualFingerprint
where
    F: FnOnce() -> PerceptualFingerprint + Send + 'static,
{
    match tokio::task::spawn_blocking(decode).await {
        Ok(perceptual) => perceptual,
        Err(e) => {
            warn!(error = %e, "perceptual fingerprint task failed; similarity check skipped");
            PerceptualFingerprint::empty()
        }
    }
}

fn is_duplicate(content: &ContentFingerprint, history: &[SubmissionRecord]) -> bool {
    history.iter().any(|r| &r.content_fingerprint == content)
}

/// Prior submissions within `threshold` bits. Zero when no fingerprint could be taken.
fn similar_count(perceptual: &PerceptualFingerprint, history: &[SubmissionRecord], threshold: u32) -> usize {
    if perceptual.is_empty() {
        return 0;
    }
    history
        .iter()
        .filter_map(|r| perceptual.hamming_distance(&r.perceptual_fingerprint))
        .filter(|d| *d <= threshold)
        .count()
}

#[derive(Debug, Default, PartialEq)]
struct MetadataFindings {
    issues: Vec<Signal>,
    distance_km: Option<f64>,
}

fn check_metadata(metadata: &SubmissionMetadata, now: DateTime<Utc>, tuning: &FraudTuning) -> MetadataFindings {
    let mut findings = MetadataFindings::default();

    match metadata.timestamp.as_deref().map(str::trim) {
        None | Some("") => findings.issues.push(Signal::MissingTimestamp),
        Some(raw) => match parse_timestamp(raw) {
            None => findings.issues.push(Signal::InvalidTimestamp),
            Some(taken_at) => {
                let age = now - taken_at;
                if age > chrono::Duration::hours(tuning.max_photo_age_hours) {
                    findings.issues.push(Signal::OldPhoto);
                    findings.issues.push(Signal::ImageAge(age.num_hours()));
                }
            }
        },
    }

    if let (Some(gps), Some(expected)) = (metadata.gps_location, metadata.expected_location) {
        let distance = haversine_km(gps, expected);
        findings.distance_km = Some(distance);
        if distance > tuning.location_tolerance_km {
            findings.issues.push(Signal::LocationMismatch);
        }
    }

    findings
}

/// RFC 3339 first; naive ISO-8601 date-times and bare dates are read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn check_temporal(recent_submissions: usize, now: DateTime<Utc>, tuning: &FraudTuning) -> Vec<Signal> {
    let mut flags = Vec::new();
    if recent_submissions > tuning.rapid_submission_limit {
        flags.push(Signal::RapidSubmissions);
    }
    let hour = now.hour();
    if hour < tuning.unusual_hour_before || hour > tuning.unusual_hour_after {
        flags.push(Signal::UnusualHour);
    }
    flags
}

fn match_patterns(signals: &[Signal], patterns: &[LearnedPattern]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| p.key.is_subset_of(signals))
        .map(|p| p.key.id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fingerprint::tests::sample_png;
    use crate::geo::GeoPoint;
    use crate::mem_store::MemoryStore;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn fresh_metadata(now: DateTime<Utc>) -> SubmissionMetadata {
        SubmissionMetadata {
            timestamp: Some(now.to_rfc3339()),
            ..SubmissionMetadata::default()
        }
    }

    fn scorer(store: Arc<MemoryStore>, now: DateTime<Utc>) -> FraudScorer {
        FraudScorer::new(store, Arc::new(FixedClock::new(now)), FraudTuning::default())
    }

    #[tokio::test]
    async fn test_clean_first_submission() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store.clone(), noon());

        let result = scorer
            .analyze(sample_png(0).into(), "alice", "c1", &fresh_metadata(noon()))
            .await
            .unwrap();

        assert!(result.signals.is_empty());
        assert_eq!(result.score, 0.0);
        assert!(result.details.perceptual_fingerprint_available);

        let history = store.submissions_for_user("alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, result.submission_id);
        assert_eq!(history[0].verdict, None);
    }

    #[tokio::test]
    async fn test_resubmission_is_flagged_duplicate_and_similar() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store.clone(), noon());
        let meta = fresh_metadata(noon());
        let bytes: Arc<[u8]> = sample_png(0).into();

        scorer.analyze(bytes.clone(), "alice", "c1", &meta).await.unwrap();
        let second = scorer.analyze(bytes, "alice", "c1", &meta).await.unwrap();

        assert_eq!(
            second.signals,
            vec![Signal::DuplicateImage, Signal::SimilarImageDetected]
        );
        assert!((second.score - 0.70).abs() < 1e-9);
        assert_eq!(second.details.similar_count, 1);
        assert!(second.details.duplicate_hash.is_some());
        assert_eq!(
            second.details.learned_pattern.as_deref(),
            Some("duplicate_image+similar_image_detected")
        );
    }

    #[tokio::test]
    async fn test_duplicates_are_per_user() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store, noon());
        let meta = fresh_metadata(noon());
        let bytes: Arc<[u8]> = sample_png(0).into();

        scorer.analyze(bytes.clone(), "alice", "c1", &meta).await.unwrap();
        let bob = scorer.analyze(bytes, "bob", "c1", &meta).await.unwrap();
        assert!(bob.signals.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_evidence_skips_similarity() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store, noon());
        let meta = fresh_metadata(noon());

        scorer.analyze(Arc::from(&b"not an image"[..]), "alice", "c1", &meta).await.unwrap();
        let again = scorer
            .analyze(Arc::from(&b"not an image"[..]), "alice", "c1", &meta)
            .await
            .unwrap();

        assert_eq!(again.signals, vec![Signal::DuplicateImage]);
        assert!(!again.details.perceptual_fingerprint_available);
    }

    #[tokio::test]
    async fn test_learned_pattern_flags_later_submission() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store.clone(), noon());
        let old = SubmissionMetadata {
            timestamp: Some((noon() - chrono::Duration::hours(30)).to_rfc3339()),
            gps_location: Some(GeoPoint::new(0.0, 0.0)),
            expected_location: Some(GeoPoint::new(10.0, 10.0)),
        };

        let first = scorer.analyze(Arc::from(&b"a"[..]), "alice", "c1", &old).await.unwrap();
        assert_eq!(
            first.signals,
            vec![Signal::OldPhoto, Signal::ImageAge(30), Signal::LocationMismatch]
        );
        assert!((first.score - 0.60).abs() < 1e-9);

        // a different user with the same signal pair now also matches the learned pattern
        let second = scorer.analyze(Arc::from(&b"b"[..]), "bob", "c9", &old).await.unwrap();
        assert_eq!(second.signals.last(), Some(&Signal::KnownFraudPattern));
        assert_eq!(second.details.matched_patterns, vec!["location_mismatch+old_photo".to_string()]);
        assert_eq!(second.score, 1.0);

        let patterns = store.patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].times_detected, 2);
    }

    #[tokio::test]
    async fn test_rapid_submissions_after_three_in_window() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store, noon());
        let meta = fresh_metadata(noon());

        for i in 0..3u8 {
            let r = scorer.analyze(Arc::from(&[i][..]), "alice", "c1", &meta).await.unwrap();
            assert!(!r.signals.contains(&Signal::RapidSubmissions));
        }
        let fourth = scorer.analyze(Arc::from(&[9u8][..]), "alice", "c1", &meta).await.unwrap();
        assert!(!fourth.signals.contains(&Signal::RapidSubmissions));
        let fifth = scorer.analyze(Arc::from(&[10u8][..]), "alice", "c1", &meta).await.unwrap();
        assert!(fifth.signals.contains(&Signal::RapidSubmissions));
        assert_eq!(fifth.details.recent_submissions, 4);
    }

    #[tokio::test]
    async fn test_panicking_decoder_degrades_to_empty_fingerprint() {
        let perceptual = perceptual_or_empty(|| panic!("decoder blew up")).await;
        assert!(perceptual.is_empty());

        let ok = perceptual_or_empty(|| PerceptualFingerprint::from_bytes(vec![1, 2])).await;
        assert_eq!(ok.as_bytes(), &[1, 2]);
    }

    #[tokio::test]
    async fn test_rapid_window_slides() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(noon()));
        let scorer = FraudScorer::new(store, clock.clone(), FraudTuning::default());

        for i in 0..4u8 {
            scorer
                .analyze(Arc::from(&[i][..]), "alice", "c1", &fresh_metadata(clock.now()))
                .await
                .unwrap();
        }
        let crowded = scorer
            .analyze(Arc::from(&[20u8][..]), "alice", "c1", &fresh_metadata(clock.now()))
            .await
            .unwrap();
        assert!(crowded.signals.contains(&Signal::RapidSubmissions));

        clock.advance(chrono::Duration::minutes(61));
        let later = scorer
            .analyze(Arc::from(&[21u8][..]), "alice", "c1", &fresh_metadata(clock.now()))
            .await
            .unwrap();
        assert!(later.signals.is_empty());
        assert_eq!(later.details.recent_submissions, 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_submissions_flag_exactly_one_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store, noon());
        let meta = fresh_metadata(noon());
        let bytes: Arc<[u8]> = Arc::from(&b"same bytes"[..]);

        let (a, b) = tokio::join!(
            scorer.analyze(bytes.clone(), "alice", "c1", &meta),
            scorer.analyze(bytes.clone(), "alice", "c1", &meta),
        );
        let flagged = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|r| r.signals.contains(&Signal::DuplicateImage))
            .count();
        assert_eq!(flagged, 1);
    }

    #[test]
    fn test_metadata_missing_and_invalid() {
        let tuning = FraudTuning::default();
        let missing = check_metadata(&SubmissionMetadata::default(), noon(), &tuning);
        assert_eq!(missing.issues, vec![Signal::MissingTimestamp]);

        let blank = SubmissionMetadata {
            timestamp: Some("  ".into()),
            ..SubmissionMetadata::default()
        };
        assert_eq!(check_metadata(&blank, noon(), &tuning).issues, vec![Signal::MissingTimestamp]);

        let garbage = SubmissionMetadata {
            timestamp: Some("yesterday-ish".into()),
            ..SubmissionMetadata::default()
        };
        assert_eq!(check_metadata(&garbage, noon(), &tuning).issues, vec![Signal::InvalidTimestamp]);
    }

    #[test]
    fn test_metadata_age_uses_whole_hours() {
        let tuning = FraudTuning::default();
        let meta = SubmissionMetadata {
            timestamp: Some("2026-03-09T09:30:00".into()),
            ..SubmissionMetadata::default()
        };
        let findings = check_metadata(&meta, noon(), &tuning);
        assert_eq!(findings.issues, vec![Signal::OldPhoto, Signal::ImageAge(26)]);

        let exactly_a_day = SubmissionMetadata {
            timestamp: Some("2026-03-09T12:00:00Z".into()),
            ..SubmissionMetadata::default()
        };
        assert!(check_metadata(&exactly_a_day, noon(), &tuning).issues.is_empty());
    }

    #[test]
    fn test_location_within_tolerance() {
        let tuning = FraudTuning::default();
        let meta = SubmissionMetadata {
            timestamp: Some(noon().to_rfc3339()),
            gps_location: Some(GeoPoint::new(0.0, 0.0)),
            expected_location: Some(GeoPoint::new(0.2, 0.0)),
        };
        let findings = check_metadata(&meta, noon(), &tuning);
        assert!(findings.issues.is_empty());
        let d = findings.distance_km.unwrap();
        assert!(d > 20.0 && d < 25.0);
    }

    #[test]
    fn test_unusual_hour() {
        let tuning = FraudTuning::default();
        let early = Utc.with_ymd_and_hms(2026, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(check_temporal(0, early, &tuning), vec![Signal::UnusualHour]);
        let late = Utc.with_ymd_and_hms(2026, 3, 10, 23, 30, 0).unwrap();
        assert!(check_temporal(0, late, &tuning).is_empty());
        assert_eq!(check_temporal(4, noon(), &tuning), vec![Signal::RapidSubmissions]);
    }
}
