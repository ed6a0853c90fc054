//! Persistence boundary of the trust engine.
//!
//! The engine is the only writer. Both traits are object-safe so the engine
//! can hold `Arc<dyn ...>` and tests can swap in the in-memory backend.

use crate::decision::Verdict;
use crate::error::StoreResult;
use crate::evidence::{LearnedPattern, NewSubmission, SubmissionRecord, UserBehaviorProfile};
use crate::signals::PatternKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Submission history plus the learned-pattern table.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a submission; returns the stored record with its assigned id.
    async fn append_submission(&self, submission: NewSubmission) -> StoreResult<SubmissionRecord>;

    /// Back-fill the verdict of a pending submission.
    async fn set_verdict(&self, user_id: &str, submission_id: u64, verdict: Verdict) -> StoreResult<()>;

    /// All submissions of one user, oldest first.
    async fn submissions_for_user(&self, user_id: &str) -> StoreResult<Vec<SubmissionRecord>>;

    /// Submissions of one user created strictly after `since`.
    async fn count_submissions_since(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<usize> {
        let records = self.submissions_for_user(user_id).await?;
        Ok(records.iter().filter(|r| r.created_at > since).count())
    }

    /// Approved submissions of one user against one commitment.
    async fn approved_count(&self, user_id: &str, commitment_id: &str) -> StoreResult<usize> {
        let records = self.submissions_for_user(user_id).await?;
        Ok(records
            .iter()
            .filter(|r| r.commitment_id == commitment_id && r.verdict == Some(Verdict::Approved))
            .count())
    }

    async fn patterns(&self) -> StoreResult<Vec<LearnedPattern>>;

    /// Increment the pattern's hit count, inserting it on first sight.
    ///
    /// Must be atomic per key; concurrent observations of the same key must
    /// not lose increments, and different keys must not block each other.
    async fn observe_pattern(
        &self,
        key: &PatternKey,
        confidence_threshold: f64,
        now: DateTime<Utc>,
    ) -> StoreResult<LearnedPattern>;
}

/// Keyed store of behavioral profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> StoreResult<Option<UserBehaviorProfile>>;

    async fn save_profile(&self, profile: &UserBehaviorProfile) -> StoreResult<()>;
}
