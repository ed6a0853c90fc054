use crate::decision::Verdict;
use crate::error::{StoreError, StoreResult};
use crate::evidence::{LearnedPattern, NewSubmission, SubmissionRecord, UserBehaviorProfile};
use crate::signals::PatternKey;
use crate::store::{ProfileStore, SignalStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::debug;

const SUBMISSIONS_TREE: &str = "submissions";
const PATTERNS_TREE: &str = "fraud_patterns";
const PROFILES_TREE: &str = "user_profiles";

/// Durable store backed by `sled`.
///
/// Layout:
/// - `submissions`: `len(user) | user | id (big endian)` -> JSON record.
///   The length prefix keeps one user's prefix scan from reaching into
///   another user whose id happens to extend it; the big-endian id keeps
///   each user's history in insertion order.
/// - `fraud_patterns`: pattern id (`a+b`) -> JSON pattern, updated by
///   compare-and-swap so increments are atomic per key without a table lock.
/// - `user_profiles`: user id -> JSON profile.
pub struct SledStore {
    db: sled::Db,
    submissions: sled::Tree,
    patterns: sled::Tree,
    profiles: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        Ok(Self {
            submissions: db.open_tree(SUBMISSIONS_TREE)?,
            patterns: db.open_tree(PATTERNS_TREE)?,
            profiles: db.open_tree(PROFILES_TREE)?,
            db,
        })
    }

    fn user_prefix(user_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + user_id.len() + 8);
        key.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
        key.extend_from_slice(user_id.as_bytes());
        key
    }

    fn submission_key(user_id: &str, id: u64) -> Vec<u8> {
        let mut key = Self::user_prefix(user_id);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}

#[async_trait]
impl SignalStore for SledStore {
    /// Ids come from `Db::generate_id`, which is monotonic across restarts.
    /// The record is flushed before returning.
    async fn append_submission(&self, submission: NewSubmission) -> StoreResult<SubmissionRecord> {
        let id = self.db.generate_id()?;
        let record = submission.into_record(id);

        let payload = serde_json::to_vec(&record)?;
        self.submissions
            .insert(Self::submission_key(&record.user_id, id), payload)?;
        // duplicate detection depends on this record surviving a crash
        self.db.flush_async().await?;

        debug!(user_id = %record.user_id, submission_id = id, "submission appended");
        Ok(record)
    }

    /// Rewrites the stored record with its verdict and flushes.
    async fn set_verdict(&self, user_id: &str, submission_id: u64, verdict: Verdict) -> StoreResult<()> {
        let key = Self::submission_key(user_id, submission_id);
        let current = self
            .submissions
            .get(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("submission {submission_id} of {user_id}")))?;

        let mut record: SubmissionRecord = serde_json::from_slice(&current)?;
        record.verdict = Some(verdict);
        self.submissions.insert(key, serde_json::to_vec(&record)?)?;
        // approval counts and escalation read verdicts back after a restart
        self.db.flush_async().await?;
        debug!(user_id, submission_id, verdict = record.verdict_label(), "verdict recorded");
        Ok(())
    }

    /// One prefix scan; records come back in id order.
    async fn submissions_for_user(&self, user_id: &str) -> StoreResult<Vec<SubmissionRecord>> {
        self.submissions
            .scan_prefix(Self::user_prefix(user_id))
            .values()
            .map(|value| {
                let value = value?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    async fn patterns(&self) -> StoreResult<Vec<LearnedPattern>> {
        self.patterns
            .iter()
            .values()
            .map(|value| {
                let value = value?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// Read, modify, then compare-and-swap; a lost race rereads and retries.
    async fn observe_pattern(
        &self,
        key: &PatternKey,
        confidence_threshold: f64,
        now: DateTime<Utc>,
    ) -> StoreResult<LearnedPattern> {
        let id = key.id();

        loop {
            let current = self.patterns.get(id.as_bytes())?;
            let next = match &current {
                Some(bytes) => {
                    let mut pattern: LearnedPattern = serde_json::from_slice(bytes)?;
                    pattern.observed_again(now);
                    pattern
                }
                None => LearnedPattern::first_seen(key.clone(), confidence_threshold, now),
            };
            let payload = serde_json::to_vec(&next)?;

            match self
                .patterns
                .compare_and_swap(id.as_bytes(), current, Some(payload))?
            {
                Ok(()) => return Ok(next),
                Err(_) => {
                    debug!(pattern = %id, "concurrent pattern update; retrying");
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl ProfileStore for SledStore {
    async fn load_profile(&self, user_id: &str) -> StoreResult<Option<UserBehaviorProfile>> {
        match self.profiles.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrites and flushes, so a restart never rolls a stake back.
    async fn save_profile(&self, profile: &UserBehaviorProfile) -> StoreResult<()> {
        self.profiles
            .insert(profile.user_id.as_bytes(), serde_json::to_vec(profile)?)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{content_fingerprint, PerceptualFingerprint};

    fn submission(user: &str) -> NewSubmission {
        NewSubmission {
            user_id: user.into(),
            commitment_id: "c1".into(),
            content_fingerprint: content_fingerprint(user.as_bytes()),
            perceptual_fingerprint: PerceptualFingerprint::empty(),
            signals: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_writes_are_durable_on_return() {
        let store = SledStore::temporary().unwrap();

        let record = store.append_submission(submission("alice")).await.unwrap();
        assert_eq!(store.db.flush().unwrap(), 0);

        store
            .set_verdict("alice", record.id, Verdict::Approved)
            .await
            .unwrap();
        // nothing left for an explicit flush to write
        assert_eq!(store.db.flush().unwrap(), 0);

        store
            .save_profile(&UserBehaviorProfile::new("alice", 10.0))
            .await
            .unwrap();
        assert_eq!(store.db.flush().unwrap(), 0);
    }
}
