use crate::decision::Verdict;
use crate::error::{StoreError, StoreResult};
use crate::evidence::{LearnedPattern, NewSubmission, SubmissionRecord, UserBehaviorProfile};
use crate::signals::PatternKey;
use crate::store::{ProfileStore, SignalStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-memory backend for tests and development.
///
/// Each user's history sits in its own slot, so appends and verdict updates
/// for different users never wait on each other. Learned patterns are
/// slotted the same way, one mutex per key.
pub struct MemoryStore {
    next_id: AtomicU64,
    submissions: RwLock<HashMap<String, Arc<RwLock<Vec<SubmissionRecord>>>>>,
    patterns: RwLock<HashMap<String, Arc<Mutex<LearnedPattern>>>>,
    profiles: RwLock<HashMap<String, UserBehaviorProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            submissions: RwLock::new(HashMap::new()),
            patterns: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// The user's history slot, if it exists. The map lock is released before
    /// the caller touches the slot.
    async fn history(&self, user_id: &str) -> Option<Arc<RwLock<Vec<SubmissionRecord>>>> {
        self.submissions.read().await.get(user_id).cloned()
    }

    async fn history_or_insert(&self, user_id: &str) -> Arc<RwLock<Vec<SubmissionRecord>>> {
        if let Some(slot) = self.history(user_id).await {
            return slot;
        }
        self.submissions
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    /// Ids come from a process-wide counter, so they are unique and
    /// increasing across users even though each user has a separate slot.
    async fn append_submission(&self, submission: NewSubmission) -> StoreResult<SubmissionRecord> {
        let slot = self.history_or_insert(&submission.user_id).await;
        let mut history = slot.write().await;
        // allocate under the slot lock so a user's history stays in id order
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = submission.into_record(id);
        history.push(record.clone());
        Ok(record)
    }

    async fn set_verdict(&self, user_id: &str, submission_id: u64, verdict: Verdict) -> StoreResult<()> {
        let not_found = || StoreError::NotFound(format!("submission {submission_id} of {user_id}"));
        let slot = self.history(user_id).await.ok_or_else(not_found)?;
        let mut history = slot.write().await;
        let record = history
            .iter_mut()
            .find(|r| r.id == submission_id)
            .ok_or_else(not_found)?;
        record.verdict = Some(verdict);
        Ok(())
    }

    /// Snapshot of the user's history, oldest first.
    async fn submissions_for_user(&self, user_id: &str) -> StoreResult<Vec<SubmissionRecord>> {
        match self.history(user_id).await {
            Some(slot) => Ok(slot.read().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of every learned pattern. Slots are copied out one at a time,
    /// so the result is not a single consistent cut.
    async fn patterns(&self) -> StoreResult<Vec<LearnedPattern>> {
        let slots: Vec<Arc<Mutex<LearnedPattern>>> =
            self.patterns.read().await.values().cloned().collect();

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        Ok(out)
    }

    /// Create the pattern on first sight or bump its counter. Only the insert
    /// takes the map write lock; increments lock the pattern's own slot.
    async fn observe_pattern(
        &self,
        key: &PatternKey,
        confidence_threshold: f64,
        now: DateTime<Utc>,
    ) -> StoreResult<LearnedPattern> {
        let id = key.id();

        let existing = self.patterns.read().await.get(&id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut patterns = self.patterns.write().await;
                match patterns.entry(id) {
                    // lost the insert race; fall through to increment
                    Entry::Occupied(slot) => slot.get().clone(),
                    Entry::Vacant(slot) => {
                        let pattern = LearnedPattern::first_seen(key.clone(), confidence_threshold, now);
                        slot.insert(Arc::new(Mutex::new(pattern.clone())));
                        return Ok(pattern);
                    }
                }
            }
        };

        let mut pattern = slot.lock().await;
        pattern.observed_again(now);
        Ok(pattern.clone())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    /// `None` until the first save for this user.
    async fn load_profile(&self, user_id: &str) -> StoreResult<Option<UserBehaviorProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    /// Replaces any stored profile for the same user.
    async fn save_profile(&self, profile: &UserBehaviorProfile) -> StoreResult<()> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}
