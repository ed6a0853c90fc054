//! Adaptive stake controller.
//!
//! Owns the per-user behavioral profile: every verdict moves it through
//! exactly one of [`StakeController::record_success`] or
//! [`StakeController::record_failure`], each a read-compute-persist step
//! serialized per user.

use crate::clock::Clock;
use crate::collaborators::{emit_best_effort, AuditEvent, EventSink, GoalInfo, GoalRegistry, StakeReason};
use crate::config::{StakeTuning, Timeouts};
use crate::error::Result;
use crate::evidence::UserBehaviorProfile;
use crate::locks::KeyedLocks;
use crate::store::{ProfileStore, SignalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one profile mutation, for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileChange {
    pub old_stake: f64,
    pub new_stake: f64,
    /// Set only when the stake actually moved.
    pub reason: Option<StakeReason>,
    pub profile: UserBehaviorProfile,
}

impl ProfileChange {
    pub fn stake_changed(&self) -> bool {
        self.reason.is_some()
    }
}

impl UserBehaviorProfile {
    /// Success path: streak and lifetime count up, recent failures and
    /// compassion cleared, stake grows on a streak (capped at the ceiling).
    pub fn apply_success(&mut self, now: DateTime<Utc>, tuning: &StakeTuning) -> Option<StakeReason> {
        self.current_streak += 1;
        self.total_successes += 1;
        self.recent_failures = 0;
        self.compassion_mode = false;
        self.last_success_at = Some(now);

        if self.current_streak >= tuning.streak_threshold {
            return self.move_stake(self.current_stake * tuning.streak_multiplier, tuning, StakeReason::StreakBonus);
        }
        None
    }

    /// Failure path: streak reset, failure counts up; from the second recent
    /// failure on, compassion mode and a reduced stake (never below the floor).
    pub fn apply_failure(&mut self, now: DateTime<Utc>, tuning: &StakeTuning) -> Option<StakeReason> {
        self.current_streak = 0;
        self.total_failures += 1;
        self.recent_failures += 1;
        self.last_failure_at = Some(now);

        if self.recent_failures >= tuning.compassion_after_failures {
            self.compassion_mode = true;
            return self.move_stake(
                self.current_stake * tuning.compassion_multiplier,
                tuning,
                StakeReason::CompassionReduction,
            );
        }
        None
    }

    fn move_stake(&mut self, target: f64, tuning: &StakeTuning, reason: StakeReason) -> Option<StakeReason> {
        let next = tuning.clamp(target);
        if (next - self.current_stake).abs() < f64::EPSILON {
            return None;
        }
        self.current_stake = next;
        Some(reason)
    }

    /// Personalized nudge from the profile's history.
    pub fn motivational_message(&self) -> String {
        if self.current_streak >= 5 {
            format!("{}-day streak. You're unstoppable.", self.current_streak)
        } else if self.recent_failures >= 2 && self.compassion_mode {
            "I see you're struggling. Let's take it one day at a time.".to_string()
        } else if self.total_successes > 10 {
            format!("You've proven yourself {} times. Keep going.", self.total_successes)
        } else {
            "Show me what you've got.".to_string()
        }
    }
}

/// Read-only summary of a user's standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub current_streak: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub current_stake: f64,
    pub success_rate: f64,
    pub recommended_stake: f64,
    pub compassion_mode: bool,
    pub message: String,
}

pub struct StakeController {
    profiles: Arc<dyn ProfileStore>,
    history: Arc<dyn SignalStore>,
    registry: Arc<dyn GoalRegistry>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    tuning: StakeTuning,
    registry_timeout: Duration,
    sink_timeout: Duration,
    locks: KeyedLocks,
}

impl StakeController {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn SignalStore>,
        registry: Arc<dyn GoalRegistry>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        tuning: StakeTuning,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            profiles,
            history,
            registry,
            sink,
            clock,
            tuning,
            registry_timeout: timeouts.registry,
            sink_timeout: timeouts.sink,
            locks: KeyedLocks::new(),
        }
    }

    /// Stored profile, or the defaults for a user never seen before.
    pub async fn profile(&self, user_id: &str) -> Result<UserBehaviorProfile> {
        Ok(self
            .profiles
            .load_profile(user_id)
            .await?
            .unwrap_or_else(|| UserBehaviorProfile::new(user_id, self.tuning.default_stake)))
    }

    pub async fn record_success(&self, user_id: &str) -> Result<ProfileChange> {
        let tuning = self.tuning.clone();
        self.mutate(user_id, move |profile, now| profile.apply_success(now, &tuning))
            .await
    }

    pub async fn record_failure(&self, user_id: &str) -> Result<ProfileChange> {
        let tuning = self.tuning.clone();
        self.mutate(user_id, move |profile, now| profile.apply_failure(now, &tuning))
            .await
    }

    async fn mutate<F>(&self, user_id: &str, apply: F) -> Result<ProfileChange>
    where
        F: FnOnce(&mut UserBehaviorProfile, DateTime<Utc>) -> Option<StakeReason>,
    {
        let _guard = self.locks.acquire(user_id).await;

        let mut profile = self.profile(user_id).await?;
        let old_stake = profile.current_stake;
        let reason = apply(&mut profile, self.clock.now());
        self.profiles.save_profile(&profile).await?;

        let change = ProfileChange {
            old_stake,
            new_stake: profile.current_stake,
            reason,
            profile,
        };

        if let Some(reason) = reason {
            info!(
                user_id = %user_id,
                old_stake = change.old_stake,
                new_stake = change.new_stake,
                reason = reason.as_str(),
                "stake adjusted"
            );
            let event = AuditEvent::StakeAdjustment {
                user_id: user_id.to_string(),
                old_stake: change.old_stake,
                new_stake: change.new_stake,
                reason,
            };
            emit_best_effort(self.sink.as_ref(), &event, self.sink_timeout).await;
        }

        Ok(change)
    }

    /// Stake to suggest for the user's next commitment.
    pub async fn recommended_stake(&self, user_id: &str) -> Result<f64> {
        let profile = self.profile(user_id).await?;
        Ok(self.recommend(&profile))
    }

    fn recommend(&self, profile: &UserBehaviorProfile) -> f64 {
        let t = &self.tuning;
        match profile.success_rate() {
            None => t.new_user_recommendation,
            Some(rate) if rate > t.strong_success_rate => {
                (profile.current_stake * t.strong_multiplier).min(t.ceiling)
            }
            Some(rate) if rate < t.weak_success_rate => {
                (profile.current_stake * t.weak_multiplier).max(t.floor)
            }
            Some(_) => profile.current_stake,
        }
    }

    /// Whether the user's trajectory on this commitment warrants an ultimatum.
    ///
    /// Recent failures alone can trigger it. The deadline rule needs the goal
    /// registry; if the registry is slow, failing, or does not know the
    /// commitment, that rule is skipped rather than reported.
    pub async fn should_escalate(&self, user_id: &str, commitment_id: &str) -> Result<bool> {
        let profile = self.profile(user_id).await?;
        if profile.recent_failures >= self.tuning.ultimatum_after_failures {
            return Ok(true);
        }

        let goal = match tokio::time::timeout(self.registry_timeout, self.registry.lookup(commitment_id)).await {
            Ok(Ok(Some(goal))) => goal,
            Ok(Ok(None)) => {
                debug!(commitment_id, "commitment unknown to goal registry; deadline check skipped");
                return Ok(false);
            }
            Ok(Err(e)) => {
                warn!(commitment_id, error = %e, "goal registry lookup failed; deadline check skipped");
                return Ok(false);
            }
            Err(_) => {
                warn!(commitment_id, "goal registry lookup timed out; deadline check skipped");
                return Ok(false);
            }
        };

        let approved = self.history.approved_count(user_id, commitment_id).await?;
        Ok(behind_near_deadline(&goal, approved, self.clock.now(), &self.tuning))
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let profile = self.profile(user_id).await?;
        Ok(UserStats {
            user_id: profile.user_id.clone(),
            current_streak: profile.current_streak,
            total_successes: profile.total_successes,
            total_failures: profile.total_failures,
            current_stake: profile.current_stake,
            success_rate: profile.success_rate().unwrap_or(0.0),
            recommended_stake: self.recommend(&profile),
            compassion_mode: profile.compassion_mode,
            message: profile.motivational_message(),
        })
    }
}

/// Less than the deadline window of the commitment remains and the user has
/// completed less than half of what the elapsed time calls for.
/// Commitments with no duration never qualify.
fn behind_near_deadline(goal: &GoalInfo, approved: usize, now: DateTime<Utc>, tuning: &StakeTuning) -> bool {
    let total = (goal.ends_at - goal.starts_at).num_seconds();
    if total <= 0 || goal.required_submissions == 0 {
        return false;
    }

    let elapsed = (now - goal.starts_at).num_seconds().clamp(0, total) as f64 / total as f64;
    let remaining = 1.0 - elapsed;
    let completion = approved as f64 / goal.required_submissions as f64;

    remaining < tuning.deadline_remaining_fraction && completion < elapsed / 2.0
}
