use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub classifier_url: Option<String>,
    pub classifier_timeout: Duration,
    pub ledger_url: Option<String>,
    pub ledger_timeout: Duration,
    pub registry_timeout: Duration,
    pub sink_timeout: Duration,
    pub goals_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a number")?,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/db/trust_db".to_string()),
            classifier_url: env::var("CLASSIFIER_URL").ok(),
            classifier_timeout: millis_from_env("CLASSIFIER_TIMEOUT_MS", 30_000)?,
            ledger_url: env::var("LEDGER_URL").ok(),
            ledger_timeout: millis_from_env("LEDGER_TIMEOUT_MS", 10_000)?,
            registry_timeout: millis_from_env("REGISTRY_TIMEOUT_MS", 2_000)?,
            sink_timeout: millis_from_env("SINK_TIMEOUT_MS", 2_000)?,
            goals_path: env::var("GOALS_PATH").ok().map(PathBuf::from),
        })
    }

    /// Timeouts handed to the engine for its external calls.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            classifier: self.classifier_timeout,
            ledger: self.ledger_timeout,
            registry: self.registry_timeout,
            sink: self.sink_timeout,
        }
    }
}

fn millis_from_env(name: &str, default: u64) -> anyhow::Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("{name} must be a number of milliseconds"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

/// Upper bounds on every external call the engine makes.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub classifier: Duration,
    pub ledger: Duration,
    pub registry: Duration,
    pub sink: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            classifier: Duration::from_secs(30),
            ledger: Duration::from_secs(10),
            registry: Duration::from_secs(2),
            sink: Duration::from_secs(2),
        }
    }
}

/// Thresholds of the fraud scoring engine.
#[derive(Debug, Clone)]
pub struct FraudTuning {
    /// Max Hamming distance (bits) for two perceptual fingerprints to count as similar.
    pub similarity_threshold_bits: u32,
    pub max_photo_age_hours: i64,
    pub location_tolerance_km: f64,
    pub rapid_window: chrono::Duration,
    /// More than this many submissions in the window is flagged.
    pub rapid_submission_limit: usize,
    /// Submissions with server hour below this are unusual.
    pub unusual_hour_before: u32,
    /// Submissions with server hour above this are unusual.
    pub unusual_hour_after: u32,
    pub pattern_confidence_threshold: f64,
}

impl Default for FraudTuning {
    fn default() -> Self {
        Self {
            similarity_threshold_bits: 5,
            max_photo_age_hours: 24,
            location_tolerance_km: 50.0,
            rapid_window: chrono::Duration::hours(1),
            rapid_submission_limit: 3,
            unusual_hour_before: 5,
            unusual_hour_after: 23,
            pattern_confidence_threshold: 0.7,
        }
    }
}

/// Bounds and multipliers of the adaptive stake controller.
#[derive(Debug, Clone)]
pub struct StakeTuning {
    pub floor: f64,
    pub ceiling: f64,
    /// Stake of a freshly created profile.
    pub default_stake: f64,
    /// Recommendation for a user with no history.
    pub new_user_recommendation: f64,
    pub streak_threshold: u32,
    pub streak_multiplier: f64,
    pub compassion_after_failures: u32,
    pub compassion_multiplier: f64,
    pub ultimatum_after_failures: u32,
    pub strong_success_rate: f64,
    pub strong_multiplier: f64,
    pub weak_success_rate: f64,
    pub weak_multiplier: f64,
    /// Deadline rule applies when less than this fraction of the commitment remains.
    pub deadline_remaining_fraction: f64,
}

impl Default for StakeTuning {
    fn default() -> Self {
        Self {
            floor: 10.0,
            ceiling: 500.0,
            default_stake: 10.0,
            new_user_recommendation: 20.0,
            streak_threshold: 3,
            streak_multiplier: 1.2,
            compassion_after_failures: 2,
            compassion_multiplier: 0.8,
            ultimatum_after_failures: 3,
            strong_success_rate: 0.8,
            strong_multiplier: 1.5,
            weak_success_rate: 0.3,
            weak_multiplier: 0.7,
            deadline_remaining_fraction: 0.25,
        }
    }
}

impl StakeTuning {
    pub fn clamp(&self, stake: f64) -> f64 {
        stake.clamp(self.floor, self.ceiling)
    }
}
