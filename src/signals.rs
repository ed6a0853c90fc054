//! Fraud signals, their weights, and how a signal set becomes a score.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named, discrete fraud indicator produced by one of the five check families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Signal {
    DuplicateImage,
    SimilarImageDetected,
    OldPhoto,
    /// Whole hours since the claimed capture time. Informational only.
    ImageAge(i64),
    MissingTimestamp,
    InvalidTimestamp,
    LocationMismatch,
    RapidSubmissions,
    UnusualHour,
    KnownFraudPattern,
}

impl Signal {
    pub fn name(&self) -> String {
        match self {
            Signal::DuplicateImage => "duplicate_image".to_string(),
            Signal::SimilarImageDetected => "similar_image_detected".to_string(),
            Signal::OldPhoto => "old_photo".to_string(),
            Signal::ImageAge(hours) => format!("image_age_{hours}h"),
            Signal::MissingTimestamp => "missing_timestamp".to_string(),
            Signal::InvalidTimestamp => "invalid_timestamp".to_string(),
            Signal::LocationMismatch => "location_mismatch".to_string(),
            Signal::RapidSubmissions => "rapid_submissions".to_string(),
            Signal::UnusualHour => "unusual_hour".to_string(),
            Signal::KnownFraudPattern => "known_fraud_pattern".to_string(),
        }
    }

    /// Additive score contribution.
    ///
    /// The age signal rides along with `old_photo` and carries no weight of
    /// its own; `invalid_timestamp` has no tuned weight and takes the default.
    pub fn weight(&self) -> f64 {
        match self {
            Signal::DuplicateImage => 0.40,
            Signal::SimilarImageDetected => 0.30,
            Signal::OldPhoto => 0.35,
            Signal::LocationMismatch => 0.25,
            Signal::RapidSubmissions => 0.20,
            Signal::KnownFraudPattern => 0.50,
            Signal::MissingTimestamp => 0.10,
            Signal::UnusualHour => 0.05,
            Signal::ImageAge(_) => 0.0,
            Signal::InvalidTimestamp => DEFAULT_WEIGHT,
        }
    }

    /// Whether this signal may take part in a learned pattern key.
    pub fn is_learnable(&self) -> bool {
        !matches!(self, Signal::ImageAge(_) | Signal::KnownFraudPattern)
    }
}

pub const DEFAULT_WEIGHT: f64 = 0.15;

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl fmt::Display for UnknownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal: {}", self.0)
    }
}

impl std::error::Error for UnknownSignal {}

impl FromStr for Signal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let signal = match s {
            "duplicate_image" => Signal::DuplicateImage,
            "similar_image_detected" => Signal::SimilarImageDetected,
            "old_photo" => Signal::OldPhoto,
            "missing_timestamp" => Signal::MissingTimestamp,
            "invalid_timestamp" => Signal::InvalidTimestamp,
            "location_mismatch" => Signal::LocationMismatch,
            "rapid_submissions" => Signal::RapidSubmissions,
            "unusual_hour" => Signal::UnusualHour,
            "known_fraud_pattern" => Signal::KnownFraudPattern,
            other => {
                let hours = other
                    .strip_prefix("image_age_")
                    .and_then(|rest| rest.strip_suffix('h'))
                    .and_then(|n| n.parse::<i64>().ok())
                    .ok_or_else(|| UnknownSignal(other.to_string()))?;
                Signal::ImageAge(hours)
            }
        };
        Ok(signal)
    }
}

impl From<Signal> for String {
    fn from(s: Signal) -> Self {
        s.name()
    }
}

impl TryFrom<String> for Signal {
    type Error = UnknownSignal;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Sum of weights, capped at 1.0. Never decreases when signals are added.
pub fn score(signals: &[Signal]) -> f64 {
    signals.iter().map(Signal::weight).sum::<f64>().min(1.0)
}

/// Order-independent, deduplicated set of signals identifying a learned pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternKey(Vec<Signal>);

impl PatternKey {
    /// Canonicalizes by sorting on signal name and dropping duplicates.
    pub fn new(mut signals: Vec<Signal>) -> Self {
        signals.sort_by_key(Signal::name);
        signals.dedup();
        Self(signals)
    }

    /// Key learned from a submission: its first two learnable signals.
    pub fn learn_from(signals: &[Signal]) -> Option<Self> {
        let learnable: Vec<Signal> = signals
            .iter()
            .filter(|s| s.is_learnable())
            .take(2)
            .cloned()
            .collect();
        if learnable.len() < 2 {
            return None;
        }
        let key = Self::new(learnable);
        // two copies of one signal collapse to a single-signal set
        (key.0.len() == 2).then_some(key)
    }

    /// Storage identifier, e.g. `duplicate_image+old_photo`.
    pub fn id(&self) -> String {
        self.0.iter().map(Signal::name).collect::<Vec<_>>().join("+")
    }

    /// True when every signal of this key is present in `observed`.
    pub fn is_subset_of(&self, observed: &[Signal]) -> bool {
        self.0.iter().all(|s| observed.contains(s))
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
