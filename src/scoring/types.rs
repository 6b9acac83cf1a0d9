use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probability update made by a forecaster on a question.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedEstimate {
    pub probability: f64,
    pub observed_at: DateTime<Utc>,
}

impl TimedEstimate {
    pub fn new(probability: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            probability,
            observed_at,
        }
    }
}

/// Interval a forecast was open for: creation to resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreWindow {
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
}

impl ScoreWindow {
    pub fn new(opens_at: DateTime<Utc>, closes_at: DateTime<Utc>) -> Result<Self, ValidationError> {
        if closes_at <= opens_at {
            return Err(ValidationError::InvalidWindow {
                opens_at,
                closes_at,
            });
        }

        Ok(Self {
            opens_at,
            closes_at,
        })
    }

    pub fn opens_at(&self) -> DateTime<Utc> {
        self.opens_at
    }

    pub fn closes_at(&self) -> DateTime<Utc> {
        self.closes_at
    }

    /// Clamp an instant into the window.
    pub(crate) fn clamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.max(self.opens_at).min(self.closes_at)
    }
}

/// The six scores computed for one (forecaster, question) sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(rename = "brier_score")]
    pub brier: f64,
    #[serde(rename = "log2_score")]
    pub log2: f64,
    #[serde(rename = "logn_score")]
    pub logn: f64,
    #[serde(rename = "brier_score_time_weighted")]
    pub brier_time_weighted: f64,
    #[serde(rename = "log2_score_time_weighted")]
    pub log2_time_weighted: f64,
    #[serde(rename = "logn_score_time_weighted")]
    pub logn_time_weighted: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Empty estimate sequence")]
    EmptySequence,

    #[error("Probability out of range (0, 1): {0}")]
    ProbabilityOutOfRange(f64),

    #[error("Invalid score window: closes at {closes_at} which is not after {opens_at}")]
    InvalidWindow {
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    },
}
