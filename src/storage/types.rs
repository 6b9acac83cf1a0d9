use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Yes,
    No,
}

impl Resolution {
    /// Parse the stored resolution column. `"-"`, NULL and anything else
    /// unrecognized mean the forecast cannot be scored.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            Some("1") => Some(Resolution::Yes),
            Some("0") => Some(Resolution::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Yes => "1",
            Resolution::No => "0",
        }
    }

    pub fn outcome(&self) -> bool {
        matches!(self, Resolution::Yes)
    }
}

impl From<bool> for Resolution {
    fn from(outcome: bool) -> Self {
        if outcome {
            Resolution::Yes
        } else {
            Resolution::No
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: Option<i64>,
    pub question: String,
    pub category: Option<String>,
    pub created: DateTime<Utc>,
    /// When new estimates stop being accepted. Not used for scoring.
    pub closing_date: Option<DateTime<Utc>>,
    pub resolved: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

/// A resolved outcome ready to be scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutcome {
    pub outcome: bool,
    pub resolved_at: DateTime<Utc>,
}

/// A stored score row whose values should be recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreToBackfill {
    pub score_id: i64,
    pub user_id: i64,
    pub forecast_id: i64,
    pub forecast_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFilters {
    pub user_id: Option<i64>,
    pub forecast_id: Option<i64>,
    pub category: Option<String>,
}
