use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use crate::scoring::types::ScoreResult;

/// A persisted score row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: Option<i64>,
    pub user_id: i64,
    pub forecast_id: i64,
    #[serde(flatten)]
    pub scores: ScoreResult,
    pub created_at: DateTime<Utc>,
}

/// Platform-wide score averages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverallScores {
    #[serde(flatten)]
    pub scores: ScoreResult,
    pub total_users: usize,
    pub total_forecasts: usize,
}

/// Score averages for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserScores {
    pub user_id: i64,
    #[serde(flatten)]
    pub scores: ScoreResult,
    pub total_forecasts: usize,
}

#[derive(Default)]
struct MeanAccumulator {
    sum: ScoreResult,
    count: usize,
    forecasts: HashSet<i64>,
}

impl MeanAccumulator {
    fn add(&mut self, record: &ScoreRecord) {
        let s = &record.scores;
        self.sum.brier += s.brier;
        self.sum.log2 += s.log2;
        self.sum.logn += s.logn;
        self.sum.brier_time_weighted += s.brier_time_weighted;
        self.sum.log2_time_weighted += s.log2_time_weighted;
        self.sum.logn_time_weighted += s.logn_time_weighted;
        self.count += 1;
        self.forecasts.insert(record.forecast_id);
    }

    fn mean(&self) -> ScoreResult {
        if self.count == 0 {
            return ScoreResult::default();
        }

        let n = self.count as f64;
        ScoreResult {
            brier: self.sum.brier / n,
            log2: self.sum.log2 / n,
            logn: self.sum.logn / n,
            brier_time_weighted: self.sum.brier_time_weighted / n,
            log2_time_weighted: self.sum.log2_time_weighted / n,
            logn_time_weighted: self.sum.logn_time_weighted / n,
        }
    }
}

/// Average every metric over all records. Empty input yields zeros.
pub fn summarize(records: &[ScoreRecord]) -> OverallScores {
    let mut acc = MeanAccumulator::default();
    let mut users = HashSet::new();

    for record in records {
        acc.add(record);
        users.insert(record.user_id);
    }

    OverallScores {
        scores: acc.mean(),
        total_users: users.len(),
        total_forecasts: acc.forecasts.len(),
    }
}

/// Average every metric per user, ordered by user id.
pub fn summarize_by_user(records: &[ScoreRecord]) -> Vec<UserScores> {
    let mut by_user: BTreeMap<i64, MeanAccumulator> = BTreeMap::new();

    for record in records {
        by_user.entry(record.user_id).or_default().add(record);
    }

    by_user
        .into_iter()
        .map(|(user_id, acc)| UserScores {
            user_id,
            scores: acc.mean(),
            total_forecasts: acc.forecasts.len(),
        })
        .collect()
}
