use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historical estimate on a resolved forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationObservation {
    pub probability: f64,
    pub outcome: bool,
    pub forecast_id: i64,
    /// User id when aggregating per user.
    pub group_key: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub prediction_count: usize,
    pub avg_prediction: f64,
    pub actual_rate: f64,
    pub forecast_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationData {
    pub buckets: Vec<CalibrationBucket>,
    pub total_predictions: usize,
    pub total_forecasts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCalibrationData {
    pub user_id: i64,
    pub buckets: Vec<CalibrationBucket>,
    pub total_predictions: usize,
    pub total_forecasts: usize,
}

/// Filters applied when selecting observations from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFilters {
    pub user_id: Option<i64>,
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}
