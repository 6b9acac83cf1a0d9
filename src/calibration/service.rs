use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use crate::calibration::aggregator::{aggregate, aggregate_by_group};
use crate::calibration::cache::{build_cache_key, cacheable_range_key, CachedCalibration, CalibrationCache};
use crate::calibration::types::{CalibrationData, CalibrationFilters, UserCalibrationData};
use crate::storage::ScoreDatabase;

const CACHE_PREFIX: &str = "calibration";
const CACHE_PREFIX_USERS: &str = "calibration:users";

/// Serves calibration queries, memoizing only ranges whose answer is fixed.
pub struct CalibrationService {
    cache: Arc<CalibrationCache>,
}

impl CalibrationService {
    pub fn new(cache: Arc<CalibrationCache>) -> Self {
        Self { cache }
    }

    pub fn get_calibration_data(
        &self,
        db: &ScoreDatabase,
        filters: &CalibrationFilters,
    ) -> Result<CalibrationData> {
        info!("Getting calibration data: {:?}", filters);

        let Some(range_key) = cacheable_range_key(filters.start_date, filters.end_date, Utc::now()) else {
            info!("Custom date range - skipping cache");
            let observations = db.get_calibration_observations(filters, false)?;
            return Ok(aggregate(&observations));
        };

        let cache_key = build_cache_key(CACHE_PREFIX, filters, &range_key);
        if let Some(CachedCalibration::Global(data)) = self.cache.get(&cache_key) {
            info!("Cache hit: {}", cache_key);
            return Ok(data);
        }
        info!("Cache miss: {}", cache_key);

        let observations = db.get_calibration_observations(filters, false)?;
        let data = aggregate(&observations);
        self.cache.insert(cache_key, CachedCalibration::Global(data.clone()));

        info!(
            "Calibration results: {} buckets, {} predictions",
            data.buckets.len(),
            data.total_predictions
        );
        Ok(data)
    }

    pub fn get_calibration_data_by_users(
        &self,
        db: &ScoreDatabase,
        filters: &CalibrationFilters,
    ) -> Result<Vec<UserCalibrationData>> {
        info!("Getting calibration data by users: {:?}", filters);

        let Some(range_key) = cacheable_range_key(filters.start_date, filters.end_date, Utc::now()) else {
            info!("Custom date range - skipping cache");
            let observations = db.get_calibration_observations(filters, true)?;
            return Ok(aggregate_by_group(&observations));
        };

        let cache_key = build_cache_key(CACHE_PREFIX_USERS, filters, &range_key);
        if let Some(CachedCalibration::ByUser(data)) = self.cache.get(&cache_key) {
            info!("Cache hit: {}", cache_key);
            return Ok(data);
        }
        info!("Cache miss: {}", cache_key);

        let observations = db.get_calibration_observations(filters, true)?;
        let data = aggregate_by_group(&observations);
        self.cache.insert(cache_key, CachedCalibration::ByUser(data.clone()));

        info!("Calibration by users results: {} users", data.len());
        Ok(data)
    }

    /// Resolve a forecast and drop cached calibration that predates it.
    /// Resolutions must go through here while this service is serving.
    pub fn record_resolution(
        &self,
        db: &ScoreDatabase,
        forecast_id: i64,
        outcome: bool,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        db.resolve_forecast(forecast_id, outcome, resolved_at)?;
        info!("Forecast {} resolved, invalidating calibration cache", forecast_id);
        self.invalidate();
        Ok(())
    }

    /// Drop all cached calibration. Callers that write resolutions
    /// directly to the store must call this afterwards.
    pub fn invalidate(&self) {
        info!("Invalidating cached calibration data");
        self.cache.invalidate_prefix(CACHE_PREFIX);
    }
}
