use std::collections::{BTreeMap, HashSet};
use crate::calibration::types::{
    CalibrationBucket, CalibrationData, CalibrationObservation, UserCalibrationData,
};

const BUCKET_COUNT: usize = 10;
const BUCKET_WIDTH: f64 = 0.1;

/// Decile index for a probability. 1.0 folds into the last bucket.
pub fn bucket_index(probability: f64) -> usize {
    let raw = (probability * BUCKET_COUNT as f64).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(BUCKET_COUNT - 1)
    }
}

#[derive(Default)]
struct BucketAccumulator {
    count: usize,
    probability_sum: f64,
    outcome_sum: f64,
    forecasts: HashSet<i64>,
}

impl BucketAccumulator {
    fn add(&mut self, obs: &CalibrationObservation) {
        self.count += 1;
        self.probability_sum += obs.probability;
        if obs.outcome {
            self.outcome_sum += 1.0;
        }
        self.forecasts.insert(obs.forecast_id);
    }

    fn finish(self, index: usize) -> CalibrationBucket {
        let bucket_start = index as f64 / BUCKET_COUNT as f64;
        let n = self.count as f64;

        CalibrationBucket {
            bucket_start,
            bucket_end: bucket_start + BUCKET_WIDTH,
            prediction_count: self.count,
            avg_prediction: self.probability_sum / n,
            actual_rate: self.outcome_sum / n,
            forecast_count: self.forecasts.len(),
        }
    }
}

type Buckets = BTreeMap<usize, BucketAccumulator>;

fn emit(buckets: Buckets) -> CalibrationData {
    let buckets: Vec<CalibrationBucket> = buckets
        .into_iter()
        .map(|(index, acc)| acc.finish(index))
        .collect();

    // total_forecasts counts a forecast once per bucket it appears in
    let total_predictions = buckets.iter().map(|b| b.prediction_count).sum();
    let total_forecasts = buckets.iter().map(|b| b.forecast_count).sum();

    CalibrationData {
        buckets,
        total_predictions,
        total_forecasts,
    }
}

/// Bucket all observations into probability deciles.
pub fn aggregate(observations: &[CalibrationObservation]) -> CalibrationData {
    let mut buckets = Buckets::new();

    for obs in observations {
        buckets
            .entry(bucket_index(obs.probability))
            .or_default()
            .add(obs);
    }

    emit(buckets)
}

/// Bucket observations per group key, ordered by key then bucket.
/// Observations without a group key are left out.
pub fn aggregate_by_group(observations: &[CalibrationObservation]) -> Vec<UserCalibrationData> {
    let mut groups: BTreeMap<i64, Buckets> = BTreeMap::new();

    for obs in observations {
        let Some(user_id) = obs.group_key else {
            continue;
        };

        groups
            .entry(user_id)
            .or_default()
            .entry(bucket_index(obs.probability))
            .or_default()
            .add(obs);
    }

    groups
        .into_iter()
        .map(|(user_id, buckets)| {
            let data = emit(buckets);
            UserCalibrationData {
                user_id,
                buckets: data.buckets,
                total_predictions: data.total_predictions,
                total_forecasts: data.total_forecasts,
            }
        })
        .collect()
}
