use chrono::{DateTime, Utc};
use crate::scoring::types::{ScoreResult, ScoreWindow, TimedEstimate, ValidationError};

/// Spans shorter than this fall back to equal weighting.
const MIN_WEIGHTED_SPAN_SECS: f64 = 1.0;

/// Per-estimate scores for a single probability against the outcome.
#[derive(Debug, Clone, Copy, Default)]
struct PointScores {
    brier: f64,
    log2: f64,
    logn: f64,
}

impl PointScores {
    fn for_probability(probability: f64, outcome: bool) -> Self {
        // Probability assigned to what actually happened
        let p_observed = if outcome { probability } else { 1.0 - probability };

        Self {
            brier: (1.0 - p_observed).powi(2),
            log2: p_observed.log2(),
            logn: p_observed.ln(),
        }
    }

    fn accumulate(&mut self, other: &PointScores, weight: f64) {
        self.brier += other.brier * weight;
        self.log2 += other.log2 * weight;
        self.logn += other.logn * weight;
    }
}

/// Score a forecaster's estimate sequence against the resolved outcome.
///
/// Produces the unweighted mean of each per-estimate score and the
/// time-weighted sum, where each estimate counts in proportion to how long
/// it was the forecaster's live prediction inside `window`.
pub fn calculate_scores(
    estimates: &[TimedEstimate],
    outcome: bool,
    window: &ScoreWindow,
) -> Result<ScoreResult, ValidationError> {
    let ordered = validated_chronological(estimates)?;
    let weights = held_weights(&ordered, window);
    let count = ordered.len() as f64;

    let mut naive = PointScores::default();
    let mut weighted = PointScores::default();

    for (estimate, weight) in ordered.iter().zip(&weights) {
        let point = PointScores::for_probability(estimate.probability, outcome);
        naive.accumulate(&point, 1.0);
        weighted.accumulate(&point, *weight);
    }

    Ok(ScoreResult {
        brier: naive.brier / count,
        log2: naive.log2 / count,
        logn: naive.logn / count,
        brier_time_weighted: weighted.brier,
        log2_time_weighted: weighted.log2,
        logn_time_weighted: weighted.logn,
    })
}

/// Time weights for each estimate, in chronological order. Sums to 1.0.
pub fn time_weights(
    estimates: &[TimedEstimate],
    window: &ScoreWindow,
) -> Result<Vec<f64>, ValidationError> {
    let ordered = validated_chronological(estimates)?;
    Ok(held_weights(&ordered, window))
}

fn validated_chronological(estimates: &[TimedEstimate]) -> Result<Vec<TimedEstimate>, ValidationError> {
    if estimates.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    // Logs are undefined at exactly 0 and 1; NaN fails both comparisons
    if let Some(bad) = estimates
        .iter()
        .find(|e| !(e.probability > 0.0 && e.probability < 1.0))
    {
        return Err(ValidationError::ProbabilityOutOfRange(bad.probability));
    }

    let mut ordered = estimates.to_vec();
    ordered.sort_by_key(|e| e.observed_at);
    Ok(ordered)
}

fn held_weights(ordered: &[TimedEstimate], window: &ScoreWindow) -> Vec<f64> {
    let count = ordered.len();
    let start = window.clamp(ordered[0].observed_at);
    let span = seconds_between(start, window.closes_at());

    if span < MIN_WEIGHTED_SPAN_SECS {
        return vec![1.0 / count as f64; count];
    }

    ordered
        .iter()
        .enumerate()
        .map(|(i, estimate)| {
            let held_from = window.clamp(estimate.observed_at);
            let held_until = ordered
                .get(i + 1)
                .map(|next| window.clamp(next.observed_at))
                .unwrap_or_else(|| window.closes_at());

            seconds_between(held_from, held_until) / span
        })
        .collect()
}

/// Full-precision seconds; spans too long for nanoseconds drop to micros.
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed = to - from;
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => match elapsed.num_microseconds() {
            Some(micros) => micros as f64 / 1e6,
            None => elapsed.num_milliseconds() as f64 / 1e3,
        },
    }
}
