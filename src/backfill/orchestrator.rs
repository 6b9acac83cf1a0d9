use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};
use crate::config::BackfillConfig;
use crate::monitoring::CsvLogger;
use crate::scoring::{calculate_scores, ScoreResult, ScoreWindow, ValidationError};
use crate::storage::types::ScoreToBackfill;
use crate::storage::ScoreDatabase;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub total: usize,
    pub succeeded: usize,
    pub errors: usize,
    /// Set when the run was stopped before every row was visited
    pub interrupted: bool,
}

impl BackfillReport {
    /// 0 for a clean run, 1 when any row failed, 130 when interrupted
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.errors > 0 {
            1
        } else {
            0
        }
    }
}

#[derive(Default)]
struct Progress {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    errors: AtomicUsize,
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("No points found")]
    NoPoints,

    #[error("Forecast {0} has no valid resolution")]
    Unresolved(i64),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

/// Recomputes every stored score from its points and resolution.
pub struct BackfillOrchestrator {
    config: BackfillConfig,
    csv_logger: Option<CsvLogger>,
    progress: Progress,
}

impl BackfillOrchestrator {
    pub fn new(config: BackfillConfig, csv_logger: Option<CsvLogger>) -> Self {
        Self {
            config,
            csv_logger,
            progress: Progress::default(),
        }
    }

    /// Counts so far. Readable after `run` was cancelled mid-way.
    pub fn progress(&self) -> BackfillReport {
        BackfillReport {
            total: self.progress.total.load(Ordering::Relaxed),
            succeeded: self.progress.succeeded.load(Ordering::Relaxed),
            errors: self.progress.errors.load(Ordering::Relaxed),
            interrupted: false,
        }
    }

    /// Run over all scoreable rows. A failing record is counted and skipped.
    pub async fn run(&self, db: &ScoreDatabase) -> Result<BackfillReport> {
        info!("Starting score backfill (dry_run={})", self.config.dry_run);

        let rows = db.get_scores_to_backfill()?;
        let mut report = BackfillReport {
            total: rows.len(),
            ..Default::default()
        };
        info!("Found {} scores to backfill", report.total);
        self.progress.total.store(report.total, Ordering::Relaxed);
        self.progress.succeeded.store(0, Ordering::Relaxed);
        self.progress.errors.store(0, Ordering::Relaxed);

        let interval = self.config.progress_interval.max(1);

        for (i, row) in rows.iter().enumerate() {
            if i % interval == 0 {
                info!("Progress: {}/{}", i, report.total);
                tokio::task::yield_now().await;
            }

            match self.backfill_one(db, row) {
                Ok(scores) => {
                    report.succeeded += 1;
                    self.progress.succeeded.fetch_add(1, Ordering::Relaxed);
                    let status = if self.config.dry_run { "computed" } else { "updated" };
                    self.audit(row, Some(&scores), status);
                }
                Err(e) => {
                    warn!("Skipping score {} (forecast {}, user {}): {}", row.score_id, row.forecast_id, row.user_id, e);
                    report.errors += 1;
                    self.progress.errors.fetch_add(1, Ordering::Relaxed);
                    self.audit(row, None, &format!("error: {}", e));
                }
            }
        }

        info!(
            "Backfill complete: {} succeeded, {} errors",
            report.succeeded, report.errors
        );
        if let Some(logger) = &self.csv_logger {
            logger.log_event(&format!(
                "backfill complete: {} succeeded, {} errors",
                report.succeeded, report.errors
            ))?;
        }

        Ok(report)
    }

    fn backfill_one(&self, db: &ScoreDatabase, row: &ScoreToBackfill) -> Result<ScoreResult, BackfillError> {
        let points = db.get_points(row.forecast_id, row.user_id)?;
        if points.is_empty() {
            return Err(BackfillError::NoPoints);
        }

        let resolution = db
            .get_resolution(row.forecast_id)?
            .ok_or(BackfillError::Unresolved(row.forecast_id))?;

        let window = ScoreWindow::new(row.forecast_created, resolution.resolved_at)?;
        let scores = calculate_scores(&points, resolution.outcome, &window)?;

        if !self.config.dry_run {
            db.update_score(row.score_id, &scores)?;
        }

        Ok(scores)
    }

    fn audit(&self, row: &ScoreToBackfill, scores: Option<&ScoreResult>, status: &str) {
        if let Some(logger) = &self.csv_logger {
            if let Err(e) = logger.log_score(row, scores, status) {
                warn!("Failed to write CSV audit row: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use crate::scoring::summary::ScoreRecord;
    use crate::scoring::TimedEstimate;
    use crate::storage::types::{Forecast, ScoreFilters};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn add_forecast(db: &ScoreDatabase, resolution: Option<&str>) -> i64 {
        db.insert_forecast(&Forecast {
            id: None,
            question: "Q".to_string(),
            category: None,
            created: day(1),
            closing_date: None,
            resolved: Some(day(11)),
            resolution: resolution.map(str::to_string),
        })
        .unwrap()
    }

    fn add_score(db: &ScoreDatabase, forecast_id: i64, user_id: i64) -> i64 {
        db.insert_score(&ScoreRecord {
            id: None,
            user_id,
            forecast_id,
            scores: ScoreResult::default(),
            created_at: day(12),
        })
        .unwrap()
    }

    fn config(dry_run: bool) -> BackfillConfig {
        BackfillConfig {
            dry_run,
            progress_interval: 1,
        }
    }

    #[tokio::test]
    async fn test_backfill_updates_and_skips() {
        let db = ScoreDatabase::new(":memory:").unwrap();

        let good = add_forecast(&db, Some("1"));
        db.insert_point(good, 1, &TimedEstimate::new(0.9, day(1))).unwrap();
        db.insert_point(good, 1, &TimedEstimate::new(0.1, day(2))).unwrap();
        let good_score = add_score(&db, good, 1);

        // Boundary value stored upstream
        db.insert_point(good, 2, &TimedEstimate::new(1.0, day(3))).unwrap();
        add_score(&db, good, 2);

        // No points for this user
        add_score(&db, good, 3);

        // Unrecognized resolution
        let dash = add_forecast(&db, Some("-"));
        db.insert_point(dash, 1, &TimedEstimate::new(0.4, day(3))).unwrap();
        add_score(&db, dash, 1);

        let orchestrator = BackfillOrchestrator::new(config(false), None);
        let report = orchestrator.run(&db).await.unwrap();

        assert_eq!(report, BackfillReport { total: 4, succeeded: 1, errors: 3, interrupted: false });
        assert_eq!(orchestrator.progress(), report);
        assert_eq!(report.exit_code(), 1);

        let stored = db
            .get_score_records(&ScoreFilters { user_id: Some(1), forecast_id: Some(good), ..Default::default() })
            .unwrap();
        assert_eq!(stored[0].id, Some(good_score));
        assert!((stored[0].scores.brier - 0.41).abs() < 1e-9);
        assert!((stored[0].scores.brier_time_weighted - 0.73).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_rows_untouched() {
        let db = ScoreDatabase::new(":memory:").unwrap();
        let id = add_forecast(&db, Some("0"));
        db.insert_point(id, 1, &TimedEstimate::new(0.7, day(1))).unwrap();
        add_score(&db, id, 1);

        let report = BackfillOrchestrator::new(config(true), None).run(&db).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let stored = db.get_score_records(&ScoreFilters::default()).unwrap();
        assert_eq!(stored[0].scores, ScoreResult::default());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let db = ScoreDatabase::new(":memory:").unwrap();
        let report = BackfillOrchestrator::new(config(false), None).run(&db).await.unwrap();
        assert_eq!(report, BackfillReport::default());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_interrupted_run_exits_non_zero() {
        let clean = BackfillReport { total: 5, succeeded: 5, ..Default::default() };
        assert_eq!(clean.exit_code(), 0);

        let partial = BackfillReport { total: 5, succeeded: 2, interrupted: true, ..Default::default() };
        assert_eq!(partial.exit_code(), 130);

        let failed_and_interrupted = BackfillReport { errors: 1, interrupted: true, ..partial };
        assert_eq!(failed_and_interrupted.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_window_closes_at_latest_resolution_time() {
        let db = ScoreDatabase::new(":memory:").unwrap();
        let id = add_forecast(&db, Some("1"));
        db.insert_point(id, 1, &TimedEstimate::new(0.9, day(1))).unwrap();
        db.insert_point(id, 1, &TimedEstimate::new(0.1, day(2))).unwrap();
        add_score(&db, id, 1);

        // Resolution moved from day 11 to day 21
        db.resolve_forecast(id, true, day(21)).unwrap();

        let report = BackfillOrchestrator::new(config(false), None).run(&db).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let stored = db.get_score_records(&ScoreFilters::default()).unwrap();
        let expected = 0.01 * (1.0 / 20.0) + 0.81 * (19.0 / 20.0);
        assert!((stored[0].scores.brier_time_weighted - expected).abs() < 1e-9);
    }
}
