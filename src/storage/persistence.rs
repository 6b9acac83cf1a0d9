use anyhow::{bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::time::Instant;
use tracing::debug;
use crate::calibration::types::{CalibrationFilters, CalibrationObservation};
use crate::scoring::summary::ScoreRecord;
use crate::scoring::types::{ScoreResult, TimedEstimate};
use crate::storage::types::{Forecast, Resolution, ResolvedOutcome, ScoreFilters, ScoreToBackfill};

pub struct ScoreDatabase {
    conn: Connection,
}

impl ScoreDatabase {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Create tables
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                category TEXT,
                created TIMESTAMP NOT NULL,
                closing_date TIMESTAMP,
                resolved TIMESTAMP,
                resolution TEXT
            );

            CREATE TABLE IF NOT EXISTS points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                forecast_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                point_forecast REAL NOT NULL,
                created TIMESTAMP NOT NULL,
                FOREIGN KEY(forecast_id) REFERENCES forecasts(id)
            );

            CREATE TABLE IF NOT EXISTS scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                forecast_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                brier_score REAL NOT NULL,
                log2_score REAL NOT NULL,
                logn_score REAL NOT NULL,
                brier_score_time_weighted REAL NOT NULL,
                log2_score_time_weighted REAL NOT NULL,
                logn_score_time_weighted REAL NOT NULL,
                created TIMESTAMP NOT NULL,
                FOREIGN KEY(forecast_id) REFERENCES forecasts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_points_forecast_user ON points(forecast_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_points_created ON points(created);
            CREATE INDEX IF NOT EXISTS idx_scores_forecast_id ON scores(forecast_id);
            CREATE INDEX IF NOT EXISTS idx_scores_user_id ON scores(user_id);
            "#
        )?;

        Ok(Self { conn })
    }

    /// Insert new forecast
    pub fn insert_forecast(&self, forecast: &Forecast) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO forecasts (question, category, created, closing_date, resolved, resolution)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                forecast.question,
                forecast.category,
                format_timestamp(forecast.created),
                forecast.closing_date.map(format_timestamp),
                forecast.resolved.map(format_timestamp),
                forecast.resolution,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_forecast(&self, id: i64) -> Result<Option<Forecast>> {
        let forecast = self.conn.query_row(
            "SELECT id, question, category, created, closing_date, resolved, resolution
             FROM forecasts
             WHERE id = ?1",
            params![id],
            |row| {
                Ok(Forecast {
                    id: Some(row.get(0)?),
                    question: row.get(1)?,
                    category: row.get(2)?,
                    created: timestamp_column(row, 3)?,
                    closing_date: optional_timestamp_column(row, 4)?,
                    resolved: optional_timestamp_column(row, 5)?,
                    resolution: row.get(6)?,
                })
            },
        ).optional()?;

        Ok(forecast)
    }

    /// Record the final truth value of a forecast
    pub fn resolve_forecast(&self, id: i64, outcome: bool, resolved_at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE forecasts SET resolution = ?1, resolved = ?2 WHERE id = ?3",
            params![Resolution::from(outcome).as_str(), format_timestamp(resolved_at), id],
        )?;

        if updated == 0 {
            bail!("Forecast {} not found", id);
        }
        Ok(())
    }

    /// Insert a probability update
    pub fn insert_point(&self, forecast_id: i64, user_id: i64, estimate: &TimedEstimate) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO points (forecast_id, user_id, point_forecast, created)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                forecast_id,
                user_id,
                estimate.probability,
                format_timestamp(estimate.observed_at),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// All estimates a user made on a forecast, oldest first.
    /// Boundary values (exactly 0 or 1) are returned as stored.
    pub fn get_points(&self, forecast_id: i64, user_id: i64) -> Result<Vec<TimedEstimate>> {
        let mut stmt = self.conn.prepare(
            "SELECT point_forecast, created
             FROM points
             WHERE forecast_id = ?1 AND user_id = ?2
             ORDER BY created ASC, id ASC"
        )?;

        let points = stmt.query_map(params![forecast_id, user_id], |row| {
            Ok(TimedEstimate {
                probability: row.get(0)?,
                observed_at: timestamp_column(row, 1)?,
            })
        })?;

        points.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Outcome and resolution time, or `None` when the forecast is not
    /// resolved to a recognized value.
    pub fn get_resolution(&self, forecast_id: i64) -> Result<Option<ResolvedOutcome>> {
        let row: Option<(Option<String>, Option<DateTime<Utc>>)> = self.conn.query_row(
            "SELECT resolution, resolved FROM forecasts WHERE id = ?1",
            params![forecast_id],
            |row| Ok((row.get(0)?, optional_timestamp_column(row, 1)?)),
        ).optional()?;

        let Some((resolution, resolved)) = row else {
            bail!("Forecast {} not found", forecast_id);
        };

        Ok(match (Resolution::parse(resolution.as_deref()), resolved) {
            (Some(resolution), Some(resolved_at)) => Some(ResolvedOutcome {
                outcome: resolution.outcome(),
                resolved_at,
            }),
            _ => None,
        })
    }

    /// Insert a computed score
    pub fn insert_score(&self, record: &ScoreRecord) -> Result<i64> {
        let s = &record.scores;
        self.conn.execute(
            "INSERT INTO scores (forecast_id, user_id, brier_score, log2_score, logn_score,
                                 brier_score_time_weighted, log2_score_time_weighted,
                                 logn_score_time_weighted, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.forecast_id,
                record.user_id,
                s.brier,
                s.log2,
                s.logn,
                s.brier_time_weighted,
                s.log2_time_weighted,
                s.logn_time_weighted,
                format_timestamp(record.created_at),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite all six score columns
    pub fn update_score(&self, id: i64, scores: &ScoreResult) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE scores
             SET brier_score = ?1, log2_score = ?2, logn_score = ?3,
                 brier_score_time_weighted = ?4, log2_score_time_weighted = ?5,
                 logn_score_time_weighted = ?6
             WHERE id = ?7",
            params![
                scores.brier,
                scores.log2,
                scores.logn,
                scores.brier_time_weighted,
                scores.log2_time_weighted,
                scores.logn_time_weighted,
                id,
            ],
        )?;

        if updated == 0 {
            bail!("Score {} not found", id);
        }
        Ok(())
    }

    /// Score rows on forecasts that have a resolution time
    pub fn get_scores_to_backfill(&self) -> Result<Vec<ScoreToBackfill>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.user_id, s.forecast_id, f.created
             FROM scores s
             JOIN forecasts f ON s.forecast_id = f.id
             WHERE f.resolved IS NOT NULL
             ORDER BY s.id"
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ScoreToBackfill {
                score_id: row.get(0)?,
                user_id: row.get(1)?,
                forecast_id: row.get(2)?,
                forecast_created: timestamp_column(row, 3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Stored score rows, newest first
    pub fn get_score_records(&self, filters: &ScoreFilters) -> Result<Vec<ScoreRecord>> {
        let mut conditions = vec!["1=1".to_string()];
        let mut args: Vec<Value> = Vec::new();

        if let Some(user_id) = filters.user_id {
            conditions.push("s.user_id = ?".to_string());
            args.push(Value::Integer(user_id));
        }
        if let Some(forecast_id) = filters.forecast_id {
            conditions.push("s.forecast_id = ?".to_string());
            args.push(Value::Integer(forecast_id));
        }
        if let Some(category) = &filters.category {
            conditions.push("lower(f.category) LIKE ?".to_string());
            args.push(Value::Text(format!("%{}%", category.to_lowercase())));
        }

        let query = format!(
            "SELECT s.id, s.user_id, s.forecast_id, s.brier_score, s.log2_score, s.logn_score,
                    s.brier_score_time_weighted, s.log2_score_time_weighted,
                    s.logn_score_time_weighted, s.created
             FROM scores s
             LEFT JOIN forecasts f ON s.forecast_id = f.id
             WHERE {}
             ORDER BY s.created DESC, s.id DESC",
            conditions.join(" AND ")
        );

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(ScoreRecord {
                id: Some(row.get(0)?),
                user_id: row.get(1)?,
                forecast_id: row.get(2)?,
                scores: ScoreResult {
                    brier: row.get(3)?,
                    log2: row.get(4)?,
                    logn: row.get(5)?,
                    brier_time_weighted: row.get(6)?,
                    log2_time_weighted: row.get(7)?,
                    logn_time_weighted: row.get(8)?,
                },
                created_at: timestamp_column(row, 9)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// One observation per estimate on a forecast resolved to 0 or 1
    pub fn get_calibration_observations(
        &self,
        filters: &CalibrationFilters,
        group_by_user: bool,
    ) -> Result<Vec<CalibrationObservation>> {
        let mut conditions = vec!["f.resolution IN ('0', '1')".to_string()];
        let mut args: Vec<Value> = Vec::new();

        if let Some(user_id) = filters.user_id {
            conditions.push("p.user_id = ?".to_string());
            args.push(Value::Integer(user_id));
        }
        if let Some(category) = &filters.category {
            conditions.push("lower(f.category) LIKE ?".to_string());
            args.push(Value::Text(format!("%{}%", category.to_lowercase())));
        }
        if let Some(start) = filters.start_date {
            conditions.push("p.created >= ?".to_string());
            args.push(Value::Text(format_timestamp(start)));
        }
        if let Some(end) = filters.end_date {
            conditions.push("p.created <= ?".to_string());
            args.push(Value::Text(format_timestamp(end)));
        }

        let query = format!(
            "SELECT p.point_forecast, p.user_id, p.forecast_id,
                    CASE WHEN f.resolution = '1' THEN 1 ELSE 0 END AS outcome
             FROM points p
             INNER JOIN forecasts f ON p.forecast_id = f.id
             WHERE {}
             ORDER BY p.forecast_id, p.created, p.id",
            conditions.join(" AND ")
        );

        let started = Instant::now();
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let user_id: i64 = row.get(1)?;
            let outcome: i64 = row.get(3)?;
            Ok(CalibrationObservation {
                probability: row.get(0)?,
                outcome: outcome == 1,
                forecast_id: row.get(2)?,
                group_key: group_by_user.then_some(user_id),
            })
        })?;

        let observations = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Calibration query returned {} observations in {:?}",
            observations.len(),
            started.elapsed()
        );
        Ok(observations)
    }

    /// Count forecasts resolved to a recognized value
    pub fn count_resolved_forecasts(&self) -> Result<usize> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM forecasts WHERE resolution IN ('0', '1') AND resolved IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw, idx)
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s, idx)).transpose()
}

fn parse_timestamp(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn forecast(category: &str) -> Forecast {
        Forecast {
            id: None,
            question: "Will it happen?".to_string(),
            category: Some(category.to_string()),
            created: day(1),
            closing_date: Some(day(5)),
            resolved: None,
            resolution: None,
        }
    }

    fn db() -> ScoreDatabase {
        ScoreDatabase::new(":memory:").unwrap()
    }

    #[test]
    fn test_forecast_round_trip_and_resolve() {
        let db = db();
        let id = db.insert_forecast(&forecast("Politics")).unwrap();

        assert_eq!(db.get_resolution(id).unwrap(), None);

        db.resolve_forecast(id, true, day(10)).unwrap();
        let stored = db.get_forecast(id).unwrap().unwrap();
        assert_eq!(stored.resolution.as_deref(), Some("1"));
        assert_eq!(stored.resolved, Some(day(10)));
        assert_eq!(stored.closing_date, Some(day(5)));

        assert_eq!(
            db.get_resolution(id).unwrap(),
            Some(ResolvedOutcome { outcome: true, resolved_at: day(10) })
        );
        assert_eq!(db.count_resolved_forecasts().unwrap(), 1);
    }

    #[test]
    fn test_unrecognized_resolution_is_unscoreable() {
        let db = db();
        let mut f = forecast("Sports");
        f.resolved = Some(day(9));
        f.resolution = Some("-".to_string());
        let id = db.insert_forecast(&f).unwrap();

        assert_eq!(db.get_resolution(id).unwrap(), None);
        assert!(db.get_resolution(id + 100).is_err());
        assert!(db.resolve_forecast(id + 100, false, day(9)).is_err());
    }

    #[test]
    fn test_points_ordered_and_boundaries_kept() {
        let db = db();
        let id = db.insert_forecast(&forecast("Science")).unwrap();

        db.insert_point(id, 1, &TimedEstimate::new(0.6, day(3))).unwrap();
        db.insert_point(id, 1, &TimedEstimate::new(1.0, day(2))).unwrap();
        db.insert_point(id, 2, &TimedEstimate::new(0.4, day(2))).unwrap();

        let points = db.get_points(id, 1).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], TimedEstimate::new(1.0, day(2)));
        assert_eq!(points[1], TimedEstimate::new(0.6, day(3)));
    }

    #[test]
    fn test_scores_insert_update_and_filter() {
        let db = db();
        let politics = db.insert_forecast(&forecast("Politics")).unwrap();
        let sports = db.insert_forecast(&forecast("Sports")).unwrap();

        let record = |forecast_id, user_id| ScoreRecord {
            id: None,
            user_id,
            forecast_id,
            scores: ScoreResult::default(),
            created_at: day(12),
        };
        let first = db.insert_score(&record(politics, 1)).unwrap();
        db.insert_score(&record(sports, 1)).unwrap();
        db.insert_score(&record(sports, 2)).unwrap();

        let updated = ScoreResult { brier: 0.25, ..ScoreResult::default() };
        db.update_score(first, &updated).unwrap();
        assert!(db.update_score(999, &updated).is_err());

        let by_category = db
            .get_score_records(&ScoreFilters { category: Some("POLIT".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].scores.brier, 0.25);

        let by_user = db
            .get_score_records(&ScoreFilters { user_id: Some(1), ..Default::default() })
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let all = db.get_score_records(&ScoreFilters::default()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_scores_to_backfill_need_resolution_time() {
        let db = db();
        let open = db.insert_forecast(&forecast("A")).unwrap();
        let closed = db.insert_forecast(&forecast("B")).unwrap();
        db.resolve_forecast(closed, false, day(20)).unwrap();

        let record = |forecast_id| ScoreRecord {
            id: None,
            user_id: 3,
            forecast_id,
            scores: ScoreResult::default(),
            created_at: day(21),
        };
        db.insert_score(&record(open)).unwrap();
        db.insert_score(&record(closed)).unwrap();

        let rows = db.get_scores_to_backfill().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].forecast_id, closed);
        assert_eq!(rows[0].forecast_created, day(1));
    }

    #[test]
    fn test_calibration_observations_filters() {
        let db = db();
        let yes = db.insert_forecast(&forecast("Economy")).unwrap();
        let no = db.insert_forecast(&forecast("Weather")).unwrap();
        let open = db.insert_forecast(&forecast("Economy")).unwrap();
        db.resolve_forecast(yes, true, day(20)).unwrap();
        db.resolve_forecast(no, false, day(20)).unwrap();

        db.insert_point(yes, 1, &TimedEstimate::new(0.7, day(2))).unwrap();
        db.insert_point(yes, 2, &TimedEstimate::new(0.8, day(4))).unwrap();
        db.insert_point(no, 1, &TimedEstimate::new(0.3, day(6))).unwrap();
        db.insert_point(open, 1, &TimedEstimate::new(0.5, day(6))).unwrap();

        let all = db.get_calibration_observations(&CalibrationFilters::default(), false).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|o| o.group_key.is_none()));
        assert_eq!(all.iter().filter(|o| o.outcome).count(), 2);

        let grouped = db.get_calibration_observations(&CalibrationFilters::default(), true).unwrap();
        assert!(grouped.iter().all(|o| o.group_key.is_some()));

        let economy = db
            .get_calibration_observations(
                &CalibrationFilters { category: Some("econ".to_string()), ..Default::default() },
                false,
            )
            .unwrap();
        assert_eq!(economy.len(), 2);

        let user_one = db
            .get_calibration_observations(
                &CalibrationFilters { user_id: Some(1), ..Default::default() },
                false,
            )
            .unwrap();
        assert_eq!(user_one.len(), 2);

        let ranged = db
            .get_calibration_observations(
                &CalibrationFilters {
                    start_date: Some(day(3)),
                    end_date: Some(day(6)),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(ranged.len(), 2);
        assert!(ranged.iter().all(|o| o.probability != 0.7));
    }
}
