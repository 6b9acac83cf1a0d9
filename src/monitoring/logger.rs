use anyhow::Result;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use crate::scoring::types::ScoreResult;
use crate::storage::types::ScoreToBackfill;

/// Audit trail of recomputed scores, one CSV row per record.
pub struct CsvLogger {
    log_path: String,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;

            writeln!(
                file,
                "timestamp,score_id,forecast_id,user_id,brier,log2,logn,brier_tw,log2_tw,logn_tw,status"
            )?;
        }

        Ok(Self { log_path })
    }

    /// Log one backfilled score. `scores` is empty for skipped records.
    pub fn log_score(&self, row: &ScoreToBackfill, scores: Option<&ScoreResult>, status: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)?;

        let values = match scores {
            Some(s) => format!(
                "{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
                s.brier, s.log2, s.logn, s.brier_time_weighted, s.log2_time_weighted, s.logn_time_weighted
            ),
            None => ",,,,,".to_string(),
        };

        writeln!(
            file,
            "{},{},{},{},{},{}",
            Utc::now().to_rfc3339(),
            row.score_id,
            row.forecast_id,
            row.user_id,
            values,
            status.replace(',', ";")
        )?;

        Ok(())
    }

    /// Log a run-level event
    pub fn log_event(&self, event: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)?;

        writeln!(
            file,
            "{},EVENT,,,,,,,,,{}",
            Utc::now().to_rfc3339(),
            event.replace(',', ";")
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_path(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("{}-{}.csv", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_csv_rows() {
        let path = temp_path("score-log");
        let logger = CsvLogger::new(path.clone()).unwrap();

        let row = ScoreToBackfill {
            score_id: 4,
            forecast_id: 2,
            user_id: 9,
            forecast_created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let scores = ScoreResult { brier: 0.09, ..ScoreResult::default() };

        logger.log_score(&row, Some(&scores), "updated").unwrap();
        logger.log_score(&row, None, "skipped: no points, none").unwrap();
        logger.log_event("backfill complete").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("timestamp,score_id"));
        assert!(lines[1].contains(",4,2,9,0.090000,"));
        assert!(lines[2].ends_with("skipped: no points; none"));
        assert!(lines.iter().all(|l| l.split(',').count() == 11));

        std::fs::remove_file(&path).unwrap();
    }
}
