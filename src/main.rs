use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use forecast_scorer::backfill::{BackfillOrchestrator, BackfillReport};
use forecast_scorer::calibration::{CalibrationCache, CalibrationFilters, CalibrationService};
use forecast_scorer::config::{Config, EnvConfig};
use forecast_scorer::monitoring::CsvLogger;
use forecast_scorer::scoring::summary::summarize;
use forecast_scorer::storage::types::ScoreFilters;
use forecast_scorer::storage::ScoreDatabase;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("Forecast scorer starting...");

    // Load configuration
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    tracing::info!("Loading configuration from {}", config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env(&EnvConfig::load()?);

    tracing::info!("Dry run mode: {}", config.backfill.dry_run);

    // Initialize database
    tracing::info!("Opening database: {}", config.system.database_path);
    let db = ScoreDatabase::new(&config.system.database_path)?;
    tracing::info!("Resolved forecasts: {}", db.count_resolved_forecasts()?);

    let csv_logger = if config.monitoring.csv_logging {
        Some(CsvLogger::new(config.monitoring.csv_log_path.clone())?)
    } else {
        None
    };

    let orchestrator = BackfillOrchestrator::new(config.backfill.clone(), csv_logger);
    let report = tokio::select! {
        report = orchestrator.run(&db) => report?,
        _ = tokio::signal::ctrl_c() => {
            let partial = BackfillReport {
                interrupted: true,
                ..orchestrator.progress()
            };
            tracing::error!(
                "Interrupted after {}/{} scores ({} succeeded, {} errors)",
                partial.succeeded + partial.errors,
                partial.total,
                partial.succeeded,
                partial.errors
            );
            std::process::exit(partial.exit_code());
        }
    };

    let overall = summarize(&db.get_score_records(&ScoreFilters::default())?);
    tracing::info!(
        "Platform averages: brier={:.4} (time-weighted {:.4}) over {} users, {} forecasts",
        overall.scores.brier,
        overall.scores.brier_time_weighted,
        overall.total_users,
        overall.total_forecasts
    );

    let cache = Arc::new(CalibrationCache::new(Duration::from_secs(
        config.cache.calibration_ttl_secs,
    )));
    let calibration = CalibrationService::new(cache);
    let data = calibration.get_calibration_data(&db, &CalibrationFilters::default())?;

    for bucket in &data.buckets {
        tracing::info!(
            "[{:.1}, {:.1}) predicted {:.3} actual {:.3} ({} predictions, {} forecasts)",
            bucket.bucket_start,
            bucket.bucket_end,
            bucket.avg_prediction,
            bucket.actual_rate,
            bucket.prediction_count,
            bucket.forecast_count
        );
    }

    if let Some(path) = &config.monitoring.calibration_report_path {
        let json = serde_json::to_string_pretty(&data)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write calibration report: {}", path))?;
        tracing::info!("Calibration report written to {}", path);
    }

    if report.errors > 0 {
        tracing::error!("Backfill finished with {} errors", report.errors);
        std::process::exit(report.exit_code());
    }

    tracing::info!("Done");
    Ok(())
}
