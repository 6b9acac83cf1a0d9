use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_calibration_ttl")]
    pub calibration_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            calibration_ttl_secs: default_calibration_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_log_path")]
    pub csv_log_path: String,
    #[serde(default)]
    pub calibration_report_path: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            csv_logging: false,
            csv_log_path: default_csv_log_path(),
            calibration_report_path: None,
        }
    }
}

fn default_progress_interval() -> usize { 10 }
fn default_calibration_ttl() -> u64 { 600 }
fn default_csv_log_path() -> String { "backfill_scores.csv".to_string() }

/// Overrides read from `.env` / the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub database_path: Option<String>,
    pub dry_run: Option<bool>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Environment values win over the file
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(path) = &env.database_path {
            self.system.database_path = path.clone();
        }
        if let Some(dry_run) = env.dry_run {
            self.backfill.dry_run = dry_run;
        }
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let dry_run = match std::env::var("DRY_RUN") {
            Ok(raw) => Some(
                raw.parse::<bool>()
                    .with_context(|| format!("DRY_RUN must be true or false, got {}", raw))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_path: std::env::var("SCORER_DATABASE_PATH").ok(),
            dry_run,
        })
    }
}
