//! Accuracy scoring and calibration diagnostics for probabilistic forecasts.
//!
//! `scoring` and `calibration::aggregator` are pure and do no I/O. The
//! remaining modules fetch their inputs from SQLite and persist results.

pub mod backfill;
pub mod calibration;
pub mod config;
pub mod monitoring;
pub mod scoring;
pub mod storage;
