pub mod aggregator;
pub mod cache;
pub mod service;
pub mod types;

pub use aggregator::{aggregate, aggregate_by_group};
pub use cache::CalibrationCache;
pub use service::CalibrationService;
pub use types::{CalibrationBucket, CalibrationData, CalibrationFilters, CalibrationObservation, UserCalibrationData};
