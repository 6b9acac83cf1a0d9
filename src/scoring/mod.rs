pub mod calculator;
pub mod summary;
pub mod types;

pub use calculator::{calculate_scores, time_weights};
pub use types::{ScoreResult, ScoreWindow, TimedEstimate, ValidationError};
