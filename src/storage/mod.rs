pub mod persistence;
pub mod types;

pub use persistence::ScoreDatabase;
