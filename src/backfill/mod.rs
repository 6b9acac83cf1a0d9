pub mod orchestrator;

pub use orchestrator::{BackfillError, BackfillOrchestrator, BackfillReport};
